//! Server binary entry point.

use std::rc::Rc;

use scenecast::process::{
    self as bootstrap, CliArgs, EXIT_INIT_FAILURE, EXIT_LISTEN_FAILURE, EXIT_MISSING_PORT,
    SignalHooks,
};
use scenecast::{RelayConfig, RelayServer};
use scenecast_core::TokioProviders;
use tracing::{error, info};

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let args = CliArgs::parse();
    let Some(port) = args.port else {
        eprintln!("No port given for server!");
        eprintln!("usage: scenecast -p <port>");
        return EXIT_MISSING_PORT;
    };

    let root = match bootstrap::resolve_rootdir(&args) {
        Ok(root) => root,
        Err(e) => {
            eprintln!("{e}");
            return EXIT_INIT_FAILURE;
        }
    };

    let lock = match bootstrap::acquire_lockfile(&root.join("status"), "scenecast") {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("{e}");
            return EXIT_INIT_FAILURE;
        }
    };

    let log_file = (!args.debug).then(|| root.join("log").join("scenecast.log"));
    let controls = match bootstrap::init_logging(log_file, args.trace) {
        Ok(controls) => Rc::new(controls),
        Err(e) => {
            eprintln!("{e}");
            return EXIT_INIT_FAILURE;
        }
    };

    info!(
        "scenecast {} starting, port {}, lockfile {}",
        env!("CARGO_PKG_VERSION"),
        port,
        lock.path().display()
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("could not build the runtime: {}", e);
            return EXIT_INIT_FAILURE;
        }
    };

    let local = tokio::task::LocalSet::new();
    runtime.block_on(local.run_until(async move {
        let signals = match SignalHooks::install() {
            Ok(signals) => signals,
            Err(e) => {
                error!("could not install signal handlers: {}", e);
                return EXIT_INIT_FAILURE;
            }
        };

        let providers = TokioProviders::new();
        let mut server = match RelayServer::bind(providers, RelayConfig::new(port)).await {
            Ok(server) => server,
            Err(e) => {
                error!("cannot create listen socket on TCP port {}: {}", port, e);
                return EXIT_LISTEN_FAILURE;
            }
        };

        tokio::task::spawn_local(signals.watch(server.shutdown_handle(), controls));
        server.run().await;
        info!("going down");
        0
    }))
}
