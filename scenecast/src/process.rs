//! Process bootstrap: CLI, root directory, lockfiles, logging, signals.
//!
//! The relay expects a root directory with `log/` and `status/`
//! subdirectories. One of 512 lockfile slots under `status/` is claimed
//! with an advisory write lock, so several instances can share the
//! directory without stepping on each other.

use std::cell::Cell;
use std::env;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use clap::{Arg, ArgAction, ArgMatches, Command};
use thiserror::Error;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::Registry;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;

/// Exit code for a failed bootstrap: bad root directory, lockfiles
/// exhausted, logging or signal installation failure.
pub const EXIT_INIT_FAILURE: i32 = 101;

/// Exit code when no port was given.
pub const EXIT_MISSING_PORT: i32 = 102;

/// Exit code when the listen socket could not be created.
pub const EXIT_LISTEN_FAILURE: i32 = 104;

/// Number of lockfile slots probed under `status/`.
pub const MAX_LOCKFILE_SLOTS: u32 = 512;

/// Errors that abort startup before the event loop ever runs.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Neither `--rootdir` nor the `ROOTDIR` environment variable is set.
    #[error("ROOTDIR is not set; pass --rootdir or set the environment variable")]
    RootDirUnset,

    /// The root directory lacks a required subdirectory.
    #[error("root directory {} is missing the {}/ subdirectory", .0.display(), .1)]
    MissingSubdir(PathBuf, &'static str),

    /// Every lockfile slot is held by another process.
    #[error("no free lockfile slot of {} in {}", MAX_LOCKFILE_SLOTS, .0.display())]
    LockfilesExhausted(PathBuf),

    /// The tracing subscriber could not be installed.
    #[error("could not install the log subscriber: {0}")]
    Logging(String),

    /// Any other I/O failure during startup.
    #[error("startup I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Parsed command line.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// TCP port to listen on; absent means exit code 102.
    pub port: Option<u16>,
    /// Root directory override; falls back to `$ROOTDIR`.
    pub rootdir: Option<PathBuf>,
    /// Start at trace log level.
    pub trace: bool,
    /// Foreground debug mode: log to stderr instead of the log file.
    pub debug: bool,
}

impl CliArgs {
    /// Parse the process arguments.
    pub fn parse() -> Self {
        Self::from_matches(Self::command().get_matches())
    }

    fn command() -> Command {
        Command::new("scenecast")
            .about("Publish/subscribe relay for augmented-reality scenes")
            .arg(
                Arg::new("port")
                    .short('p')
                    .long("port")
                    .value_name("PORT")
                    .value_parser(clap::value_parser!(u16))
                    .help("TCP port to listen on"),
            )
            .arg(
                Arg::new("rootdir")
                    .long("rootdir")
                    .value_name("DIR")
                    .help("Working root containing log/ and status/ (defaults to $ROOTDIR)"),
            )
            .arg(
                Arg::new("trace")
                    .long("trace")
                    .action(ArgAction::SetTrue)
                    .help("Enable trace level logging (toggle at runtime with SIGUSR2)"),
            )
            .arg(
                Arg::new("debug")
                    .short('D')
                    .long("debug")
                    .action(ArgAction::SetTrue)
                    .help("Log to stderr instead of the log file"),
            )
    }

    fn from_matches(matches: ArgMatches) -> Self {
        Self {
            port: matches.get_one::<u16>("port").copied(),
            rootdir: matches.get_one::<String>("rootdir").map(PathBuf::from),
            trace: matches.get_flag("trace"),
            debug: matches.get_flag("debug"),
        }
    }
}

/// Resolve and validate the root directory.
pub fn resolve_rootdir(args: &CliArgs) -> Result<PathBuf, BootstrapError> {
    let root = args
        .rootdir
        .clone()
        .or_else(|| env::var_os("ROOTDIR").map(PathBuf::from))
        .ok_or(BootstrapError::RootDirUnset)?;
    for sub in ["log", "status"] {
        if !root.join(sub).is_dir() {
            return Err(BootstrapError::MissingSubdir(root, sub));
        }
    }
    Ok(root)
}

/// The acquired lockfile slot; it frees when this is dropped.
pub struct ProcessLock {
    _file: File,
    path: PathBuf,
}

impl ProcessLock {
    /// Path of the acquired lockfile.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Claim the first free lockfile slot `<name>.<N>` under `status_dir`.
///
/// A slot is free when its file can be opened and advisorily write-locked;
/// the pid is then written into it. Slots held by live processes fail the
/// lock and are skipped.
pub fn acquire_lockfile(status_dir: &Path, name: &str) -> Result<ProcessLock, BootstrapError> {
    for slot in 1..=MAX_LOCKFILE_SLOTS {
        let path = status_dir.join(format!("{name}.{slot}"));
        let Ok(file) = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
        else {
            continue;
        };
        if file.try_lock().is_err() {
            continue;
        }
        file.set_len(0)?;
        writeln!(&file, "{}", std::process::id())?;
        return Ok(ProcessLock { _file: file, path });
    }
    Err(BootstrapError::LockfilesExhausted(status_dir.to_path_buf()))
}

enum LogTarget {
    Stderr,
    File { file: File, path: PathBuf },
}

/// A log sink that can be reopened at runtime (SIGHUP after rotation).
#[derive(Clone)]
pub struct LogSink {
    target: Arc<Mutex<LogTarget>>,
}

impl LogSink {
    fn stderr() -> Self {
        Self {
            target: Arc::new(Mutex::new(LogTarget::Stderr)),
        }
    }

    fn file(path: PathBuf) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            target: Arc::new(Mutex::new(LogTarget::File { file, path })),
        })
    }

    /// Reopen the log file after rotation; a no-op for stderr.
    pub fn reopen(&self) -> io::Result<()> {
        let mut target = self
            .target
            .lock()
            .map_err(|_| io::Error::other("log sink poisoned"))?;
        if let LogTarget::File { file, path } = &mut *target {
            *file = OpenOptions::new().create(true).append(true).open(&*path)?;
        }
        Ok(())
    }
}

/// The writer handed to the subscriber for every log line.
pub struct LogWriter {
    target: Arc<Mutex<LogTarget>>,
}

impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.target.lock() {
            Ok(mut target) => match &mut *target {
                LogTarget::Stderr => io::stderr().write(buf),
                LogTarget::File { file, .. } => file.write(buf),
            },
            Err(_) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.target.lock() {
            Ok(mut target) => match &mut *target {
                LogTarget::Stderr => io::stderr().flush(),
                LogTarget::File { file, .. } => file.flush(),
            },
            Err(_) => Ok(()),
        }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogSink {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            target: self.target.clone(),
        }
    }
}

/// Runtime handles over the installed subscriber.
pub struct LogControls {
    sink: LogSink,
    reload: reload::Handle<EnvFilter, Registry>,
    trace: Cell<bool>,
}

impl LogControls {
    /// Flip between info and trace level (SIGUSR2).
    pub fn toggle_trace(&self) {
        let trace = !self.trace.get();
        self.trace.set(trace);
        let directive = if trace { "trace" } else { "info" };
        if self.reload.reload(EnvFilter::new(directive)).is_err() {
            warn!("could not switch the log level");
            return;
        }
        info!("log level now {}", directive);
    }

    /// Reopen the log file (SIGHUP).
    pub fn reopen_log(&self) {
        match self.sink.reopen() {
            Ok(()) => info!("log file reopened"),
            Err(e) => warn!("could not reopen the log file: {}", e),
        }
    }
}

/// Install the tracing subscriber.
///
/// Logs go to `log_file` when given, to stderr otherwise; the level filter
/// sits behind a reload handle so SIGUSR2 can toggle it.
pub fn init_logging(
    log_file: Option<PathBuf>,
    trace: bool,
) -> Result<LogControls, BootstrapError> {
    let sink = match log_file {
        Some(path) => LogSink::file(path)?,
        None => LogSink::stderr(),
    };
    let directive = if trace { "trace" } else { "info" };
    let (filter, handle) = reload::Layer::new(EnvFilter::new(directive));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(sink.clone()),
        )
        .try_init()
        .map_err(|e| BootstrapError::Logging(e.to_string()))?;
    Ok(LogControls {
        sink,
        reload: handle,
        trace: Cell::new(trace),
    })
}

/// Installed unix signal listeners.
pub struct SignalHooks {
    sigterm: Signal,
    sigint: Signal,
    sigusr2: Signal,
    sighup: Signal,
}

impl SignalHooks {
    /// Install listeners for the signals the relay reacts to.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
            sigusr2: signal(SignalKind::user_defined2())?,
            sighup: signal(SignalKind::hangup())?,
        })
    }

    /// React to signals until the process goes down.
    ///
    /// SIGTERM/SIGINT set the shutdown flag the event loop watches every
    /// turn; SIGUSR2 toggles trace logging; SIGHUP reopens the log file.
    pub async fn watch(mut self, shutdown: Rc<Cell<bool>>, controls: Rc<LogControls>) {
        loop {
            tokio::select! {
                _ = self.sigterm.recv() => {
                    info!("received SIGTERM");
                    shutdown.set(true);
                }
                _ = self.sigint.recv() => {
                    info!("received SIGINT");
                    shutdown.set(true);
                }
                _ = self.sigusr2.recv() => controls.toggle_trace(),
                _ = self.sighup.recv() => controls.reopen_log(),
            }
        }
    }
}
