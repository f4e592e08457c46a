//! Configuration for the relay server.

use std::time::Duration;

/// Configuration for relay behavior and timing parameters.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Address the listener binds to.
    pub bind_addr: String,

    /// TCP port to listen on; 0 asks the kernel for an ephemeral port.
    pub port: u16,

    /// Accept backlog for the listen socket.
    pub listen_backlog: u32,

    /// A connection silent for longer than this is reaped; probes go out
    /// after a quarter of it.
    pub idle_timeout: Duration,

    /// Upper bound on one readiness wait, so periodic work is never starved.
    pub poll_interval: Duration,

    /// Interval between periodic passes (status line, throughput dump,
    /// idle sweep).
    pub periodic_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 0,
            listen_backlog: 511,
            idle_timeout: Duration::from_secs(3 * 60),
            poll_interval: Duration::from_millis(100),
            periodic_interval: Duration::from_secs(60),
        }
    }
}

impl RelayConfig {
    /// Create a configuration listening on the given port.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// The full listen address handed to the network provider.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}
