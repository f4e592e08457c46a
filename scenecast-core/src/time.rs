//! Time provider abstraction for real and test-controlled time.

use std::time::Duration;

use async_trait::async_trait;

/// Provider trait for time operations.
///
/// `now()` returns a monotonic reading as a `Duration` since provider
/// creation; all relay timekeeping (receive/send stamps, idle sweeps, the
/// poll cap) works in that coordinate system, so tests can fast-forward a
/// manual clock without touching the wall clock.
#[async_trait(?Send)]
pub trait TimeProvider: Clone {
    /// Sleep for the specified duration.
    async fn sleep(&self, duration: Duration);

    /// Get the current time as elapsed duration since provider creation.
    fn now(&self) -> Duration;
}

/// Real time provider using Tokio's time facilities.
#[derive(Debug, Clone)]
pub struct TokioTimeProvider {
    /// Start time for calculating elapsed duration
    start_time: std::time::Instant,
}

impl TokioTimeProvider {
    /// Create a new Tokio time provider.
    pub fn new() -> Self {
        Self {
            start_time: std::time::Instant::now(),
        }
    }
}

impl Default for TokioTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl TimeProvider for TokioTimeProvider {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> Duration {
        self.start_time.elapsed()
    }
}
