//! Per-second throughput statistics.
//!
//! A ring of 61 one-second buckets indexed by `second % 61`. A bucket whose
//! stored second differs from the current one is stale and is zeroed before
//! anything is accumulated into it, so the ring never needs a sweep of its
//! own. Windows of the last 1, 10, and 60 seconds are computed on demand.

use tracing::info;

/// Number of one-second buckets in the ring.
pub const STATS_WINDOW_SECONDS: u64 = 61;

#[derive(Debug, Clone, Copy, Default)]
struct SecondBucket {
    second: u64,
    packets_received: u64,
    bytes_received: u64,
    packets_sent: u64,
    bytes_sent: u64,
}

/// Aggregated throughput over a window of seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThroughputTotals {
    /// Packets received in the window.
    pub packets_received: u64,
    /// Bytes received in the window.
    pub bytes_received: u64,
    /// Packets sent in the window.
    pub packets_sent: u64,
    /// Bytes sent in the window.
    pub bytes_sent: u64,
}

/// Ring of per-second throughput buckets.
#[derive(Debug)]
pub struct ThroughputRing {
    buckets: [SecondBucket; STATS_WINDOW_SECONDS as usize],
}

impl Default for ThroughputRing {
    fn default() -> Self {
        Self::new()
    }
}

impl ThroughputRing {
    /// Create an empty ring.
    pub fn new() -> Self {
        Self {
            buckets: [SecondBucket::default(); STATS_WINDOW_SECONDS as usize],
        }
    }

    fn bucket_mut(&mut self, now_secs: u64) -> &mut SecondBucket {
        let bucket = &mut self.buckets[(now_secs % STATS_WINDOW_SECONDS) as usize];
        if bucket.second != now_secs {
            *bucket = SecondBucket {
                second: now_secs,
                ..SecondBucket::default()
            };
        }
        bucket
    }

    /// Count one received packet of `bytes` bytes.
    pub fn record_received(&mut self, now_secs: u64, bytes: usize) {
        let bucket = self.bucket_mut(now_secs);
        bucket.packets_received += 1;
        bucket.bytes_received += bytes as u64;
    }

    /// Count one sent packet of `bytes` bytes.
    pub fn record_sent(&mut self, now_secs: u64, bytes: usize) {
        let bucket = self.bucket_mut(now_secs);
        bucket.packets_sent += 1;
        bucket.bytes_sent += bytes as u64;
    }

    /// Roll the current bucket forward without counting anything.
    ///
    /// Called on idle loop turns so a quiet second still overwrites its
    /// stale predecessor.
    pub fn touch(&mut self, now_secs: u64) {
        let _ = self.bucket_mut(now_secs);
    }

    /// Aggregate the last `n_seconds` whole seconds, ending with the second
    /// that just elapsed.
    pub fn window(&self, now_secs: u64, n_seconds: u64) -> ThroughputTotals {
        let n = n_seconds.clamp(1, STATS_WINDOW_SECONDS - 1);
        let mut totals = ThroughputTotals::default();
        for back in 1..=n {
            let Some(second) = now_secs.checked_sub(back) else {
                break;
            };
            let bucket = &self.buckets[(second % STATS_WINDOW_SECONDS) as usize];
            if bucket.second == second {
                totals.packets_received += bucket.packets_received;
                totals.bytes_received += bucket.bytes_received;
                totals.packets_sent += bucket.packets_sent;
                totals.bytes_sent += bucket.bytes_sent;
            }
        }
        totals
    }

    /// Log throughput for the last second plus 10 s and 60 s averages.
    pub fn log_report(&self, now_secs: u64) {
        let last = self.window(now_secs, 1);
        info!(
            "throughput last 1s: {} pkts / {} B in, {} pkts / {} B out",
            last.packets_received, last.bytes_received, last.packets_sent, last.bytes_sent
        );

        let ten = self.window(now_secs, 10);
        info!(
            "throughput 10s avg: {} pkts / {} B in, {} pkts / {} B out per second",
            ten.packets_received / 10,
            ten.bytes_received / 10,
            ten.packets_sent / 10,
            ten.bytes_sent / 10
        );

        let sixty = self.window(now_secs, 60);
        info!(
            "throughput 60s avg: {} pkts / {} B in, {} pkts / {} B out per second",
            sixty.packets_received / 60,
            sixty.bytes_received / 60,
            sixty.packets_sent / 60,
            sixty.bytes_sent / 60
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_is_zero_before_traffic() {
        let ring = ThroughputRing::new();
        for n in [1, 10, 60] {
            assert_eq!(ring.window(1000, n), ThroughputTotals::default());
        }
    }

    #[test]
    fn test_window_counts_exactly() {
        let mut ring = ThroughputRing::new();
        for second in 100..105 {
            ring.record_received(second, 32);
        }
        // Window ends with the second that just elapsed.
        let totals = ring.window(105, 10);
        assert_eq!(totals.packets_received, 5);
        assert_eq!(totals.bytes_received, 5 * 32);
        assert_eq!(totals.packets_sent, 0);
    }

    #[test]
    fn test_sent_and_received_are_separate() {
        let mut ring = ThroughputRing::new();
        ring.record_received(200, 10);
        ring.record_sent(200, 7);
        ring.record_sent(200, 7);
        let totals = ring.window(201, 1);
        assert_eq!(totals.packets_received, 1);
        assert_eq!(totals.bytes_received, 10);
        assert_eq!(totals.packets_sent, 2);
        assert_eq!(totals.bytes_sent, 14);
    }

    #[test]
    fn test_stale_bucket_is_replaced_after_wraparound() {
        let mut ring = ThroughputRing::new();
        ring.record_received(100, 64);
        // 161 maps to the same slot as 100; the old count must not leak in.
        ring.record_received(100 + STATS_WINDOW_SECONDS, 8);
        let totals = ring.window(100 + STATS_WINDOW_SECONDS + 1, 1);
        assert_eq!(totals.packets_received, 1);
        assert_eq!(totals.bytes_received, 8);
    }

    #[test]
    fn test_old_traffic_ages_out_of_short_windows() {
        let mut ring = ThroughputRing::new();
        ring.record_received(100, 16);
        assert_eq!(ring.window(150, 10), ThroughputTotals::default());
        let long = ring.window(150, 60);
        assert_eq!(long.packets_received, 1);
    }

    #[test]
    fn test_touch_clears_stale_slot() {
        let mut ring = ThroughputRing::new();
        ring.record_received(100, 16);
        ring.touch(100 + STATS_WINDOW_SECONDS);
        assert_eq!(
            ring.window(100 + STATS_WINDOW_SECONDS + 1, 60),
            ThroughputTotals::default()
        );
    }
}
