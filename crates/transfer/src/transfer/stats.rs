use std::time::{Duration, Instant};

pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSample {
    pub speed_mbps: f64,
    pub eta_seconds: Option<f64>,
    pub elapsed_seconds: f64,
}

/// Throughput sampler for one session.
///
/// Speed is the byte delta since the previous sample over the time between
/// them; ETA extrapolates that rate over the remaining bytes.
#[derive(Debug, Clone)]
pub struct TransferMeter {
    started_at: Instant,
    last_sample_at: Instant,
    bytes_at_last_sample: u64,
    transferred: u64,
    total: u64,
}

impl TransferMeter {
    pub fn new(total: u64, now: Instant) -> Self {
        Self {
            started_at: now,
            last_sample_at: now,
            bytes_at_last_sample: 0,
            transferred: 0,
            total,
        }
    }

    pub fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Adds `bytes` and returns a sample once [`SAMPLE_INTERVAL`] has passed.
    pub fn record(&mut self, bytes: u64, now: Instant) -> Option<StatsSample> {
        self.transferred = self.transferred.saturating_add(bytes);
        let since_last = now.saturating_duration_since(self.last_sample_at);
        if since_last < SAMPLE_INTERVAL {
            return None;
        }

        let delta = self.transferred.saturating_sub(self.bytes_at_last_sample);
        let bytes_per_second = delta as f64 / since_last.as_secs_f64();
        let remaining = self.total.saturating_sub(self.transferred);
        let eta_seconds = if remaining == 0 {
            Some(0.0)
        } else if bytes_per_second > 0.0 {
            Some(remaining as f64 / bytes_per_second)
        } else {
            None
        };

        self.last_sample_at = now;
        self.bytes_at_last_sample = self.transferred;
        Some(StatsSample {
            speed_mbps: bytes_per_second / BYTES_PER_MB,
            eta_seconds,
            elapsed_seconds: now.saturating_duration_since(self.started_at).as_secs_f64(),
        })
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }
}

/// Integer percent clamped to 100. An empty total counts as done.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let value = u128::from(done) * 100 / u128::from(total);
    value.min(100) as u8
}

#[cfg(test)]
#[path = "../../tests/transfer/stats_tests.rs"]
mod tests;
