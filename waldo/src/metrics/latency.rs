use std::time::Duration;

use log::warn;

use super::Point;

/// Running count and total of observed durations, in seconds.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct LatencyAggregator {
    count: u64,
    total: f64,
}

impl LatencyAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Negative and non-finite samples are dropped.
    pub fn update(&mut self, seconds: f64) {
        if !seconds.is_finite() || seconds < 0.0 {
            warn!("Ignoring invalid latency sample: {}", seconds);
            return;
        }
        self.count += 1;
        self.total += seconds;
    }

    pub fn update_duration(&mut self, duration: Duration) {
        self.update(duration.as_secs_f64());
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.total / self.count as f64
    }
}

impl Point for LatencyAggregator {
    type Value = f64;
    type Input = f64;

    fn value(&self) -> f64 {
        self.mean()
    }

    fn update(&mut self, seconds: f64) {
        LatencyAggregator::update(self, seconds);
    }
}
