use chrono::{DateTime, Utc};

use super::Point;

/// Event count with the mean rate since creation.
///
/// Elapsed time is measured in whole wall-clock seconds, so marks within the
/// creation second report a rate of 0.
#[derive(Debug, Clone, Copy)]
pub struct RateMeter {
    event_count: u64,
    created: DateTime<Utc>,
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateMeter {
    pub fn new() -> Self {
        Self::started_at(Utc::now())
    }

    pub fn started_at(created: DateTime<Utc>) -> Self {
        Self {
            event_count: 0,
            created,
        }
    }

    pub fn mark(&mut self, count: u64) {
        self.event_count = self.event_count.wrapping_add(count);
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn mean_rate(&self) -> f64 {
        self.mean_rate_at(Utc::now())
    }

    pub fn mean_rate_at(&self, now: DateTime<Utc>) -> f64 {
        if self.event_count == 0 {
            return 0.0;
        }
        let elapsed = now.timestamp() - self.created.timestamp();
        if elapsed <= 0 {
            return 0.0;
        }
        self.event_count as f64 / elapsed as f64
    }
}

impl Point for RateMeter {
    type Value = f64;
    type Input = u64;

    fn value(&self) -> f64 {
        self.mean_rate()
    }

    fn update(&mut self, count: u64) {
        self.mark(count);
    }
}
