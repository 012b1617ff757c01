use std::time::{Duration, Instant};

use thiserror::Error;

use super::{LatencyAggregator, RateMeter};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimerError {
    #[error("timer stopped without a pending start")]
    NotStarted,
}

/// Measures start/stop intervals into a latency aggregator and a rate meter.
#[derive(Debug, Default, Clone)]
pub struct Timer {
    meter: RateMeter,
    latency: LatencyAggregator,
    mark: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a measurement. An unfinished one is discarded.
    pub fn start(&mut self) {
        self.mark = Some(Instant::now());
    }

    /// Ends the pending measurement and records it. A stop with no pending
    /// start leaves both aggregates untouched.
    pub fn stop(&mut self) -> Result<Duration, TimerError> {
        let mark = self.mark.take().ok_or(TimerError::NotStarted)?;
        let elapsed = mark.elapsed();
        self.latency.update_duration(elapsed);
        self.meter.mark(1);
        Ok(elapsed)
    }

    pub fn is_running(&self) -> bool {
        self.mark.is_some()
    }

    pub fn latency(&self) -> &LatencyAggregator {
        &self.latency
    }

    pub fn meter(&self) -> &RateMeter {
        &self.meter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_start_stop() {
        let mut timer = Timer::new();
        timer.start();
        std::thread::sleep(Duration::from_secs(1));
        let elapsed = timer.stop().unwrap();

        assert!(elapsed >= Duration::from_secs(1));
        assert_eq!(timer.latency().count(), 1);
        assert!(timer.latency().total() > 0.0);
        assert_eq!(timer.meter().event_count(), 1);
    }

    #[test]
    fn test_stop_without_start_is_rejected() {
        let mut timer = Timer::new();
        assert_eq!(timer.stop(), Err(TimerError::NotStarted));
        assert_eq!(timer.latency().count(), 0);
        assert_eq!(timer.meter().event_count(), 0);
    }

    #[test]
    fn test_double_stop_does_not_double_count() {
        let mut timer = Timer::new();
        timer.start();
        timer.stop().unwrap();
        assert_eq!(timer.stop(), Err(TimerError::NotStarted));
        assert_eq!(timer.latency().count(), 1);
        assert_eq!(timer.meter().event_count(), 1);
        assert!(!timer.is_running());
    }

    #[test]
    fn test_restart_overwrites_pending_mark() {
        let mut timer = Timer::new();
        timer.start();
        std::thread::sleep(Duration::from_millis(200));
        timer.start();
        let elapsed = timer.stop().unwrap();
        assert!(elapsed < Duration::from_millis(200));
        assert_eq!(timer.latency().count(), 1);
    }
}
