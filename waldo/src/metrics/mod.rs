//! In-process metric primitives used by the supervisor to describe its own
//! health: counters, rate meters, latency aggregators and timers.
//!
//! These types are plain owned values and are not synchronized. A value
//! shared between threads must use [`AtomicCounter`] or be moved behind a
//! channel to a single owner.

mod counter;
mod latency;
mod meter;
mod timer;

pub use counter::{AtomicCounter, Counter};
pub use latency::LatencyAggregator;
pub use meter::RateMeter;
pub use timer::{Timer, TimerError};

/// A metric that can be read and fed without knowing its concrete type.
pub trait Point {
    type Value;
    type Input;

    fn value(&self) -> Self::Value;
    fn update(&mut self, input: Self::Input);
}

/// Renders `name=value` for any point, as used in health log lines.
pub fn describe<P>(name: &str, point: &P) -> String
where
    P: Point,
    P::Value: std::fmt::Display,
{
    format!("{}={}", name, point.value())
}
