use std::sync::atomic::{AtomicI64, Ordering};

use super::Point;

/// Signed accumulator. Overflow wraps.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    count: i64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, delta: i64) {
        self.count = self.count.wrapping_add(delta);
    }

    pub fn decrement(&mut self, delta: i64) {
        self.count = self.count.wrapping_sub(delta);
    }

    pub fn value(&self) -> i64 {
        self.count
    }
}

impl Point for Counter {
    type Value = i64;
    type Input = i64;

    fn value(&self) -> i64 {
        self.count
    }

    fn update(&mut self, delta: i64) {
        self.increment(delta);
    }
}

/// [`Counter`] for values updated from more than one thread.
/// `fetch_add` on i64 wraps like `Counter`.
#[derive(Debug, Default)]
pub struct AtomicCounter {
    count: AtomicI64,
}

impl AtomicCounter {
    pub const fn new() -> Self {
        Self {
            count: AtomicI64::new(0),
        }
    }

    pub fn increment(&self, delta: i64) {
        self.count.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn decrement(&self, delta: i64) {
        self.count.fetch_sub(delta, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }
}
