use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Cancellation token shared by the signal task, the supervisor loop and the
/// ring-buffer reader. Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    cancelled: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
