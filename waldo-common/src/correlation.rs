//! Start/complete correlation shared by the kernel probes and user space.
//!
//! A start event installs a timestamp under its key; the completion event
//! takes it back out and turns it into a duration. The store behind the
//! [`CorrelationStore`] trait is called from probe context, so implementations
//! must not block or allocate.

pub type CorrelationKey = u32;

/// `put` could not install a record because the store is at capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreFull;

pub trait CorrelationStore {
    /// Installs `timestamp` under `key`, replacing any record already there.
    fn put(&self, key: CorrelationKey, timestamp: u64) -> Result<(), StoreFull>;

    /// Removes and returns the record for `key`. When several callers race on
    /// the same key at most one of them gets `Some`.
    fn take(&self, key: CorrelationKey) -> Option<u64>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    Started,
    /// The start record could not be stored; the matching completion will
    /// come back as `Unmatched`.
    StoreFull,
    Completed { duration_ns: u64 },
    /// Completion without an observed start.
    Unmatched,
}

#[inline(always)]
pub fn scan_started<S>(store: &S, key: CorrelationKey, now_ns: u64) -> ScanOutcome
where
    S: CorrelationStore + ?Sized,
{
    match store.put(key, now_ns) {
        Ok(()) => ScanOutcome::Started,
        Err(StoreFull) => ScanOutcome::StoreFull,
    }
}

#[inline(always)]
pub fn scan_completed<S>(store: &S, key: CorrelationKey, now_ns: u64) -> ScanOutcome
where
    S: CorrelationStore + ?Sized,
{
    match store.take(key) {
        Some(start_ns) => ScanOutcome::Completed {
            duration_ns: now_ns.saturating_sub(start_ns),
        },
        None => ScanOutcome::Unmatched,
    }
}
