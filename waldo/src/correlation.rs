//! User-space side of scan correlation: an atomics-only in-memory store that runs
//! the same start/complete algorithm as the kernel probes, and the per
//! operation statistics that completed scans are folded into.

use std::{
    fmt, hint,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use log::warn;
use waldo_common::{CorrelationKey, CorrelationStore, ScanOutcome, StoreFull};

use crate::metrics::{AtomicCounter, Counter, LatencyAggregator, RateMeter};
use crate::telemetry;

/// Read-only view of a correlation store for health reporting.
pub trait StoreDiagnostics {
    fn failed_inserts(&self) -> u64;
    fn in_flight(&self) -> usize;
}

// Slot state: status in the low two bits, key above them.
const EMPTY: u64 = 0;
const TOMBSTONE: u64 = 1;
const BUSY: u64 = 2;
const FULL: u64 = 3;
const STATUS_MASK: u64 = 0b11;

const fn tagged(key: CorrelationKey, status: u64) -> u64 {
    ((key as u64) << 2) | status
}

struct Slot {
    state: AtomicU64,
    value: AtomicU64,
}

/// Fixed-capacity open-addressing map from key to start timestamp.
///
/// All slots are allocated up front and `put`/`take` only use atomics. A
/// slot emptied by `take` becomes a tombstone that any key can reclaim, so the
/// capacity bounds live records. A slot is `BUSY` only while one value is
/// stored or read; operations on the same key that meet it spin.
pub struct SlotStore {
    slots: Box<[Slot]>,
    failed_inserts: AtomicCounter,
}

impl SlotStore {
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity.max(1))
            .map(|_| Slot {
                state: AtomicU64::new(EMPTY),
                value: AtomicU64::new(0),
            })
            .collect();
        Self {
            slots,
            failed_inserts: AtomicCounter::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Lookup order for `key` as (position, slot).
    fn chain(&self, key: CorrelationKey) -> impl Iterator<Item = (usize, &Slot)> {
        let len = self.slots.len();
        let start = (key.wrapping_mul(0x9E37_79B9) as usize) % len;
        (0..len).map(move |pos| (pos, &self.slots[(start + pos) % len]))
    }

    /// Decides whether a fresh claim at `own` may be published. Another entry
    /// for the same key wins if it is already published or sits earlier in
    /// the chain; a later in-progress entry is waited out.
    fn keep_claim(&self, key: CorrelationKey, own: usize) -> bool {
        loop {
            let mut pending = false;
            for (pos, slot) in self.chain(key) {
                if pos == own {
                    continue;
                }
                let state = slot.state.load(Ordering::SeqCst);
                if state == EMPTY {
                    break;
                }
                if state == tagged(key, FULL) || (state == tagged(key, BUSY) && pos < own) {
                    return false;
                }
                if state == tagged(key, BUSY) {
                    pending = true;
                }
            }
            if !pending {
                return true;
            }
            hint::spin_loop();
        }
    }
}

impl CorrelationStore for SlotStore {
    fn put(&self, key: CorrelationKey, timestamp: u64) -> Result<(), StoreFull> {
        let full = tagged(key, FULL);
        let busy = tagged(key, BUSY);

        'retry: loop {
            let mut free = None;
            for (pos, slot) in self.chain(key) {
                let state = slot.state.load(Ordering::SeqCst);
                if state == full {
                    if slot
                        .state
                        .compare_exchange(full, busy, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        slot.value.store(timestamp, Ordering::SeqCst);
                        slot.state.store(full, Ordering::SeqCst);
                        return Ok(());
                    }
                    continue 'retry;
                }
                if state == busy {
                    hint::spin_loop();
                    continue 'retry;
                }
                if free.is_none() && state & STATUS_MASK <= TOMBSTONE {
                    free = Some((pos, slot, state));
                }
                if state == EMPTY {
                    break;
                }
            }

            let Some((pos, slot, seen)) = free else {
                self.failed_inserts.increment(1);
                return Err(StoreFull);
            };
            if slot
                .state
                .compare_exchange(seen, busy, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                continue;
            }
            slot.value.store(timestamp, Ordering::SeqCst);
            if self.keep_claim(key, pos) {
                slot.state.store(full, Ordering::SeqCst);
                return Ok(());
            }
            // A concurrent put of the same key won; retry as an overwrite.
            slot.state.store(TOMBSTONE, Ordering::SeqCst);
        }
    }

    fn take(&self, key: CorrelationKey) -> Option<u64> {
        let full = tagged(key, FULL);
        let busy = tagged(key, BUSY);

        for (_, slot) in self.chain(key) {
            loop {
                let state = slot.state.load(Ordering::SeqCst);
                if state == EMPTY {
                    return None;
                }
                if state == busy {
                    hint::spin_loop();
                    continue;
                }
                if state != full {
                    break;
                }
                if slot
                    .state
                    .compare_exchange(full, busy, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    let start = slot.value.load(Ordering::SeqCst);
                    slot.state.store(TOMBSTONE, Ordering::SeqCst);
                    return Some(start);
                }
            }
        }
        None
    }
}

impl StoreDiagnostics for SlotStore {
    fn failed_inserts(&self) -> u64 {
        self.failed_inserts.value() as u64
    }

    fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state.load(Ordering::Relaxed) & STATUS_MASK == FULL)
            .count()
    }
}

/// Latency and throughput for one kind of correlated operation.
#[derive(Debug, Default)]
pub struct OperationStats {
    latency: LatencyAggregator,
    rate: RateMeter,
    started: Counter,
    unmatched: Counter,
    store_full: Counter,
}

impl OperationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: ScanOutcome) {
        match outcome {
            ScanOutcome::Started => self.started.increment(1),
            ScanOutcome::Completed { duration_ns } => {
                self.latency.update_duration(Duration::from_nanos(duration_ns));
                self.rate.mark(1);
                telemetry::record_scan_completed(duration_ns);
            }
            ScanOutcome::Unmatched => {
                warn!("No start observed for completed scan; duration unknown");
                self.unmatched.increment(1);
                telemetry::record_scan_unmatched();
            }
            ScanOutcome::StoreFull => {
                warn!("Scan start dropped: correlation store is full");
                self.store_full.increment(1);
                telemetry::record_scan_store_full();
            }
        }
    }

    pub fn latency(&self) -> &LatencyAggregator {
        &self.latency
    }

    pub fn rate(&self) -> &RateMeter {
        &self.rate
    }

    pub fn started(&self) -> i64 {
        self.started.value()
    }

    pub fn unmatched(&self) -> i64 {
        self.unmatched.value()
    }

    pub fn store_full(&self) -> i64 {
        self.store_full.value()
    }
}

impl fmt::Display for OperationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "started={} completed={} mean={:.3}ms rate={:.3}/s unmatched={} store_full={}",
            self.started.value(),
            self.latency.count(),
            self.latency.mean() * 1_000.0,
            self.rate.mean_rate(),
            self.unmatched.value(),
            self.store_full.value(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use waldo_common::correlation::{scan_completed, scan_started};

    #[test]
    fn test_put_then_take() {
        let store = SlotStore::with_capacity(8);
        store.put(42, 1_000).unwrap();
        assert_eq!(store.take(42), Some(1_000));
        assert_eq!(store.take(42), None);
    }

    #[test]
    fn test_take_unknown_key() {
        let store = SlotStore::with_capacity(8);
        assert_eq!(store.take(7), None);
        assert_eq!(store.failed_inserts(), 0);
    }

    #[test]
    fn test_put_overwrites_existing_record() {
        let store = SlotStore::with_capacity(8);
        store.put(1, 100).unwrap();
        store.put(1, 200).unwrap();
        assert_eq!(store.in_flight(), 1);
        assert_eq!(store.take(1), Some(200));
    }

    #[test]
    fn test_full_store_counts_failed_inserts() {
        let store = SlotStore::with_capacity(2);
        store.put(1, 10).unwrap();
        store.put(2, 20).unwrap();
        assert_eq!(store.put(3, 30), Err(StoreFull));
        assert_eq!(store.failed_inserts(), 1);

        // Known keys still accept overwrites.
        store.put(1, 11).unwrap();
        assert_eq!(store.take(1), Some(11));
        assert_eq!(store.take(3), None);
    }

    #[test]
    fn test_taken_slot_is_reusable_by_another_key() {
        let store = SlotStore::with_capacity(1);
        store.put(1, 10).unwrap();
        assert_eq!(store.take(1), Some(10));
        assert_eq!(store.in_flight(), 0);

        store.put(2, 20).unwrap();
        assert_eq!(store.failed_inserts(), 0);
        assert_eq!(store.take(1), None);
        assert_eq!(store.take(2), Some(20));
    }

    #[test]
    fn test_capacity_bounds_live_records() {
        let store = SlotStore::with_capacity(4);
        for round in 0..10u32 {
            for key in 0..4 {
                store.put(round * 4 + key, u64::from(key)).unwrap();
            }
            assert_eq!(store.put(1_000, 0), Err(StoreFull));
            for key in 0..4 {
                assert_eq!(store.take(round * 4 + key), Some(u64::from(key)));
            }
        }
        assert_eq!(store.failed_inserts(), 10);
    }

    #[test]
    fn test_every_timestamp_value_is_stored() {
        let store = SlotStore::with_capacity(2);
        for ts in [0, u64::MAX, u64::MAX - 1] {
            store.put(1, ts).unwrap();
            assert_eq!(store.take(1), Some(ts));
        }
    }

    #[test]
    fn test_concurrent_puts_of_one_key_leave_one_record() {
        for _ in 0..50 {
            let store = Arc::new(SlotStore::with_capacity(16));
            let handles: Vec<_> = (0..8u64)
                .map(|t| {
                    let store = store.clone();
                    std::thread::spawn(move || store.put(3, 100 + t).unwrap())
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(store.in_flight(), 1);
            let start = store.take(3).unwrap();
            assert!((100..108).contains(&start));
            assert_eq!(store.take(3), None);
        }
    }

    #[test]
    fn test_concurrent_take_has_single_winner() {
        for round in 0..50 {
            let store = Arc::new(SlotStore::with_capacity(16));
            store.put(9, 1_000 + round).unwrap();
            let winners = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = store.clone();
                    let winners = winners.clone();
                    std::thread::spawn(move || {
                        if let Some(start) = store.take(9) {
                            assert_eq!(start, 1_000 + round);
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(winners.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_concurrent_puts_of_distinct_keys() {
        let store = Arc::new(SlotStore::with_capacity(64));
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for k in 0..8u32 {
                        store.put(t * 8 + k, u64::from(t * 8 + k)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for key in 0..64u32 {
            assert_eq!(store.take(key), Some(u64::from(key)));
        }
    }

    #[test]
    fn test_scan_lifecycle_feeds_stats() {
        let store = SlotStore::with_capacity(4);
        let mut stats = OperationStats::new();

        stats.record(scan_started(&store, 15170, 1_000_000));
        stats.record(scan_completed(&store, 15170, 3_000_000));
        stats.record(scan_completed(&store, 15170, 4_000_000));

        assert_eq!(stats.started(), 1);
        assert_eq!(stats.latency().count(), 1);
        assert!((stats.latency().mean() - 0.002).abs() < 1e-9);
        assert_eq!(stats.rate().event_count(), 1);
        assert_eq!(stats.unmatched(), 1);
    }
}
