//! Scan duration kprobes.
//!
//! `ieee80211_request_scan` stores the start time under the scan key and
//! `ieee80211_scan_completed` takes it back to compute the duration.

use aya_ebpf::{
    bpf_printk,
    helpers::bpf_ktime_get_ns,
    macros::{kprobe, kretprobe, map},
    maps::{HashMap, PerCpuArray},
    programs::{ProbeContext, RetProbeContext},
};
use aya_log_ebpf::debug;
use waldo_common::{
    CorrelationKey, CorrelationStore, EventKind, MAX_SCAN_RECORDS, SCAN_ID, ScanOutcome,
    StoreFull,
    correlation::{scan_completed, scan_started},
};

use super::{Caller, emit};

/// Key: scan key, Value: start time (ns, CLOCK_MONOTONIC)
#[map]
static SCAN_START: HashMap<CorrelationKey, u64> =
    HashMap::with_max_entries(MAX_SCAN_RECORDS, 0);

/// Failed inserts into SCAN_START, summed across CPUs by user space.
#[map]
pub static SCAN_STORE_FAILURES: PerCpuArray<u64> = PerCpuArray::with_max_entries(1, 0);

#[map]
pub static CHANNEL_LOOKUPS: PerCpuArray<u64> = PerCpuArray::with_max_entries(1, 0);

struct KernelScanStore;

impl CorrelationStore for KernelScanStore {
    #[inline(always)]
    fn put(&self, key: CorrelationKey, timestamp: u64) -> Result<(), StoreFull> {
        if SCAN_START.insert(&key, &timestamp, 0).is_err() {
            bump(&SCAN_STORE_FAILURES);
            return Err(StoreFull);
        }
        Ok(())
    }

    #[inline(always)]
    fn take(&self, key: CorrelationKey) -> Option<u64> {
        let start = unsafe { SCAN_START.get(&key) }.copied()?;
        // Only the CPU whose delete succeeds owns the record.
        // A put from another CPU landing between the get and the delete is
        // deleted too: its start time is lost and the next completion for
        // this key reports Unmatched.
        SCAN_START.remove(&key).ok()?;
        Some(start)
    }
}

#[inline(always)]
fn bump(counter: &PerCpuArray<u64>) {
    if let Some(slot) = counter.get_ptr_mut(0) {
        unsafe { *slot += 1 };
    }
}

#[kprobe]
pub fn kprobe_ieee80211_request_scan(ctx: ProbeContext) -> u32 {
    let caller = Caller::current();
    let dev: u64 = ctx.arg(0).unwrap_or(0);
    if dev == 0 {
        unsafe { bpf_printk!(b"ieee80211_request_scan: dev is NULL\n") };
        emit(&caller, EventKind::ScanNoDevice, SCAN_ID, 0, 0);
        return 0;
    }

    let now = unsafe { bpf_ktime_get_ns() };
    match scan_started(&KernelScanStore, SCAN_ID, now) {
        ScanOutcome::StoreFull => {
            unsafe {
                bpf_printk!(
                    b"ieee80211_request_scan: map update failed, hc_scan_id=%u\n",
                    SCAN_ID
                );
            }
            emit(&caller, EventKind::ScanStoreFull, SCAN_ID, 0, dev);
        }
        _ => {
            unsafe {
                bpf_printk!(
                    b"pid: %d, command: %s, ieee80211_request_scan called.\n",
                    caller.pid,
                    caller.comm_ptr()
                );
            }
            debug!(&ctx, "scan start recorded key={} ts={}", SCAN_ID, now);
            emit(&caller, EventKind::ScanRequested, SCAN_ID, 0, dev);
        }
    }
    0
}

#[kprobe]
pub fn kprobe_ieee80211_scan_completed(ctx: ProbeContext) -> u32 {
    let caller = Caller::current();
    let dev: u64 = ctx.arg(0).unwrap_or(0);
    if dev == 0 {
        unsafe { bpf_printk!(b"ieee80211_scan_completed: dev is NULL\n") };
        emit(&caller, EventKind::ScanNoDevice, SCAN_ID, 0, 0);
        return 0;
    }

    let now = unsafe { bpf_ktime_get_ns() };
    match scan_completed(&KernelScanStore, SCAN_ID, now) {
        ScanOutcome::Completed { duration_ns } => {
            unsafe {
                bpf_printk!(
                    b"pid: %d, command: %s, scan completed! duration is %llu ns\n",
                    caller.pid,
                    caller.comm_ptr(),
                    duration_ns
                );
            }
            emit(&caller, EventKind::ScanCompleted, SCAN_ID, duration_ns, dev);
        }
        _ => {
            unsafe {
                bpf_printk!(
                    b"ieee80211_scan_completed: no start time found for hc_scan_id=%u\n",
                    SCAN_ID
                );
            }
            emit(&caller, EventKind::ScanUnmatched, SCAN_ID, 0, dev);
        }
    }
    0
}

/// struct ieee80211_channel *ieee80211_get_channel_khz(struct wiphy *wiphy, u32 freq)
///
/// Hit counter only; the returned channel pointer is not dereferenced.
#[kretprobe]
pub fn kretprobe_ieee80211_get_channel_khz(_ctx: RetProbeContext) -> u32 {
    bump(&CHANNEL_LOOKUPS);
    0
}
