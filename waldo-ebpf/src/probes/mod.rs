pub mod lifecycle;
pub mod scan;

use aya_ebpf::{
    helpers::{bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_ktime_get_ns},
    macros::map,
    maps::RingBuf,
};
use waldo_common::{COMM_LEN, CorrelationKey, EventKind, WaldoEvent};

const EVENTS_RINGBUF_SIZE: u32 = 256 * 1024; // 256KB

#[map]
pub static WALDO_EVENTS: RingBuf = RingBuf::with_byte_size(EVENTS_RINGBUF_SIZE, 0);

/// Caller identity captured once per probe hit.
pub struct Caller {
    pub pid: u32,
    pub comm: [u8; COMM_LEN],
}

impl Caller {
    #[inline(always)]
    pub fn current() -> Self {
        let pid = (bpf_get_current_pid_tgid() >> 32) as u32;
        let comm = bpf_get_current_comm().unwrap_or([0; COMM_LEN]);
        Self { pid, comm }
    }

    /// NUL-terminated pointer for `%s` in trace lines.
    #[inline(always)]
    pub fn comm_ptr(&self) -> *const u8 {
        self.comm.as_ptr()
    }
}

/// Pushes one record to user space. A full ring buffer drops the record;
/// the trace pipe line written by the caller is still there.
#[inline(always)]
pub fn emit(caller: &Caller, kind: EventKind, key: CorrelationKey, duration_ns: u64, dev: u64) {
    if let Some(mut slot) = WALDO_EVENTS.reserve::<WaldoEvent>(0) {
        let mut event = WaldoEvent::new(kind);
        event.metadata.pid = caller.pid;
        event.metadata.timestamp = unsafe { bpf_ktime_get_ns() };
        event.key = key;
        event.duration_ns = duration_ns;
        event.dev = dev;
        event.comm = caller.comm;
        slot.write(event);
        slot.submit(0);
    }
}
