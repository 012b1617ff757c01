//! Hardware and netdev registration kprobes. These only report that the
//! function ran; nothing is correlated.

use aya_ebpf::{bpf_printk, macros::kprobe, programs::ProbeContext};
use waldo_common::EventKind;

use super::{Caller, emit};

#[kprobe]
pub fn kprobe_ieee80211_register_hw(_ctx: ProbeContext) -> u32 {
    let caller = Caller::current();
    unsafe {
        bpf_printk!(
            b"pid: %d, command: %s, ieee80211_register_hw called.\n",
            caller.pid,
            caller.comm_ptr()
        );
    }
    emit(&caller, EventKind::RegisterHw, 0, 0, 0);
    0
}

#[kprobe]
pub fn kprobe_ieee80211_unregister_hw(_ctx: ProbeContext) -> u32 {
    let caller = Caller::current();
    unsafe {
        bpf_printk!(
            b"pid: %d, command: %s, ieee80211_unregister_hw called.\n",
            caller.pid,
            caller.comm_ptr()
        );
    }
    emit(&caller, EventKind::UnregisterHw, 0, 0, 0);
    0
}

/// int register_netdev(struct net_device *dev)
#[kprobe]
pub fn kprobe_register_netdev(ctx: ProbeContext) -> u32 {
    let caller = Caller::current();
    let dev: u64 = ctx.arg(0).unwrap_or(0);
    unsafe {
        bpf_printk!(
            b"pid: %d, command: %s, register_netdev called for dev: %llx\n",
            caller.pid,
            caller.comm_ptr(),
            dev
        );
    }
    emit(&caller, EventKind::RegisterNetdev, 0, 0, dev);
    0
}

/// void unregister_netdev(struct net_device *dev)
#[kprobe]
pub fn kprobe_unregister_netdev(ctx: ProbeContext) -> u32 {
    let caller = Caller::current();
    let dev: u64 = ctx.arg(0).unwrap_or(0);
    unsafe {
        bpf_printk!(
            b"pid: %d, command: %s, unregister_netdev called for dev: %llx\n",
            caller.pid,
            caller.comm_ptr(),
            dev
        );
    }
    emit(&caller, EventKind::UnregisterNetdev, 0, 0, dev);
    0
}
