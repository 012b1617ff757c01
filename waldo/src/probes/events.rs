//! User-space end of the `WALDO_EVENTS` ring buffer.

use std::{thread, time::Duration};

use anyhow::{Context, Result};
use aya::{
    Ebpf,
    maps::{MapData, RingBuf},
};
use log::{Level, debug, info, log};
use tokio::sync::mpsc::UnboundedSender;
use waldo_common::{EventKind, ScanOutcome, WaldoEvent};

use crate::shutdown::ShutdownSignal;

pub const EVENTS_MAP: &str = "WALDO_EVENTS";

const POLL_INTERVAL_MS: u64 = 10;

pub fn format_duration(ns: u64) -> String {
    if ns >= 1_000_000_000 {
        format!("{:.2}s", ns as f64 / 1_000_000_000.0)
    } else if ns >= 1_000_000 {
        format!("{:.2}ms", ns as f64 / 1_000_000.0)
    } else if ns >= 1_000 {
        format!("{:.2}µs", ns as f64 / 1_000.0)
    } else {
        format!("{}ns", ns)
    }
}

fn decode(item: &[u8]) -> Option<WaldoEvent> {
    if item.len() < std::mem::size_of::<WaldoEvent>() {
        return None;
    }
    Some(unsafe { std::ptr::read_unaligned(item.as_ptr() as *const WaldoEvent) })
}

fn comm(event: &WaldoEvent) -> &str {
    std::str::from_utf8(&event.comm)
        .unwrap_or("<invalid>")
        .trim_matches(char::from(0))
}

/// Misses that become a [`ScanOutcome`] are warned about where they are
/// counted, so the reader only traces them.
fn level(kind: EventKind) -> Level {
    match kind {
        EventKind::ScanUnmatched | EventKind::ScanStoreFull => Level::Debug,
        EventKind::ScanNoDevice => Level::Warn,
        _ => Level::Info,
    }
}

/// Logs one record and returns the scan outcome it carries, if any.
fn handle_event(event: &WaldoEvent) -> Option<ScanOutcome> {
    let kind = match event.kind() {
        Ok(kind) => kind,
        Err(raw) => {
            debug!("Ignoring event with unknown kind {}", raw);
            return None;
        }
    };

    let pid = event.metadata.pid;
    match kind {
        EventKind::ScanCompleted => info!(
            "{} pid={} comm={} duration={}",
            kind.name(),
            pid,
            comm(event),
            format_duration(event.duration_ns)
        ),
        EventKind::ScanUnmatched | EventKind::ScanStoreFull | EventKind::ScanNoDevice => log!(
            level(kind),
            "{} pid={} comm={} key={}",
            kind.name(),
            pid,
            comm(event),
            event.key
        ),
        EventKind::RegisterNetdev | EventKind::UnregisterNetdev => info!(
            "{} pid={} comm={} dev={:#x}",
            kind.name(),
            pid,
            comm(event),
            event.dev
        ),
        _ => info!("{} pid={} comm={}", kind.name(), pid, comm(event)),
    }

    event.scan_outcome()
}

/// Spawns the reader thread. It exits once `shutdown` is cancelled or the
/// receiving end of `outcomes` is gone.
pub fn spawn_event_reader(
    bpf: &mut Ebpf,
    shutdown: ShutdownSignal,
    outcomes: UnboundedSender<ScanOutcome>,
) -> Result<thread::JoinHandle<()>> {
    let ring_buf = RingBuf::try_from(
        bpf.take_map(EVENTS_MAP)
            .with_context(|| format!("Failed to find {} map", EVENTS_MAP))?,
    )?;

    let handle = thread::Builder::new()
        .name("waldo-events".into())
        .spawn(move || read_events(ring_buf, shutdown, outcomes))
        .context("Failed to spawn event reader")?;
    Ok(handle)
}

fn read_events(
    mut ring_buf: RingBuf<MapData>,
    shutdown: ShutdownSignal,
    outcomes: UnboundedSender<ScanOutcome>,
) {
    while !shutdown.is_cancelled() {
        let mut has_work = false;
        while let Some(item) = ring_buf.next() {
            has_work = true;
            let Some(event) = decode(&item) else {
                continue;
            };
            if let Some(outcome) = handle_event(&event) {
                if outcomes.send(outcome).is_err() {
                    debug!("Outcome receiver dropped; stopping event reader");
                    return;
                }
            }
        }
        if !has_work {
            thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
        }
    }
    debug!("Event reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_bytes(event: &WaldoEvent) -> Vec<u8> {
        let ptr = event as *const WaldoEvent as *const u8;
        unsafe { std::slice::from_raw_parts(ptr, std::mem::size_of::<WaldoEvent>()) }.to_vec()
    }

    #[test]
    fn test_decode_rejects_short_records() {
        let event = WaldoEvent::new(EventKind::RegisterHw);
        let bytes = as_bytes(&event);
        assert!(decode(&bytes[..bytes.len() - 1]).is_none());

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.kind(), Ok(EventKind::RegisterHw));
    }

    #[test]
    fn test_handle_event_forwards_scan_outcomes() {
        let mut done = WaldoEvent::new(EventKind::ScanCompleted);
        done.duration_ns = 2_500_000;
        done.comm[..4].copy_from_slice(b"iw\0\0");
        assert_eq!(comm(&done), "iw");
        assert_eq!(
            handle_event(&done),
            Some(ScanOutcome::Completed {
                duration_ns: 2_500_000
            })
        );

        assert_eq!(handle_event(&WaldoEvent::new(EventKind::UnregisterHw)), None);

        let mut unknown = WaldoEvent::new(EventKind::RegisterHw);
        unknown.kind = 200;
        assert_eq!(handle_event(&unknown), None);
    }

    #[test]
    fn test_counted_misses_are_not_warned_twice() {
        assert_eq!(level(EventKind::ScanUnmatched), Level::Debug);
        assert_eq!(level(EventKind::ScanStoreFull), Level::Debug);
        assert_eq!(level(EventKind::ScanNoDevice), Level::Warn);
        assert!(WaldoEvent::new(EventKind::ScanNoDevice).scan_outcome().is_none());
        assert!(WaldoEvent::new(EventKind::ScanUnmatched).scan_outcome().is_some());
    }

    #[test]
    fn test_format_duration_units() {
        assert_eq!(format_duration(999), "999ns");
        assert_eq!(format_duration(1_500), "1.50µs");
        assert_eq!(format_duration(2_500_000), "2.50ms");
        assert_eq!(format_duration(3_000_000_000), "3.00s");
    }
}
