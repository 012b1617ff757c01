#![no_std]

pub mod correlation;

pub use correlation::{CorrelationKey, CorrelationStore, ScanOutcome, StoreFull};

/// Correlation key used by the scan probes. mac80211 hands no scan identifier
/// to `ieee80211_request_scan`, so every scan shares this key.
pub const SCAN_ID: CorrelationKey = 15170;

/// Capacity of the kernel start-time map.
pub const MAX_SCAN_RECORDS: u32 = 8192;

pub const COMM_LEN: usize = 16;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct EventMetadata {
    pub pid: u32,
    pub _pad: u32,
    pub timestamp: u64,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    RegisterHw = 0,
    UnregisterHw = 1,
    RegisterNetdev = 2,
    UnregisterNetdev = 3,
    ScanRequested = 4,
    ScanCompleted = 5,
    ScanUnmatched = 6,
    ScanStoreFull = 7,
    ScanNoDevice = 8,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::RegisterHw => "ieee80211_register_hw",
            EventKind::UnregisterHw => "ieee80211_unregister_hw",
            EventKind::RegisterNetdev => "register_netdev",
            EventKind::UnregisterNetdev => "unregister_netdev",
            EventKind::ScanRequested => "ieee80211_request_scan",
            EventKind::ScanCompleted => "ieee80211_scan_completed",
            EventKind::ScanUnmatched => "ieee80211_scan_completed (no start)",
            EventKind::ScanStoreFull => "ieee80211_request_scan (store full)",
            EventKind::ScanNoDevice => "scan probe (dev is NULL)",
        }
    }
}

impl TryFrom<u8> for EventKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => EventKind::RegisterHw,
            1 => EventKind::UnregisterHw,
            2 => EventKind::RegisterNetdev,
            3 => EventKind::UnregisterNetdev,
            4 => EventKind::ScanRequested,
            5 => EventKind::ScanCompleted,
            6 => EventKind::ScanUnmatched,
            7 => EventKind::ScanStoreFull,
            8 => EventKind::ScanNoDevice,
            other => return Err(other),
        })
    }
}

/// Record written by every probe into the `WALDO_EVENTS` ring buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct WaldoEvent {
    pub metadata: EventMetadata,
    pub kind: u8,
    pub _pad: [u8; 3],
    pub key: CorrelationKey,
    /// Only meaningful for `ScanCompleted`.
    pub duration_ns: u64,
    /// `struct net_device *` for netdev and scan events, 0 otherwise.
    pub dev: u64,
    pub comm: [u8; COMM_LEN],
}

impl WaldoEvent {
    pub const fn new(kind: EventKind) -> Self {
        Self {
            metadata: EventMetadata {
                pid: 0,
                _pad: 0,
                timestamp: 0,
            },
            kind: kind as u8,
            _pad: [0; 3],
            key: 0,
            duration_ns: 0,
            dev: 0,
            comm: [0; COMM_LEN],
        }
    }

    pub fn kind(&self) -> Result<EventKind, u8> {
        EventKind::try_from(self.kind)
    }

    /// Scan outcome carried by this record, if it is a scan event.
    pub fn scan_outcome(&self) -> Option<ScanOutcome> {
        match self.kind().ok()? {
            EventKind::ScanRequested => Some(ScanOutcome::Started),
            EventKind::ScanCompleted => Some(ScanOutcome::Completed {
                duration_ns: self.duration_ns,
            }),
            EventKind::ScanUnmatched => Some(ScanOutcome::Unmatched),
            EventKind::ScanStoreFull => Some(ScanOutcome::StoreFull),
            _ => None,
        }
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for WaldoEvent {}
