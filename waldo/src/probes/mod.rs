use std::{error::Error as StdError, fmt, io};

use thiserror::Error;

pub mod events;
pub mod kprobe;
pub mod registry;

pub use registry::{DetachReport, ProbeRegistry, ProbeState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// kprobe on function entry
    Entry,
    /// kretprobe on function return
    Return,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::Entry => f.write_str("kprobe"),
            ProbeKind::Return => f.write_str("kretprobe"),
        }
    }
}

/// Static description of one attachment point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSpec {
    /// Kernel function to instrument
    pub symbol: &'static str,
    /// Program name inside the eBPF object
    pub program: &'static str,
    pub kind: ProbeKind,
}

impl ProbeSpec {
    pub const fn entry(symbol: &'static str, program: &'static str) -> Self {
        Self {
            symbol,
            program,
            kind: ProbeKind::Entry,
        }
    }

    pub const fn ret(symbol: &'static str, program: &'static str) -> Self {
        Self {
            symbol,
            program,
            kind: ProbeKind::Return,
        }
    }
}

/// Always attached, in this order.
pub const WIRELESS_PROBES: &[ProbeSpec] = &[
    ProbeSpec::entry("ieee80211_register_hw", "kprobe_ieee80211_register_hw"),
    ProbeSpec::entry("ieee80211_unregister_hw", "kprobe_ieee80211_unregister_hw"),
    ProbeSpec::entry("ieee80211_request_scan", "kprobe_ieee80211_request_scan"),
    ProbeSpec::ret("ieee80211_get_channel_khz", "kretprobe_ieee80211_get_channel_khz"),
    ProbeSpec::entry("ieee80211_scan_completed", "kprobe_ieee80211_scan_completed"),
];

/// Attached only with `ATTACH_NETDEV_KPROBES=1`.
pub const NETDEV_PROBES: &[ProbeSpec] = &[
    ProbeSpec::entry("register_netdev", "kprobe_register_netdev"),
    ProbeSpec::entry("unregister_netdev", "kprobe_unregister_netdev"),
];

/// Failure reported by a [`ProbeBackend`], with the platform errno when one
/// could be found in the source chain.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct BackendError {
    pub errno: Option<i32>,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl BackendError {
    pub fn new(message: impl Into<String>, errno: Option<i32>) -> Self {
        Self {
            errno,
            message: message.into(),
            source: None,
        }
    }

    /// Wraps `source`, pulling the errno out of the first `io::Error` in its chain.
    pub fn from_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            errno: errno_in_chain(&source),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

fn errno_in_chain(err: &(dyn StdError + 'static)) -> Option<i32> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(errno) = e.downcast_ref::<io::Error>().and_then(io::Error::raw_os_error) {
            return Some(errno);
        }
        current = e.source();
    }
    None
}

/// Attach/detach mechanism behind the registry.
pub trait ProbeBackend {
    /// Live attachment, consumed by `detach`.
    type Handle;

    fn attach(&mut self, spec: &ProbeSpec) -> Result<Self::Handle, BackendError>;
    fn detach(&mut self, spec: &ProbeSpec, handle: Self::Handle) -> Result<(), BackendError>;
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to attach {kind} for {symbol}: {source}")]
    Attach {
        symbol: &'static str,
        kind: ProbeKind,
        errno: Option<i32>,
        #[source]
        source: BackendError,
    },
}

impl ProbeError {
    pub fn attach(spec: &ProbeSpec, source: BackendError) -> Self {
        ProbeError::Attach {
            symbol: spec.symbol,
            kind: spec.kind,
            errno: source.errno,
            source,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            ProbeError::Attach { symbol, .. } => symbol,
        }
    }

    pub fn errno(&self) -> Option<i32> {
        match self {
            ProbeError::Attach { errno, .. } => *errno,
        }
    }

    /// Process exit status for a failed startup: the errno, or 1 if unknown.
    pub fn exit_code(&self) -> i32 {
        self.errno()
            .map(|errno| errno.unsigned_abs().clamp(1, 255) as i32)
            .unwrap_or(1)
    }
}
