#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    io,
    sync::{Arc, Mutex, MutexGuard},
};

use waldo::probes::{BackendError, ProbeBackend, ProbeSpec};

#[derive(Debug, Default)]
pub struct FakeState {
    /// Currently attached symbols, in attachment order.
    pub live: Vec<&'static str>,
    pub attach_calls: Vec<&'static str>,
    pub detach_calls: Vec<&'static str>,
    /// symbol -> errno returned by `attach`
    pub fail_attach: HashMap<&'static str, i32>,
    pub fail_detach: HashSet<&'static str>,
}

/// Scripted backend; clones share state so tests can inspect it after the
/// registry has been moved or dropped.
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_attach(self, symbol: &'static str, errno: i32) -> Self {
        self.state().fail_attach.insert(symbol, errno);
        self
    }

    pub fn failing_detach(self, symbol: &'static str) -> Self {
        self.state().fail_detach.insert(symbol);
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn live(&self) -> Vec<&'static str> {
        self.state().live.clone()
    }
}

pub struct FakeHandle(&'static str);

impl ProbeBackend for FakeBackend {
    type Handle = FakeHandle;

    fn attach(&mut self, spec: &ProbeSpec) -> Result<Self::Handle, BackendError> {
        let mut state = self.state();
        state.attach_calls.push(spec.symbol);
        if let Some(errno) = state.fail_attach.get(spec.symbol).copied() {
            return Err(BackendError::from_source(
                format!("Failed to attach {}", spec.symbol),
                io::Error::from_raw_os_error(errno),
            ));
        }
        assert!(
            !state.live.contains(&spec.symbol),
            "{} attached twice",
            spec.symbol
        );
        state.live.push(spec.symbol);
        Ok(FakeHandle(spec.symbol))
    }

    fn detach(&mut self, spec: &ProbeSpec, handle: Self::Handle) -> Result<(), BackendError> {
        assert_eq!(handle.0, spec.symbol);
        let mut state = self.state();
        state.detach_calls.push(spec.symbol);
        // The attachment is gone either way; a failure is only reported.
        state.live.retain(|s| *s != spec.symbol);
        if state.fail_detach.contains(spec.symbol) {
            return Err(BackendError::new("link busy", Some(16)));
        }
        Ok(())
    }
}

pub const MANDATORY: &[ProbeSpec] = &[
    ProbeSpec::entry("m1", "kprobe_m1"),
    ProbeSpec::entry("m2", "kprobe_m2"),
    ProbeSpec::entry("m3", "kprobe_m3"),
    ProbeSpec::ret("m4", "kretprobe_m4"),
    ProbeSpec::entry("m5", "kprobe_m5"),
];

pub const OPTIONAL: &[ProbeSpec] = &[
    ProbeSpec::entry("o1", "kprobe_o1"),
    ProbeSpec::entry("o2", "kprobe_o2"),
];
