use std::collections::HashSet;

use anyhow::{Context, Result};
use aya::{
    Ebpf,
    maps::{HashMap, MapData, PerCpuArray},
    programs::{KProbe, ProgramError, kprobe::KProbeLinkId},
};
use log::{debug, info};
use waldo_common::CorrelationKey;

use super::{BackendError, ProbeBackend, ProbeSpec};
use crate::correlation::StoreDiagnostics;

/// Attaches the programs of a loaded eBPF object as kprobes/kretprobes.
pub struct KProbeBackend {
    bpf: Ebpf,
    loaded: HashSet<&'static str>,
}

impl KProbeBackend {
    pub fn new(bpf: Ebpf) -> Self {
        Self {
            bpf,
            loaded: HashSet::new(),
        }
    }

    pub fn ebpf_mut(&mut self) -> &mut Ebpf {
        &mut self.bpf
    }

    fn program(&mut self, name: &str) -> Result<&mut KProbe, BackendError> {
        let program = self
            .bpf
            .program_mut(name)
            .ok_or_else(|| BackendError::new(format!("Failed to find {} program", name), None))?;
        let kprobe: Result<&mut KProbe, ProgramError> = program.try_into();
        kprobe.map_err(|e| BackendError::from_source(format!("{} is not a kprobe", name), e))
    }
}

impl ProbeBackend for KProbeBackend {
    type Handle = KProbeLinkId;

    fn attach(&mut self, spec: &ProbeSpec) -> Result<Self::Handle, BackendError> {
        let first_use = !self.loaded.contains(spec.program);
        let program = self.program(spec.program)?;

        if first_use {
            info!("Loading program {}", spec.program);
            program.load().map_err(|e| {
                BackendError::from_source(format!("Failed to load {}", spec.program), e)
            })?;
        }

        let link = program.attach(spec.symbol, 0).map_err(|e| {
            BackendError::from_source(format!("Failed to attach {}", spec.symbol), e)
        })?;
        self.loaded.insert(spec.program);
        Ok(link)
    }

    fn detach(&mut self, spec: &ProbeSpec, handle: Self::Handle) -> Result<(), BackendError> {
        self.program(spec.program)?.detach(handle).map_err(|e| {
            BackendError::from_source(format!("Failed to detach {}", spec.symbol), e)
        })
    }
}

/// Health view over the kernel correlation maps.
pub struct KernelStoreDiagnostics {
    start_times: HashMap<MapData, CorrelationKey, u64>,
    store_failures: PerCpuArray<MapData, u64>,
}

impl KernelStoreDiagnostics {
    pub fn take_from(bpf: &mut Ebpf) -> Result<Self> {
        let start_times = HashMap::try_from(
            bpf.take_map("SCAN_START")
                .context("Failed to find SCAN_START map")?,
        )
        .context("SCAN_START is not a HashMap")?;
        let store_failures = take_per_cpu_counter(bpf, "SCAN_STORE_FAILURES")?;

        Ok(Self {
            start_times,
            store_failures,
        })
    }
}

/// Takes a single-slot per-CPU counter map out of the object.
pub fn take_per_cpu_counter(bpf: &mut Ebpf, name: &str) -> Result<PerCpuArray<MapData, u64>> {
    let map = bpf
        .take_map(name)
        .with_context(|| format!("Failed to find {} map", name))?;
    PerCpuArray::try_from(map).with_context(|| format!("{} is not a PerCpuArray", name))
}

/// Sum of slot 0 over all CPUs; 0 if the map cannot be read.
pub fn per_cpu_total(counter: &PerCpuArray<MapData, u64>) -> u64 {
    match counter.get(&0, 0) {
        Ok(per_cpu) => per_cpu.iter().copied().sum(),
        Err(e) => {
            debug!("Could not read per-CPU counter: {}", e);
            0
        }
    }
}

impl StoreDiagnostics for KernelStoreDiagnostics {
    fn failed_inserts(&self) -> u64 {
        per_cpu_total(&self.store_failures)
    }

    fn in_flight(&self) -> usize {
        self.start_times.keys().filter(Result::is_ok).count()
    }
}
