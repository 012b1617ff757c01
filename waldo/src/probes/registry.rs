use log::{error, info, warn};

use super::{ProbeBackend, ProbeError, ProbeSpec};
use crate::telemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Detached,
    Attached,
}

/// Result of a [`ProbeRegistry::detach_all`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DetachReport {
    pub detached: usize,
    pub failed: usize,
}

/// Owns every live attachment. Probes are released in reverse attachment
/// order, on `detach_all`, on a failed `attach_all`, or on drop.
pub struct ProbeRegistry<B: ProbeBackend> {
    backend: B,
    mandatory: &'static [ProbeSpec],
    optional: &'static [ProbeSpec],
    optional_enabled: bool,
    attached: Vec<(ProbeSpec, B::Handle)>,
}

impl<B: ProbeBackend> ProbeRegistry<B> {
    pub fn new(
        backend: B,
        mandatory: &'static [ProbeSpec],
        optional: &'static [ProbeSpec],
        optional_enabled: bool,
    ) -> Self {
        Self {
            backend,
            mandatory,
            optional,
            optional_enabled,
            attached: Vec::with_capacity(mandatory.len() + optional.len()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Attaches the mandatory group, then the optional group if enabled.
    ///
    /// All or nothing: on the first failure everything attached so far,
    /// mandatory probes included, is detached before the error is returned.
    pub fn attach_all(&mut self) -> Result<(), ProbeError> {
        let mandatory = self.mandatory;
        self.attach_group(mandatory)?;

        if self.optional_enabled {
            let optional = self.optional;
            self.attach_group(optional)?;
        }

        info!("Attached {} probes", self.attached.len());
        Ok(())
    }

    fn attach_group(&mut self, group: &'static [ProbeSpec]) -> Result<(), ProbeError> {
        for spec in group {
            if self.is_attached(spec.symbol) {
                continue;
            }
            match self.backend.attach(spec) {
                Ok(handle) => {
                    info!("Attached {} to {}", spec.kind, spec.symbol);
                    telemetry::record_active_probe(spec.symbol, 1);
                    self.attached.push((*spec, handle));
                }
                Err(source) => {
                    let err = ProbeError::attach(spec, source);
                    error!("{}", err);
                    self.rollback();
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self) {
        if self.attached.is_empty() {
            return;
        }
        warn!("Rolling back {} attached probes", self.attached.len());
        self.detach_all();
    }

    /// Best-effort release of every attachment, newest first.
    pub fn detach_all(&mut self) -> DetachReport {
        let mut report = DetachReport::default();
        while let Some((spec, handle)) = self.attached.pop() {
            match self.backend.detach(&spec, handle) {
                Ok(()) => {
                    info!("Detached {} from {}", spec.kind, spec.symbol);
                    report.detached += 1;
                }
                Err(e) => {
                    warn!("Failed to detach {} from {}: {}", spec.kind, spec.symbol, e);
                    report.failed += 1;
                }
            }
            telemetry::record_active_probe(spec.symbol, 0);
        }
        report
    }

    pub fn state(&self, symbol: &str) -> ProbeState {
        if self.is_attached(symbol) {
            ProbeState::Attached
        } else {
            ProbeState::Detached
        }
    }

    pub fn attached_count(&self) -> usize {
        self.attached.len()
    }

    fn is_attached(&self, symbol: &str) -> bool {
        self.attached.iter().any(|(spec, _)| spec.symbol == symbol)
    }
}

impl<B: ProbeBackend> Drop for ProbeRegistry<B> {
    fn drop(&mut self) {
        if !self.attached.is_empty() {
            self.detach_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::{BackendError, ProbeKind};

    const GROUP: &[ProbeSpec] = &[
        ProbeSpec::entry("a", "kprobe_a"),
        ProbeSpec::ret("b", "kretprobe_b"),
    ];

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl ProbeBackend for Recorder {
        type Handle = &'static str;

        fn attach(&mut self, spec: &ProbeSpec) -> Result<Self::Handle, BackendError> {
            self.calls.push(format!("attach {}", spec.symbol));
            Ok(spec.symbol)
        }

        fn detach(&mut self, _spec: &ProbeSpec, handle: Self::Handle) -> Result<(), BackendError> {
            self.calls.push(format!("detach {handle}"));
            Ok(())
        }
    }

    #[test]
    fn test_attach_twice_is_noop() {
        let mut registry = ProbeRegistry::new(Recorder::default(), GROUP, &[], false);
        registry.attach_all().unwrap();
        registry.attach_all().unwrap();

        assert_eq!(registry.attached_count(), 2);
        assert_eq!(registry.backend().calls, ["attach a", "attach b"]);
        assert_eq!(registry.state("b"), ProbeState::Attached);
        assert_eq!(GROUP[1].kind, ProbeKind::Return);
    }

    #[test]
    fn test_detach_reverse_order() {
        let mut registry = ProbeRegistry::new(Recorder::default(), GROUP, &[], false);
        registry.attach_all().unwrap();
        let report = registry.detach_all();

        assert_eq!(report, DetachReport { detached: 2, failed: 0 });
        assert_eq!(
            registry.backend().calls,
            ["attach a", "attach b", "detach b", "detach a"]
        );
        assert_eq!(registry.state("a"), ProbeState::Detached);
        assert_eq!(registry.detach_all(), DetachReport::default());
    }
}
