use anyhow::{Context, Result};
use aya::Ebpf;
use aya_log::EbpfLogger;
use log::{info, warn};
use tokio::sync::mpsc;

pub mod correlation;
pub mod metrics;
pub mod probes;
pub mod process;
pub mod settings;
pub mod shutdown;
pub mod supervisor;
pub mod telemetry;

use crate::probes::{
    NETDEV_PROBES, ProbeRegistry, WIRELESS_PROBES,
    events::spawn_event_reader,
    kprobe::{KProbeBackend, KernelStoreDiagnostics, per_cpu_total, take_per_cpu_counter},
};
use crate::settings::Settings;
use crate::shutdown::ShutdownSignal;
use crate::supervisor::Supervisor;

pub struct WaldoEngine {
    pub settings: Settings,
    name: String,
    bpf: Ebpf,
}

impl WaldoEngine {
    pub fn new(name: impl Into<String>, settings: Settings, bytecode: &[u8]) -> Result<Self> {
        bump_memlock_rlimit()?;
        let mut bpf = Ebpf::load(bytecode).context("Failed to load eBPF object")?;
        if settings.ebpf_log_enabled() {
            if let Err(e) = EbpfLogger::init(&mut bpf) {
                warn!("Failed to initialize eBPF logger: {}", e);
            }
        }
        Ok(Self {
            settings,
            name: name.into(),
            bpf,
        })
    }

    /// Attaches the probes and supervises them until SIGINT. Returns the
    /// process exit status.
    pub async fn run(mut self) -> Result<i32> {
        let shutdown = ShutdownSignal::new();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();

        let diagnostics = KernelStoreDiagnostics::take_from(&mut self.bpf)?;
        let channel_lookups = take_per_cpu_counter(&mut self.bpf, "CHANNEL_LOOKUPS")?;
        let reader = spawn_event_reader(&mut self.bpf, shutdown.clone(), outcomes_tx)?;

        let netdev = self.settings.netdev_probes_enabled();
        if netdev {
            info!("ATTACH_NETDEV_KPROBES=1: netdev probes enabled");
        }
        let registry = ProbeRegistry::new(
            KProbeBackend::new(self.bpf),
            WIRELESS_PROBES,
            NETDEV_PROBES,
            netdev,
        );

        let summary = Supervisor::new(
            self.name,
            registry,
            shutdown.clone(),
            self.settings.report_interval(),
        )
        .with_scan_events(outcomes_rx)
        .with_diagnostics(Box::new(diagnostics))
        .run()
        .await;

        shutdown.cancel();
        if reader.join().is_err() {
            warn!("Event reader thread panicked");
        }
        info!(
            "ieee80211_get_channel_khz returned {} times",
            per_cpu_total(&channel_lookups)
        );
        Ok(summary.exit_code)
    }
}

fn bump_memlock_rlimit() -> Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!("Failed to increase rlimit");
    }
    Ok(())
}
