//! Top-level control loop: attach, report on a fixed cadence until the
//! shutdown token is cancelled, then release every probe.

use std::time::Duration;

use chrono::Local;
use log::{debug, error, info, warn};
use tokio::{signal, sync::mpsc::UnboundedReceiver};
use waldo_common::ScanOutcome;

use crate::correlation::{OperationStats, StoreDiagnostics};
use crate::metrics::{Counter, Timer, describe};
use crate::probes::{ProbeBackend, ProbeRegistry};
use crate::process::{ProcessSnapshot, startup_banner};
use crate::shutdown::ShutdownSignal;
use crate::telemetry;

const TRACE_PIPE: &str = "/sys/kernel/debug/tracing/trace_pipe";

/// What a finished [`Supervisor::run`] leaves behind.
#[derive(Debug)]
pub struct RunSummary {
    pub exit_code: i32,
    /// Completed report ticks
    pub ticks: i64,
    pub scans: OperationStats,
}

impl RunSummary {
    fn aborted(exit_code: i32) -> Self {
        Self {
            exit_code,
            ticks: 0,
            scans: OperationStats::new(),
        }
    }
}

/// Where to look once the probes are live.
pub fn usage_hint() -> String {
    format!(
        "Probe trace lines: sudo cat {}; trigger a scan with: sudo iw dev <iface> scan",
        TRACE_PIPE
    )
}

pub struct Supervisor<B: ProbeBackend> {
    name: String,
    registry: ProbeRegistry<B>,
    shutdown: ShutdownSignal,
    interval: Duration,
    scan_events: Option<UnboundedReceiver<ScanOutcome>>,
    diagnostics: Option<Box<dyn StoreDiagnostics + Send>>,
}

impl<B: ProbeBackend> Supervisor<B> {
    pub fn new(
        name: impl Into<String>,
        registry: ProbeRegistry<B>,
        shutdown: ShutdownSignal,
        interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            registry,
            shutdown,
            interval,
            scan_events: None,
            diagnostics: None,
        }
    }

    /// Scan outcomes to fold into the scan statistics on every tick.
    pub fn with_scan_events(mut self, events: UnboundedReceiver<ScanOutcome>) -> Self {
        self.scan_events = Some(events);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Box<dyn StoreDiagnostics + Send>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Runs until the shutdown token is cancelled. The summary carries the
    /// process exit status.
    pub async fn run(mut self) -> RunSummary {
        if let Err(e) = self.registry.attach_all() {
            error!("{}: startup aborted: {}", self.name, e);
            return RunSummary::aborted(e.exit_code());
        }

        spawn_signal_handler(self.shutdown.clone());

        println!(
            "{}",
            startup_banner(&self.name, std::process::id(), &Local::now())
        );
        info!("{}", usage_hint());

        let mut stats = OperationStats::new();
        let mut report_timer = Timer::new();
        let mut ticks = Counter::new();

        loop {
            tokio::time::sleep(self.interval).await;
            if self.shutdown.is_cancelled() {
                break;
            }

            report_timer.start();
            self.drain_scan_events(&mut stats);
            match ProcessSnapshot::capture() {
                Ok(snapshot) => {
                    println!("{}", snapshot);
                    telemetry::record_process_snapshot(&snapshot);
                }
                Err(e) => warn!("Failed to sample resource usage: {:#}", e),
            }
            ticks.increment(1);
            if let Err(e) = report_timer.stop() {
                debug!("Report timer: {}", e);
            }

            info!(
                "{} {} {} scan[{}] {}",
                describe("ticks", &ticks),
                describe("report_mean_s", report_timer.latency()),
                describe("report_rate", report_timer.meter()),
                stats,
                self.store_health(),
            );
        }

        info!("Exiting...");
        let report = self.registry.detach_all();
        if report.failed > 0 {
            warn!(
                "Detached {} probes, {} failed to detach",
                report.detached, report.failed
            );
        } else {
            info!("Detached {} probes", report.detached);
        }
        RunSummary {
            exit_code: 0,
            ticks: ticks.value(),
            scans: stats,
        }
    }

    fn drain_scan_events(&mut self, stats: &mut OperationStats) {
        let Some(events) = self.scan_events.as_mut() else {
            return;
        };
        while let Ok(outcome) = events.try_recv() {
            stats.record(outcome);
        }
    }

    fn store_health(&self) -> String {
        match &self.diagnostics {
            Some(d) => format!(
                "store[in_flight={} failed_inserts={}]",
                d.in_flight(),
                d.failed_inserts()
            ),
            None => "store[n/a]".to_string(),
        }
    }
}

fn spawn_signal_handler(shutdown: ShutdownSignal) {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => shutdown.cancel(),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_hint_points_at_trace_pipe() {
        let hint = usage_hint();
        assert!(hint.contains("/sys/kernel/debug/tracing/trace_pipe"));
        assert!(hint.contains("iw dev"));
    }
}
