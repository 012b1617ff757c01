//! OpenTelemetry metrics export module
//!
//! Exports scan latency, correlation diagnostics and the agent's own resource
//! usage to an OpenTelemetry Collector.
//!
//! Export is enabled only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set. Every
//! `record_*` helper is a no-op until [`init_metrics`] has succeeded.

use anyhow::{Context, Result};
use log::info;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};
use std::time::Duration;

use crate::process::ProcessSnapshot;

/// Metric export interval in seconds
const METRIC_EXPORT_INTERVAL_SECS: u64 = 30;

static METRICS: OnceLock<WaldoMetrics> = OnceLock::new();

/// Kept for graceful shutdown
static METER_PROVIDER: OnceLock<SdkMeterProvider> = OnceLock::new();

/// Attached probes by symbol (read by the ObservableGauge callback)
static ACTIVE_PROBES: OnceLock<RwLock<HashMap<String, u64>>> = OnceLock::new();

fn active_probes_map() -> &'static RwLock<HashMap<String, u64>> {
    ACTIVE_PROBES.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Note: Do NOT add _total suffix to Counter names (Prometheus adds it automatically)
pub struct WaldoMetrics {
    pub scan_events: Counter<u64>,
    pub scan_duration_ns: Histogram<u64>,
    pub scan_unmatched_events: Counter<u64>,
    pub scan_store_full_events: Counter<u64>,
    pub process_cpu_utime_us: Gauge<u64>,
    pub process_max_rss_kb: Gauge<u64>,
}

impl WaldoMetrics {
    fn new(meter: &Meter) -> Self {
        Self {
            scan_events: meter
                .u64_counter("scan_events")
                .with_description("Number of completed wireless scans")
                .with_unit("events")
                .build(),
            scan_duration_ns: meter
                .u64_histogram("scan_duration_ns")
                .with_description("Time from scan request to scan completion")
                .with_unit("ns")
                .build(),
            scan_unmatched_events: meter
                .u64_counter("scan_unmatched_events")
                .with_description("Scan completions without an observed start")
                .with_unit("events")
                .build(),
            scan_store_full_events: meter
                .u64_counter("scan_store_full_events")
                .with_description("Scan starts dropped because the correlation store was full")
                .with_unit("events")
                .build(),
            process_cpu_utime_us: meter
                .u64_gauge("process_cpu_utime_us")
                .with_description("User CPU time consumed by the agent")
                .with_unit("us")
                .build(),
            process_max_rss_kb: meter
                .u64_gauge("process_max_rss_kb")
                .with_description("Peak resident set size of the agent")
                .with_unit("kB")
                .build(),
        }
    }
}

/// Returns None when the variable is unset or empty; adds a missing scheme.
fn get_otlp_endpoint() -> Option<String> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    if endpoint.is_empty() {
        return None;
    }

    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        Some(format!("http://{}", endpoint))
    } else {
        Some(endpoint)
    }
}

/// Initialize OpenTelemetry metrics provider (OTLP over gRPC).
/// Skips initialization if OTEL_EXPORTER_OTLP_ENDPOINT is not set.
pub fn init_metrics() -> Result<()> {
    let endpoint = match get_otlp_endpoint() {
        Some(ep) => ep,
        None => {
            info!("OTEL_EXPORTER_OTLP_ENDPOINT not set. Metrics export disabled.");
            return Ok(());
        }
    };

    info!("Initializing OpenTelemetry metrics exporter");
    info!("OTLP endpoint: {}", endpoint);

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to create OTLP metric exporter")?;

    let reader = PeriodicReader::builder(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_interval(Duration::from_secs(METRIC_EXPORT_INTERVAL_SECS))
        .build();

    let resource = Resource::default().merge(&Resource::new(vec![
        KeyValue::new("service.name", "waldo"),
        KeyValue::new("telemetry.sdk.language", "rust"),
    ]));

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build();

    global::set_meter_provider(provider.clone());
    let _ = METER_PROVIDER.set(provider);

    let meter = global::meter("waldo");

    let _active_probes_gauge = meter
        .u64_observable_gauge("active_probes")
        .with_description("Number of currently attached kprobes")
        .with_unit("probes")
        .with_callback(|observer| {
            if let Ok(probes) = active_probes_map().read() {
                for (symbol, count) in probes.iter() {
                    observer.observe(*count, &[KeyValue::new("symbol", symbol.clone())]);
                }
            }
        })
        .build();

    let _ = METRICS.set(WaldoMetrics::new(&meter));

    info!("OpenTelemetry metrics initialized successfully");
    Ok(())
}

pub fn metrics() -> Option<&'static WaldoMetrics> {
    METRICS.get()
}

/// 1 while the probe on `symbol` is attached, 0 after it is detached.
pub fn record_active_probe(symbol: &str, count: u64) {
    if let Ok(mut probes) = active_probes_map().write() {
        probes.insert(symbol.to_string(), count);
    }
}

pub fn active_probe_count() -> u64 {
    active_probes_map()
        .read()
        .map(|probes| probes.values().sum())
        .unwrap_or(0)
}

pub fn record_scan_completed(duration_ns: u64) {
    if let Some(m) = metrics() {
        m.scan_events.add(1, &[]);
        m.scan_duration_ns.record(duration_ns, &[]);
    }
}

pub fn record_scan_unmatched() {
    if let Some(m) = metrics() {
        m.scan_unmatched_events.add(1, &[]);
    }
}

pub fn record_scan_store_full() {
    if let Some(m) = metrics() {
        m.scan_store_full_events.add(1, &[]);
    }
}

pub fn record_process_snapshot(snapshot: &ProcessSnapshot) {
    if let Some(m) = metrics() {
        let attrs = [KeyValue::new("pid", i64::from(snapshot.pid))];
        m.process_cpu_utime_us
            .record(snapshot.cpu_utime.as_micros() as u64, &attrs);
        m.process_max_rss_kb
            .record(snapshot.max_rss_kb.max(0) as u64, &attrs);
    }
}

/// Flushes pending metrics and shuts down the MeterProvider
pub fn shutdown_metrics() {
    if let Some(provider) = METER_PROVIDER.get() {
        info!("Shutting down OpenTelemetry metrics...");
        if let Err(e) = provider.shutdown() {
            log::warn!("Failed to shutdown MeterProvider: {}", e);
        } else {
            info!("OpenTelemetry metrics shutdown complete");
        }
    }
}
