/*!
Observability infrastructure for the Rewind core.

This module provides:
- Structured logging setup through `tracing-subscriber`
- Prometheus counters and histograms for snapshot and rewind operations
  (behind the `metrics` feature)
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use tracing::subscriber::set_global_default;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{Result, SnapshotError};

/// Filter directive used when `RUST_LOG` does not mention this crate
pub const DEFAULT_DIRECTIVE: &str = "rewind_core=info";

/// Global metrics instance, `None` if registration failed
#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<RewindMetrics>> = OnceLock::new();

/// Metrics collection for Rewind operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct RewindMetrics {
    pub snapshots_taken_total: Counter,
    pub snapshots_cancelled_total: Counter,
    pub rewinds_total: Counter,
    pub rewinds_cancelled_total: Counter,
    pub rewinds_failed_total: Counter,

    /// Attributes per stored snapshot
    pub snapshot_attributes: Histogram,
    /// Size of the storage blob
    pub storage_size_bytes: Histogram,

    registry: Registry,
}

#[cfg(feature = "metrics")]
impl RewindMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let snapshots_taken_total = counter(
            &registry,
            "rewind_snapshots_taken_total",
            "Total snapshots stored",
        )?;
        let snapshots_cancelled_total = counter(
            &registry,
            "rewind_snapshots_cancelled_total",
            "Total snapshots cancelled by an observer",
        )?;
        let rewinds_total = counter(&registry, "rewind_rewinds_total", "Total completed rewinds")?;
        let rewinds_cancelled_total = counter(
            &registry,
            "rewind_rewinds_cancelled_total",
            "Total rewinds cancelled by an observer",
        )?;
        let rewinds_failed_total = counter(
            &registry,
            "rewind_rewinds_failed_total",
            "Total rewinds that failed and were rolled back",
        )?;

        let snapshot_attributes = histogram(
            &registry,
            HistogramOpts::new(
                "rewind_snapshot_attributes",
                "Number of attributes captured per snapshot",
            )
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]),
        )?;
        let storage_size_bytes = histogram(
            &registry,
            HistogramOpts::new(
                "rewind_storage_size_bytes",
                "Size of the encoded snapshot storage in bytes",
            )
            .buckets(prometheus::exponential_buckets(64.0, 4.0, 8).map_err(|e| {
                SnapshotError::observability(format!("Invalid storage size buckets: {e}"))
            })?),
        )?;

        Ok(Self {
            snapshots_taken_total,
            snapshots_cancelled_total,
            rewinds_total,
            rewinds_cancelled_total,
            rewinds_failed_total,
            snapshot_attributes,
            storage_size_bytes,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    ///
    /// Returns `None` if the metrics could not be registered; the failure is logged once.
    pub fn global() -> Option<&'static RewindMetrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::error!("Failed to initialize Rewind metrics: {}", e);
                    None
                }
            })
            .as_ref()
    }

    /// Record a stored snapshot
    pub fn record_snapshot(&self, attributes: usize, storage_bytes: usize) {
        self.snapshots_taken_total.inc();
        self.snapshot_attributes.observe(attributes as f64);
        self.storage_size_bytes.observe(storage_bytes as f64);
    }

    pub fn record_snapshot_cancelled(&self) {
        self.snapshots_cancelled_total.inc();
    }

    pub fn record_rewind(&self) {
        self.rewinds_total.inc();
    }

    pub fn record_rewind_cancelled(&self) {
        self.rewinds_cancelled_total.inc();
    }

    pub fn record_rewind_failed(&self) {
        self.rewinds_failed_total.inc();
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| SnapshotError::observability(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer).map_err(|e| {
            SnapshotError::observability(format!("Failed to convert metrics to string: {e}"))
        })
    }
}

#[cfg(feature = "metrics")]
fn counter(registry: &Registry, name: &str, help: &str) -> Result<Counter> {
    let counter = Counter::new(name, help)
        .map_err(|e| SnapshotError::observability(format!("Failed to create {name}: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| SnapshotError::observability(format!("Failed to register {name}: {e}")))?;
    Ok(counter)
}

#[cfg(feature = "metrics")]
fn histogram(registry: &Registry, opts: HistogramOpts) -> Result<Histogram> {
    let name = opts.common_opts.name.clone();
    let histogram = Histogram::with_opts(opts)
        .map_err(|e| SnapshotError::observability(format!("Failed to create {name}: {e}")))?;
    registry
        .register(Box::new(histogram.clone()))
        .map_err(|e| SnapshotError::observability(format!("Failed to register {name}: {e}")))?;
    Ok(histogram)
}

/// Run `f` against the global metrics, if they are available
#[cfg(feature = "metrics")]
pub(crate) fn with_metrics<F: FnOnce(&RewindMetrics)>(f: F) {
    if let Some(metrics) = RewindMetrics::global() {
        f(metrics);
    }
}

/// Gather the global metrics in Prometheus text format
#[cfg(feature = "metrics")]
pub fn gather_metrics() -> Result<String> {
    RewindMetrics::global()
        .ok_or_else(|| SnapshotError::observability("metrics are not initialized"))?
        .gather_metrics()
}

/// Initialize the global observability system
///
/// Installs a `tracing` subscriber filtered by `RUST_LOG` (plus
/// [`DEFAULT_DIRECTIVE`]) and, with the `metrics` feature, the global metrics.
///
/// # Arguments
/// * `json` - Emit log lines as JSON instead of human-readable text
///
/// # Errors
/// * `SnapshotError::Observability` - If a global subscriber is already installed
pub fn init_observability(json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    RewindMetrics::global();

    let directive = DEFAULT_DIRECTIVE
        .parse::<Directive>()
        .map_err(|e| SnapshotError::observability(format!("Invalid log directive: {e}")))?;
    let filter = EnvFilter::from_default_env().add_directive(directive);

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };
    result.map_err(|e| {
        SnapshotError::observability(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::info!("Rewind observability initialized");
    Ok(())
}

/// Initialize observability with JSON logs
pub fn init_default_observability() -> Result<()> {
    init_observability(true)
}
