/*!
Observability infrastructure for Rollsnap.

- Structured logging setup (plain or JSON) on top of `tracing-subscriber`
- Prometheus counters for rotation outcomes and EC2 calls (feature `metrics`)
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Gauge, Histogram, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
#[cfg(feature = "metrics")]
use std::time::Instant;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{Result, RotateError};

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<RotationMetrics> = OnceLock::new();

/// Metrics collection for rotation runs
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct RotationMetrics {
    // EC2 operation metrics
    pub ec2_requests_total: Counter,
    pub ec2_errors_total: Counter,
    pub ec2_latency_seconds: Histogram,

    // Rotation outcome metrics
    pub snapshots_created_total: Counter,
    pub snapshots_deleted_total: Counter,
    pub thaw_failures_total: Counter,
    pub retained_dates: Gauge,

    registry: Registry,
}

#[cfg(feature = "metrics")]
fn register_counter(registry: &Registry, name: &str, help: &str) -> Result<Counter> {
    let counter = Counter::new(name, help)
        .map_err(|e| RotateError::configuration(format!("Failed to create {name} metric: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| RotateError::configuration(format!("Failed to register {name}: {e}")))?;
    Ok(counter)
}

#[cfg(feature = "metrics")]
impl RotationMetrics {
    /// Initialize new metrics instance
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let ec2_requests_total = register_counter(
            &registry,
            "rollsnap_ec2_requests_total",
            "Total EC2 snapshot API requests made by Rollsnap",
        )?;
        let ec2_errors_total = register_counter(
            &registry,
            "rollsnap_ec2_errors_total",
            "Total EC2 snapshot API request errors",
        )?;
        let snapshots_created_total = register_counter(
            &registry,
            "rollsnap_snapshots_created_total",
            "Snapshots created by rotation runs",
        )?;
        let snapshots_deleted_total = register_counter(
            &registry,
            "rollsnap_snapshots_deleted_total",
            "Snapshots deleted by rotation runs",
        )?;
        let thaw_failures_total = register_counter(
            &registry,
            "rollsnap_thaw_failures_total",
            "Filesystem thaws that failed after a snapshot was started",
        )?;

        let ec2_latency_seconds = Histogram::with_opts(prometheus::HistogramOpts::new(
            "rollsnap_ec2_latency_seconds",
            "Duration of EC2 snapshot API operations in seconds",
        ))
        .map_err(|e| {
            RotateError::configuration(format!("Failed to create ec2_latency_seconds metric: {e}"))
        })?;
        registry
            .register(Box::new(ec2_latency_seconds.clone()))
            .map_err(|e| {
                RotateError::configuration(format!("Failed to register ec2_latency_seconds: {e}"))
            })?;

        let retained_dates = Gauge::new(
            "rollsnap_retained_dates",
            "Number of calendar dates retained by the last rotation",
        )
        .map_err(|e| {
            RotateError::configuration(format!("Failed to create retained_dates metric: {e}"))
        })?;
        registry
            .register(Box::new(retained_dates.clone()))
            .map_err(|e| {
                RotateError::configuration(format!("Failed to register retained_dates: {e}"))
            })?;

        Ok(Self {
            ec2_requests_total,
            ec2_errors_total,
            ec2_latency_seconds,
            snapshots_created_total,
            snapshots_deleted_total,
            thaw_failures_total,
            retained_dates,
            registry,
        })
    }

    /// Get or initialize global metrics instance
    pub fn global() -> &'static RotationMetrics {
        METRICS.get_or_init(|| Self::new().expect("Failed to initialize Rollsnap metrics"))
    }

    pub fn record_snapshot_created(&self) {
        self.snapshots_created_total.inc();
    }

    pub fn record_snapshot_deleted(&self) {
        self.snapshots_deleted_total.inc();
    }

    pub fn record_thaw_failure(&self) {
        self.thaw_failures_total.inc();
    }

    pub fn record_retained_dates(&self, count: usize) {
        self.retained_dates.set(count as f64);
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| RotateError::configuration(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer).map_err(|e| {
            RotateError::configuration(format!("Failed to convert metrics to string: {e}"))
        })
    }
}

/// Timer for one EC2 API operation
#[cfg(feature = "metrics")]
pub struct MetricsTimer {
    start: Instant,
}

#[cfg(feature = "metrics")]
impl MetricsTimer {
    /// Count a request and start timing it
    pub fn start_ec2_operation(operation: &str) -> Self {
        tracing::trace!(operation, "Starting EC2 operation timer");
        RotationMetrics::global().ec2_requests_total.inc();
        Self {
            start: Instant::now(),
        }
    }

    /// Complete the timer, recording latency
    pub fn finish(self) {
        RotationMetrics::global()
            .ec2_latency_seconds
            .observe(self.start.elapsed().as_secs_f64());
    }

    /// Complete the timer with an error, recording both latency and error
    pub fn finish_with_error(self) {
        let metrics = RotationMetrics::global();
        metrics
            .ec2_latency_seconds
            .observe(self.start.elapsed().as_secs_f64());
        metrics.ec2_errors_total.inc();
    }
}

/// Initialize the global logging subscriber
///
/// `RUST_LOG` takes precedence; otherwise Rollsnap logs at `info` (or `debug`
/// when `verbose`) and everything else at `warn`. Logs go to stderr so command
/// output on stdout stays machine-readable.
pub fn init_observability(json: bool, verbose: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    RotationMetrics::global();

    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,rollsnap={level}")));

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false)
            .with_writer(std::io::stderr);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };

    result.map_err(|e| {
        RotateError::configuration(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!("Rollsnap logging initialized");
    Ok(())
}
