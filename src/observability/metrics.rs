//! OpenTelemetry meter provider initialization and the core's fixed metric
//! surface (spec.md §4.8, §6).

use std::sync::OnceLock;
use std::time::Duration;

use opentelemetry::metrics::{Counter, Gauge, Histogram};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::Resource;

use crate::config::ObservabilityConfig;

static RUNS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
static RUN_DURATION_SECONDS: OnceLock<Histogram<f64>> = OnceLock::new();
static DELETES_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
static DELETE_DURATION_SECONDS: OnceLock<Histogram<f64>> = OnceLock::new();
static STORAGE_DELETED_BYTES_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
static POSTPONES_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
static SLEEP_DURATION_SECONDS: OnceLock<Histogram<f64>> = OnceLock::new();
static QUEUE_SIZE: OnceLock<Gauge<u64>> = OnceLock::new();

/// Build a [`Resource`] describing this service instance for metrics.
fn build_resource(config: &ObservabilityConfig) -> Resource {
    let deployment_env =
        std::env::var("DEPLOYMENT_ENVIRONMENT").unwrap_or_else(|_| "local".to_owned());

    Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes([
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("deployment.environment", deployment_env),
        ])
        .build()
}

/// Initialise the global `OTel` [`SdkMeterProvider`].
///
/// Returns `None` when `config.enabled` is `false` — the global meter provider
/// is left as the no-op default installed by the `opentelemetry` crate.
pub fn init(config: &ObservabilityConfig) -> Option<SdkMeterProvider> {
    if !config.enabled {
        return None;
    }

    let resource = build_resource(config);

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .expect("failed to build OTLP metric exporter");

    let provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_periodic_exporter(exporter)
        .build();

    global::set_meter_provider(provider.clone());

    Some(provider)
}

/// Return the global [`opentelemetry::metrics::Meter`] scoped to `name`.
#[must_use]
pub fn meter(name: &'static str) -> opentelemetry::metrics::Meter {
    global::meter(name)
}

/// Registers all application metrics. Call once at startup after `init()`.
pub fn register_metrics() {
    let meter = meter("registry-gc");

    RUNS_TOTAL.get_or_init(|| {
        meter
            .u64_counter("registry_gc_runs_total")
            .with_description("Total worker run invocations")
            .build()
    });

    RUN_DURATION_SECONDS.get_or_init(|| {
        meter
            .f64_histogram("registry_gc_run_duration_seconds")
            .with_description("Duration of a single worker run")
            .with_unit("s")
            .build()
    });

    DELETES_TOTAL.get_or_init(|| {
        meter
            .u64_counter("registry_gc_deletes_total")
            .with_description("Total artifact deletions attempted")
            .build()
    });

    DELETE_DURATION_SECONDS.get_or_init(|| {
        meter
            .f64_histogram("registry_gc_delete_duration_seconds")
            .with_description("Duration of a single artifact delete")
            .with_unit("s")
            .build()
    });

    STORAGE_DELETED_BYTES_TOTAL.get_or_init(|| {
        meter
            .u64_counter("registry_gc_storage_deleted_bytes_total")
            .with_description("Bytes reclaimed from object storage")
            .with_unit("By")
            .build()
    });

    POSTPONES_TOTAL.get_or_init(|| {
        meter
            .u64_counter("registry_gc_postpones_total")
            .with_description("Total review task postponements")
            .build()
    });

    SLEEP_DURATION_SECONDS.get_or_init(|| {
        meter
            .f64_histogram("registry_gc_sleep_duration_seconds")
            .with_description("Agent sleep duration between runs")
            .with_unit("s")
            .build()
    });

    QUEUE_SIZE.get_or_init(|| {
        meter
            .u64_gauge("registry_gc_queue_size")
            .with_description("Approximate review queue depth")
            .build()
    });
}

/// Record a worker run outcome (spec.md §4.8: run counter + latency histogram).
pub fn record_run(worker: &'static str, found: bool, error: bool, duration: Duration) {
    let attrs = [
        KeyValue::new("worker", worker),
        KeyValue::new("noop", !found),
        KeyValue::new("error", error),
    ];
    if let Some(counter) = RUNS_TOTAL.get() {
        counter.add(1, &attrs);
    }
    if let Some(histogram) = RUN_DURATION_SECONDS.get() {
        histogram.record(duration.as_secs_f64(), &attrs);
    }
}

/// Record the agent's inter-run sleep (spec.md §4.8).
pub fn record_sleep(worker: &'static str, duration: Duration) {
    if let Some(histogram) = SLEEP_DURATION_SECONDS.get() {
        histogram.record(duration.as_secs_f64(), &[KeyValue::new("worker", worker)]);
    }
}

/// Record a single-backend delete outcome (spec.md §4.8).
pub fn record_delete(
    backend: &'static str,
    artifact: &'static str,
    error: bool,
    duration: Duration,
) {
    let attrs = [
        KeyValue::new("backend", backend),
        KeyValue::new("artifact", artifact),
        KeyValue::new("error", error),
    ];
    if let Some(counter) = DELETES_TOTAL.get() {
        counter.add(1, &attrs);
    }
    if let Some(histogram) = DELETE_DURATION_SECONDS.get() {
        histogram.record(duration.as_secs_f64(), &attrs);
    }
}

/// Record bytes reclaimed from object storage (spec.md §4.8).
pub fn record_bytes_deleted(media_type: &str, bytes: u64) {
    if let Some(counter) = STORAGE_DELETED_BYTES_TOTAL.get() {
        counter.add(bytes, &[KeyValue::new("media_type", media_type.to_string())]);
    }
}

/// Record a review-task postponement (spec.md §4.8).
pub fn record_postpone(worker: &'static str) {
    if let Some(counter) = POSTPONES_TOTAL.get() {
        counter.add(1, &[KeyValue::new("worker", worker)]);
    }
}

/// Record the current depth of one queue (spec.md §4.8).
pub fn record_queue_size(queue_name: &'static str, size: u64) {
    if let Some(gauge) = QUEUE_SIZE.get() {
        gauge.record(size, &[KeyValue::new("queue_name", queue_name)]);
    }
}
