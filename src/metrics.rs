//! Prometheus metrics for the reconciliation loop.
//!
//! All instruments live in a process-global registry; there is exactly one
//! controller per process, and tests read values back through the same
//! statics.

use std::sync::LazyLock;
use std::time::Duration;

use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

use crate::plan::Changes;

/// Global metrics registry, exposed via the health server's metrics endpoint.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Total reconciliation cycles, labelled by `result` (`success`/`error`).
pub static RECONCILIATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let counter = CounterVec::new(
        Opts::new(
            "external_dns_docker_reconciliations_total",
            "Total number of reconciliation cycles by result",
        ),
        &["result"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Wall-clock duration of reconciliation cycles.
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(
            "external_dns_docker_reconciliation_duration_seconds",
            "Duration of reconciliation cycles in seconds",
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .unwrap();
    REGISTRY.register(Box::new(histogram.clone())).unwrap();
    histogram
});

/// Number of desired endpoints seen in the most recent cycle.
pub static RECORDS_MANAGED: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        "external_dns_docker_records_managed",
        "Number of DNS records currently managed",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// DNS operations attempted, labelled by `op` (`create`/`update`/`delete`)
/// and `result` (`success`/`error`).
pub static DNS_OPERATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let counter = CounterVec::new(
        Opts::new(
            "external_dns_docker_dns_operations_total",
            "Total number of DNS operations by kind and result",
        ),
        &["op", "result"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Record the outcome and duration of one reconciliation cycle.
pub fn record_reconciliation(success: bool, duration: Duration) {
    let result = if success { "success" } else { "error" };
    RECONCILIATIONS_TOTAL.with_label_values(&[result]).inc();
    RECONCILIATION_DURATION_SECONDS.observe(duration.as_secs_f64());
}

/// Update the records-managed gauge to the size of the desired set.
pub fn set_records_managed(count: usize) {
    RECORDS_MANAGED.set(count as f64);
}

/// Count the DNS operations in a change set under the given result label,
/// one increment per endpoint per operation kind.
pub fn record_dns_operations(changes: &Changes, result: &str) {
    for (op, count) in [
        ("create", changes.create.len()),
        ("update", changes.update_old.len()),
        ("delete", changes.delete.len()),
    ] {
        if count > 0 {
            DNS_OPERATIONS_TOTAL
                .with_label_values(&[op, result])
                .inc_by(count as f64);
        }
    }
}

/// Gather all metrics in the Prometheus text exposition format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
