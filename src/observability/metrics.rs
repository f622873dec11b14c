//! # Metrics
//!
//! Prometheus metrics of the extension controller.
//!
//! ## Metrics Exposed
//!
//! - `gardener_extension_otelcol_actuator_operation_total` - Total number of actuator operations, by cluster and operation
//! - `gardener_extension_otelcol_actuator_operation_duration_seconds` - Duration of the last actuator operation, by cluster and operation
//! - `gardener_extension_otelcol_reconciliation_errors_total` - Total number of failed reconciliations

use std::sync::LazyLock;

use prometheus::{GaugeVec, IntCounter, IntCounterVec, Opts, Registry};

/// Namespace component of the fully qualified metric names.
pub const NAMESPACE: &str = "gardener_extension_otelcol";

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
    let registry = Registry::new();
    registry
        .register(Box::new(ACTUATOR_OPERATIONS_TOTAL.clone()))
        .expect("Failed to register ACTUATOR_OPERATIONS_TOTAL metric");
    registry
        .register(Box::new(ACTUATOR_OPERATION_DURATION.clone()))
        .expect("Failed to register ACTUATOR_OPERATION_DURATION metric");
    registry
        .register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))
        .expect("Failed to register RECONCILIATION_ERRORS_TOTAL metric");
    registry
});

static ACTUATOR_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "actuator_operation_total",
            "Total number of times the extension actuator did something",
        )
        .namespace(NAMESPACE),
        &["cluster", "operation"],
    )
    .expect("Failed to create ACTUATOR_OPERATIONS_TOTAL metric")
});

static ACTUATOR_OPERATION_DURATION: LazyLock<GaugeVec> = LazyLock::new(|| {
    GaugeVec::new(
        Opts::new(
            "actuator_operation_duration_seconds",
            "Duration of execution for the extension actuator",
        )
        .namespace(NAMESPACE),
        &["cluster", "operation"],
    )
    .expect("Failed to create ACTUATOR_OPERATION_DURATION metric")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        format!("{NAMESPACE}_reconciliation_errors_total"),
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric")
});

/// Records one actuator operation and how long it took.
pub fn observe_operation(cluster: &str, operation: &str, duration: std::time::Duration) {
    ACTUATOR_OPERATIONS_TOTAL
        .with_label_values(&[cluster, operation])
        .inc();
    ACTUATOR_OPERATION_DURATION
        .with_label_values(&[cluster, operation])
        .set(duration.as_secs_f64());
}

/// Increments the reconciliation error counter.
pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

/// Gathers all registered metric families for encoding.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_are_recorded_per_cluster_and_operation() {
        use prometheus::{Encoder, TextEncoder};

        observe_operation(
            "shoot--local--local",
            "reconcile",
            std::time::Duration::from_millis(1500),
        );
        increment_reconciliation_errors();

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&gather(), &mut buffer).unwrap();
        let rendered = String::from_utf8(buffer).unwrap();

        assert!(rendered.contains("gardener_extension_otelcol_actuator_operation_total"));
        assert!(
            rendered.contains("gardener_extension_otelcol_actuator_operation_duration_seconds")
        );
        assert!(rendered.contains("gardener_extension_otelcol_reconciliation_errors_total"));
        assert!(rendered.contains(r#"cluster="shoot--local--local""#));
        assert!(rendered.contains(r#"operation="reconcile""#));
    }
}
