//! # Metrics Collection
//!
//! Prometheus exporter and the counters/histograms recorded by the
//! controllers and gRPC servers. The `metrics` macros are no-ops until
//! [`init_metrics`] installs the recorder, so library code records
//! unconditionally.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::errors::{Error, Result};

/// Outcome label values.
pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_ERROR: &str = "error";

/// Install the Prometheus recorder with an HTTP listener on `bind_address`.
pub fn init_metrics(bind_address: &str, service_name: &str) -> Result<()> {
    let socket_addr: SocketAddr = bind_address.parse().map_err(|e| {
        Error::config(format!("Invalid metrics bind address '{}': {}", bind_address, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", service_name)
        .install()
        .map_err(|e| Error::config(format!("Failed to initialize metrics exporter: {}", e)))?;

    describe_metrics();

    info!(metrics_addr = %socket_addr, service_name, "Metrics collection initialized");
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "kubebao_reconcile_total",
        Unit::Count,
        "Reconcile passes grouped by controller and outcome"
    );
    describe_histogram!(
        "kubebao_reconcile_duration_seconds",
        Unit::Seconds,
        "Duration of a single reconcile pass"
    );
    describe_counter!(
        "kubebao_rpc_requests_total",
        Unit::Count,
        "gRPC requests grouped by service, method and outcome"
    );
    describe_counter!("kubebao_kms_key_rotations_total", Unit::Count, "Observed transit key rotations");
    describe_gauge!("kubebao_kms_healthy", Unit::Count, "1 when the transit key is reachable");
    describe_counter!("kubebao_csi_cache_hits_total", Unit::Count, "Mount cache hits");
    describe_counter!("kubebao_csi_cache_misses_total", Unit::Count, "Mount cache misses");
}

/// Record one reconcile pass.
pub fn record_reconcile(controller: &str, success: bool, duration: Duration) {
    let outcome = if success { OUTCOME_SUCCESS } else { OUTCOME_ERROR };
    let labels = [("controller", controller.to_string()), ("outcome", outcome.to_string())];
    counter!("kubebao_reconcile_total", &labels).increment(1);

    let duration_labels = [("controller", controller.to_string())];
    histogram!("kubebao_reconcile_duration_seconds", &duration_labels).record(duration.as_secs_f64());
}

pub fn record_rpc(service: &str, method: &str, success: bool) {
    let outcome = if success { OUTCOME_SUCCESS } else { OUTCOME_ERROR };
    let labels = [
        ("service", service.to_string()),
        ("method", method.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!("kubebao_rpc_requests_total", &labels).increment(1);
}

pub fn record_key_rotation() {
    counter!("kubebao_kms_key_rotations_total").increment(1);
}

pub fn set_kms_healthy(healthy: bool) {
    gauge!("kubebao_kms_healthy").set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_cache_lookup(hit: bool) {
    if hit {
        counter!("kubebao_csi_cache_hits_total").increment(1);
    } else {
        counter!("kubebao_csi_cache_misses_total").increment(1);
    }
}
