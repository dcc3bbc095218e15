//! Prometheus metrics infrastructure.
//!
//! Metrics are recorded through the `metrics` crate facade and exposed with
//! `metrics-exporter-prometheus`.
//!
//! # Metrics Exposed
//!
//! - `relgraph_rpc_handled_total{rpc_service, rpc_method, rpc_code}`
//! - `relgraph_rpc_handling_seconds{rpc_service, rpc_method}`
//! - `relgraph_datastore_handled_total{service, method, code}`
//! - `relgraph_datastore_handling_seconds{service, method}`

use std::sync::Arc;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const RPC_HANDLED_TOTAL: &str = "relgraph_rpc_handled_total";
pub const RPC_HANDLING_SECONDS: &str = "relgraph_rpc_handling_seconds";

const UNKNOWN: &str = "unknown";

/// Shared state containing the Prometheus handle for metrics rendering.
#[derive(Clone)]
pub struct MetricsState {
    handle: Arc<PrometheusHandle>,
}

impl MetricsState {
    pub fn new(handle: PrometheusHandle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Renders the current metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Error type for metrics initialization.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to install Prometheus recorder: recorder already installed")]
    AlreadyInstalled,
}

/// Installs the Prometheus recorder as the global recorder.
///
/// # Errors
///
/// Returns an error if a recorder is already installed.
pub fn init_metrics() -> Result<MetricsState, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|_| MetricsError::AlreadyInstalled)?;

    describe_rpc_metrics();
    relgraph_storage::instrumented::describe_datastore_metrics();

    Ok(MetricsState::new(handle))
}

/// Registers RPC metric descriptions with the installed recorder.
pub fn describe_rpc_metrics() {
    metrics::describe_counter!(
        RPC_HANDLED_TOTAL,
        "Total number of RPCs completed, regardless of success or failure."
    );
    metrics::describe_histogram!(
        RPC_HANDLING_SECONDS,
        metrics::Unit::Seconds,
        "Latency of RPCs until completion."
    );
}

/// Splits `/relgraph.v1.RelgraphService/Check` into service and method.
///
/// A leading `/` is ignored and the split happens at the last `/`. A name
/// without `/` is a method of an unknown service.
pub fn split_method_name(full_method: &str) -> (&str, &str) {
    let name = full_method.strip_prefix('/').unwrap_or(full_method);
    if name.is_empty() {
        return (UNKNOWN, UNKNOWN);
    }
    match name.rsplit_once('/') {
        Some((service, method)) => (
            if service.is_empty() { UNKNOWN } else { service },
            if method.is_empty() { UNKNOWN } else { method },
        ),
        None => (UNKNOWN, name),
    }
}

/// Records one completed RPC.
pub fn record_rpc(full_method: &str, code: &str, elapsed_seconds: f64) {
    let (service, method) = split_method_name(full_method);

    metrics::counter!(
        RPC_HANDLED_TOTAL,
        "rpc_service" => service.to_string(),
        "rpc_method" => method.to_string(),
        "rpc_code" => code.to_string()
    )
    .increment(1);
    metrics::histogram!(
        RPC_HANDLING_SECONDS,
        "rpc_service" => service.to_string(),
        "rpc_method" => method.to_string()
    )
    .record(elapsed_seconds);
}
