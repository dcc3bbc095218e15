//! Observability infrastructure for relgraph.
//!
//! This module provides:
//! - Structured logging configuration
//! - The Prometheus recorder and RPC call metrics

mod logging;
mod metrics;

pub use logging::{init_logging, json_subscriber, LoggingConfig};
pub use metrics::{
    describe_rpc_metrics, init_metrics, record_rpc, split_method_name, MetricsError,
    MetricsState, RPC_HANDLED_TOTAL, RPC_HANDLING_SECONDS,
};
