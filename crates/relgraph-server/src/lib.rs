//! relgraph-server: service facade, command handlers and runtime wiring
//!
//! This crate connects the domain resolvers to a datastore:
//! - The `RelgraphService` facade, one method per RPC, with call metrics
//! - Command handlers for writes, assertions, models, reads and stores
//! - Storage adapters and the validated model cache
//! - Configuration, logging and metrics setup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               relgraph-server               │
//! ├─────────────────────────────────────────────┤
//! │  service.rs     - RPC facade                │
//! │  handlers/      - Command handlers          │
//! │  adapters.rs    - DataStore -> resolver     │
//! │  config.rs      - Configuration management  │
//! │  observability/ - Logging and metrics       │
//! └─────────────────────────────────────────────┘
//! ```

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod observability;
pub mod service;

pub use config::{ConfigLoadError, ServerConfig};
pub use service::{MonitoredStream, RelgraphService};

/// Installs logging and, when enabled, the Prometheus recorder.
pub fn init_observability(
    config: &ServerConfig,
) -> Result<Option<observability::MetricsState>, observability::MetricsError> {
    observability::init_logging(observability::LoggingConfig::from_settings(&config.logging));
    if !config.metrics.enabled {
        return Ok(None);
    }
    observability::init_metrics().map(Some)
}
