//! Configuration management for the relgraph service.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (serde `default_*` functions)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! # Configuration Hierarchy
//!
//! Environment variables take precedence over config file values,
//! which take precedence over defaults.
//!
//! # Example
//!
//! ```ignore
//! use relgraph_server::config::ServerConfig;
//!
//! // Load from file with env overrides
//! let config = ServerConfig::load("relgraph.yaml")?;
//!
//! // Or load from environment only
//! let config = ServerConfig::from_env()?;
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use relgraph_domain::resolver::ResolverConfig;
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "RELGRAPH";

/// Service configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Graph resolution limits
    #[serde(default)]
    pub resolver: ResolverSettings,

    /// ListObjects and ListUsers limits
    #[serde(default)]
    pub list_objects: ListObjectsSettings,

    /// Storage settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Validated model cache
    #[serde(default)]
    pub model_cache: ModelCacheSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Metrics settings
    #[serde(default)]
    pub metrics: MetricsSettings,
}

/// Limits applied to every Check, Expand and ListUsers resolution.
///
/// Environment overrides use the `RELGRAPH_` prefix and `__` as the nested
/// key separator, e.g. `RELGRAPH_RESOLVER__MAX_DEPTH=10`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResolverSettings {
    /// Maximum recursion depth before `DepthLimitExceeded`.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Time cap for one resolution, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Sibling branches evaluated concurrently.
    #[serde(default = "default_max_breadth")]
    pub max_breadth: usize,

    /// Datastore reads in flight per query.
    #[serde(default = "default_max_concurrent_reads")]
    pub max_concurrent_reads: usize,

    /// Sub-problems one query may dispatch.
    #[serde(default = "default_max_dispatches")]
    pub max_dispatches: u32,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            timeout_ms: default_timeout_ms(),
            max_breadth: default_max_breadth(),
            max_concurrent_reads: default_max_concurrent_reads(),
            max_dispatches: default_max_dispatches(),
        }
    }
}

fn default_max_depth() -> u32 {
    25
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_breadth() -> usize {
    100
}

fn default_max_concurrent_reads() -> usize {
    50
}

fn default_max_dispatches() -> u32 {
    10_000
}

/// ListObjects settings. The result cap also bounds ListUsers.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ListObjectsSettings {
    /// Results produced before a run stops with `truncated`.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Wall-clock cap for one run, in milliseconds.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,

    /// Page size when the request does not name one.
    #[serde(default = "default_list_page_size")]
    pub default_page_size: u32,
}

impl Default for ListObjectsSettings {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            deadline_ms: default_deadline_ms(),
            default_page_size: default_list_page_size(),
        }
    }
}

fn default_max_results() -> usize {
    1000
}

fn default_deadline_ms() -> u64 {
    3000
}

fn default_list_page_size() -> u32 {
    100
}

/// Storage backend settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageSettings {
    /// Storage backend type. Only "memory" ships with the service.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Page size the resolver uses when scanning tuples.
    #[serde(default = "default_read_page_size")]
    pub read_page_size: u32,

    /// Writes plus deletes accepted in one Write request.
    #[serde(default = "default_max_tuples_per_write")]
    pub max_tuples_per_write: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            read_page_size: default_read_page_size(),
            max_tuples_per_write: default_max_tuples_per_write(),
        }
    }
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_read_page_size() -> u32 {
    100
}

fn default_max_tuples_per_write() -> usize {
    100
}

/// Validated model cache settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ModelCacheSettings {
    /// Validated models kept in memory.
    #[serde(default = "default_model_cache_capacity")]
    pub max_capacity: u64,

    /// How long a store's "latest model" pointer is trusted, in milliseconds.
    #[serde(default = "default_latest_ttl_ms")]
    pub latest_ttl_ms: u64,
}

impl Default for ModelCacheSettings {
    fn default() -> Self {
        Self {
            max_capacity: default_model_cache_capacity(),
            latest_ttl_ms: default_latest_ttl_ms(),
        }
    }
}

fn default_model_cache_capacity() -> u64 {
    1000
}

fn default_latest_ttl_ms() -> u64 {
    1000
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MetricsSettings {
    /// Install the Prometheus recorder
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `RELGRAPH_` and use `__` as
    /// separator. For example:
    /// - `RELGRAPH_RESOLVER__MAX_DEPTH=10` overrides `resolver.max_depth`
    /// - `RELGRAPH_LOGGING__JSON=true` overrides `logging.json`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(environment())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(environment())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let limits: [(&str, u64); 11] = [
            ("resolver.max_depth", self.resolver.max_depth.into()),
            ("resolver.timeout_ms", self.resolver.timeout_ms),
            ("resolver.max_breadth", self.resolver.max_breadth as u64),
            (
                "resolver.max_concurrent_reads",
                self.resolver.max_concurrent_reads as u64,
            ),
            ("resolver.max_dispatches", self.resolver.max_dispatches.into()),
            ("list_objects.max_results", self.list_objects.max_results as u64),
            ("list_objects.deadline_ms", self.list_objects.deadline_ms),
            (
                "list_objects.default_page_size",
                self.list_objects.default_page_size.into(),
            ),
            ("storage.read_page_size", self.storage.read_page_size.into()),
            (
                "storage.max_tuples_per_write",
                self.storage.max_tuples_per_write as u64,
            ),
            ("model_cache.max_capacity", self.model_cache.max_capacity),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigLoadError::Invalid {
                message: format!("{name} must be greater than 0"),
            });
        }

        let valid_backends = ["memory"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "storage.backend must be one of: {:?}, got: {}",
                    valid_backends, self.storage.backend
                ),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        Ok(())
    }

    /// The resolver limits these settings describe.
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig::default()
            .with_max_depth(self.resolver.max_depth)
            .with_timeout(Duration::from_millis(self.resolver.timeout_ms))
            .with_max_breadth(self.resolver.max_breadth)
            .with_max_concurrent_reads(self.resolver.max_concurrent_reads)
            .with_max_dispatches(self.resolver.max_dispatches)
            .with_list_objects_max_results(self.list_objects.max_results)
            .with_list_objects_deadline(Duration::from_millis(self.list_objects.deadline_ms))
            .with_list_objects_page_size(self.list_objects.default_page_size)
            .with_read_page_size(self.storage.read_page_size)
    }
}

// RELGRAPH_RESOLVER__MAX_DEPTH -> resolver.max_depth
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}
