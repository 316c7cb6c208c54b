//! Configuration management for the saga orchestration core.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level configuration for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Saga execution settings (retry/backoff).
    pub saga: SagaConfig,

    /// Durable storage configuration.
    pub storage: StorageConfig,

    /// Address lifecycle machine settings.
    pub lifecycle: LifecycleConfig,

    /// Per-collaborator endpoint configuration.
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Saga execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaConfig {
    /// Base delay before the first retry of a failed step.
    pub base_retry_delay_ms: u64,

    /// Default max retries for a step when a definition doesn't override it.
    pub default_max_retries: i32,

    /// Maximum number of workflows returned by a single `list_workflows` page.
    pub max_page_size: i64,

    /// Window, in hours, used when reporting recent failures in workflow statistics.
    #[serde(default = "default_recent_failure_window_hours")]
    pub recent_failure_window_hours: i64,
}

fn default_recent_failure_window_hours() -> i64 {
    24
}

/// Durable storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend ("sqlite", "memory").
    pub backend: String,

    /// Database URL (for sqlite).
    pub database_url: Option<String>,

    /// Maximum number of pooled database connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Address lifecycle machine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Default IPv6 prefix length handed out on allocation.
    #[serde(default = "default_ipv6_prefix_length")]
    pub default_ipv6_prefix_length: u8,

    /// Smallest prefix length accepted on allocation requests.
    #[serde(default = "default_min_ipv6_prefix_length")]
    pub min_ipv6_prefix_length: u8,

    /// Largest prefix length accepted on allocation requests.
    #[serde(default = "default_max_ipv6_prefix_length")]
    pub max_ipv6_prefix_length: u8,

    /// Send a RADIUS CoA on every reactivate/suspend transition.
    #[serde(default = "default_true")]
    pub send_coa_on_transition: bool,
}

fn default_ipv6_prefix_length() -> u8 {
    56
}

fn default_min_ipv6_prefix_length() -> u8 {
    48
}

fn default_max_ipv6_prefix_length() -> u8 {
    64
}

fn default_true() -> bool {
    true
}

/// External collaborator endpoint configuration. Each entry is optional;
/// a collaborator left unset resolves to its `Null*` implementation, which
/// reports `is_configured() == false` and errors on every real call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollaboratorsConfig {
    #[serde(default)]
    pub ipam: Option<EndpointConfig>,

    #[serde(default)]
    pub coa: Option<EndpointConfig>,

    #[serde(default)]
    pub radius: Option<EndpointConfig>,

    #[serde(default)]
    pub access_node: Option<EndpointConfig>,

    #[serde(default)]
    pub cpe: Option<EndpointConfig>,

    #[serde(default)]
    pub billing: Option<EndpointConfig>,
}

/// A single external system endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,

    #[serde(default = "default_endpoint_timeout")]
    pub timeout_seconds: u64,

    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub extra: HashMap<String, String>,
}

fn default_endpoint_timeout() -> u64 {
    30
}

/// Logging configuration, in the teacher's `tracing-subscriber` style.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter`-compatible directive, e.g. "info,saga_core=debug".
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON-formatted log lines instead of the human-readable default.
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            base_retry_delay_ms: 100,
            default_max_retries: 3,
            max_page_size: 100,
            recent_failure_window_hours: default_recent_failure_window_hours(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            database_url: Some("sqlite:saga_core.db".to_string()),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_ipv6_prefix_length: default_ipv6_prefix_length(),
            min_ipv6_prefix_length: default_min_ipv6_prefix_length(),
            max_ipv6_prefix_length: default_max_ipv6_prefix_length(),
            send_coa_on_transition: true,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            saga: SagaConfig::default(),
            storage: StorageConfig::default(),
            lifecycle: LifecycleConfig::default(),
            collaborators: CollaboratorsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a file, dispatching on extension.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yml::from_str(&content)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        Ok(config)
    }

    /// Save configuration to a file, dispatching on extension.
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("toml") => toml::to_string(self)?,
            Some("yaml") | Some("yml") => serde_yml::to_string(self)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.saga.base_retry_delay_ms == 0 {
            return Err(anyhow::anyhow!("base_retry_delay_ms must be greater than 0"));
        }
        if self.saga.max_page_size <= 0 {
            return Err(anyhow::anyhow!("max_page_size must be greater than 0"));
        }

        if self.storage.backend == "sqlite" && self.storage.database_url.is_none() {
            return Err(anyhow::anyhow!("sqlite storage backend requires a database_url"));
        }
        if self.storage.backend != "sqlite" && self.storage.backend != "memory" {
            return Err(anyhow::anyhow!("unknown storage backend: {}", self.storage.backend));
        }

        let lc = &self.lifecycle;
        if lc.min_ipv6_prefix_length > lc.max_ipv6_prefix_length {
            return Err(anyhow::anyhow!("min_ipv6_prefix_length must not exceed max_ipv6_prefix_length"));
        }
        if lc.default_ipv6_prefix_length < lc.min_ipv6_prefix_length || lc.default_ipv6_prefix_length > lc.max_ipv6_prefix_length {
            return Err(anyhow::anyhow!("default_ipv6_prefix_length must fall within the configured min/max range"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.backend, "sqlite");
        assert_eq!(config.lifecycle.default_ipv6_prefix_length, 56);
    }

    #[test]
    fn rejects_unknown_storage_backend() {
        let mut config = OrchestratorConfig::default();
        config.storage.backend = "postgres".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_prefix_length_bounds() {
        let mut config = OrchestratorConfig::default();
        config.lifecycle.min_ipv6_prefix_length = 60;
        config.lifecycle.max_ipv6_prefix_length = 48;
        assert!(config.validate().is_err());
    }
}
