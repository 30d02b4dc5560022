//! Configuration
//!
//! `CacheLayerConfig` gathers every section. All sections default, so a
//! YAML file only needs the values it changes:
//!
//! ```yaml
//! cache:
//!   memory:
//!     capacity_entries: 50000
//! policy:
//!   ttl:
//!     file_metadata: 900
//! optimizer:
//!   target_hit_rate: 0.7
//! ```

use crate::cache::compression::CompressionConfig;
use crate::cache::keys::KeyConfig;
use crate::cache::orchestrator::TieredCacheConfig;
use crate::cache::policy::PolicyConfig;
use crate::cache::storage::FileKvStoreConfig;
use crate::cache::tier::CacheTier;
use crate::error::{Error, Result};
use crate::optimizer::OptimizerConfig;
use crate::strategy::StrategyConfig;
use crate::telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

// =============================================================================
// Sections
// =============================================================================

/// Request-path behavior of the cache service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Master switch; disabled means every request passes through
    pub enabled: bool,
    /// Add `X-Cache`, `X-Cache-Tier` and `Age` to responses
    pub emit_cache_headers: bool,
    /// Successful unsafe requests invalidate cached reads of the same path
    pub invalidate_on_write: bool,
    /// Concurrent requests while warming
    pub warm_concurrency: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            emit_cache_headers: true,
            invalidate_on_write: true,
            warm_concurrency: 8,
        }
    }
}

/// Durable tier backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum DurableBackend {
    /// In-process store (lost on restart)
    #[default]
    Memory,
    /// Disk-backed store
    File(FileKvStoreConfig),
}

/// Upstream origin
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Origin base URL, e.g. `http://127.0.0.1:3000`
    pub base_url: String,
    pub timeout_ms: u64,
    /// Retries for idempotent requests on connection errors
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Largest request body forwarded
    pub max_body_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            timeout_ms: 30_000,
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Prefix of the management routes
    pub management_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            management_prefix: "/_cache".to_string(),
        }
    }
}

// =============================================================================
// Cache Layer Config
// =============================================================================

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheLayerConfig {
    pub service: ServiceConfig,
    pub cache: TieredCacheConfig,
    pub keys: KeyConfig,
    pub policy: PolicyConfig,
    pub strategy: StrategyConfig,
    pub compression: CompressionConfig,
    pub durable: DurableBackend,
    pub telemetry: TelemetryConfig,
    pub optimizer: OptimizerConfig,
    pub upstream: UpstreamConfig,
    pub server: ServerConfig,
}

impl CacheLayerConfig {
    /// Parse YAML
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(yaml)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Configuration(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Partially specified tier sections fill their gaps from the memory
    /// tier defaults; pin each section to its own tier.
    fn normalize(&mut self) {
        self.cache.memory.tier = CacheTier::Memory;
        self.cache.edge.tier = CacheTier::Edge;
        self.cache.durable.tier = CacheTier::Durable;
    }

    /// Reject settings the cache cannot run with
    pub fn validate(&self) -> Result<()> {
        for (expected, tier) in [
            (CacheTier::Memory, &self.cache.memory),
            (CacheTier::Edge, &self.cache.edge),
            (CacheTier::Durable, &self.cache.durable),
        ] {
            if tier.tier != expected {
                return invalid(format!("cache.{} is configured as tier {}", expected, tier.tier));
            }
            if tier.enabled && tier.timeout_ms == 0 {
                return invalid(format!("cache.{}.timeout_ms must be positive", expected));
            }
        }
        if self.cache.memory.enabled && self.cache.memory.capacity_entries == 0 {
            return invalid("cache.memory.capacity_entries must be positive");
        }
        if self.policy.max_ttl_secs == 0 {
            return invalid("policy.max_ttl_secs must be positive");
        }
        if self.cache.max_ttl_secs < self.policy.max_ttl_secs {
            return invalid("cache.max_ttl_secs must cover policy.max_ttl_secs so markers outlive entries");
        }
        if self.keys.max_key_length < 64 {
            return invalid("keys.max_key_length must be at least 64");
        }
        if !(0.0..=1.0).contains(&self.telemetry.sample_rate) {
            return invalid("telemetry.sample_rate must be within 0.0..=1.0");
        }
        if self.telemetry.ring_capacity == 0 {
            return invalid("telemetry.ring_capacity must be positive");
        }
        if !(0.0..=1.0).contains(&self.optimizer.target_hit_rate) {
            return invalid("optimizer.target_hit_rate must be within 0.0..=1.0");
        }
        if !(self.optimizer.aggressive_ttl_multiplier >= 1.0) {
            return invalid("optimizer.aggressive_ttl_multiplier must be at least 1.0");
        }
        if !(self.optimizer.memory_shrink_ratio > 0.0 && self.optimizer.memory_shrink_ratio <= 1.0) {
            return invalid("optimizer.memory_shrink_ratio must be within (0.0, 1.0]");
        }
        if self.service.warm_concurrency == 0 {
            return invalid("service.warm_concurrency must be positive");
        }
        if !self.server.management_prefix.starts_with('/') {
            return invalid("server.management_prefix must start with '/'");
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> Result<()> {
    Err(Error::Configuration(message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults_are_valid() {
        CacheLayerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = CacheLayerConfig::from_yaml_str(
            r#"
cache:
  memory:
    capacity_entries: 42
  edge:
    timeout_ms: 80
policy:
  ttl:
    file_metadata: 900
durable:
  backend: file
  root_path: /tmp/cache
optimizer:
  target_hit_rate: 0.75
"#,
        )
        .unwrap();

        assert_eq!(config.cache.memory.capacity_entries, 42);
        assert_eq!(config.cache.memory.timeout_ms, 5);
        assert_eq!(config.cache.edge.tier, CacheTier::Edge);
        assert_eq!(config.cache.edge.timeout_ms, 80);
        assert_eq!(config.policy.ttl.file_metadata, 900);
        assert_eq!(config.policy.ttl.metrics, 60);
        assert_matches!(&config.durable, DurableBackend::File(file) if file.root_path.ends_with("cache"));
        assert_eq!(config.optimizer.target_hit_rate, 0.75);
        assert_eq!(config.optimizer.interval_secs, 15);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = CacheLayerConfig::default();
        config.telemetry.sample_rate = 1.5;
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        let mut config = CacheLayerConfig::default();
        config.cache.edge.tier = CacheTier::Memory;
        assert_matches!(config.validate(), Err(Error::Configuration(msg)) if msg.contains("edge"));

        assert_matches!(
            CacheLayerConfig::from_yaml_str("cache: [1, 2]"),
            Err(Error::YamlParse(_))
        );
    }
}
