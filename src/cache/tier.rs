//! Cache Tier Definitions
//!
//! Defines the three-tier hierarchy, ordered fastest to slowest, and the
//! per-tier limits the orchestrator enforces.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// =============================================================================
// Defaults
// =============================================================================

/// Default memory tier capacity (entries)
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// Default per-call timeout for the memory tier
pub const DEFAULT_MEMORY_TIMEOUT_MS: u64 = 5;

/// Default per-call timeout for the edge tier
pub const DEFAULT_EDGE_TIMEOUT_MS: u64 = 50;

/// Default per-call timeout for the durable tier
pub const DEFAULT_DURABLE_TIMEOUT_MS: u64 = 250;

// =============================================================================
// Cache Tier
// =============================================================================

/// Cache tier, ordered fastest to slowest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// Process-local memory (fastest, bounded)
    #[default]
    Memory,
    /// Edge / CDN cache (network-local)
    Edge,
    /// Distributed durable key-value store (authoritative, slowest)
    Durable,
}

impl CacheTier {
    /// All tiers in lookup order (Memory -> Edge -> Durable)
    pub fn lookup_order() -> &'static [CacheTier] {
        &[CacheTier::Memory, CacheTier::Edge, CacheTier::Durable]
    }

    /// Tiers faster than this one, fastest first
    pub fn faster_tiers(&self) -> &'static [CacheTier] {
        match self {
            CacheTier::Memory => &[],
            CacheTier::Edge => &[CacheTier::Memory],
            CacheTier::Durable => &[CacheTier::Memory, CacheTier::Edge],
        }
    }

    /// Tier priority (lower is faster)
    pub fn priority(&self) -> u8 {
        match self {
            CacheTier::Memory => 0,
            CacheTier::Edge => 1,
            CacheTier::Durable => 2,
        }
    }

    /// Check if this tier is faster than another
    pub fn is_faster_than(&self, other: &CacheTier) -> bool {
        self.priority() < other.priority()
    }

    /// Label used in headers, logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Memory => "memory",
            CacheTier::Edge => "edge",
            CacheTier::Durable => "durable",
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Workload Profile
// =============================================================================

/// Workload profile selecting which tiers a request may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadProfile {
    /// All tiers
    #[default]
    Standard,
    /// Large payloads: the memory tier is excluded to avoid memory pressure
    LargeBlob,
}

impl WorkloadProfile {
    /// Whether this profile may read from / write to the given tier
    pub fn uses(&self, tier: CacheTier) -> bool {
        !matches!((self, tier), (WorkloadProfile::LargeBlob, CacheTier::Memory))
    }
}

// =============================================================================
// Tier Configuration
// =============================================================================

/// Configuration for a cache tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Tier this config applies to
    pub tier: CacheTier,
    /// Whether the tier participates at all
    pub enabled: bool,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    /// Upper bound on TTL for entries held in this tier (may only shorten)
    pub max_ttl_secs: Option<u64>,
    /// Maximum entry count (memory tier only)
    pub capacity_entries: usize,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self::memory_default()
    }
}

impl TierConfig {
    /// Create a default config for the memory tier
    pub fn memory_default() -> Self {
        Self {
            tier: CacheTier::Memory,
            enabled: true,
            timeout_ms: DEFAULT_MEMORY_TIMEOUT_MS,
            max_ttl_secs: Some(3600),
            capacity_entries: DEFAULT_MEMORY_CAPACITY,
        }
    }

    /// Create a default config for the edge tier
    pub fn edge_default() -> Self {
        Self {
            tier: CacheTier::Edge,
            enabled: true,
            timeout_ms: DEFAULT_EDGE_TIMEOUT_MS,
            max_ttl_secs: None,
            capacity_entries: 0,
        }
    }

    /// Create a default config for the durable tier
    pub fn durable_default() -> Self {
        Self {
            tier: CacheTier::Durable,
            enabled: true,
            timeout_ms: DEFAULT_DURABLE_TIMEOUT_MS,
            max_ttl_secs: None,
            capacity_entries: 0,
        }
    }

    /// Per-call timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    /// Clamp a TTL to this tier's bound
    pub fn clamp_ttl(&self, ttl_secs: u64) -> u64 {
        match self.max_ttl_secs {
            Some(max) => ttl_secs.min(max),
            None => ttl_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_order() {
        let order = CacheTier::lookup_order();
        assert_eq!(order, &[CacheTier::Memory, CacheTier::Edge, CacheTier::Durable]);
        assert!(order.windows(2).all(|w| w[0].is_faster_than(&w[1])));
    }

    #[test]
    fn test_faster_tiers() {
        assert!(CacheTier::Memory.faster_tiers().is_empty());
        assert_eq!(CacheTier::Edge.faster_tiers(), &[CacheTier::Memory]);
        assert_eq!(
            CacheTier::Durable.faster_tiers(),
            &[CacheTier::Memory, CacheTier::Edge]
        );
    }

    #[test]
    fn test_workload_profile() {
        assert!(WorkloadProfile::Standard.uses(CacheTier::Memory));
        assert!(!WorkloadProfile::LargeBlob.uses(CacheTier::Memory));
        assert!(WorkloadProfile::LargeBlob.uses(CacheTier::Edge));
        assert!(WorkloadProfile::LargeBlob.uses(CacheTier::Durable));
    }

    #[test]
    fn test_tier_config_clamp() {
        let memory = TierConfig::memory_default();
        assert_eq!(memory.clamp_ttl(60), 60);
        assert_eq!(memory.clamp_ttl(86_400), 3600);

        let durable = TierConfig::durable_default();
        assert_eq!(durable.clamp_ttl(86_400), 86_400);
        assert_eq!(durable.timeout(), Duration::from_millis(DEFAULT_DURABLE_TIMEOUT_MS));
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(CacheTier::Memory.to_string(), "memory");
        assert_eq!(CacheTier::Edge.to_string(), "edge");
        assert_eq!(CacheTier::Durable.to_string(), "durable");
    }
}
