//! Invalidation Scopes & Markers
//!
//! An invalidation deletes from the durable tier synchronously and from the
//! faster tiers best-effort. To keep late or missed faster-tier deletes from
//! serving stale data, every invalidation also records a marker: any entry
//! created at or before a matching marker is treated as a miss. Markers live
//! for `max_ttl`, after which no entry they could shadow can still be alive.

use crate::cache::entry::CacheKey;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;

// =============================================================================
// Invalidation Scope
// =============================================================================

/// What an invalidation covers
#[derive(Debug, Clone)]
pub enum InvalidationScope {
    /// Exactly one key
    Key(CacheKey),
    /// Every key starting with the prefix
    Prefix(String),
    /// Every key matching a glob pattern (`file:GET:/api/files/*`)
    Pattern(glob::Pattern),
}

impl InvalidationScope {
    /// Parse an operator-supplied pattern
    ///
    /// Strings containing glob metacharacters become `Pattern`, anything else
    /// is a `Prefix` (an exact key is its own prefix).
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidPattern {
                pattern: raw.to_string(),
                reason: "empty pattern".into(),
            });
        }
        if raw.contains(['*', '?', '[']) {
            let pattern = glob::Pattern::new(raw).map_err(|e| Error::InvalidPattern {
                pattern: raw.to_string(),
                reason: e.to_string(),
            })?;
            return Ok(InvalidationScope::Pattern(pattern));
        }
        Ok(InvalidationScope::Prefix(raw.to_string()))
    }

    /// Whether `key` falls within this scope
    pub fn matches(&self, key: &str) -> bool {
        match self {
            InvalidationScope::Key(k) => k.as_str() == key,
            InvalidationScope::Prefix(prefix) => key.starts_with(prefix.as_str()),
            InvalidationScope::Pattern(pattern) => pattern.matches(key),
        }
    }

    /// Longest literal prefix usable for a backend `list(prefix)` scan
    pub fn list_prefix(&self) -> &str {
        match self {
            InvalidationScope::Key(k) => k.as_str(),
            InvalidationScope::Prefix(prefix) => prefix,
            InvalidationScope::Pattern(pattern) => {
                let raw = pattern.as_str();
                let end = raw.find(['*', '?', '[']).unwrap_or(raw.len());
                &raw[..end]
            }
        }
    }

    /// Label for logs and events
    pub fn kind(&self) -> &'static str {
        match self {
            InvalidationScope::Key(_) => "key",
            InvalidationScope::Prefix(_) => "prefix",
            InvalidationScope::Pattern(_) => "pattern",
        }
    }
}

impl fmt::Display for InvalidationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationScope::Key(k) => write!(f, "{}", k),
            InvalidationScope::Prefix(p) => write!(f, "{}", p),
            InvalidationScope::Pattern(p) => write!(f, "{}", p.as_str()),
        }
    }
}

impl From<CacheKey> for InvalidationScope {
    fn from(key: CacheKey) -> Self {
        InvalidationScope::Key(key)
    }
}

// =============================================================================
// Invalidation Ledger
// =============================================================================

/// Short-lived invalidation markers
pub struct InvalidationLedger {
    /// Exact-key markers
    keys: DashMap<String, DateTime<Utc>>,
    /// Prefix and pattern markers
    scopes: RwLock<Vec<(InvalidationScope, DateTime<Utc>)>>,
    /// How long a marker is kept
    retention: ChronoDuration,
}

impl InvalidationLedger {
    /// Create a ledger whose markers live for `retention_secs`
    pub fn new(retention_secs: u64) -> Self {
        Self {
            keys: DashMap::new(),
            scopes: RwLock::new(Vec::new()),
            retention: ChronoDuration::seconds(retention_secs.min(i64::MAX as u64) as i64),
        }
    }

    /// Record an invalidation at `at`
    pub fn record(&self, scope: &InvalidationScope, at: DateTime<Utc>) {
        self.purge_expired(at);
        match scope {
            InvalidationScope::Key(key) => {
                self.keys
                    .entry(key.as_str().to_string())
                    .and_modify(|t| *t = (*t).max(at))
                    .or_insert(at);
            }
            _ => {
                let mut scopes = self.scopes.write();
                let label = scope.to_string();
                if let Some(existing) = scopes
                    .iter_mut()
                    .find(|(s, _)| s.kind() == scope.kind() && s.to_string() == label)
                {
                    existing.1 = existing.1.max(at);
                } else {
                    scopes.push((scope.clone(), at));
                }
            }
        }
    }

    /// Whether an entry for `key` created at `created_at` has been invalidated
    pub fn is_invalidated(&self, key: &str, created_at: DateTime<Utc>) -> bool {
        if let Some(marker) = self.keys.get(key) {
            if created_at <= *marker {
                return true;
            }
        }
        self.scopes
            .read()
            .iter()
            .any(|(scope, marker)| created_at <= *marker && scope.matches(key))
    }

    /// Drop markers older than the retention window
    pub fn purge_expired(&self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        self.keys.retain(|_, marker| *marker > cutoff);
        let mut scopes = self.scopes.write();
        scopes.retain(|(_, marker)| *marker > cutoff);
    }

    /// Number of live markers
    pub fn len(&self) -> usize {
        self.keys.len() + self.scopes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
