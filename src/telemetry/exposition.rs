//! Prometheus Exposition
//!
//! Metrics live in a `Registry` owned by the service instance rather than
//! the process-global default registry. Request counters and latency are
//! updated as samples finalize; cache and optimizer gauges are refreshed
//! from snapshots at scrape time.

use crate::cache::metrics::CacheStatsSnapshot;
use crate::cache::tier::CacheTier;
use crate::error::{Error, Result};
use crate::optimizer::OptimizationState;
use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

const NAMESPACE: &str = "tiered_cache";

pub struct ServiceMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
    slow_requests: IntCounter,
    in_flight: IntGauge,
    tier_operations: IntGaugeVec,
    cache_totals: IntGaugeVec,
    memory_entries: IntGauge,
    memory_capacity: IntGauge,
    ttl_multiplier: Gauge,
    rolling_hit_rate: Gauge,
}

impl ServiceMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some(NAMESPACE.to_string()), None).map_err(prometheus_error)?;

        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Requests handled, by category and cache outcome"),
            &["category", "cache"],
        )
        .map_err(prometheus_error)?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "Request latency by category")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["category"],
        )
        .map_err(prometheus_error)?;
        let slow_requests = IntCounter::new("slow_requests_total", "Requests over the slow threshold")
            .map_err(prometheus_error)?;
        let in_flight = IntGauge::new("requests_in_flight", "Requests currently in flight").map_err(prometheus_error)?;
        let tier_operations = IntGaugeVec::new(
            Opts::new("tier_operations", "Per-tier operation counts since the last reset"),
            &["tier", "result"],
        )
        .map_err(prometheus_error)?;
        let cache_totals = IntGaugeVec::new(
            Opts::new("cache_operations", "Cache-level operation counts since the last reset"),
            &["operation"],
        )
        .map_err(prometheus_error)?;
        let memory_entries = IntGauge::new("memory_entries", "Entries in the memory tier").map_err(prometheus_error)?;
        let memory_capacity =
            IntGauge::new("memory_capacity", "Memory tier capacity in entries").map_err(prometheus_error)?;
        let ttl_multiplier = Gauge::new("ttl_multiplier", "Current TTL multiplier").map_err(prometheus_error)?;
        let rolling_hit_rate =
            Gauge::new("rolling_hit_rate", "Hit rate over the optimizer window").map_err(prometheus_error)?;

        registry.register(Box::new(requests_total.clone())).map_err(prometheus_error)?;
        registry.register(Box::new(request_duration.clone())).map_err(prometheus_error)?;
        registry.register(Box::new(slow_requests.clone())).map_err(prometheus_error)?;
        registry.register(Box::new(in_flight.clone())).map_err(prometheus_error)?;
        registry.register(Box::new(tier_operations.clone())).map_err(prometheus_error)?;
        registry.register(Box::new(cache_totals.clone())).map_err(prometheus_error)?;
        registry.register(Box::new(memory_entries.clone())).map_err(prometheus_error)?;
        registry.register(Box::new(memory_capacity.clone())).map_err(prometheus_error)?;
        registry.register(Box::new(ttl_multiplier.clone())).map_err(prometheus_error)?;
        registry.register(Box::new(rolling_hit_rate.clone())).map_err(prometheus_error)?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
            slow_requests,
            in_flight,
            tier_operations,
            cache_totals,
            memory_entries,
            memory_capacity,
            ttl_multiplier,
            rolling_hit_rate,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn observe_request(&self, category: &str, cache: &str, seconds: f64) {
        self.requests_total.with_label_values(&[category, cache]).inc();
        self.request_duration.with_label_values(&[category]).observe(seconds);
    }

    pub fn observe_slow_request(&self) {
        self.slow_requests.inc();
    }

    pub fn set_in_flight(&self, in_flight: u64) {
        self.in_flight.set(in_flight as i64);
    }

    /// Refresh gauges from cache and optimizer snapshots
    pub fn refresh(&self, stats: &CacheStatsSnapshot, optimizer: &OptimizationState) {
        for &tier in CacheTier::lookup_order() {
            let record = stats.tier(tier);
            for (result, value) in [
                ("hit", record.hits),
                ("miss", record.misses),
                ("error", record.errors),
                ("timeout", record.timeouts),
                ("write", record.writes),
                ("eviction", record.evictions),
            ] {
                self.tier_operations
                    .with_label_values(&[tier.as_str(), result])
                    .set(value as i64);
            }
        }
        for (operation, value) in [
            ("hit", stats.hits),
            ("miss", stats.misses),
            ("bypass", stats.bypasses),
            ("store", stats.stores),
            ("skipped_store", stats.skipped_stores),
            ("population", stats.populations),
            ("invalidation", stats.invalidations),
        ] {
            self.cache_totals.with_label_values(&[operation]).set(value as i64);
        }
        self.memory_entries.set(stats.memory_entries as i64);
        self.memory_capacity.set(stats.memory_capacity as i64);
        self.ttl_multiplier.set(optimizer.ttl_multiplier);
        self.rolling_hit_rate.set(optimizer.hit_rate);
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(prometheus_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("Metrics encoding error: {}", e)))
    }
}

fn prometheus_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("Prometheus error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries_are_independent() {
        let first = ServiceMetrics::new().unwrap();
        let second = ServiceMetrics::new().unwrap();
        first.observe_request("file", "hit", 0.002);
        assert!(first.render().unwrap().contains("tiered_cache_requests_total"));
        assert!(!second.render().unwrap().contains("category=\"file\""));
    }

    #[test]
    fn test_refresh_exports_cache_stats() {
        let metrics = ServiceMetrics::new().unwrap();
        let stats = CacheStatsSnapshot {
            hits: 3,
            memory_capacity: 10,
            ..Default::default()
        };
        metrics.refresh(&stats, &OptimizationState::default());
        let text = metrics.render().unwrap();
        assert!(text.contains("tiered_cache_cache_operations{operation=\"hit\"} 3"));
        assert!(text.contains("tiered_cache_memory_capacity 10"));
    }
}
