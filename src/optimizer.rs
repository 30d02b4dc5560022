//! Adaptive Optimizer
//!
//! Periodically reads the telemetry window and sets the cache's tuning
//! knobs:
//!
//! | Signal                    | Adjustment                                   |
//! |---------------------------|----------------------------------------------|
//! | hit rate < target         | widen store eligibility, raise TTL multiplier|
//! | mean latency > threshold  | skip durable hot-path writes for short TTLs  |
//! | in-flight > ceiling       | shrink the memory tier                       |
//!
//! Knobs are atomics. Every evaluation *sets* each knob to the value its
//! rule implies, so repeated evaluations over the same window are no-ops.

use crate::cache::events::CacheEvent;
use crate::cache::TieredCache;
use crate::telemetry::{MetricsSink, TelemetryAggregate, TelemetryCollector};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

const PERMILLE: f64 = 1000.0;

// =============================================================================
// Tuning Knobs
// =============================================================================

/// Runtime knobs read on the request path
#[derive(Debug)]
pub struct TuningKnobs {
    ttl_multiplier_permille: AtomicU64,
    widen_eligibility: AtomicBool,
    durable_hot_path_writes: AtomicBool,
    memory_capacity_ratio_permille: AtomicU64,
}

impl Default for TuningKnobs {
    fn default() -> Self {
        Self {
            ttl_multiplier_permille: AtomicU64::new(1000),
            widen_eligibility: AtomicBool::new(false),
            durable_hot_path_writes: AtomicBool::new(true),
            memory_capacity_ratio_permille: AtomicU64::new(1000),
        }
    }
}

/// Point-in-time knob values
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KnobsSnapshot {
    pub ttl_multiplier: f64,
    pub widen_eligibility: bool,
    pub durable_hot_path_writes: bool,
    pub memory_capacity_ratio: f64,
}

impl TuningKnobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl_multiplier(&self) -> f64 {
        self.ttl_multiplier_permille.load(Ordering::Relaxed) as f64 / PERMILLE
    }

    pub fn set_ttl_multiplier(&self, multiplier: f64) {
        self.ttl_multiplier_permille
            .store(to_permille(multiplier), Ordering::Relaxed);
    }

    pub fn widen_eligibility(&self) -> bool {
        self.widen_eligibility.load(Ordering::Relaxed)
    }

    pub fn set_widen_eligibility(&self, widen: bool) {
        self.widen_eligibility.store(widen, Ordering::Relaxed);
    }

    pub fn durable_hot_path_writes(&self) -> bool {
        self.durable_hot_path_writes.load(Ordering::Relaxed)
    }

    pub fn set_durable_hot_path_writes(&self, enabled: bool) {
        self.durable_hot_path_writes.store(enabled, Ordering::Relaxed);
    }

    pub fn memory_capacity_ratio(&self) -> f64 {
        self.memory_capacity_ratio_permille.load(Ordering::Relaxed) as f64 / PERMILLE
    }

    pub fn set_memory_capacity_ratio(&self, ratio: f64) {
        self.memory_capacity_ratio_permille
            .store(to_permille(ratio.min(1.0)), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> KnobsSnapshot {
        KnobsSnapshot {
            ttl_multiplier: self.ttl_multiplier(),
            widen_eligibility: self.widen_eligibility(),
            durable_hot_path_writes: self.durable_hot_path_writes(),
            memory_capacity_ratio: self.memory_capacity_ratio(),
        }
    }
}

fn to_permille(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        (value * PERMILLE).round() as u64
    } else {
        1000
    }
}

// =============================================================================
// Configuration & State
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub enabled: bool,
    /// Telemetry window evaluated each round
    pub window_secs: u64,
    pub interval_secs: u64,
    pub target_hit_rate: f64,
    pub latency_threshold_ms: f64,
    pub in_flight_ceiling: u64,
    /// TTL multiplier applied while the hit rate is below target
    pub aggressive_ttl_multiplier: f64,
    /// Memory capacity fraction kept while over the in-flight ceiling
    pub memory_shrink_ratio: f64,
    /// Sample-based rules are skipped below this many samples
    pub min_samples: u64,
    /// Minimum spacing between alert-triggered evaluations
    pub alert_debounce_ms: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 300,
            interval_secs: 15,
            target_hit_rate: 0.6,
            latency_threshold_ms: 250.0,
            in_flight_ceiling: 512,
            aggressive_ttl_multiplier: 1.5,
            memory_shrink_ratio: 0.5,
            min_samples: 20,
            alert_debounce_ms: 5_000,
        }
    }
}

impl OptimizerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.max(1))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Active adjustments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TuningMode {
    /// Hit rate below target
    pub aggressive: bool,
    /// Latency above threshold
    pub fast_tier: bool,
    /// In-flight above ceiling
    pub shedding: bool,
}

impl TuningMode {
    pub fn is_baseline(&self) -> bool {
        *self == TuningMode::default()
    }
}

impl fmt::Display for TuningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_baseline() {
            return f.write_str("baseline");
        }
        let active: Vec<&str> = [
            (self.aggressive, "aggressive"),
            (self.fast_tier, "fast_tier"),
            (self.shedding, "shedding"),
        ]
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, name)| *name)
        .collect();
        f.write_str(&active.join("+"))
    }
}

/// Result of the latest evaluation
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizationState {
    pub hit_rate: f64,
    pub mean_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub in_flight: u64,
    pub samples: u64,
    pub mode: TuningMode,
    pub ttl_multiplier: f64,
    pub knobs: Option<KnobsSnapshot>,
    pub last_evaluated: Option<DateTime<Utc>>,
    /// Evaluations that changed the mode
    pub adjustments: u64,
    pub last_reason: Option<String>,
}

// =============================================================================
// Optimizer
// =============================================================================

pub struct Optimizer {
    config: OptimizerConfig,
    cache: Arc<TieredCache>,
    telemetry: Arc<TelemetryCollector>,
    knobs: Arc<TuningKnobs>,
    sink: Option<Arc<dyn MetricsSink>>,
    /// Memory capacity to restore when shedding ends
    base_memory_capacity: usize,
    state: RwLock<OptimizationState>,
}

impl Optimizer {
    pub fn new(
        config: OptimizerConfig,
        cache: Arc<TieredCache>,
        telemetry: Arc<TelemetryCollector>,
        knobs: Arc<TuningKnobs>,
    ) -> Self {
        let base_memory_capacity = cache.config().memory.capacity_entries;
        let state = OptimizationState {
            ttl_multiplier: knobs.ttl_multiplier(),
            knobs: Some(knobs.snapshot()),
            ..Default::default()
        };
        Self {
            config,
            cache,
            telemetry,
            knobs,
            sink: None,
            base_memory_capacity,
            state: RwLock::new(state),
        }
    }

    /// Publish each evaluated window to a sink
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn knobs(&self) -> &Arc<TuningKnobs> {
        &self.knobs
    }

    pub fn state(&self) -> OptimizationState {
        self.state.read().clone()
    }

    /// Evaluate the current telemetry window
    pub fn evaluate(&self) -> OptimizationState {
        let window = self.config.window();
        let aggregate = match &self.sink {
            Some(sink) => self.telemetry.publish(window, sink.as_ref()),
            None => self.telemetry.aggregate(window),
        };
        self.apply(&aggregate)
    }

    /// Apply the rules to an aggregate
    pub fn apply(&self, aggregate: &TelemetryAggregate) -> OptimizationState {
        let previous = self.state.read().mode;
        let mut mode = previous;
        let mut reasons = Vec::new();

        if aggregate.lookups >= self.config.min_samples {
            mode.aggressive = aggregate.hit_rate < self.config.target_hit_rate;
            if mode.aggressive {
                reasons.push(format!(
                    "hit rate {:.2} below target {:.2}",
                    aggregate.hit_rate, self.config.target_hit_rate
                ));
            }
        }
        if aggregate.count >= self.config.min_samples {
            mode.fast_tier = aggregate.mean_latency_ms > self.config.latency_threshold_ms;
            if mode.fast_tier {
                reasons.push(format!(
                    "mean latency {:.1}ms above {:.1}ms",
                    aggregate.mean_latency_ms, self.config.latency_threshold_ms
                ));
            }
        }
        mode.shedding = aggregate.in_flight > self.config.in_flight_ceiling;
        if mode.shedding {
            reasons.push(format!(
                "{} requests in flight above {}",
                aggregate.in_flight, self.config.in_flight_ceiling
            ));
        }

        self.set_knobs(mode);

        let reason = if reasons.is_empty() {
            "within targets".to_string()
        } else {
            reasons.join("; ")
        };

        let mut state = self.state.write();
        state.hit_rate = aggregate.hit_rate;
        state.mean_latency_ms = aggregate.mean_latency_ms;
        state.p95_latency_ms = aggregate.p95_latency_ms;
        state.in_flight = aggregate.in_flight;
        state.samples = aggregate.count;
        state.mode = mode;
        state.ttl_multiplier = self.knobs.ttl_multiplier();
        state.knobs = Some(self.knobs.snapshot());
        state.last_evaluated = Some(Utc::now());

        if mode != previous {
            state.adjustments += 1;
            state.last_reason = Some(reason.clone());
            info!(from = %previous, to = %mode, reason = %reason, "Optimizer mode changed");
            self.cache.emit_event(CacheEvent::Tuned {
                mode: mode.to_string(),
                reason,
            });
        } else {
            debug!(mode = %mode, samples = aggregate.count, hit_rate = aggregate.hit_rate, "Optimizer evaluated");
        }

        state.clone()
    }

    fn set_knobs(&self, mode: TuningMode) {
        if mode.aggressive {
            self.knobs.set_ttl_multiplier(self.config.aggressive_ttl_multiplier);
            self.knobs.set_widen_eligibility(true);
        } else {
            self.knobs.set_ttl_multiplier(1.0);
            self.knobs.set_widen_eligibility(false);
        }

        self.knobs.set_durable_hot_path_writes(!mode.fast_tier);

        let ratio = if mode.shedding { self.config.memory_shrink_ratio } else { 1.0 };
        self.knobs.set_memory_capacity_ratio(ratio);
        let capacity = ((self.base_memory_capacity as f64) * self.knobs.memory_capacity_ratio()).round() as usize;
        if capacity != self.cache.memory().capacity() {
            self.cache.set_memory_capacity(capacity.max(1));
        }
    }

    /// Evaluate on a timer and on slow-request alerts until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("Optimizer disabled");
            return;
        }

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut alerts = self.telemetry.subscribe_alerts();
        let debounce = Duration::from_millis(self.config.alert_debounce_ms);
        let mut last_alert_evaluation: Option<Instant> = None;
        let mut alerts_open = true;

        info!(
            interval_secs = self.config.interval_secs,
            window_secs = self.config.window_secs,
            "Optimizer started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evaluate();
                }
                alert = alerts.recv(), if alerts_open => match alert {
                    Ok(alert) => {
                        let due = last_alert_evaluation.map_or(true, |at| at.elapsed() >= debounce);
                        if due {
                            debug!(path = %alert.path, duration_ms = alert.duration_ms, "Evaluating after slow request");
                            last_alert_evaluation = Some(Instant::now());
                            self.evaluate();
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Optimizer lagged behind slow-request alerts");
                    }
                    Err(RecvError::Closed) => {
                        warn!("Slow-request alert channel closed");
                        alerts_open = false;
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Optimizer stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCacheConfig;
    use crate::telemetry::TelemetryConfig;
    use assert_matches::assert_matches;

    fn optimizer() -> Optimizer {
        let knobs = Arc::new(TuningKnobs::default());
        let cache = Arc::new(TieredCache::new(TieredCacheConfig::default(), None, None, knobs.clone()));
        let telemetry = Arc::new(TelemetryCollector::new(TelemetryConfig::default()));
        Optimizer::new(OptimizerConfig::default(), cache, telemetry, knobs)
    }

    fn aggregate(count: u64, hit_rate: f64, mean_latency_ms: f64, in_flight: u64) -> TelemetryAggregate {
        TelemetryAggregate {
            count,
            lookups: count,
            hits: (count as f64 * hit_rate) as u64,
            hit_rate,
            mean_latency_ms,
            p95_latency_ms: mean_latency_ms,
            errors: 0,
            in_flight,
            window_secs: 300,
        }
    }

    #[test]
    fn test_knob_defaults() {
        let knobs = TuningKnobs::default();
        assert_eq!(knobs.ttl_multiplier(), 1.0);
        assert!(!knobs.widen_eligibility());
        assert!(knobs.durable_hot_path_writes());
        assert_eq!(knobs.memory_capacity_ratio(), 1.0);
        knobs.set_ttl_multiplier(f64::NAN);
        assert_eq!(knobs.ttl_multiplier(), 1.0);
    }

    #[test]
    fn test_low_hit_rate_widens_and_extends() {
        let opt = optimizer();
        let state = opt.apply(&aggregate(100, 0.3, 10.0, 1));
        assert!(state.mode.aggressive);
        assert_eq!(opt.knobs().ttl_multiplier(), 1.5);
        assert!(opt.knobs().widen_eligibility());
        assert_eq!(state.adjustments, 1);

        let recovered = opt.apply(&aggregate(100, 0.9, 10.0, 1));
        assert!(recovered.mode.is_baseline());
        assert_eq!(opt.knobs().ttl_multiplier(), 1.0);
        assert!(!opt.knobs().widen_eligibility());
    }

    #[test]
    fn test_high_latency_disables_durable_hot_path() {
        let opt = optimizer();
        let state = opt.apply(&aggregate(50, 0.9, 400.0, 1));
        assert!(state.mode.fast_tier);
        assert!(!opt.knobs().durable_hot_path_writes());
    }

    #[test]
    fn test_in_flight_shrinks_memory() {
        let opt = optimizer();
        opt.apply(&aggregate(0, 0.0, 0.0, 600));
        assert_eq!(opt.cache.memory().capacity(), 5_000);
        opt.apply(&aggregate(0, 0.0, 0.0, 10));
        assert_eq!(opt.cache.memory().capacity(), 10_000);
    }

    #[test]
    fn test_sample_rules_skipped_below_min_samples() {
        let opt = optimizer();
        let state = opt.apply(&aggregate(5, 0.0, 5_000.0, 1));
        assert!(state.mode.is_baseline());
        assert_eq!(state.adjustments, 0);
    }

    #[test]
    fn test_repeated_evaluation_is_idempotent() {
        let opt = optimizer();
        let input = aggregate(100, 0.2, 300.0, 1_000);
        let first = opt.apply(&input);
        let second = opt.apply(&input);
        assert_eq!(first.mode, second.mode);
        assert_eq!(second.adjustments, 1);
        assert_eq!(opt.knobs().snapshot(), first.knobs.unwrap());
        assert_eq!(first.mode.to_string(), "aggressive+fast_tier+shedding");
    }

    #[tokio::test]
    async fn test_mode_change_emits_tuned_event() {
        let opt = optimizer();
        let mut events = opt.cache.subscribe();
        opt.apply(&aggregate(100, 0.1, 1.0, 1));
        assert_matches!(events.recv().await.unwrap(), CacheEvent::Tuned { mode, .. } if mode == "aggressive");
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let opt = Arc::new(optimizer());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(opt.clone().run(shutdown_rx));
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
