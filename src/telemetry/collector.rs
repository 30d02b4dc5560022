//! Telemetry Collector
//!
//! Hands out a `RequestTimer` per request. Finalizing the timer (or
//! dropping it) closes the sample and moves it into the ring buffer.
//! In-flight requests are counted whether or not they are sampled.

use crate::cache::tier::CacheTier;
use crate::strategy::RequestCategory;
use crate::telemetry::exposition::ServiceMetrics;
use crate::telemetry::ring::{SampleRing, TelemetryAggregate};
use crate::telemetry::sample::{CacheOutcome, RequestMetricSample, SampleState};
use crate::telemetry::sink::MetricsSink;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Fraction of requests sampled (0.0 - 1.0)
    pub sample_rate: f64,
    /// Ring buffer capacity
    pub ring_capacity: usize,
    /// Requests slower than this raise an alert
    pub slow_threshold_ms: u64,
    pub alert_channel_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1.0,
            ring_capacity: 4096,
            slow_threshold_ms: 1000,
            alert_channel_capacity: 256,
        }
    }
}

/// Raised when a request exceeds the slow threshold
#[derive(Debug, Clone, Serialize)]
pub struct SlowRequestAlert {
    pub request_id: Uuid,
    pub path: String,
    pub category: Option<RequestCategory>,
    pub duration_ms: u64,
    pub threshold_ms: u64,
    pub at: DateTime<Utc>,
}

// =============================================================================
// Stride Sampler
// =============================================================================

const RATE_SCALE: u64 = 1_000_000;

/// Keeps exactly `floor(n * rate)` of the first `n` requests
#[derive(Debug)]
pub struct StrideSampler {
    rate_ppm: u64,
    seen: AtomicU64,
}

impl StrideSampler {
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_finite() { rate.clamp(0.0, 1.0) } else { 1.0 };
        Self {
            rate_ppm: (rate * RATE_SCALE as f64).round() as u64,
            seen: AtomicU64::new(0),
        }
    }

    /// Whether the next request is sampled
    pub fn sample(&self) -> bool {
        let n = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        (n * self.rate_ppm) / RATE_SCALE > ((n - 1) * self.rate_ppm) / RATE_SCALE
    }

    pub fn seen(&self) -> u64 {
        self.seen.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Collector
// =============================================================================

pub struct TelemetryCollector {
    config: TelemetryConfig,
    ring: SampleRing,
    sampler: StrideSampler,
    in_flight: AtomicU64,
    alert_tx: broadcast::Sender<SlowRequestAlert>,
    exporter: Option<Arc<ServiceMetrics>>,
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(TelemetryConfig::default())
    }
}

impl TelemetryCollector {
    pub fn new(config: TelemetryConfig) -> Self {
        let (alert_tx, _) = broadcast::channel(config.alert_channel_capacity.max(1));
        Self {
            ring: SampleRing::new(config.ring_capacity),
            sampler: StrideSampler::new(config.sample_rate),
            in_flight: AtomicU64::new(0),
            alert_tx,
            exporter: None,
            config,
        }
    }

    /// Also feed request counters and latency into a Prometheus registry
    pub fn with_exporter(mut self, exporter: Arc<ServiceMetrics>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Start timing a request
    pub fn start(self: &Arc<Self>, path: &str) -> RequestTimer {
        let in_flight = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(exporter) = &self.exporter {
            exporter.set_in_flight(in_flight);
        }
        let sample = self.sampler.sample().then(|| RequestMetricSample::new(path));
        RequestTimer {
            collector: self.clone(),
            path: path.to_string(),
            sample,
            category: None,
            outcome: None,
            started_at: Instant::now(),
            finalized: false,
        }
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<SlowRequestAlert> {
        self.alert_tx.subscribe()
    }

    pub fn ring(&self) -> &SampleRing {
        &self.ring
    }

    /// Aggregate over the last `window`
    pub fn aggregate(&self, window: Duration) -> TelemetryAggregate {
        let mut aggregate = self.ring.aggregate(window, Instant::now());
        aggregate.in_flight = self.in_flight();
        aggregate
    }

    /// Aggregate and hand the result to a sink
    pub fn publish(&self, window: Duration, sink: &dyn MetricsSink) -> TelemetryAggregate {
        let aggregate = self.aggregate(window);
        sink.publish(&aggregate);
        aggregate
    }

    fn finish(&self, timer: &mut RequestTimer, state: SampleState, status: Option<u16>) {
        let in_flight = self.in_flight.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);

        if let Some(exporter) = &self.exporter {
            exporter.set_in_flight(in_flight);
            let category = timer.category.map_or("unclassified", |c| c.namespace());
            exporter.observe_request(category, outcome_label(timer.outcome), timer.elapsed().as_secs_f64());
        }

        let mut sample = timer.sample.take();
        let duration_ms = match sample.as_mut() {
            Some(sample) => {
                sample.category = timer.category;
                sample.close(state, status);
                sample.total.as_millis() as u64
            }
            None => timer.elapsed().as_millis() as u64,
        };

        // Unsampled requests still alert.
        if duration_ms > self.config.slow_threshold_ms {
            let request_id = sample.as_ref().map_or_else(Uuid::new_v4, |s| s.request_id);
            warn!(
                request_id = %request_id,
                path = %timer.path,
                duration_ms,
                threshold_ms = self.config.slow_threshold_ms,
                "Slow request"
            );
            if let Some(exporter) = &self.exporter {
                exporter.observe_slow_request();
            }
            let _ = self.alert_tx.send(SlowRequestAlert {
                request_id,
                path: timer.path.clone(),
                category: timer.category,
                duration_ms,
                threshold_ms: self.config.slow_threshold_ms,
                at: Utc::now(),
            });
        }

        if let Some(sample) = sample {
            self.ring.push(sample);
        }
    }
}

fn outcome_label(outcome: Option<CacheOutcome>) -> &'static str {
    match outcome {
        Some(CacheOutcome::Hit(_)) => "hit",
        Some(CacheOutcome::Miss) => "miss",
        Some(CacheOutcome::Bypass) | None => "bypass",
    }
}

// =============================================================================
// Request Timer
// =============================================================================

/// Per-request handle; finalized exactly once
///
/// `complete` and `fail` consume the timer. A timer dropped without either
/// is finalized as `Errored("dropped")`.
pub struct RequestTimer {
    collector: Arc<TelemetryCollector>,
    path: String,
    sample: Option<RequestMetricSample>,
    category: Option<RequestCategory>,
    outcome: Option<CacheOutcome>,
    started_at: Instant,
    finalized: bool,
}

impl RequestTimer {
    pub fn is_sampled(&self) -> bool {
        self.sample.is_some()
    }

    pub fn request_id(&self) -> Option<Uuid> {
        self.sample.as_ref().map(|s| s.request_id)
    }

    pub fn mark(&mut self, name: &str) {
        if let Some(sample) = self.sample.as_mut() {
            sample.mark(name);
        }
    }

    pub fn set_category(&mut self, category: RequestCategory) {
        self.category = Some(category);
    }

    pub fn record_cache(&mut self, outcome: CacheOutcome) {
        self.outcome = Some(outcome);
        if let Some(sample) = self.sample.as_mut() {
            sample.record_cache(outcome);
        }
    }

    pub fn record_hit(&mut self, tier: CacheTier) {
        self.record_cache(CacheOutcome::Hit(tier));
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Finish with a response status
    pub fn complete(mut self, status: u16) {
        self.finalize(SampleState::Completed, Some(status));
    }

    /// Finish with an error
    pub fn fail(mut self, reason: impl Into<String>) {
        self.finalize(SampleState::Errored(reason.into()), None);
    }

    fn finalize(&mut self, state: SampleState, status: Option<u16>) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        let collector = self.collector.clone();
        collector.finish(self, state, status);
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        self.finalize(SampleState::Errored("dropped".to_string()), None);
    }
}
