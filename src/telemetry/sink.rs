//! Metrics Sinks
//!
//! Destinations for aggregated telemetry. Publishing is fire-and-forget:
//! a sink must not block and cannot fail the caller.

use crate::telemetry::ring::TelemetryAggregate;
use tracing::info;

pub trait MetricsSink: Send + Sync {
    fn publish(&self, aggregate: &TelemetryAggregate);
}

/// Sink that writes aggregates to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn publish(&self, aggregate: &TelemetryAggregate) {
        info!(
            target: "telemetry",
            count = aggregate.count,
            hit_rate = aggregate.hit_rate,
            mean_latency_ms = aggregate.mean_latency_ms,
            p95_latency_ms = aggregate.p95_latency_ms,
            errors = aggregate.errors,
            in_flight = aggregate.in_flight,
            window_secs = aggregate.window_secs,
            "Request telemetry"
        );
    }
}
