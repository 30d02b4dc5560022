//! Performance Telemetry Collector
//!
//! ```text
//!   request ──► RequestTimer ── mark / record_cache ──► complete | fail | drop
//!                                                            │
//!                              ┌─────────────────────────────┤
//!                              ▼                             ▼
//!                     SampleRing (bounded)          SlowRequestAlert (broadcast)
//!                              │
//!                              ▼
//!                     TelemetryAggregate ──► Optimizer, MetricsSink
//! ```

pub mod collector;
pub mod exposition;
pub mod ring;
pub mod sample;
pub mod sink;

pub use collector::{RequestTimer, SlowRequestAlert, StrideSampler, TelemetryCollector, TelemetryConfig};
pub use exposition::ServiceMetrics;
pub use ring::{SampleRing, TelemetryAggregate};
pub use sample::{CacheOutcome, RequestMetricSample, SampleState, TimingMark};
pub use sink::{MetricsSink, TracingMetricsSink};
