//! Sample Ring Buffer
//!
//! Fixed-capacity store of finalized samples. When full, the oldest sample
//! is dropped to make room.

use crate::telemetry::sample::RequestMetricSample;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Aggregate over the samples in a time window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetryAggregate {
    /// Samples in the window
    pub count: u64,
    /// Samples that performed a cache lookup
    pub lookups: u64,
    pub hits: u64,
    pub hit_rate: f64,
    pub mean_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub errors: u64,
    /// Requests in flight when the aggregate was taken
    pub in_flight: u64,
    pub window_secs: u64,
}

pub struct SampleRing {
    samples: Mutex<VecDeque<RequestMetricSample>>,
    capacity: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a sample, returning the one evicted to make room
    pub fn push(&self, sample: RequestMetricSample) -> Option<RequestMetricSample> {
        let mut samples = self.samples.lock();
        let evicted = if samples.len() >= self.capacity {
            samples.pop_front()
        } else {
            None
        };
        samples.push_back(sample);
        evicted
    }

    /// Most recent samples, newest last
    pub fn recent(&self, limit: usize) -> Vec<RequestMetricSample> {
        let samples = self.samples.lock();
        let skip = samples.len().saturating_sub(limit);
        samples.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self) {
        self.samples.lock().clear();
    }

    /// Aggregate samples finished within `window` before `now`
    pub fn aggregate(&self, window: Duration, now: Instant) -> TelemetryAggregate {
        let mut latencies = Vec::new();
        let mut aggregate = TelemetryAggregate {
            window_secs: window.as_secs(),
            ..Default::default()
        };

        {
            let samples = self.samples.lock();
            for sample in samples.iter().rev() {
                let finished = sample.finished_at.unwrap_or(sample.started_at);
                if now.saturating_duration_since(finished) > window {
                    // Older samples are further towards the front
                    break;
                }
                aggregate.count += 1;
                if sample.looked_up() {
                    aggregate.lookups += 1;
                    if sample.was_hit() {
                        aggregate.hits += 1;
                    }
                }
                if sample.is_error() {
                    aggregate.errors += 1;
                }
                latencies.push(sample.total_ms());
            }
        }

        if aggregate.lookups > 0 {
            aggregate.hit_rate = aggregate.hits as f64 / aggregate.lookups as f64;
        }
        if !latencies.is_empty() {
            aggregate.mean_latency_ms = latencies.iter().sum::<f64>() / latencies.len() as f64;
            aggregate.p95_latency_ms = percentile(&mut latencies, 0.95);
        }
        aggregate
    }
}

/// Nearest-rank percentile; sorts `values` in place
pub fn percentile(values: &mut [f64], quantile: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = (quantile.clamp(0.0, 1.0) * values.len() as f64).ceil() as usize;
    values[rank.saturating_sub(1).min(values.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tier::CacheTier;
    use crate::telemetry::sample::{CacheOutcome, SampleState};

    fn sample(total_ms: u64, outcome: Option<CacheOutcome>, status: u16) -> RequestMetricSample {
        let mut s = RequestMetricSample::new("/x");
        if let Some(outcome) = outcome {
            s.record_cache(outcome);
        }
        s.close(SampleState::Completed, Some(status));
        s.total = Duration::from_millis(total_ms);
        s
    }

    #[test]
    fn test_oldest_sample_is_evicted() {
        let ring = SampleRing::new(2);
        ring.push(sample(1, None, 200));
        ring.push(sample(2, None, 200));
        let evicted = ring.push(sample(3, None, 200)).unwrap();
        assert_eq!(evicted.total, Duration::from_millis(1));
        assert_eq!(ring.len(), 2);
        let recent: Vec<_> = ring.recent(10).iter().map(|s| s.total.as_millis()).collect();
        assert_eq!(recent, vec![2, 3]);
    }

    #[test]
    fn test_aggregate() {
        let ring = SampleRing::new(100);
        for i in 1..=20u64 {
            let outcome = if i % 4 == 0 {
                CacheOutcome::Miss
            } else {
                CacheOutcome::Hit(CacheTier::Memory)
            };
            ring.push(sample(i * 10, Some(outcome), if i == 20 { 503 } else { 200 }));
        }
        ring.push(sample(5, Some(CacheOutcome::Bypass), 200));

        let agg = ring.aggregate(Duration::from_secs(300), Instant::now());
        assert_eq!(agg.count, 21);
        assert_eq!(agg.lookups, 20);
        assert_eq!(agg.hits, 15);
        assert!((agg.hit_rate - 0.75).abs() < 1e-9);
        assert_eq!(agg.errors, 1);
        assert_eq!(agg.p95_latency_ms, 190.0);
    }

    #[test]
    fn test_empty_window() {
        let ring = SampleRing::new(4);
        let agg = ring.aggregate(Duration::from_secs(60), Instant::now());
        assert_eq!(agg.count, 0);
        assert_eq!(agg.hit_rate, 0.0);
        assert_eq!(agg.mean_latency_ms, 0.0);
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let mut values = vec![5.0, 1.0, 3.0, 2.0, 4.0];
        assert_eq!(percentile(&mut values, 0.5), 3.0);
        assert_eq!(percentile(&mut values, 1.0), 5.0);
        assert_eq!(percentile(&mut values, 0.0), 1.0);
    }
}
