//! Request Metric Samples
//!
//! One sample per request, moving through
//! `Created → Marked(*) → Completed | Errored`. Marks are monotonic points
//! in time; each records its distance from the previous mark.

use crate::cache::tier::CacheTier;
use crate::strategy::RequestCategory;
use serde::Serialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lifecycle state of a sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SampleState {
    Created,
    /// Last mark reached
    Marked(String),
    Completed,
    Errored(String),
}

impl SampleState {
    pub fn is_final(&self) -> bool {
        matches!(self, SampleState::Completed | SampleState::Errored(_))
    }
}

/// A named point in a request's life
#[derive(Debug, Clone)]
pub struct TimingMark {
    pub name: String,
    pub at: Instant,
    /// Time since the previous mark (or the start)
    pub since_previous: Duration,
}

/// How the cache answered a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    Hit(CacheTier),
    Miss,
    Bypass,
}

/// Timing and resource record for one request
#[derive(Debug, Clone)]
pub struct RequestMetricSample {
    pub request_id: Uuid,
    pub path: String,
    pub category: Option<RequestCategory>,
    pub marks: Vec<TimingMark>,
    pub state: SampleState,
    pub cache_hits: u32,
    pub cache_misses: u32,
    pub tier: Option<CacheTier>,
    pub status: Option<u16>,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
    pub total: Duration,
}

impl RequestMetricSample {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            path: path.into(),
            category: None,
            marks: Vec::new(),
            state: SampleState::Created,
            cache_hits: 0,
            cache_misses: 0,
            tier: None,
            status: None,
            started_at: Instant::now(),
            finished_at: None,
            total: Duration::ZERO,
        }
    }

    /// Record a named mark; ignored once the sample is final
    pub fn mark(&mut self, name: &str) {
        if self.state.is_final() {
            return;
        }
        let now = Instant::now();
        let previous = self.marks.last().map_or(self.started_at, |m| m.at);
        self.marks.push(TimingMark {
            name: name.to_string(),
            at: now,
            since_previous: now.saturating_duration_since(previous),
        });
        self.state = SampleState::Marked(name.to_string());
    }

    pub fn record_cache(&mut self, outcome: CacheOutcome) {
        match outcome {
            CacheOutcome::Hit(tier) => {
                self.cache_hits += 1;
                self.tier = Some(tier);
            }
            CacheOutcome::Miss => self.cache_misses += 1,
            CacheOutcome::Bypass => {}
        }
    }

    /// Close the sample with a final state
    pub(crate) fn close(&mut self, state: SampleState, status: Option<u16>) {
        if self.state.is_final() {
            return;
        }
        let now = Instant::now();
        self.finished_at = Some(now);
        self.total = now.saturating_duration_since(self.started_at);
        self.status = status.or(self.status);
        self.state = state;
    }

    pub fn is_error(&self) -> bool {
        matches!(self.state, SampleState::Errored(_)) || self.status.map_or(false, |s| s >= 500)
    }

    pub fn was_hit(&self) -> bool {
        self.cache_hits > 0
    }

    /// Whether a cache lookup happened
    pub fn looked_up(&self) -> bool {
        self.cache_hits + self.cache_misses > 0
    }

    pub fn total_ms(&self) -> f64 {
        self.total.as_secs_f64() * 1000.0
    }

    /// Duration of a named mark relative to its predecessor
    pub fn mark_duration(&self, name: &str) -> Option<Duration> {
        self.marks.iter().find(|m| m.name == name).map(|m| m.since_previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        let mut sample = RequestMetricSample::new("/api/files/1");
        assert_eq!(sample.state, SampleState::Created);

        sample.mark("lookup");
        sample.mark("upstream");
        assert_eq!(sample.state, SampleState::Marked("upstream".into()));
        assert_eq!(sample.marks.len(), 2);
        assert!(sample.marks[1].at >= sample.marks[0].at);
        assert!(sample.mark_duration("upstream").is_some());

        sample.close(SampleState::Completed, Some(200));
        assert!(sample.state.is_final());
        assert!(sample.finished_at.is_some());

        // Final samples ignore further changes
        sample.mark("late");
        sample.close(SampleState::Errored("again".into()), Some(500));
        assert_eq!(sample.marks.len(), 2);
        assert_eq!(sample.state, SampleState::Completed);
        assert_eq!(sample.status, Some(200));
    }

    #[test]
    fn test_cache_counters() {
        let mut sample = RequestMetricSample::new("/");
        assert!(!sample.looked_up());
        sample.record_cache(CacheOutcome::Bypass);
        assert!(!sample.looked_up());
        sample.record_cache(CacheOutcome::Hit(CacheTier::Edge));
        assert!(sample.was_hit());
        assert_eq!(sample.tier, Some(CacheTier::Edge));
    }
}
