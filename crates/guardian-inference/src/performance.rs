//! Live per-model call statistics.
//!
//! A record is created on the first attempted call for a model and kept for
//! the life of the process. All updates go through one mutex so concurrent
//! callers never lose an increment.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Rolling counters for one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub call_count: u64,
    pub failure_count: u64,
    /// Sum of the latency of every attempted call
    pub total_latency_ms: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    /// Position of the latest success in the tracker-wide success sequence
    pub last_success_seq: Option<u64>,
}

impl PerformanceRecord {
    pub fn success_count(&self) -> u64 {
        self.call_count - self.failure_count
    }

    pub fn success_rate(&self) -> f64 {
        if self.call_count == 0 {
            return 0.0;
        }
        self.success_count() as f64 / self.call_count as f64
    }

    pub fn mean_latency_ms(&self) -> f64 {
        if self.call_count == 0 {
            return 0.0;
        }
        self.total_latency_ms as f64 / self.call_count as f64
    }

    /// Best first: success rate, then lower latency, then the latest success.
    fn ranking_cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .success_rate()
            .total_cmp(&self.success_rate())
            .then_with(|| self.mean_latency_ms().total_cmp(&other.mean_latency_ms()))
            .then_with(|| other.last_success_seq.cmp(&self.last_success_seq))
    }
}

/// Summary returned by [`PerformanceTracker::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub success_rate: f64,
    pub mean_latency_ms: f64,
    pub call_count: u64,
}

#[derive(Debug, Default)]
struct TrackerState {
    records: HashMap<String, PerformanceRecord>,
    next_success_seq: u64,
}

#[derive(Debug, Default)]
pub struct PerformanceTracker {
    state: Mutex<TrackerState>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, model_id: &str, latency_ms: u64, success: bool) {
        let mut state = self.state.lock();
        let seq = if success {
            state.next_success_seq += 1;
            Some(state.next_success_seq)
        } else {
            None
        };

        let record = state.records.entry(model_id.to_string()).or_default();
        record.call_count += 1;
        record.total_latency_ms = record.total_latency_ms.saturating_add(latency_ms);
        if success {
            record.last_success_at = Some(Utc::now());
            record.last_success_seq = seq;
        } else {
            record.failure_count += 1;
        }

        tracing::trace!(
            model = %model_id,
            latency_ms,
            success,
            calls = record.call_count,
            "performance recorded"
        );
    }

    pub fn stats(&self, model_id: &str) -> Option<PerformanceStats> {
        self.state.lock().records.get(model_id).map(|r| PerformanceStats {
            success_rate: r.success_rate(),
            mean_latency_ms: r.mean_latency_ms(),
            call_count: r.call_count,
        })
    }

    pub fn record_for(&self, model_id: &str) -> Option<PerformanceRecord> {
        self.state.lock().records.get(model_id).cloned()
    }

    pub fn has_history(&self, model_id: &str) -> bool {
        self.state.lock().records.contains_key(model_id)
    }

    /// Order candidates best first.
    ///
    /// Candidates with history come first, by success rate (desc), mean
    /// latency (asc) and most recent success (desc). Candidates without
    /// history follow in their input order.
    pub fn rank(&self, candidate_ids: &[String]) -> Vec<String> {
        let state = self.state.lock();
        let (mut known, unknown): (Vec<_>, Vec<_>) = candidate_ids
            .iter()
            .partition(|id| state.records.contains_key(id.as_str()));

        known.sort_by(|a, b| {
            match (state.records.get(a.as_str()), state.records.get(b.as_str())) {
                (Some(ra), Some(rb)) => ra.ranking_cmp(rb),
                _ => std::cmp::Ordering::Equal,
            }
        });

        known.into_iter().chain(unknown).cloned().collect()
    }

    pub fn reset(&self, model_id: &str) {
        self.state.lock().records.remove(model_id);
    }

    pub fn reset_all(&self) {
        let mut state = self.state.lock();
        state.records.clear();
        state.next_success_seq = 0;
    }

    pub fn snapshot(&self) -> BTreeMap<String, PerformanceRecord> {
        self.state
            .lock()
            .records
            .iter()
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect()
    }
}
