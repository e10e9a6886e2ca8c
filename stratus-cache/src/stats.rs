//! Cache statistics.
//!
//! Per-operation latencies are kept in bounded sample streams (fixed cap,
//! oldest evicted first) and only ever read back as aggregates; the streams
//! exist for observability, not control flow.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

/// Samples retained per operation.
const SAMPLE_CAP: usize = 128;

/// Latency aggregate for one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OpLatency {
    /// Mean latency over the retained window, in milliseconds.
    pub avg_ms: f64,
    /// Samples currently in the window.
    pub count: usize,
}

/// Bounded per-operation latency sample streams.
#[derive(Debug, Default)]
pub struct PerformanceTracker {
    samples: DashMap<&'static str, Mutex<VecDeque<Duration>>>,
}

impl PerformanceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one latency sample for an operation.
    pub fn record(&self, op: &'static str, elapsed: Duration) {
        let stream = self
            .samples
            .entry(op)
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(SAMPLE_CAP)));
        // The streams are observability-only; a poisoned window is still a
        // usable window, so recover rather than propagate.
        let mut stream = stream.lock().unwrap_or_else(PoisonError::into_inner);
        if stream.len() == SAMPLE_CAP {
            stream.pop_front();
        }
        stream.push_back(elapsed);
    }

    /// Aggregate the retained samples per operation.
    pub fn snapshot(&self) -> HashMap<String, OpLatency> {
        self.samples
            .iter()
            .map(|entry| {
                let stream = entry.value().lock().unwrap_or_else(PoisonError::into_inner);
                let count = stream.len();
                let avg_ms = if count == 0 {
                    0.0
                } else {
                    let total: Duration = stream.iter().sum();
                    total.as_secs_f64() * 1000.0 / count as f64
                };
                (entry.key().to_string(), OpLatency { avg_ms, count })
            })
            .collect()
    }
}

/// Point-in-time view of the cache reported by
/// [`CoalescingCache::stats`](crate::CoalescingCache::stats).
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Whether the store is currently considered reachable.
    pub connected: bool,
    /// Approximate keys held by the store.
    pub key_count: u64,
    /// Approximate store memory footprint in bytes.
    pub memory_bytes: u64,
    /// In-flight populate calls.
    pub active_locks: usize,
    /// Latency aggregates per operation.
    pub performance: HashMap<String, OpLatency>,
}
