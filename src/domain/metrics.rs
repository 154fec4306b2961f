use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable time-series row describing queue health at one instant.
///
/// Samples are stored durably so that dashboards and the summary queries
/// survive process restarts; nothing aggregates over live in-memory state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMetricsSample {
    pub queue_length: usize,
    pub active_jobs: usize,
    pub avg_wait_ms: f64,
    pub avg_processing_ms: f64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub created_at: DateTime<Utc>,
}

/// Aggregation over stored samples in a caller-specified window.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricsSummary {
    pub samples: usize,
    pub max_queue_length: usize,
    pub avg_queue_length: f64,
    /// Mean fraction of workers busy across the window.
    pub utilization: f64,
    /// failed / (completed + failed) over the window delta.
    pub failure_rate: f64,
    pub completed_in_window: u64,
    pub failed_in_window: u64,
}

impl MetricsSummary {
    /// Computes the summary from samples already filtered to the window,
    /// ordered oldest first.
    pub fn from_samples(samples: &[QueueMetricsSample], worker_count: usize) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let n = samples.len() as f64;
        let max_queue_length = samples.iter().map(|s| s.queue_length).max().unwrap_or(0);
        let avg_queue_length = samples.iter().map(|s| s.queue_length as f64).sum::<f64>() / n;
        let utilization = if worker_count == 0 {
            0.0
        } else {
            samples
                .iter()
                .map(|s| s.active_jobs as f64 / worker_count as f64)
                .sum::<f64>()
                / n
        };

        // Counters are cumulative; the window delta is last minus first.
        let first = &samples[0];
        let last = &samples[samples.len() - 1];
        let completed_in_window = last.total_completed.saturating_sub(first.total_completed);
        let failed_in_window = last.total_failed.saturating_sub(first.total_failed);
        let outcomes = completed_in_window + failed_in_window;
        let failure_rate = if outcomes == 0 {
            0.0
        } else {
            failed_in_window as f64 / outcomes as f64
        };

        Self {
            samples: samples.len(),
            max_queue_length,
            avg_queue_length,
            utilization,
            failure_rate,
            completed_in_window,
            failed_in_window,
        }
    }
}
