use crate::application::queue::PermitQueue;
use crate::config::PipelineConfig;
use crate::domain::metrics::{MetricsSummary, QueueMetricsSample};
use crate::domain::ports::{ClockRef, StoreRef};
use crate::error::{PipelineError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Samples queue health on a timer and persists each sample as an immutable
/// time-series row. Summaries aggregate over the stored series, never over
/// live memory, so reporting survives restarts.
pub struct MetricsCollector {
    store: StoreRef,
    queue: Arc<PermitQueue>,
    clock: ClockRef,
    config: PipelineConfig,
}

impl MetricsCollector {
    pub fn new(
        store: StoreRef,
        queue: Arc<PermitQueue>,
        clock: ClockRef,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            queue,
            clock,
            config,
        }
    }

    pub async fn collect_sample(&self) -> Result<QueueMetricsSample> {
        let snapshot = self.queue.snapshot().await;
        let sample = QueueMetricsSample {
            queue_length: snapshot.queue_length,
            active_jobs: snapshot.active_jobs,
            avg_wait_ms: snapshot.avg_wait_ms,
            avg_processing_ms: snapshot.avg_processing_ms,
            total_completed: snapshot.total_completed,
            total_failed: snapshot.total_failed,
            created_at: self.clock.now(),
        };
        self.store.append_sample(sample.clone()).await?;
        debug!(
            queue_length = sample.queue_length,
            active_jobs = sample.active_jobs,
            "queue metrics sample stored"
        );
        Ok(sample)
    }

    /// Aggregates utilization and failure rate over the trailing window.
    pub async fn summary(&self, window: Duration) -> Result<MetricsSummary> {
        let cutoff = self.clock.now()
            - chrono::Duration::from_std(window)
                .map_err(|e| PipelineError::Validation(e.to_string()))?;
        let samples = self.store.samples_since(cutoff).await?;
        Ok(MetricsSummary::from_samples(
            &samples,
            self.config.worker_count,
        ))
    }

    /// Runs the sampling loop until the task is aborted.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.metrics_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.collect_sample().await {
                    warn!(error = %e, "metrics sample failed");
                }
            }
        })
    }
}
