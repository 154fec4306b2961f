use crate::config::PipelineConfig;
use crate::domain::application::{Application, ApplicationStatus};
use crate::domain::event::PaymentEvent;
use crate::domain::ports::{
    ClockRef, IssuanceRef, Notice, NotifierRef, StoreRef, TransitionUpdate,
};
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPriority {
    Normal,
    High,
}

impl JobPriority {
    fn rank(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::High => 1,
        }
    }
}

/// A pending permit-generation job. Ordered by priority, then FIFO within
/// a priority via the monotonic sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PermitJob {
    application_id: i64,
    priority: JobPriority,
    seq: u64,
}

impl Ord for PermitJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .rank()
            .cmp(&other.priority.rank())
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PermitJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<PermitJob>,
    /// Applications queued or running; the idempotent-enqueue guard.
    in_flight: HashSet<i64>,
    next_seq: u64,
}

/// Point-in-time queue health, fed to the metrics collector.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub queue_length: usize,
    pub active_jobs: usize,
    pub avg_wait_ms: f64,
    pub avg_processing_ms: f64,
    pub total_completed: u64,
    pub total_failed: u64,
}

/// Bounded job queue plus worker pool turning confirmed payments into
/// permit artifacts through the issuance backend.
///
/// `enqueue` is idempotent per application; capacity and worker count bound
/// memory and concurrency. Every job stamps queue latency fields on its
/// application so wait and processing time are observable after the fact.
pub struct PermitQueue {
    store: StoreRef,
    issuance: IssuanceRef,
    notifier: NotifierRef,
    clock: ClockRef,
    config: PipelineConfig,
    inner: Mutex<QueueInner>,
    wakeup: Notify,
    shutdown: AtomicBool,
    active: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    wait_ms_sum: AtomicU64,
    processing_ms_sum: AtomicU64,
}

impl PermitQueue {
    pub fn new(
        store: StoreRef,
        issuance: IssuanceRef,
        notifier: NotifierRef,
        clock: ClockRef,
        config: PipelineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            issuance,
            notifier,
            clock,
            config,
            inner: Mutex::new(QueueInner::default()),
            wakeup: Notify::new(),
            shutdown: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            wait_ms_sum: AtomicU64::new(0),
            processing_ms_sum: AtomicU64::new(0),
        })
    }

    /// Enqueues a permit-generation job for the application.
    ///
    /// Returns `Ok(false)` without side effects when a job for the same
    /// application is already queued or running. Fails with `Validation`
    /// when the queue is at capacity.
    pub async fn enqueue(&self, application_id: i64) -> Result<bool> {
        self.enqueue_with_priority(application_id, JobPriority::Normal)
            .await
    }

    pub async fn enqueue_with_priority(
        &self,
        application_id: i64,
        priority: JobPriority,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.in_flight.contains(&application_id) {
            debug!(application_id, "job already in flight, skipping enqueue");
            return Ok(false);
        }
        if inner.heap.len() >= self.config.queue_capacity {
            return Err(PipelineError::Validation(format!(
                "permit queue at capacity ({})",
                self.config.queue_capacity
            )));
        }

        // Stamp before publishing the job; a failed store write must leave
        // the queue untouched.
        self.store
            .update_fields(
                application_id,
                TransitionUpdate {
                    queue_entered_at: Some(self.clock.now()),
                    ..Default::default()
                },
            )
            .await?;

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.in_flight.insert(application_id);
        inner.heap.push(PermitJob {
            application_id,
            priority,
            seq,
        });
        drop(inner);
        self.wakeup.notify_one();
        info!(application_id, "permit job enqueued");
        Ok(true)
    }

    /// Spawns the bounded worker pool. Workers run until [`shutdown`] is
    /// called and the queue is drained of claimed jobs.
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.config.worker_count)
            .map(|worker| {
                let queue = Arc::clone(self);
                tokio::spawn(async move {
                    debug!(worker, "permit worker started");
                    while let Some(job) = queue.next_job().await {
                        queue.run_job(job).await;
                    }
                    debug!(worker, "permit worker stopped");
                })
            })
            .collect()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wakeup.notify_waiters();
    }

    async fn next_job(&self) -> Option<PermitJob> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(job) = inner.heap.pop() {
                    return Some(job);
                }
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return None;
            }
            self.wakeup.notified().await;
        }
    }

    async fn run_job(&self, job: PermitJob) {
        self.active.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.process_application(job.application_id).await {
            error!(application_id = job.application_id, error = %e, "permit job failed");
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        inner.in_flight.remove(&job.application_id);
    }

    async fn process_application(&self, application_id: i64) -> Result<()> {
        let Some(application) = self.store.get_application(application_id).await? else {
            return Err(PipelineError::NotFound(format!(
                "application {application_id}"
            )));
        };
        if application.status != ApplicationStatus::PaymentReceived {
            debug!(
                application_id,
                status = ?application.status,
                "application no longer awaiting permit generation, skipping"
            );
            return Ok(());
        }

        let started = self.clock.now();
        let application = self
            .store
            .apply_transition(
                application_id,
                ApplicationStatus::GeneratingPermit,
                TransitionUpdate {
                    queue_started_at: Some(started),
                    ..Default::default()
                },
                self.ledger_event(&application, "permit_generation_started"),
            )
            .await?;
        if let Some(wait) = application.queue_wait_ms() {
            self.wait_ms_sum.fetch_add(wait.max(0) as u64, Ordering::SeqCst);
        }

        // Once the issuance call is in flight the job runs to a terminal
        // state; cancellation is not honored past this point so no external
        // side effect is orphaned.
        match self.issue_with_retries(&application).await {
            Ok(permit) => self.complete(&application, permit, started).await,
            Err(e) => self.fail(&application, e, started).await,
        }
    }

    async fn issue_with_retries(
        &self,
        application: &Application,
    ) -> Result<crate::domain::ports::IssuedPermit> {
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(
                self.config.issuance_timeout,
                self.issuance.issue_permit(application),
            )
            .await
            {
                Ok(result) => result,
                // A timeout is failed-and-retryable, never implicit success.
                Err(_) => Err(PipelineError::TransientGateway(
                    "issuance backend call timed out".to_string(),
                )),
            };
            match outcome {
                Ok(permit) => return Ok(permit),
                Err(e) if e.is_retryable() && attempt < self.config.issuance_max_retries => {
                    attempt += 1;
                    warn!(
                        application_id = application.id,
                        attempt,
                        error = %e,
                        "transient issuance failure, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn complete(
        &self,
        application: &Application,
        permit: crate::domain::ports::IssuedPermit,
        started: DateTime<Utc>,
    ) -> Result<()> {
        let completed_at = self.clock.now();
        let duration_ms = (completed_at - started).num_milliseconds().max(0);
        self.store
            .apply_transition(
                application.id,
                ApplicationStatus::PermitReady,
                TransitionUpdate {
                    permit_artifacts: Some(permit.artifacts),
                    permit_expires_at: Some(permit.expires_at),
                    queue_completed_at: Some(completed_at),
                    queue_duration_ms: Some(duration_ms),
                    ..Default::default()
                },
                self.ledger_event(application, "permit_generated"),
            )
            .await?;
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.processing_ms_sum
            .fetch_add(duration_ms as u64, Ordering::SeqCst);
        info!(application_id = application.id, duration_ms, "permit ready");
        self.send_notice(application.id, Notice::PermitReady).await;
        Ok(())
    }

    async fn fail(
        &self,
        application: &Application,
        cause: PipelineError,
        started: DateTime<Utc>,
    ) -> Result<()> {
        let completed_at = self.clock.now();
        let duration_ms = (completed_at - started).num_milliseconds().max(0);
        let reason = match &cause {
            PipelineError::PermanentGateway(msg) => msg.clone(),
            other => format!("permit generation failed after retries: {other}"),
        };
        self.store
            .apply_transition(
                application.id,
                ApplicationStatus::Failed,
                TransitionUpdate {
                    failure_reason: Some(reason.clone()),
                    queue_completed_at: Some(completed_at),
                    queue_duration_ms: Some(duration_ms),
                    ..Default::default()
                },
                self.ledger_event(application, "permit_generation_failed"),
            )
            .await?;
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.processing_ms_sum
            .fetch_add(duration_ms as u64, Ordering::SeqCst);
        error!(application_id = application.id, %reason, "permit generation failed");
        self.send_notice(
            application.id,
            Notice::PermitGenerationFailed { reason },
        )
        .await;
        Err(cause)
    }

    /// Fire-and-forget: a notification failure never alters job outcome.
    async fn send_notice(&self, application_id: i64, notice: Notice) {
        if let Err(e) = self.notifier.notify(application_id, notice).await {
            warn!(application_id, error = %e, "notification dispatch failed");
        }
    }

    fn ledger_event(&self, application: &Application, event_type: &str) -> PaymentEvent {
        PaymentEvent {
            application_id: application.id,
            order_id: application.payment_order_id.clone().unwrap_or_default(),
            event_type: event_type.to_string(),
            event_data: serde_json::Value::Null,
            amount: application.amount,
            currency: application.currency,
            created_at: self.clock.now(),
        }
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let queue_length = self.inner.lock().await.heap.len();
        let completed = self.completed.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let outcomes = completed + failed;
        let avg = |sum: u64| if outcomes == 0 { 0.0 } else { sum as f64 / outcomes as f64 };
        QueueSnapshot {
            queue_length,
            active_jobs: self.active.load(Ordering::SeqCst),
            avg_wait_ms: avg(self.wait_ms_sum.load(Ordering::SeqCst)),
            avg_processing_ms: avg(self.processing_ms_sum.load(Ordering::SeqCst)),
            total_completed: completed,
            total_failed: failed,
        }
    }

    /// Health query: in-flight applications with no update past the stuck
    /// threshold. Flagged for remediation, never auto-mutated here.
    pub async fn stuck_applications(&self) -> Result<Vec<Application>> {
        let cutoff = self.clock.now()
            - chrono::Duration::from_std(self.config.stuck_threshold)
                .map_err(|e| PipelineError::Validation(e.to_string()))?;
        self.store.find_stuck(cutoff).await
    }

    /// Waits until no job is queued or running. Used by the CLI and tests
    /// to flush the pipeline before reading results.
    pub async fn drained(&self) {
        loop {
            let queued = {
                let inner = self.inner.lock().await;
                inner.heap.len() + inner.in_flight.len()
            };
            if queued == 0 && self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ordering_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        heap.push(PermitJob { application_id: 1, priority: JobPriority::Normal, seq: 0 });
        heap.push(PermitJob { application_id: 2, priority: JobPriority::High, seq: 1 });
        heap.push(PermitJob { application_id: 3, priority: JobPriority::Normal, seq: 2 });
        heap.push(PermitJob { application_id: 4, priority: JobPriority::High, seq: 3 });

        let order: Vec<i64> = std::iter::from_fn(|| heap.pop())
            .map(|j| j.application_id)
            .collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }
}
