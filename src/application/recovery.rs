use crate::application::queue::PermitQueue;
use crate::config::PipelineConfig;
use crate::domain::application::ApplicationStatus;
use crate::domain::event::PaymentEvent;
use crate::domain::ports::{
    ClockRef, GatewayPaymentStatus, GatewayRef, Notice, NotifierRef, StoreRef, TransitionUpdate,
};
use crate::domain::recovery::{RecoveryAttempt, RecoveryStatus};
use crate::error::{PipelineError, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counters for one completed recovery scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub examined: usize,
    pub recovered: usize,
    pub payment_failed: usize,
    pub still_pending: usize,
    pub exhausted: usize,
    pub errors: usize,
    pub purged: usize,
}

/// Periodic reconciliation of payments stuck mid-flight.
///
/// Each scan claims a bounded, oldest-first batch of due attempts, re-queries
/// the gateway per row with a hard timeout, and drives the state machine
/// forward on a definitive answer. Per-row failures are contained; one bad
/// record never aborts the batch.
pub struct RecoveryScheduler {
    store: StoreRef,
    gateway: GatewayRef,
    queue: Arc<PermitQueue>,
    notifier: NotifierRef,
    clock: ClockRef,
    config: PipelineConfig,
}

impl RecoveryScheduler {
    pub fn new(
        store: StoreRef,
        gateway: GatewayRef,
        queue: Arc<PermitQueue>,
        notifier: NotifierRef,
        clock: ClockRef,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            queue,
            notifier,
            clock,
            config,
        }
    }

    /// Registers a payment intent for reconciliation. Safe to call any
    /// number of times; existing bookkeeping is left untouched.
    pub async fn track(&self, application_id: i64, intent_id: &str) -> Result<()> {
        self.store.ensure_tracked(application_id, intent_id).await
    }

    pub async fn run_scan(&self) -> Result<ScanReport> {
        let now = self.clock.now();
        let threshold = chrono::Duration::from_std(self.config.recovery_threshold)
            .map_err(|e| PipelineError::Validation(e.to_string()))?;
        let due = self
            .store
            .claim_due(now - threshold, self.config.recovery_batch_size)
            .await?;

        let mut report = ScanReport {
            examined: due.len(),
            ..Default::default()
        };
        for attempt in due {
            match self.reconcile(&attempt, &mut report).await {
                Ok(()) => {}
                Err(e) => {
                    report.errors += 1;
                    warn!(
                        application_id = attempt.application_id,
                        intent_id = %attempt.payment_intent_id,
                        error = %e,
                        "recovery of one payment failed, continuing scan"
                    );
                }
            }
        }

        let retention = chrono::Duration::from_std(self.config.recovery_retention)
            .map_err(|e| PipelineError::Validation(e.to_string()))?;
        report.purged = self.store.purge_terminal_before(now - retention).await?;
        info!(?report, "recovery scan complete");
        Ok(report)
    }

    async fn reconcile(&self, attempt: &RecoveryAttempt, report: &mut ScanReport) -> Result<()> {
        if attempt.attempt_count >= self.config.recovery_max_attempts {
            // Exhausted before this scan even queried the gateway; no
            // further calls for this intent.
            self.exhaust(attempt, report).await?;
            return Ok(());
        }

        let status = match tokio::time::timeout(
            self.config.gateway_timeout,
            self.gateway.check_status(&attempt.payment_intent_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PipelineError::TransientGateway(
                "gateway status call timed out".to_string(),
            )),
        };

        match status {
            Ok(GatewayPaymentStatus::Confirmed) => {
                let updated = self
                    .store
                    .upsert_attempt(attempt.application_id, &attempt.payment_intent_id, None)
                    .await?;
                self.drive_forward(attempt).await?;
                self.store
                    .mark_recovery(
                        attempt.application_id,
                        &attempt.payment_intent_id,
                        RecoveryStatus::Succeeded,
                        None,
                    )
                    .await?;
                report.recovered += 1;
                info!(
                    application_id = attempt.application_id,
                    attempts = updated.attempt_count,
                    "stuck payment recovered"
                );
            }
            Ok(GatewayPaymentStatus::Failed { reason }) => {
                self.store
                    .upsert_attempt(
                        attempt.application_id,
                        &attempt.payment_intent_id,
                        Some(&reason),
                    )
                    .await?;
                self.fail_payment(attempt, &reason).await?;
                self.store
                    .mark_recovery(
                        attempt.application_id,
                        &attempt.payment_intent_id,
                        RecoveryStatus::Failed,
                        Some(&reason),
                    )
                    .await?;
                report.payment_failed += 1;
            }
            Ok(GatewayPaymentStatus::Pending) => {
                let updated = self
                    .store
                    .upsert_attempt(attempt.application_id, &attempt.payment_intent_id, None)
                    .await?;
                self.settle_nonterminal(&updated, report).await?;
            }
            Err(e) => {
                let updated = self
                    .store
                    .upsert_attempt(
                        attempt.application_id,
                        &attempt.payment_intent_id,
                        Some(&e.to_string()),
                    )
                    .await?;
                debug!(
                    application_id = attempt.application_id,
                    attempts = updated.attempt_count,
                    error = %e,
                    "gateway re-query failed"
                );
                self.settle_nonterminal(&updated, report).await?;
            }
        }
        Ok(())
    }

    /// After a non-definitive attempt: back to `Pending` for the next scan,
    /// or straight to exhaustion when the attempt budget is now spent.
    async fn settle_nonterminal(
        &self,
        attempt: &RecoveryAttempt,
        report: &mut ScanReport,
    ) -> Result<()> {
        if attempt.attempt_count >= self.config.recovery_max_attempts {
            self.exhaust(attempt, report).await
        } else {
            self.store
                .mark_recovery(
                    attempt.application_id,
                    &attempt.payment_intent_id,
                    RecoveryStatus::Pending,
                    attempt.last_error.as_deref(),
                )
                .await?;
            report.still_pending += 1;
            Ok(())
        }
    }

    async fn exhaust(&self, attempt: &RecoveryAttempt, report: &mut ScanReport) -> Result<()> {
        self.store
            .mark_recovery(
                attempt.application_id,
                &attempt.payment_intent_id,
                RecoveryStatus::MaxAttemptsReached,
                attempt.last_error.as_deref(),
            )
            .await?;
        report.exhausted += 1;
        error!(
            application_id = attempt.application_id,
            intent_id = %attempt.payment_intent_id,
            attempts = attempt.attempt_count,
            "recovery attempts exhausted, manual review required"
        );
        if let Err(e) = self
            .notifier
            .notify(attempt.application_id, Notice::RecoveryExhausted)
            .await
        {
            warn!(application_id = attempt.application_id, error = %e, "notification dispatch failed");
        }
        Ok(())
    }

    /// Gateway confirmed the payment: commit the transition the lost webhook
    /// would have committed, then hand the application to the permit queue.
    async fn drive_forward(&self, attempt: &RecoveryAttempt) -> Result<()> {
        let Some(application) = self.store.get_application(attempt.application_id).await? else {
            return Err(PipelineError::NotFound(format!(
                "application {}",
                attempt.application_id
            )));
        };
        if application.status == ApplicationStatus::PaymentReceived
            || application.status.is_terminal()
            || application.status == ApplicationStatus::GeneratingPermit
        {
            debug!(
                application_id = application.id,
                status = ?application.status,
                "application already progressed, nothing to recover"
            );
            return Ok(());
        }

        let event = PaymentEvent {
            application_id: application.id,
            order_id: application.payment_order_id.clone().unwrap_or_default(),
            event_type: "payment_recovered".to_string(),
            event_data: serde_json::json!({ "intent_id": attempt.payment_intent_id }),
            amount: application.amount,
            currency: application.currency,
            created_at: self.clock.now(),
        };
        self.store
            .apply_transition(
                application.id,
                ApplicationStatus::PaymentReceived,
                TransitionUpdate::default(),
                event,
            )
            .await?;
        self.queue.enqueue(application.id).await?;
        Ok(())
    }

    async fn fail_payment(&self, attempt: &RecoveryAttempt, reason: &str) -> Result<()> {
        let Some(application) = self.store.get_application(attempt.application_id).await? else {
            return Err(PipelineError::NotFound(format!(
                "application {}",
                attempt.application_id
            )));
        };
        if application.status.is_terminal() {
            return Ok(());
        }
        let event = PaymentEvent {
            application_id: application.id,
            order_id: application.payment_order_id.clone().unwrap_or_default(),
            event_type: "payment_failed_on_recovery".to_string(),
            event_data: serde_json::json!({ "reason": reason }),
            amount: application.amount,
            currency: application.currency,
            created_at: self.clock.now(),
        };
        self.store
            .apply_transition(
                application.id,
                ApplicationStatus::PaymentFailed,
                TransitionUpdate {
                    failure_reason: Some(reason.to_string()),
                    ..Default::default()
                },
                event,
            )
            .await?;
        if let Err(e) = self
            .notifier
            .notify(
                application.id,
                Notice::PaymentFailed {
                    reason: reason.to_string(),
                },
            )
            .await
        {
            warn!(application_id = application.id, error = %e, "notification dispatch failed");
        }
        Ok(())
    }
}
