use crate::application::queue::PermitQueue;
use crate::domain::application::ApplicationStatus;
use crate::domain::event::{GatewayEvent, GatewayEventType, PaymentEvent, ProcessingStatus};
use crate::domain::ports::{ClockRef, StoreRef, TransitionUpdate};
use crate::error::{PipelineError, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of ingesting one gateway delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// A state transition was committed.
    Applied(ApplicationStatus),
    /// The event id was already processed or is in flight; nothing happened.
    /// Redeliveries of events whose processing failed are not duplicates,
    /// they run through processing again.
    Duplicate,
    /// The event referenced an order we do not know. Acknowledged anyway so
    /// the gateway stops redelivering it.
    UnknownOrder,
}

/// Webhook ingestion: idempotency guard, then the state machine.
///
/// Signature verification happens before events reach this type. The only
/// correctness anchor under concurrent duplicate deliveries is the atomic
/// insert-or-ignore in the webhook ledger; no application-level locks.
pub struct WebhookProcessor {
    store: StoreRef,
    queue: Arc<PermitQueue>,
    clock: ClockRef,
}

impl WebhookProcessor {
    pub fn new(store: StoreRef, queue: Arc<PermitQueue>, clock: ClockRef) -> Self {
        Self { store, queue, clock }
    }

    pub async fn process(&self, event: &GatewayEvent) -> Result<WebhookOutcome> {
        match self
            .store
            .record_if_new(&event.event_id, event.event_type)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                if !self.retryable_redelivery(&event.event_id).await {
                    debug!(event_id = %event.event_id, "duplicate webhook delivery, skipping");
                    return Ok(WebhookOutcome::Duplicate);
                }
                info!(event_id = %event.event_id, "redelivery of a failed event, reprocessing");
            }
            // Fail open: losing a legitimate payment confirmation is worse
            // than the rare duplicate this can let through.
            Err(e) => {
                error!(
                    event_id = %event.event_id,
                    error = %e,
                    "ALERT: idempotency ledger write failed, processing event anyway"
                );
            }
        }

        match self.apply(event).await {
            Ok(status) => {
                self.ack(&event.event_id, ProcessingStatus::Processed, None)
                    .await;
                Ok(WebhookOutcome::Applied(status))
            }
            Err(PipelineError::NotFound(what)) => {
                // Still acknowledged: retrying an unknown order would only
                // cause a redelivery storm.
                warn!(event_id = %event.event_id, %what, "webhook for unknown order");
                self.ack(&event.event_id, ProcessingStatus::Processed, None)
                    .await;
                Ok(WebhookOutcome::UnknownOrder)
            }
            Err(e) => {
                self.ack(
                    &event.event_id,
                    ProcessingStatus::Failed,
                    Some(&e.to_string()),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Whether a redelivered event id should run through processing again.
    /// Only events whose processing failed retry; `Processed` and in-flight
    /// `Pending` records short-circuit as duplicates.
    async fn retryable_redelivery(&self, event_id: &str) -> bool {
        match self.store.get_webhook(event_id).await {
            Ok(Some(record)) => record.processing_status == ProcessingStatus::Failed,
            Ok(None) => false,
            Err(e) => {
                error!(
                    event_id,
                    error = %e,
                    "ALERT: idempotency ledger read failed, treating redelivery as duplicate"
                );
                false
            }
        }
    }

    async fn apply(&self, event: &GatewayEvent) -> Result<ApplicationStatus> {
        let application = self
            .store
            .find_by_order(&event.order_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("order {}", event.order_id)))?;

        let (new_status, update) = match event.event_type {
            GatewayEventType::PaymentSucceeded => (
                ApplicationStatus::PaymentReceived,
                TransitionUpdate {
                    payment_reference: event.voucher_reference.clone(),
                    amount: event.amount,
                    ..Default::default()
                },
            ),
            GatewayEventType::PaymentFailed => (
                ApplicationStatus::PaymentFailed,
                TransitionUpdate {
                    failure_reason: Some(
                        event
                            .failure_reason
                            .clone()
                            .unwrap_or_else(|| "payment declined by gateway".to_string()),
                    ),
                    ..Default::default()
                },
            ),
            GatewayEventType::VoucherCreated => (
                ApplicationStatus::AwaitingVoucherPayment,
                TransitionUpdate {
                    payment_reference: event.voucher_reference.clone(),
                    voucher_expires_at: event.voucher_expires_at,
                    amount: event.amount,
                    ..Default::default()
                },
            ),
        };

        let ledger_event = PaymentEvent {
            application_id: application.id,
            order_id: event.order_id.clone(),
            event_type: event.event_type.as_str().to_string(),
            event_data: event.data.clone(),
            amount: event.amount.or(application.amount),
            currency: event.currency,
            created_at: self.clock.now(),
        };

        let application = self
            .store
            .apply_transition(application.id, new_status, update, ledger_event)
            .await?;
        info!(
            application_id = application.id,
            status = ?application.status,
            event_id = %event.event_id,
            "webhook applied"
        );

        if application.status == ApplicationStatus::PaymentReceived {
            // Confirmed payment feeds the permit queue; duplicate enqueues
            // are a no-op there.
            self.queue.enqueue(application.id).await?;
        }
        Ok(application.status)
    }

    async fn ack(&self, event_id: &str, status: ProcessingStatus, error: Option<&str>) {
        if let Err(e) = self.store.mark_processed(event_id, status, error).await {
            error!(event_id, error = %e, "failed to record webhook outcome");
        }
    }
}
