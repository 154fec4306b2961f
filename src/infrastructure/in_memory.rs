use crate::domain::application::{Application, ApplicationStatus};
use crate::domain::event::{GatewayEventType, PaymentEvent, ProcessingStatus, WebhookRecord};
use crate::domain::metrics::QueueMetricsSample;
use crate::domain::ports::{
    ApplicationStore, ClockRef, MetricsStore, PaymentEventLedger, RecoveryStore, ReminderStore,
    SystemClock, TokenStore, TransitionUpdate, WebhookLedger,
};
use crate::domain::recovery::{RecoveryAttempt, RecoveryStatus};
use crate::domain::reminder::{ReminderRecord, ReminderType};
use crate::domain::token::PaymentStateToken;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Applications and their append-only event ledger live under one lock so
/// that a status update and its ledger append are a single atomic unit.
#[derive(Default)]
struct CoreState {
    applications: HashMap<i64, Application>,
    events: Vec<PaymentEvent>,
}

/// Thread-safe in-memory implementation of every pipeline table.
///
/// The atomicity the pipeline depends on (insert-or-ignore, counter upsert,
/// status+ledger pair) is provided by lock sections rather than application
/// code, mirroring what uniqueness constraints and transactions give the
/// durable backend.
pub struct InMemoryStore {
    clock: ClockRef,
    core: RwLock<CoreState>,
    webhooks: Mutex<HashMap<String, WebhookRecord>>,
    recovery: Mutex<HashMap<(i64, String), RecoveryAttempt>>,
    metrics: RwLock<Vec<QueueMetricsSample>>,
    reminders: Mutex<HashMap<(i64, String), ReminderRecord>>,
    tokens: Mutex<HashMap<Uuid, PaymentStateToken>>,
}

impl InMemoryStore {
    pub fn new(clock: ClockRef) -> Self {
        Self {
            clock,
            core: RwLock::new(CoreState::default()),
            webhooks: Mutex::new(HashMap::new()),
            recovery: Mutex::new(HashMap::new()),
            metrics: RwLock::new(Vec::new()),
            reminders: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

fn apply_update(application: &mut Application, update: TransitionUpdate) {
    if update.payment_reference.is_some() {
        application.payment_reference = update.payment_reference;
    }
    if update.amount.is_some() {
        application.amount = update.amount;
    }
    if update.voucher_expires_at.is_some() {
        application.voucher_expires_at = update.voucher_expires_at;
    }
    if update.permit_expires_at.is_some() {
        application.permit_expires_at = update.permit_expires_at;
    }
    if let Some(artifacts) = update.permit_artifacts {
        application.permit_artifacts = artifacts;
    }
    if update.failure_reason.is_some() {
        application.failure_reason = update.failure_reason;
    }
    if update.queue_entered_at.is_some() {
        application.queue_entered_at = update.queue_entered_at;
    }
    if update.queue_started_at.is_some() {
        application.queue_started_at = update.queue_started_at;
    }
    if update.queue_completed_at.is_some() {
        application.queue_completed_at = update.queue_completed_at;
    }
    if update.queue_duration_ms.is_some() {
        application.queue_duration_ms = update.queue_duration_ms;
    }
}

#[async_trait]
impl ApplicationStore for InMemoryStore {
    async fn insert_application(&self, application: Application) -> Result<()> {
        let mut core = self.core.write().await;
        if core.applications.contains_key(&application.id) {
            return Err(PipelineError::Validation(format!(
                "application {} already exists",
                application.id
            )));
        }
        core.applications.insert(application.id, application);
        Ok(())
    }

    async fn get_application(&self, id: i64) -> Result<Option<Application>> {
        Ok(self.core.read().await.applications.get(&id).cloned())
    }

    async fn find_by_order(&self, order_id: &str) -> Result<Option<Application>> {
        Ok(self
            .core
            .read()
            .await
            .applications
            .values()
            .find(|a| a.payment_order_id.as_deref() == Some(order_id))
            .cloned())
    }

    async fn apply_transition(
        &self,
        application_id: i64,
        new_status: ApplicationStatus,
        update: TransitionUpdate,
        event: PaymentEvent,
    ) -> Result<Application> {
        let mut core = self.core.write().await;
        // Validate everything before touching either table; an error here
        // leaves status and ledger both untouched.
        let current = core
            .applications
            .get(&application_id)
            .ok_or_else(|| PipelineError::NotFound(format!("application {application_id}")))?;
        if !current.status.can_transition(new_status) {
            return Err(PipelineError::Validation(format!(
                "illegal transition {:?} -> {:?} for application {}",
                current.status, new_status, application_id
            )));
        }
        let mut updated = current.clone();
        updated.status = new_status;
        updated.updated_at = self.clock.now();
        apply_update(&mut updated, update);

        core.events.push(event);
        core.applications.insert(application_id, updated.clone());
        Ok(updated)
    }

    async fn update_fields(
        &self,
        application_id: i64,
        update: TransitionUpdate,
    ) -> Result<Application> {
        let mut core = self.core.write().await;
        let application = core
            .applications
            .get_mut(&application_id)
            .ok_or_else(|| PipelineError::NotFound(format!("application {application_id}")))?;
        apply_update(application, update);
        application.updated_at = self.clock.now();
        Ok(application.clone())
    }

    async fn all_applications(&self) -> Result<Vec<Application>> {
        let core = self.core.read().await;
        let mut all: Vec<_> = core.applications.values().cloned().collect();
        all.sort_by_key(|a| a.id);
        Ok(all)
    }

    async fn find_stuck(&self, older_than: DateTime<Utc>) -> Result<Vec<Application>> {
        let core = self.core.read().await;
        Ok(core
            .applications
            .values()
            .filter(|a| a.status.is_in_flight() && a.updated_at < older_than)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PaymentEventLedger for InMemoryStore {
    async fn events_for(&self, application_id: i64) -> Result<Vec<PaymentEvent>> {
        let core = self.core.read().await;
        Ok(core
            .events
            .iter()
            .filter(|e| e.application_id == application_id)
            .cloned()
            .collect())
    }

    async fn latest_events_of_type(&self, event_type: &str) -> Result<Vec<PaymentEvent>> {
        let core = self.core.read().await;
        let mut latest: HashMap<i64, PaymentEvent> = HashMap::new();
        // The ledger is append-only, so iteration order is event order and
        // later inserts win.
        for event in core.events.iter().filter(|e| e.event_type == event_type) {
            latest.insert(event.application_id, event.clone());
        }
        let mut events: Vec<_> = latest.into_values().collect();
        events.sort_by_key(|e| e.application_id);
        Ok(events)
    }
}

#[async_trait]
impl WebhookLedger for InMemoryStore {
    async fn record_if_new(&self, event_id: &str, event_type: GatewayEventType) -> Result<bool> {
        let mut webhooks = self.webhooks.lock().await;
        match webhooks.entry(event_id.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(WebhookRecord::new(event_id, event_type, self.clock.now()));
                Ok(true)
            }
        }
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut webhooks = self.webhooks.lock().await;
        let record = webhooks
            .get_mut(event_id)
            .ok_or_else(|| PipelineError::NotFound(format!("webhook event {event_id}")))?;
        record.processing_status = status;
        record.processed_at = Some(self.clock.now());
        if status == ProcessingStatus::Failed {
            record.retry_count += 1;
            record.last_error = error.map(str::to_string);
        }
        Ok(())
    }

    async fn get_webhook(&self, event_id: &str) -> Result<Option<WebhookRecord>> {
        Ok(self.webhooks.lock().await.get(event_id).cloned())
    }
}

#[async_trait]
impl RecoveryStore for InMemoryStore {
    async fn ensure_tracked(&self, application_id: i64, intent_id: &str) -> Result<()> {
        let mut recovery = self.recovery.lock().await;
        recovery
            .entry((application_id, intent_id.to_string()))
            .or_insert_with(|| RecoveryAttempt {
                application_id,
                payment_intent_id: intent_id.to_string(),
                attempt_count: 0,
                last_attempt_at: self.clock.now(),
                last_error: None,
                status: RecoveryStatus::Pending,
            });
        Ok(())
    }

    async fn upsert_attempt(
        &self,
        application_id: i64,
        intent_id: &str,
        error: Option<&str>,
    ) -> Result<RecoveryAttempt> {
        let now = self.clock.now();
        let mut recovery = self.recovery.lock().await;
        let attempt = recovery
            .entry((application_id, intent_id.to_string()))
            .and_modify(|a| {
                a.attempt_count += 1;
                a.last_attempt_at = now;
                a.last_error = error.map(str::to_string);
            })
            .or_insert_with(|| {
                let mut a = RecoveryAttempt::new(application_id, intent_id, now);
                a.last_error = error.map(str::to_string);
                a
            });
        Ok(attempt.clone())
    }

    async fn claim_due(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RecoveryAttempt>> {
        let now = self.clock.now();
        let mut recovery = self.recovery.lock().await;
        let mut due: Vec<(DateTime<Utc>, i64, String)> = recovery
            .values()
            .filter(|a| {
                matches!(a.status, RecoveryStatus::Pending | RecoveryStatus::Recovering)
                    && a.last_attempt_at < older_than
            })
            .map(|a| (a.last_attempt_at, a.application_id, a.payment_intent_id.clone()))
            .collect();
        // Oldest first, bounded batch.
        due.sort_by_key(|(last_attempt_at, _, _)| *last_attempt_at);
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, id, intent) in due {
            if let Some(attempt) = recovery.get_mut(&(id, intent)) {
                // Claim inside the same lock section: concurrent scanners
                // see the fresh attempt time and skip the row.
                attempt.status = RecoveryStatus::Recovering;
                attempt.last_attempt_at = now;
                claimed.push(attempt.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_recovery(
        &self,
        application_id: i64,
        intent_id: &str,
        status: RecoveryStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut recovery = self.recovery.lock().await;
        let attempt = recovery
            .get_mut(&(application_id, intent_id.to_string()))
            .ok_or_else(|| {
                PipelineError::NotFound(format!(
                    "recovery attempt ({application_id}, {intent_id})"
                ))
            })?;
        attempt.status = status;
        if error.is_some() {
            attempt.last_error = error.map(str::to_string);
        }
        Ok(())
    }

    async fn get_attempt(
        &self,
        application_id: i64,
        intent_id: &str,
    ) -> Result<Option<RecoveryAttempt>> {
        Ok(self
            .recovery
            .lock()
            .await
            .get(&(application_id, intent_id.to_string()))
            .cloned())
    }

    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut recovery = self.recovery.lock().await;
        let before = recovery.len();
        recovery.retain(|_, a| !(a.status.is_terminal() && a.last_attempt_at < cutoff));
        Ok(before - recovery.len())
    }
}

#[async_trait]
impl MetricsStore for InMemoryStore {
    async fn append_sample(&self, sample: QueueMetricsSample) -> Result<()> {
        self.metrics.write().await.push(sample);
        Ok(())
    }

    async fn samples_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<QueueMetricsSample>> {
        Ok(self
            .metrics
            .read()
            .await
            .iter()
            .filter(|s| s.created_at >= cutoff)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReminderStore for InMemoryStore {
    async fn record_reminder_if_new(
        &self,
        application_id: i64,
        reminder_type: ReminderType,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut reminders = self.reminders.lock().await;
        match reminders.entry((application_id, reminder_type.key())) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(ReminderRecord {
                    application_id,
                    reminder_type,
                    created_at: now,
                });
                Ok(true)
            }
        }
    }

    async fn all_reminders(&self) -> Result<Vec<ReminderRecord>> {
        Ok(self.reminders.lock().await.values().cloned().collect())
    }
}

#[async_trait]
impl TokenStore for InMemoryStore {
    async fn put_token(&self, token: PaymentStateToken) -> Result<()> {
        self.tokens.lock().await.insert(token.token, token);
        Ok(())
    }

    async fn consume_token(&self, token: &Uuid, now: DateTime<Utc>) -> Result<PaymentStateToken> {
        let mut tokens = self.tokens.lock().await;
        let entry = tokens
            .get_mut(token)
            .ok_or_else(|| PipelineError::NotFound(format!("payment state token {token}")))?;
        if entry.used {
            return Err(PipelineError::Validation(
                "payment state token already used".to_string(),
            ));
        }
        if now >= entry.expires_at {
            return Err(PipelineError::Validation(
                "payment state token expired".to_string(),
            ));
        }
        entry.used = true;
        Ok(entry.clone())
    }
}
