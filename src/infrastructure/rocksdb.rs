use crate::domain::application::{Application, ApplicationStatus};
use crate::domain::event::{GatewayEventType, PaymentEvent, ProcessingStatus, WebhookRecord};
use crate::domain::metrics::QueueMetricsSample;
use crate::domain::ports::{
    ApplicationStore, ClockRef, MetricsStore, PaymentEventLedger, RecoveryStore, ReminderStore,
    TokenStore, TransitionUpdate, WebhookLedger,
};
use crate::domain::recovery::{RecoveryAttempt, RecoveryStatus};
use crate::domain::reminder::{ReminderRecord, ReminderType};
use crate::domain::token::PaymentStateToken;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

pub const CF_APPLICATIONS: &str = "applications";
pub const CF_PAYMENT_EVENTS: &str = "payment_events";
pub const CF_WEBHOOK_EVENTS: &str = "webhook_events";
pub const CF_RECOVERY_ATTEMPTS: &str = "recovery_attempts";
pub const CF_QUEUE_METRICS: &str = "queue_metrics";
pub const CF_REMINDERS: &str = "reminders";
pub const CF_TOKENS: &str = "tokens";

const ALL_CFS: [&str; 7] = [
    CF_APPLICATIONS,
    CF_PAYMENT_EVENTS,
    CF_WEBHOOK_EVENTS,
    CF_RECOVERY_ATTEMPTS,
    CF_QUEUE_METRICS,
    CF_REMINDERS,
    CF_TOKENS,
];

/// Durable store implementation using RocksDB, one column family per table.
///
/// The status+ledger pair goes through a single `WriteBatch`, which is what
/// makes it atomic. Conditional writes (insert-or-ignore, counter upserts,
/// token consumption) serialize through `write_gate`; this store assumes a
/// single process owns the database, as the rest of the pipeline does.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    clock: ClockRef,
    event_seq: Arc<AtomicU64>,
    metrics_seq: Arc<AtomicU64>,
    write_gate: Arc<Mutex<()>>,
}

impl RocksDbStore {
    pub fn open<P: AsRef<Path>>(path: P, clock: ClockRef) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        let event_seq = last_seq(&db, CF_PAYMENT_EVENTS)?;
        let metrics_seq = last_seq(&db, CF_QUEUE_METRICS)?;
        Ok(Self {
            db: Arc::new(db),
            clock,
            event_seq: Arc::new(AtomicU64::new(event_seq)),
            metrics_seq: Arc::new(AtomicU64::new(metrics_seq)),
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PipelineError::Storage(format!("column family {name} not found")))
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        self.db
            .put_cf(self.cf(cf)?, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn scan_all<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item.map_err(|e| PipelineError::Storage(e.to_string()))?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }
}

fn last_seq(db: &DB, cf: &str) -> Result<u64> {
    let handle = db
        .cf_handle(cf)
        .ok_or_else(|| PipelineError::Storage(format!("column family {cf} not found")))?;
    let mut iter = db.iterator_cf(handle, IteratorMode::End);
    match iter.next() {
        Some(item) => {
            let (key, _) = item.map_err(|e| PipelineError::Storage(e.to_string()))?;
            let bytes: [u8; 8] = key
                .as_ref()
                .try_into()
                .map_err(|_| PipelineError::Storage(format!("malformed key in {cf}")))?;
            Ok(u64::from_be_bytes(bytes) + 1)
        }
        None => Ok(0),
    }
}

fn recovery_key(application_id: i64, intent_id: &str) -> Vec<u8> {
    format!("{application_id}:{intent_id}").into_bytes()
}

fn reminder_key(application_id: i64, reminder_type: ReminderType) -> Vec<u8> {
    format!("{application_id}:{}", reminder_type.key()).into_bytes()
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
impl ApplicationStore for RocksDbStore {
    async fn insert_application(&self, application: Application) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let key = application.id.to_be_bytes();
        if self.db.get_cf(self.cf(CF_APPLICATIONS)?, key)?.is_some() {
            return Err(PipelineError::Validation(format!(
                "application {} already exists",
                application.id
            )));
        }
        self.put_json(CF_APPLICATIONS, &key, &application)
    }

    async fn get_application(&self, id: i64) -> Result<Option<Application>> {
        self.get_json(CF_APPLICATIONS, &id.to_be_bytes())
    }

    async fn find_by_order(&self, order_id: &str) -> Result<Option<Application>> {
        Ok(self
            .scan_all::<Application>(CF_APPLICATIONS)?
            .into_iter()
            .find(|a| a.payment_order_id.as_deref() == Some(order_id)))
    }

    async fn apply_transition(
        &self,
        application_id: i64,
        new_status: ApplicationStatus,
        update: TransitionUpdate,
        event: PaymentEvent,
    ) -> Result<Application> {
        let _gate = self.write_gate.lock().await;
        let mut application: Application = self
            .get_json(CF_APPLICATIONS, &application_id.to_be_bytes())?
            .ok_or_else(|| PipelineError::NotFound(format!("application {application_id}")))?;
        if !application.status.can_transition(new_status) {
            return Err(PipelineError::Validation(format!(
                "illegal transition {:?} -> {:?} for application {}",
                application.status, new_status, application_id
            )));
        }
        application.status = new_status;
        application.updated_at = self.clock.now();
        apply_update(&mut application, update);

        // One batch commits both rows or neither.
        let seq = self.event_seq.fetch_add(1, Ordering::SeqCst);
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_APPLICATIONS)?,
            application_id.to_be_bytes(),
            serde_json::to_vec(&application)?,
        );
        batch.put_cf(
            self.cf(CF_PAYMENT_EVENTS)?,
            seq.to_be_bytes(),
            serde_json::to_vec(&event)?,
        );
        self.db.write(batch)?;
        Ok(application)
    }

    async fn update_fields(
        &self,
        application_id: i64,
        update: TransitionUpdate,
    ) -> Result<Application> {
        let _gate = self.write_gate.lock().await;
        let mut application: Application = self
            .get_json(CF_APPLICATIONS, &application_id.to_be_bytes())?
            .ok_or_else(|| PipelineError::NotFound(format!("application {application_id}")))?;
        apply_update(&mut application, update);
        application.updated_at = self.clock.now();
        self.put_json(CF_APPLICATIONS, &application_id.to_be_bytes(), &application)?;
        Ok(application)
    }

    async fn all_applications(&self) -> Result<Vec<Application>> {
        let mut all = self.scan_all::<Application>(CF_APPLICATIONS)?;
        all.sort_by_key(|a| a.id);
        Ok(all)
    }

    async fn find_stuck(&self, older_than: DateTime<Utc>) -> Result<Vec<Application>> {
        Ok(self
            .scan_all::<Application>(CF_APPLICATIONS)?
            .into_iter()
            .filter(|a| a.status.is_in_flight() && a.updated_at < older_than)
            .collect())
    }
}

#[async_trait]
impl PaymentEventLedger for RocksDbStore {
    async fn events_for(&self, application_id: i64) -> Result<Vec<PaymentEvent>> {
        Ok(self
            .scan_all::<PaymentEvent>(CF_PAYMENT_EVENTS)?
            .into_iter()
            .filter(|e| e.application_id == application_id)
            .collect())
    }

    async fn latest_events_of_type(&self, event_type: &str) -> Result<Vec<PaymentEvent>> {
        let mut latest = std::collections::HashMap::new();
        // Keys are a monotonic sequence, so scan order is append order.
        for event in self.scan_all::<PaymentEvent>(CF_PAYMENT_EVENTS)? {
            if event.event_type == event_type {
                latest.insert(event.application_id, event);
            }
        }
        let mut events: Vec<_> = latest.into_values().collect();
        events.sort_by_key(|e| e.application_id);
        Ok(events)
    }
}

#[async_trait]
impl WebhookLedger for RocksDbStore {
    async fn record_if_new(&self, event_id: &str, event_type: GatewayEventType) -> Result<bool> {
        let _gate = self.write_gate.lock().await;
        if self
            .db
            .get_pinned_cf(self.cf(CF_WEBHOOK_EVENTS)?, event_id.as_bytes())?
            .is_some()
        {
            return Ok(false);
        }
        let record = WebhookRecord::new(event_id, event_type, self.clock.now());
        self.put_json(CF_WEBHOOK_EVENTS, event_id.as_bytes(), &record)?;
        Ok(true)
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let mut record: WebhookRecord = self
            .get_json(CF_WEBHOOK_EVENTS, event_id.as_bytes())?
            .ok_or_else(|| PipelineError::NotFound(format!("webhook event {event_id}")))?;
        record.processing_status = status;
        record.processed_at = Some(self.clock.now());
        if status == ProcessingStatus::Failed {
            record.retry_count += 1;
            record.last_error = error.map(str::to_string);
        }
        self.put_json(CF_WEBHOOK_EVENTS, event_id.as_bytes(), &record)
    }

    async fn get_webhook(&self, event_id: &str) -> Result<Option<WebhookRecord>> {
        self.get_json(CF_WEBHOOK_EVENTS, event_id.as_bytes())
    }
}

#[async_trait]
impl RecoveryStore for RocksDbStore {
    async fn ensure_tracked(&self, application_id: i64, intent_id: &str) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let key = recovery_key(application_id, intent_id);
        if self
            .db
            .get_pinned_cf(self.cf(CF_RECOVERY_ATTEMPTS)?, &key)?
            .is_some()
        {
            return Ok(());
        }
        let attempt = RecoveryAttempt {
            application_id,
            payment_intent_id: intent_id.to_string(),
            attempt_count: 0,
            last_attempt_at: self.clock.now(),
            last_error: None,
            status: RecoveryStatus::Pending,
        };
        self.put_json(CF_RECOVERY_ATTEMPTS, &key, &attempt)
    }

    async fn upsert_attempt(
        &self,
        application_id: i64,
        intent_id: &str,
        error: Option<&str>,
    ) -> Result<RecoveryAttempt> {
        let _gate = self.write_gate.lock().await;
        let key = recovery_key(application_id, intent_id);
        let now = self.clock.now();
        let attempt = match self.get_json::<RecoveryAttempt>(CF_RECOVERY_ATTEMPTS, &key)? {
            Some(mut existing) => {
                existing.attempt_count += 1;
                existing.last_attempt_at = now;
                existing.last_error = error.map(str::to_string);
                existing
            }
            None => {
                let mut fresh = RecoveryAttempt::new(application_id, intent_id, now);
                fresh.last_error = error.map(str::to_string);
                fresh
            }
        };
        self.put_json(CF_RECOVERY_ATTEMPTS, &key, &attempt)?;
        Ok(attempt)
    }

    async fn claim_due(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RecoveryAttempt>> {
        let _gate = self.write_gate.lock().await;
        let now = self.clock.now();
        let mut due: Vec<RecoveryAttempt> = self
            .scan_all::<RecoveryAttempt>(CF_RECOVERY_ATTEMPTS)?
            .into_iter()
            .filter(|a| {
                matches!(a.status, RecoveryStatus::Pending | RecoveryStatus::Recovering)
                    && a.last_attempt_at < older_than
            })
            .collect();
        due.sort_by_key(|a| a.last_attempt_at);
        due.truncate(limit);

        for attempt in due.iter_mut() {
            attempt.status = RecoveryStatus::Recovering;
            attempt.last_attempt_at = now;
            let key = recovery_key(attempt.application_id, &attempt.payment_intent_id);
            self.put_json(CF_RECOVERY_ATTEMPTS, &key, attempt)?;
        }
        Ok(due)
    }

    async fn mark_recovery(
        &self,
        application_id: i64,
        intent_id: &str,
        status: RecoveryStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let key = recovery_key(application_id, intent_id);
        let mut attempt: RecoveryAttempt = self
            .get_json(CF_RECOVERY_ATTEMPTS, &key)?
            .ok_or_else(|| {
                PipelineError::NotFound(format!(
                    "recovery attempt ({application_id}, {intent_id})"
                ))
            })?;
        attempt.status = status;
        if error.is_some() {
            attempt.last_error = error.map(str::to_string);
        }
        self.put_json(CF_RECOVERY_ATTEMPTS, &key, &attempt)
    }

    async fn get_attempt(
        &self,
        application_id: i64,
        intent_id: &str,
    ) -> Result<Option<RecoveryAttempt>> {
        self.get_json(CF_RECOVERY_ATTEMPTS, &recovery_key(application_id, intent_id))
    }

    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let _gate = self.write_gate.lock().await;
        let mut purged = 0;
        for attempt in self.scan_all::<RecoveryAttempt>(CF_RECOVERY_ATTEMPTS)? {
            if attempt.status.is_terminal() && attempt.last_attempt_at < cutoff {
                let key = recovery_key(attempt.application_id, &attempt.payment_intent_id);
                self.db.delete_cf(self.cf(CF_RECOVERY_ATTEMPTS)?, key)?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[async_trait]
impl MetricsStore for RocksDbStore {
    async fn append_sample(&self, sample: QueueMetricsSample) -> Result<()> {
        let seq = self.metrics_seq.fetch_add(1, Ordering::SeqCst);
        self.put_json(CF_QUEUE_METRICS, &seq.to_be_bytes(), &sample)
    }

    async fn samples_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<QueueMetricsSample>> {
        Ok(self
            .scan_all::<QueueMetricsSample>(CF_QUEUE_METRICS)?
            .into_iter()
            .filter(|s| s.created_at >= cutoff)
            .collect())
    }
}

#[async_trait]
impl ReminderStore for RocksDbStore {
    async fn record_reminder_if_new(
        &self,
        application_id: i64,
        reminder_type: ReminderType,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let _gate = self.write_gate.lock().await;
        let key = reminder_key(application_id, reminder_type);
        if self
            .db
            .get_pinned_cf(self.cf(CF_REMINDERS)?, &key)?
            .is_some()
        {
            return Ok(false);
        }
        let record = ReminderRecord {
            application_id,
            reminder_type,
            created_at: now,
        };
        self.put_json(CF_REMINDERS, &key, &record)?;
        Ok(true)
    }

    async fn all_reminders(&self) -> Result<Vec<ReminderRecord>> {
        self.scan_all(CF_REMINDERS)
    }
}

#[async_trait]
impl TokenStore for RocksDbStore {
    async fn put_token(&self, token: PaymentStateToken) -> Result<()> {
        self.put_json(CF_TOKENS, token.token.as_bytes(), &token)
    }

    async fn consume_token(&self, token: &Uuid, now: DateTime<Utc>) -> Result<PaymentStateToken> {
        let _gate = self.write_gate.lock().await;
        let mut stored: PaymentStateToken = self
            .get_json(CF_TOKENS, token.as_bytes())?
            .ok_or_else(|| PipelineError::NotFound(format!("payment state token {token}")))?;
        if stored.used {
            return Err(PipelineError::Validation(
                "payment state token already used".to_string(),
            ));
        }
        if now >= stored.expires_at {
            return Err(PipelineError::Validation(
                "payment state token expired".to_string(),
            ));
        }
        stored.used = true;
        self.put_json(CF_TOKENS, token.as_bytes(), &stored)?;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::SystemClock;
    use tempfile::tempdir;

    fn open(dir: &Path) -> RocksDbStore {
        RocksDbStore::open(dir, Arc::new(SystemClock)).expect("failed to open RocksDB")
    }

    fn pending_application(id: i64, order_id: &str) -> Application {
        let mut app = Application::new(id, Utc::now());
        app.status = ApplicationStatus::PendingPayment;
        app.payment_order_id = Some(order_id.to_string());
        app
    }

    fn ledger_event(application_id: i64, event_type: &str) -> PaymentEvent {
        PaymentEvent {
            application_id,
            order_id: "ord_1".to_string(),
            event_type: event_type.to_string(),
            event_data: serde_json::Value::Null,
            amount: None,
            currency: Default::default(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_open_creates_column_families() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        for cf in ALL_CFS {
            assert!(store.db.cf_handle(cf).is_some());
        }
    }

    #[tokio::test]
    async fn test_transition_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path());
            store
                .insert_application(pending_application(1, "ord_1"))
                .await
                .unwrap();
            store
                .apply_transition(
                    1,
                    ApplicationStatus::PaymentReceived,
                    TransitionUpdate::default(),
                    ledger_event(1, "payment_succeeded"),
                )
                .await
                .unwrap();
        }

        let store = open(dir.path());
        let app = store.get_application(1).await.unwrap().unwrap();
        assert_eq!(app.status, ApplicationStatus::PaymentReceived);
        let events = store.events_for(1).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "payment_succeeded");
    }

    #[tokio::test]
    async fn test_event_seq_resumes_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path());
            store
                .insert_application(pending_application(1, "ord_1"))
                .await
                .unwrap();
            store
                .apply_transition(
                    1,
                    ApplicationStatus::PaymentReceived,
                    TransitionUpdate::default(),
                    ledger_event(1, "payment_succeeded"),
                )
                .await
                .unwrap();
        }
        let store = open(dir.path());
        store
            .apply_transition(
                1,
                ApplicationStatus::GeneratingPermit,
                TransitionUpdate::default(),
                ledger_event(1, "permit_generation_started"),
            )
            .await
            .unwrap();
        // Second event must not overwrite the first.
        assert_eq!(store.events_for(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_record_if_new_is_durable() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path());
            assert!(
                store
                    .record_if_new("evt_1", GatewayEventType::PaymentSucceeded)
                    .await
                    .unwrap()
            );
        }
        let store = open(dir.path());
        assert!(
            !store
                .record_if_new("evt_1", GatewayEventType::PaymentSucceeded)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_upsert_attempt_round_trip() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        store.upsert_attempt(42, "pi_1", None).await.unwrap();
        let attempt = store.upsert_attempt(42, "pi_1", Some("timeout")).await.unwrap();
        assert_eq!(attempt.attempt_count, 2);
        assert_eq!(attempt.last_error.as_deref(), Some("timeout"));
    }
}
