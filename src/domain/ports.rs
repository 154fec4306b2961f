use crate::domain::application::{Amount, Application, ApplicationStatus};
use crate::domain::event::{GatewayEventType, PaymentEvent, ProcessingStatus, WebhookRecord};
use crate::domain::metrics::QueueMetricsSample;
use crate::domain::recovery::{RecoveryAttempt, RecoveryStatus};
use crate::domain::reminder::{ReminderRecord, ReminderType};
use crate::domain::token::PaymentStateToken;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Time source. Production uses [`SystemClock`]; tests drive windows and
/// thresholds with a manual clock instead of sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub type ClockRef = Arc<dyn Clock>;

/// Field changes that ride along with a status transition and commit in the
/// same atomic unit.
#[derive(Debug, Clone, Default)]
pub struct TransitionUpdate {
    pub payment_reference: Option<String>,
    pub amount: Option<Amount>,
    pub voucher_expires_at: Option<DateTime<Utc>>,
    pub permit_expires_at: Option<DateTime<Utc>>,
    pub permit_artifacts: Option<Vec<String>>,
    pub failure_reason: Option<String>,
    pub queue_entered_at: Option<DateTime<Utc>>,
    pub queue_started_at: Option<DateTime<Utc>>,
    pub queue_completed_at: Option<DateTime<Utc>>,
    pub queue_duration_ms: Option<i64>,
}

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn insert_application(&self, application: Application) -> Result<()>;
    async fn get_application(&self, id: i64) -> Result<Option<Application>>;
    async fn find_by_order(&self, order_id: &str) -> Result<Option<Application>>;
    /// Commits the status change, the field updates, and the ledger append
    /// as one atomic unit. If any part fails nothing is written, so the
    /// audit ledger and current status can never diverge.
    ///
    /// Fails with `Validation` when the transition is not permitted by the
    /// state machine.
    async fn apply_transition(
        &self,
        application_id: i64,
        new_status: ApplicationStatus,
        update: TransitionUpdate,
        event: PaymentEvent,
    ) -> Result<Application>;
    /// Field updates with no status change and no ledger append (queue
    /// stamps, reference backfill).
    async fn update_fields(
        &self,
        application_id: i64,
        update: TransitionUpdate,
    ) -> Result<Application>;
    async fn all_applications(&self) -> Result<Vec<Application>>;
    /// In-flight applications whose `updated_at` is older than the cutoff.
    async fn find_stuck(&self, older_than: DateTime<Utc>) -> Result<Vec<Application>>;
}

#[async_trait]
pub trait PaymentEventLedger: Send + Sync {
    async fn events_for(&self, application_id: i64) -> Result<Vec<PaymentEvent>>;
    /// Latest event of the given type per application (last-event windowing,
    /// used by the voucher-expiration scan).
    async fn latest_events_of_type(&self, event_type: &str) -> Result<Vec<PaymentEvent>>;
}

#[async_trait]
pub trait WebhookLedger: Send + Sync {
    /// Atomic insert-or-ignore on the unique event id. Returns true only if
    /// the row was newly created. This is the concurrency-safety property
    /// the whole webhook path rests on; it must never be implemented as
    /// check-then-insert.
    async fn record_if_new(&self, event_id: &str, event_type: GatewayEventType) -> Result<bool>;
    /// Records the processing outcome; increments `retry_count` on failure.
    async fn mark_processed(
        &self,
        event_id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()>;
    async fn get_webhook(&self, event_id: &str) -> Result<Option<WebhookRecord>>;
}

#[async_trait]
pub trait RecoveryStore: Send + Sync {
    /// Registers a stuck payment for reconciliation. Insert-if-absent with
    /// `attempt_count` 0; existing rows are left untouched.
    async fn ensure_tracked(&self, application_id: i64, intent_id: &str) -> Result<()>;
    /// Atomically increments `attempt_count` and stamps the attempt time
    /// and error. Native upsert, not read-modify-write.
    async fn upsert_attempt(
        &self,
        application_id: i64,
        intent_id: &str,
        error: Option<&str>,
    ) -> Result<RecoveryAttempt>;
    /// Claims due rows: status in {Pending, Recovering}, last attempt older
    /// than the cutoff, oldest first, bounded. Claimed rows are marked
    /// `Recovering` with a fresh attempt time in the same atomic step, so
    /// concurrent scanners skip them.
    async fn claim_due(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RecoveryAttempt>>;
    async fn mark_recovery(
        &self,
        application_id: i64,
        intent_id: &str,
        status: RecoveryStatus,
        error: Option<&str>,
    ) -> Result<()>;
    async fn get_attempt(
        &self,
        application_id: i64,
        intent_id: &str,
    ) -> Result<Option<RecoveryAttempt>>;
    /// Deletes terminal rows last touched before the cutoff; returns the
    /// number purged.
    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn append_sample(&self, sample: QueueMetricsSample) -> Result<()>;
    /// Samples taken at or after the cutoff, oldest first.
    async fn samples_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<QueueMetricsSample>>;
}

#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Atomic insert-or-ignore on (application_id, reminder_type). True only
    /// when the record was newly created; callers notify only on true.
    async fn record_reminder_if_new(
        &self,
        application_id: i64,
        reminder_type: ReminderType,
        now: DateTime<Utc>,
    ) -> Result<bool>;
    async fn all_reminders(&self) -> Result<Vec<ReminderRecord>>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn put_token(&self, token: PaymentStateToken) -> Result<()>;
    /// Validates and invalidates in one atomic step; a second consume of
    /// the same token fails.
    async fn consume_token(&self, token: &Uuid, now: DateTime<Utc>) -> Result<PaymentStateToken>;
}

/// The full persistence surface of the pipeline. Store implementations
/// (in-memory, RocksDB) implement every table trait; services depend only
/// on the slices they use.
pub trait PipelineStore:
    ApplicationStore
    + PaymentEventLedger
    + WebhookLedger
    + RecoveryStore
    + MetricsStore
    + ReminderStore
    + TokenStore
{
}

impl<T> PipelineStore for T where
    T: ApplicationStore
        + PaymentEventLedger
        + WebhookLedger
        + RecoveryStore
        + MetricsStore
        + ReminderStore
        + TokenStore
{
}

pub type StoreRef = Arc<dyn PipelineStore>;

/// What the gateway reports for a payment intent during reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayPaymentStatus {
    Confirmed,
    Pending,
    Failed { reason: String },
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn check_status(&self, intent_id: &str) -> Result<GatewayPaymentStatus>;
}

pub type GatewayRef = Arc<dyn PaymentGateway>;

/// Successful output of the issuance backend.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedPermit {
    pub artifacts: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait IssuanceBackend: Send + Sync {
    async fn issue_permit(&self, application: &Application) -> Result<IssuedPermit>;
}

pub type IssuanceRef = Arc<dyn IssuanceBackend>;

/// Notification intents. The pipeline decides when to notify; rendering and
/// delivery live behind this port.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    PermitReady,
    PermitGenerationFailed { reason: String },
    PaymentFailed { reason: String },
    VoucherExpiring { expires_at: DateTime<Utc> },
    PermitExpiring { days_before: u16 },
    RecoveryExhausted,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, application_id: i64, notice: Notice) -> Result<()>;
}

pub type NotifierRef = Arc<dyn Notifier>;
