use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    Pending,
    Recovering,
    Succeeded,
    Failed,
    MaxAttemptsReached,
}

impl RecoveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::MaxAttemptsReached
        )
    }
}

/// Reconciliation bookkeeping for a payment stuck mid-flight.
///
/// Unique per (application_id, payment_intent_id); `attempt_count` is only
/// ever moved by the store's atomic upsert, never by read-modify-write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub application_id: i64,
    pub payment_intent_id: String,
    pub attempt_count: u32,
    pub last_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub status: RecoveryStatus,
}

impl RecoveryAttempt {
    pub fn new(application_id: i64, intent_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            application_id,
            payment_intent_id: intent_id.to_string(),
            attempt_count: 1,
            last_attempt_at: now,
            last_error: None,
            status: RecoveryStatus::Pending,
        }
    }
}
