use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Short-lived, single-use token binding a payment flow to one application.
///
/// Issued when the client is redirected into the payment flow and consumed
/// exactly once when the flow returns; anything else is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentStateToken {
    pub token: Uuid,
    pub application_id: i64,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl PaymentStateToken {
    pub fn issue(application_id: i64, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: Uuid::new_v4(),
            application_id,
            expires_at,
            used: false,
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.used && now < self.expires_at
    }
}
