use crate::domain::application::{Amount, Currency};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event kinds delivered by the payment gateway webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayEventType {
    PaymentSucceeded,
    PaymentFailed,
    VoucherCreated,
}

impl GatewayEventType {
    /// Wire/ledger name for the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentSucceeded => "payment_succeeded",
            Self::PaymentFailed => "payment_failed",
            Self::VoucherCreated => "voucher_created",
        }
    }
}

/// A verified inbound webhook event.
///
/// Signature verification happens upstream; by the time an event reaches the
/// pipeline it is authentic but possibly a duplicate delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub event_id: String,
    pub event_type: GatewayEventType,
    pub order_id: String,
    #[serde(default)]
    pub amount: Option<Amount>,
    #[serde(default)]
    pub currency: Currency,
    /// Barcode or OXXO-style reference for cash instruments.
    #[serde(default)]
    pub voucher_reference: Option<String>,
    #[serde(default)]
    pub voucher_expires_at: Option<DateTime<Utc>>,
    /// Reason string carried on failure events.
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Raw gateway payload, kept verbatim for the audit ledger.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Append-only audit row. Never updated or deleted in normal operation;
/// current application status is always derivable from this ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub application_id: i64,
    pub order_id: String,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub amount: Option<Amount>,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processed,
    Failed,
}

/// One row per gateway event id, the idempotency guard for webhook
/// ingestion. At most one row per event id ever reaches `Processed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRecord {
    pub event_id: String,
    pub event_type: GatewayEventType,
    pub processing_status: ProcessingStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl WebhookRecord {
    pub fn new(event_id: &str, event_type: GatewayEventType, now: DateTime<Utc>) -> Self {
        Self {
            event_id: event_id.to_string(),
            event_type,
            processing_status: ProcessingStatus::Pending,
            retry_count: 0,
            last_error: None,
            received_at: now,
            processed_at: None,
        }
    }
}
