use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A positive monetary amount attached to a payment order.
///
/// Wrapper around `rust_decimal::Decimal` so that zero or negative charge
/// amounts are unrepresentable past the validation boundary.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, PipelineError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(PipelineError::Validation(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PipelineError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Mxn,
    Usd,
}

/// Lifecycle of a permit application, driven by verified gateway events and
/// worker completion only. Client requests never move an application once a
/// payment order exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Initiated,
    PendingPayment,
    ProcessingPayment,
    AwaitingVoucherPayment,
    PaymentReceived,
    GeneratingPermit,
    PermitReady,
    PaymentFailed,
    Failed,
}

impl ApplicationStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PermitReady | Self::PaymentFailed | Self::Failed)
    }

    /// Statuses that represent work in flight; used by stuck-job detection.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::ProcessingPayment | Self::PaymentReceived | Self::GeneratingPermit
        )
    }

    /// Transition table for the payment state machine.
    pub fn can_transition(self, to: ApplicationStatus) -> bool {
        use ApplicationStatus::*;
        match (self, to) {
            (Initiated, PendingPayment) => true,
            (PendingPayment, ProcessingPayment) => true,
            (PendingPayment, AwaitingVoucherPayment) => true,
            (PendingPayment, PaymentReceived) => true,
            (ProcessingPayment, PaymentReceived) => true,
            (ProcessingPayment, AwaitingVoucherPayment) => true,
            (AwaitingVoucherPayment, PaymentReceived) => true,
            (PaymentReceived, GeneratingPermit) => true,
            (GeneratingPermit, PermitReady) => true,
            (GeneratingPermit, Failed) => true,
            // Payment can fail from any non-terminal pre-payment state.
            (
                PendingPayment | ProcessingPayment | AwaitingVoucherPayment,
                PaymentFailed,
            ) => true,
            _ => false,
        }
    }
}

/// One row per permit request. Mutated only by the state machine and the
/// permit worker; every status change is mirrored by a ledger append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub status: ApplicationStatus,
    pub payment_order_id: Option<String>,
    pub payment_reference: Option<String>,
    pub amount: Option<Amount>,
    pub currency: Currency,
    pub voucher_expires_at: Option<DateTime<Utc>>,
    pub permit_expires_at: Option<DateTime<Utc>>,
    /// Artifact locations reported by the issuance backend.
    pub permit_artifacts: Vec<String>,
    /// User-facing reason recorded on permanent failure.
    pub failure_reason: Option<String>,
    pub queue_entered_at: Option<DateTime<Utc>>,
    pub queue_started_at: Option<DateTime<Utc>>,
    pub queue_completed_at: Option<DateTime<Utc>>,
    pub queue_duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn new(id: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: ApplicationStatus::Initiated,
            payment_order_id: None,
            payment_reference: None,
            amount: None,
            currency: Currency::default(),
            voucher_expires_at: None,
            permit_expires_at: None,
            permit_artifacts: Vec::new(),
            failure_reason: None,
            queue_entered_at: None,
            queue_started_at: None,
            queue_completed_at: None,
            queue_duration_ms: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Queue wait in milliseconds, once the worker has picked the job up.
    pub fn queue_wait_ms(&self) -> Option<i64> {
        match (self.queue_entered_at, self.queue_started_at) {
            (Some(entered), Some(started)) => {
                Some((started - entered).num_milliseconds())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(150.0)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0.0)),
            Err(PipelineError::Validation(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn test_happy_path_transitions() {
        use ApplicationStatus::*;
        let path = [
            Initiated,
            PendingPayment,
            ProcessingPayment,
            PaymentReceived,
            GeneratingPermit,
            PermitReady,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_voucher_branch() {
        use ApplicationStatus::*;
        assert!(ProcessingPayment.can_transition(AwaitingVoucherPayment));
        assert!(AwaitingVoucherPayment.can_transition(PaymentReceived));
        assert!(AwaitingVoucherPayment.can_transition(PaymentFailed));
    }

    #[test]
    fn test_terminal_states_are_final() {
        use ApplicationStatus::*;
        for terminal in [PermitReady, PaymentFailed, Failed] {
            assert!(terminal.is_terminal());
            for to in [
                Initiated,
                PendingPayment,
                ProcessingPayment,
                AwaitingVoucherPayment,
                PaymentReceived,
                GeneratingPermit,
                PermitReady,
                PaymentFailed,
                Failed,
            ] {
                assert!(!terminal.can_transition(to));
            }
        }
    }

    #[test]
    fn test_forged_transitions_rejected() {
        use ApplicationStatus::*;
        // A client cannot jump straight to a permit.
        assert!(!Initiated.can_transition(PermitReady));
        assert!(!PendingPayment.can_transition(GeneratingPermit));
        assert!(!PaymentReceived.can_transition(PermitReady));
    }

    #[test]
    fn test_queue_wait_ms() {
        let t0 = Utc::now();
        let mut app = Application::new(1, t0);
        assert_eq!(app.queue_wait_ms(), None);
        app.queue_entered_at = Some(t0);
        app.queue_started_at = Some(t0 + chrono::Duration::milliseconds(250));
        assert_eq!(app.queue_wait_ms(), Some(250));
    }
}
