use crate::domain::application::Application;
use crate::domain::ports::{
    GatewayPaymentStatus, IssuanceBackend, IssuedPermit, Notice, Notifier, PaymentGateway,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

/// Issuance adapter for offline replay runs: produces deterministic artifact
/// locations and a one-year permit without calling the real backend.
#[derive(Debug, Default, Clone)]
pub struct LocalIssuanceBackend;

#[async_trait]
impl IssuanceBackend for LocalIssuanceBackend {
    async fn issue_permit(&self, application: &Application) -> Result<IssuedPermit> {
        Ok(IssuedPermit {
            artifacts: vec![
                format!("permits/{}/permit.pdf", application.id),
                format!("permits/{}/receipt.pdf", application.id),
            ],
            expires_at: Utc::now() + chrono::Duration::days(365),
        })
    }
}

/// Notifier that only logs. Replay runs and local development do not send
/// email or WhatsApp traffic.
#[derive(Debug, Default, Clone)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, application_id: i64, notice: Notice) -> Result<()> {
        info!(application_id, ?notice, "notification");
        Ok(())
    }
}

/// Gateway adapter for replay runs. Reports every intent as still pending,
/// so recovery scans record attempts without inventing confirmations.
#[derive(Debug, Default, Clone)]
pub struct OfflineGateway;

#[async_trait]
impl PaymentGateway for OfflineGateway {
    async fn check_status(&self, _intent_id: &str) -> Result<GatewayPaymentStatus> {
        Ok(GatewayPaymentStatus::Pending)
    }
}
