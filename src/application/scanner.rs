use crate::config::PipelineConfig;
use crate::domain::application::ApplicationStatus;
use crate::domain::ports::{ClockRef, Notice, NotifierRef, StoreRef};
use crate::domain::reminder::ReminderType;
use crate::error::{PipelineError, Result};
use tracing::{info, warn};

/// Time-windowed reminder scans, read-only with respect to application
/// state. The uniqueness constraint on (application, reminder type) is what
/// makes repeated or overlapping scan runs safe; a notification goes out
/// only when this process won the insert.
pub struct ExpirationScanner {
    store: StoreRef,
    notifier: NotifierRef,
    clock: ClockRef,
    config: PipelineConfig,
}

impl ExpirationScanner {
    pub fn new(
        store: StoreRef,
        notifier: NotifierRef,
        clock: ClockRef,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            config,
        }
    }

    /// Warns holders of cash vouchers that expire within the horizon.
    /// Returns the number of reminders produced by this run.
    pub async fn scan_voucher_expirations(&self) -> Result<usize> {
        let now = self.clock.now();
        let horizon = chrono::Duration::from_std(self.config.voucher_horizon)
            .map_err(|e| PipelineError::Validation(e.to_string()))?;
        let horizon_end = now + horizon;

        // Last voucher_created event per application; an application that
        // regenerated its voucher is judged by the newest one only.
        let events = self.store.latest_events_of_type("voucher_created").await?;
        let mut produced = 0;
        for event in events {
            match self.remind_voucher(event.application_id, now, horizon_end).await {
                Ok(true) => produced += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        application_id = event.application_id,
                        error = %e,
                        "voucher reminder failed, continuing scan"
                    );
                }
            }
        }
        info!(produced, "voucher expiration scan complete");
        Ok(produced)
    }

    async fn remind_voucher(
        &self,
        application_id: i64,
        now: chrono::DateTime<chrono::Utc>,
        horizon_end: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool> {
        let Some(application) = self.store.get_application(application_id).await? else {
            return Ok(false);
        };
        if application.status.is_terminal() {
            return Ok(false);
        }
        let Some(expires_at) = application.voucher_expires_at else {
            return Ok(false);
        };
        // Inside the window only: already expired vouchers get no reminder,
        // and nothing fires before the horizon opens.
        if expires_at <= now || expires_at > horizon_end {
            return Ok(false);
        }
        if !self
            .store
            .record_reminder_if_new(application.id, ReminderType::VoucherExpiring, now)
            .await?
        {
            return Ok(false);
        }
        self.dispatch(application.id, Notice::VoucherExpiring { expires_at })
            .await;
        Ok(true)
    }

    /// Warns about upcoming permit expiry at each configured day offset.
    pub async fn scan_permit_expirations(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut produced = 0;
        for application in self.store.all_applications().await? {
            if application.status != ApplicationStatus::PermitReady {
                continue;
            }
            let Some(expires_at) = application.permit_expires_at else {
                continue;
            };
            for &days_before in &self.config.permit_expiry_offsets_days {
                let window_open = expires_at - chrono::Duration::days(days_before as i64);
                if now < window_open || now >= expires_at {
                    continue;
                }
                let reminder = ReminderType::PermitExpiry { days_before };
                match self
                    .store
                    .record_reminder_if_new(application.id, reminder, now)
                    .await
                {
                    Ok(true) => {
                        self.dispatch(application.id, Notice::PermitExpiring { days_before })
                            .await;
                        produced += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(
                            application_id = application.id,
                            days_before,
                            error = %e,
                            "permit expiry reminder failed, continuing scan"
                        );
                    }
                }
            }
        }
        info!(produced, "permit expiry scan complete");
        Ok(produced)
    }

    async fn dispatch(&self, application_id: i64, notice: Notice) {
        if let Err(e) = self.notifier.notify(application_id, notice).await {
            warn!(application_id, error = %e, "notification dispatch failed");
        }
    }
}
