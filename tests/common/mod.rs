#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use permitflow::config::PipelineConfig;
use permitflow::domain::application::{Application, ApplicationStatus};
use permitflow::domain::ports::{
    Clock, GatewayPaymentStatus, IssuanceBackend, IssuedPermit, Notice, Notifier, PaymentGateway,
};
use permitflow::error::{PipelineError, Result};
use permitflow::infrastructure::in_memory::InMemoryStore;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Deterministic clock for window and threshold tests.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(start)))
    }

    pub fn advance(&self, by: Duration) {
        *self.0.lock().unwrap() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.0.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Gateway fake that replays a scripted sequence of answers and counts
/// calls. Runs out of script = reports Pending.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Confirmed,
    Pending,
    Failed(String),
    Transient(String),
}

#[derive(Default)]
pub struct ScriptedGateway {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new(script: Vec<ScriptedResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn check_status(&self, _intent_id: &str) -> Result<GatewayPaymentStatus> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(ScriptedResponse::Confirmed) => Ok(GatewayPaymentStatus::Confirmed),
            Some(ScriptedResponse::Pending) | None => Ok(GatewayPaymentStatus::Pending),
            Some(ScriptedResponse::Failed(reason)) => Ok(GatewayPaymentStatus::Failed { reason }),
            Some(ScriptedResponse::Transient(msg)) => Err(PipelineError::TransientGateway(msg)),
        }
    }
}

/// Issuance fake: fails transiently n times, then succeeds, unless built
/// as permanently failing.
pub struct ScriptedIssuance {
    transient_failures: AtomicU32,
    permanent_reason: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedIssuance {
    pub fn succeeding() -> Arc<Self> {
        Self::transient_then_success(0)
    }

    pub fn transient_then_success(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            transient_failures: AtomicU32::new(failures),
            permanent_reason: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn permanent(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            transient_failures: AtomicU32::new(0),
            permanent_reason: Some(reason.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IssuanceBackend for ScriptedIssuance {
    async fn issue_permit(&self, application: &Application) -> Result<IssuedPermit> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.permanent_reason {
            return Err(PipelineError::PermanentGateway(reason.clone()));
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PipelineError::TransientGateway(
                "issuance backend unavailable".to_string(),
            ));
        }
        Ok(IssuedPermit {
            artifacts: vec![format!("permits/{}/permit.pdf", application.id)],
            expires_at: Utc::now() + Duration::days(365),
        })
    }
}

/// Notifier fake that records every dispatched notice.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(i64, Notice)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notices(&self) -> Vec<(i64, Notice)> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, application_id: i64, notice: Notice) -> Result<()> {
        self.notices.lock().unwrap().push((application_id, notice));
        Ok(())
    }
}

/// Config with tight timeouts so failure paths run in test time.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        worker_count: 2,
        queue_capacity: 16,
        issuance_max_retries: 2,
        issuance_timeout: std::time::Duration::from_millis(200),
        gateway_timeout: std::time::Duration::from_millis(200),
        ..PipelineConfig::default()
    }
}

/// Application with an open payment order, as it looks right after the
/// client was redirected to the gateway.
pub async fn seed_application(store: &InMemoryStore, id: i64, order_id: &str) {
    use permitflow::domain::ports::ApplicationStore;
    let mut application = Application::new(id, Utc::now());
    application.status = ApplicationStatus::PendingPayment;
    application.payment_order_id = Some(order_id.to_string());
    application.amount = dec!(499.00).try_into().ok();
    store.insert_application(application).await.unwrap();
}
