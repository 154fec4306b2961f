mod common;

use chrono::Utc;
use common::{test_config, ManualClock, RecordingNotifier, ScriptedIssuance};
use permitflow::application::metrics::MetricsCollector;
use permitflow::application::queue::PermitQueue;
use permitflow::config::PipelineConfig;
use permitflow::domain::application::{Application, ApplicationStatus};
use permitflow::domain::ports::{ApplicationStore, ClockRef, Notice, StoreRef, SystemClock};
use permitflow::error::PipelineError;
use permitflow::infrastructure::in_memory::InMemoryStore;
use std::sync::Arc;

async fn seed_confirmed(store: &InMemoryStore, id: i64) {
    let mut app = Application::new(id, Utc::now());
    app.status = ApplicationStatus::PaymentReceived;
    app.payment_order_id = Some(format!("ord_{id}"));
    store.insert_application(app).await.unwrap();
}

fn queue_with(
    store: &Arc<InMemoryStore>,
    issuance: Arc<ScriptedIssuance>,
    notifier: Arc<RecordingNotifier>,
    config: PipelineConfig,
) -> Arc<PermitQueue> {
    PermitQueue::new(
        Arc::clone(store) as StoreRef,
        issuance,
        notifier,
        Arc::new(SystemClock),
        config,
    )
}

#[tokio::test]
async fn test_enqueue_is_idempotent_per_application() {
    let store = Arc::new(InMemoryStore::default());
    seed_confirmed(&store, 1).await;
    let queue = queue_with(
        &store,
        ScriptedIssuance::succeeding(),
        RecordingNotifier::new(),
        test_config(),
    );

    assert!(queue.enqueue(1).await.unwrap());
    assert!(!queue.enqueue(1).await.unwrap());
    assert_eq!(queue.snapshot().await.queue_length, 1);
}

#[tokio::test]
async fn test_enqueue_unknown_application_leaves_queue_empty() {
    let store = Arc::new(InMemoryStore::default());
    let queue = queue_with(
        &store,
        ScriptedIssuance::succeeding(),
        RecordingNotifier::new(),
        test_config(),
    );

    let result = queue.enqueue(99).await;
    assert!(matches!(result, Err(PipelineError::NotFound(_))));
    // The failed stamp must not leave a phantom job behind.
    assert_eq!(queue.snapshot().await.queue_length, 0);

    seed_confirmed(&store, 1).await;
    assert!(queue.enqueue(1).await.unwrap());
}

#[tokio::test]
async fn test_enqueue_rejects_at_capacity() {
    let store = Arc::new(InMemoryStore::default());
    seed_confirmed(&store, 1).await;
    seed_confirmed(&store, 2).await;
    let config = PipelineConfig {
        queue_capacity: 1,
        ..test_config()
    };
    let queue = queue_with(
        &store,
        ScriptedIssuance::succeeding(),
        RecordingNotifier::new(),
        config,
    );

    assert!(queue.enqueue(1).await.unwrap());
    let overflow = queue.enqueue(2).await;
    assert!(matches!(overflow, Err(PipelineError::Validation(_))));
}

#[tokio::test]
async fn test_completion_reaches_exactly_one_terminal_state_with_sample() {
    let store = Arc::new(InMemoryStore::default());
    for id in 1..=5 {
        seed_confirmed(&store, id).await;
    }
    let notifier = RecordingNotifier::new();
    let queue = queue_with(
        &store,
        ScriptedIssuance::succeeding(),
        Arc::clone(&notifier),
        test_config(),
    );
    let _workers = queue.spawn_workers();

    for id in 1..=5 {
        queue.enqueue(id).await.unwrap();
    }
    queue.drained().await;

    for id in 1..=5 {
        let app = store.get_application(id).await.unwrap().unwrap();
        assert_eq!(app.status, ApplicationStatus::PermitReady);
    }

    // The outcome is visible in the next stored metrics sample.
    let collector = MetricsCollector::new(
        Arc::clone(&store) as StoreRef,
        Arc::clone(&queue),
        Arc::new(SystemClock) as ClockRef,
        test_config(),
    );
    let sample = collector.collect_sample().await.unwrap();
    assert_eq!(sample.total_completed, 5);
    assert_eq!(sample.total_failed, 0);
    assert_eq!(sample.queue_length, 0);
    assert_eq!(sample.active_jobs, 0);

    let ready = notifier
        .notices()
        .iter()
        .filter(|(_, n)| *n == Notice::PermitReady)
        .count();
    assert_eq!(ready, 5);
}

#[tokio::test]
async fn test_transient_issuance_failure_is_retried() {
    let store = Arc::new(InMemoryStore::default());
    seed_confirmed(&store, 1).await;
    let issuance = ScriptedIssuance::transient_then_success(1);
    let queue = queue_with(
        &store,
        Arc::clone(&issuance),
        RecordingNotifier::new(),
        test_config(),
    );
    let _workers = queue.spawn_workers();

    queue.enqueue(1).await.unwrap();
    queue.drained().await;

    assert_eq!(issuance.calls(), 2);
    let app = store.get_application(1).await.unwrap().unwrap();
    assert_eq!(app.status, ApplicationStatus::PermitReady);
}

#[tokio::test]
async fn test_retries_are_bounded_then_job_fails() {
    let store = Arc::new(InMemoryStore::default());
    seed_confirmed(&store, 1).await;
    let issuance = ScriptedIssuance::transient_then_success(10);
    let notifier = RecordingNotifier::new();
    let queue = queue_with(&store, Arc::clone(&issuance), Arc::clone(&notifier), test_config());
    let _workers = queue.spawn_workers();

    queue.enqueue(1).await.unwrap();
    queue.drained().await;

    // Initial call plus issuance_max_retries, no more.
    assert_eq!(issuance.calls(), 3);
    let app = store.get_application(1).await.unwrap().unwrap();
    assert_eq!(app.status, ApplicationStatus::Failed);
    assert!(app.failure_reason.is_some());
    assert_eq!(queue.snapshot().await.total_failed, 1);
}

#[tokio::test]
async fn test_permanent_failure_surfaces_user_reason() {
    let store = Arc::new(InMemoryStore::default());
    seed_confirmed(&store, 1).await;
    let issuance = ScriptedIssuance::permanent("portal rejected the application");
    let notifier = RecordingNotifier::new();
    let queue = queue_with(&store, Arc::clone(&issuance), Arc::clone(&notifier), test_config());
    let _workers = queue.spawn_workers();

    queue.enqueue(1).await.unwrap();
    queue.drained().await;

    // Permanent failures do not burn retries.
    assert_eq!(issuance.calls(), 1);
    let app = store.get_application(1).await.unwrap().unwrap();
    assert_eq!(app.status, ApplicationStatus::Failed);
    assert_eq!(
        app.failure_reason.as_deref(),
        Some("portal rejected the application")
    );
    assert!(notifier.notices().iter().any(|(id, n)| {
        *id == 1
            && matches!(n, Notice::PermitGenerationFailed { reason }
                if reason == "portal rejected the application")
    }));
}

#[tokio::test]
async fn test_stuck_job_detection() {
    let start = Utc::now();
    let clock = ManualClock::new(start);
    let store = Arc::new(InMemoryStore::new(clock.clone()));

    let mut stuck = Application::new(1, start);
    stuck.status = ApplicationStatus::GeneratingPermit;
    store.insert_application(stuck).await.unwrap();
    let mut healthy = Application::new(2, start);
    healthy.status = ApplicationStatus::PermitReady;
    store.insert_application(healthy).await.unwrap();

    let queue = PermitQueue::new(
        Arc::clone(&store) as StoreRef,
        ScriptedIssuance::succeeding(),
        RecordingNotifier::new(),
        clock.clone() as ClockRef,
        test_config(),
    );

    clock.advance(chrono::Duration::minutes(30));
    assert!(queue.stuck_applications().await.unwrap().is_empty());

    clock.advance(chrono::Duration::minutes(45));
    let stuck = queue.stuck_applications().await.unwrap();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].id, 1);
}
