mod common;

use chrono::{Duration, Utc};
use common::{test_config, ManualClock, RecordingNotifier, ScriptedIssuance};
use permitflow::application::metrics::MetricsCollector;
use permitflow::application::queue::PermitQueue;
use permitflow::domain::metrics::QueueMetricsSample;
use permitflow::domain::ports::{ClockRef, MetricsStore, StoreRef};
use permitflow::infrastructure::in_memory::InMemoryStore;
use std::sync::Arc;

fn collector(store: &Arc<InMemoryStore>, clock: Arc<ManualClock>) -> MetricsCollector {
    let queue = PermitQueue::new(
        Arc::clone(store) as StoreRef,
        ScriptedIssuance::succeeding(),
        RecordingNotifier::new(),
        clock.clone() as ClockRef,
        test_config(),
    );
    MetricsCollector::new(
        Arc::clone(store) as StoreRef,
        queue,
        clock as ClockRef,
        test_config(),
    )
}

fn sample_at(at: chrono::DateTime<Utc>, completed: u64, failed: u64) -> QueueMetricsSample {
    QueueMetricsSample {
        queue_length: 2,
        active_jobs: 1,
        avg_wait_ms: 40.0,
        avg_processing_ms: 120.0,
        total_completed: completed,
        total_failed: failed,
        created_at: at,
    }
}

#[tokio::test]
async fn test_collected_samples_are_persisted() {
    let start = Utc::now();
    let clock = ManualClock::new(start);
    let store = Arc::new(InMemoryStore::new(clock.clone() as ClockRef));
    let collector = collector(&store, clock.clone());

    collector.collect_sample().await.unwrap();
    clock.advance(Duration::minutes(1));
    collector.collect_sample().await.unwrap();

    let stored = store.samples_since(start).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored[0].created_at < stored[1].created_at);
}

#[tokio::test]
async fn test_summary_aggregates_only_the_trailing_window() {
    let start = Utc::now();
    let clock = ManualClock::new(start);
    let store = Arc::new(InMemoryStore::new(clock.clone() as ClockRef));

    // An old sample outside the window plus two inside it.
    store
        .append_sample(sample_at(start, 0, 0))
        .await
        .unwrap();
    store
        .append_sample(sample_at(start + Duration::minutes(50), 10, 0))
        .await
        .unwrap();
    store
        .append_sample(sample_at(start + Duration::minutes(55), 16, 2))
        .await
        .unwrap();
    clock.set(start + Duration::minutes(60));

    let collector = collector(&store, clock);
    let summary = collector
        .summary(std::time::Duration::from_secs(15 * 60))
        .await
        .unwrap();

    assert_eq!(summary.samples, 2);
    assert_eq!(summary.completed_in_window, 6);
    assert_eq!(summary.failed_in_window, 2);
    assert!((summary.failure_rate - 0.25).abs() < f64::EPSILON);
    // One of two workers busy in both samples.
    assert!((summary.utilization - 0.5).abs() < f64::EPSILON);
    assert_eq!(summary.max_queue_length, 2);
}

#[tokio::test]
async fn test_summary_over_empty_window_is_zeroed() {
    let clock = ManualClock::new(Utc::now());
    let store = Arc::new(InMemoryStore::new(clock.clone() as ClockRef));
    let collector = collector(&store, clock);

    let summary = collector
        .summary(std::time::Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(summary.samples, 0);
    assert_eq!(summary.failure_rate, 0.0);
    assert_eq!(summary.utilization, 0.0);
}
