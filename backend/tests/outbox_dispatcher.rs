//! Outbox delivery semantics: at-least-once with bounded retries,
//! dead-lettering, and per-aggregate ordering under failure.

mod support;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use peopleflow_backend::{
    models::outbox::{OutboxEvent, OutboxStatus},
    repositories::OutboxRepository,
    services::events::{names, EventEnvelope, EventPublisher, HandlerRegistry},
    services::OutboxDispatcher,
    types::OrganizationId,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use uuid::Uuid;

// These tests share one outbox table; run them one at a time so a
// dispatcher pass never claims a sibling test's rows mid-assertion.
static SERIAL: OnceLock<tokio::sync::Mutex<()>> = OnceLock::new();

async fn serial_guard() -> tokio::sync::MutexGuard<'static, ()> {
    SERIAL
        .get_or_init(|| tokio::sync::Mutex::new(()))
        .lock()
        .await
}

/// Leftover rows from earlier suites would crowd the claim batch and eat
/// seeded failures; start from a drained table.
async fn drain_outbox(pool: &sqlx::PgPool) {
    sqlx::query("DELETE FROM event_outbox")
        .execute(pool)
        .await
        .expect("drain outbox");
}

/// Fails the first `failures` publishes, then succeeds, recording every
/// delivered event name in order.
struct FlakyPublisher {
    failures: AtomicUsize,
    delivered: Mutex<Vec<(Uuid, String)>>,
}

impl FlakyPublisher {
    fn new(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            delivered: Mutex::new(Vec::new()),
        }
    }

    fn delivered(&self) -> Vec<(Uuid, String)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for FlakyPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("bus down");
        }
        self.delivered
            .lock()
            .unwrap()
            .push((envelope.aggregate_id, envelope.event_name.clone()));
        Ok(())
    }
}

fn event(org: OrganizationId, name: &str, aggregate: Uuid, offset_secs: i64) -> OutboxEvent {
    OutboxEvent::new(
        org,
        name,
        "leave_request",
        aggregate,
        json!({ "seq": offset_secs }),
        Utc::now() + Duration::milliseconds(offset_secs),
    )
}

#[tokio::test]
async fn failed_publishes_retry_and_eventually_deliver_once() {
    let _serial = serial_guard().await;
    let Some(pool) = support::try_pool().await else { return };
    let config = support::test_config();

    drain_outbox(&pool).await;
    let org = support::seed_org(&pool).await;
    let outbox = OutboxRepository::new();
    let aggregate = Uuid::new_v4();
    let stored = outbox
        .enqueue(&pool, &event(org.id, names::LEAVE_APPROVED, aggregate, 0))
        .await
        .unwrap();

    let publisher = Arc::new(FlakyPublisher::new(2));
    let dispatcher = OutboxDispatcher::new(
        pool.clone(),
        &config,
        publisher.clone(),
        Arc::new(HandlerRegistry::new()),
    );

    // First two passes fail; the row stays pending with a growing backoff.
    let now = Utc::now();
    let stats = dispatcher.run_once(now).await.unwrap();
    assert_eq!(stats.failed, 1);
    // The retry is booked in the future; claim it by moving the clock.
    let row = outbox.find_by_id(&pool, stored.id).await.unwrap();
    assert_eq!(row.status, OutboxStatus::Pending);
    assert_eq!(row.retry_count, 1);
    assert!(row.next_retry_at.unwrap() > now);

    let stats = dispatcher.run_once(now + Duration::hours(1)).await.unwrap();
    assert_eq!(stats.failed, 1);

    // Third attempt succeeds exactly once.
    let stats = dispatcher.run_once(now + Duration::hours(2)).await.unwrap();
    assert_eq!(stats.processed, 1);

    let row = outbox.find_by_id(&pool, stored.id).await.unwrap();
    assert_eq!(row.status, OutboxStatus::Processed);
    assert!(row.processed_at.is_some());
    assert_eq!(row.retry_count, 2);
    assert_eq!(publisher.delivered().len(), 1);

    // Nothing left to deliver.
    let stats = dispatcher.run_once(now + Duration::hours(3)).await.unwrap();
    assert_eq!(stats.processed, 0);
}

#[tokio::test]
async fn per_aggregate_ordering_survives_failures() {
    let _serial = serial_guard().await;
    let Some(pool) = support::try_pool().await else { return };
    let config = support::test_config();

    drain_outbox(&pool).await;
    let org = support::seed_org(&pool).await;
    let outbox = OutboxRepository::new();
    // The batch is ordered by aggregate id; make A sort first so the
    // seeded failure deterministically hits A's first event.
    let mut ids = [Uuid::new_v4(), Uuid::new_v4()];
    ids.sort();
    let aggregate_a = ids[0];
    let aggregate_b = ids[1];

    // Three ordered events for A, one for B.
    for (i, name) in [
        names::LEAVE_REQUESTED,
        names::LEAVE_APPROVED,
        names::LEAVE_CANCELLED,
    ]
    .iter()
    .enumerate()
    {
        outbox
            .enqueue(&pool, &event(org.id, name, aggregate_a, i as i64))
            .await
            .unwrap();
    }
    outbox
        .enqueue(&pool, &event(org.id, names::LEAVE_REQUESTED, aggregate_b, 0))
        .await
        .unwrap();

    // The first publish in the batch fails: every later event of that
    // aggregate must be deferred, while other aggregates proceed.
    let publisher = Arc::new(FlakyPublisher::new(1));
    let dispatcher = OutboxDispatcher::new(
        pool.clone(),
        &config,
        publisher.clone(),
        Arc::new(HandlerRegistry::new()),
    );

    let now = Utc::now();
    let stats = dispatcher.run_once(now).await.unwrap();
    assert_eq!(stats.failed, 1);
    assert!(stats.deferred >= 2, "later events of the aggregate defer");

    // After the backoff, the whole stream drains in order.
    let stats = dispatcher.run_once(now + Duration::hours(1)).await.unwrap();
    assert!(stats.processed >= 3);

    let delivered = publisher.delivered();
    let a_names: Vec<&str> = delivered
        .iter()
        .filter(|(agg, _)| *agg == aggregate_a)
        .map(|(_, name)| name.as_str())
        .collect();
    assert_eq!(
        a_names,
        vec![
            names::LEAVE_REQUESTED,
            names::LEAVE_APPROVED,
            names::LEAVE_CANCELLED
        ],
        "per-aggregate order preserved"
    );
}

#[tokio::test]
async fn unknown_events_dead_letter_after_bounded_retries() {
    let _serial = serial_guard().await;
    let Some(pool) = support::try_pool().await else { return };
    let config = support::test_config();

    drain_outbox(&pool).await;
    let org = support::seed_org(&pool).await;
    let outbox = OutboxRepository::new();
    let stored = outbox
        .enqueue(&pool, &event(org.id, "nobody.consumes_this", Uuid::new_v4(), 0))
        .await
        .unwrap();

    let dispatcher = OutboxDispatcher::new(
        pool.clone(),
        &config,
        Arc::new(FlakyPublisher::new(0)),
        Arc::new(HandlerRegistry::new()),
    );

    // max_retries = 5: attempts 1..=5 reschedule, the 6th dead-letters.
    let mut now = Utc::now();
    for _ in 0..6 {
        dispatcher.run_once(now).await.unwrap();
        now += Duration::hours(2);
    }

    let row = outbox.find_by_id(&pool, stored.id).await.unwrap();
    assert_eq!(row.status, OutboxStatus::DeadLetter);
    assert!(row.last_error.unwrap().contains("unknown event name"));
}
