//! Outbox dispatcher: the single-writer loop that drains pending events.
//!
//! Each pass claims a batch with `FOR UPDATE SKIP LOCKED` ordered by
//! `(aggregate_id, created_at)`, publishes to the bus and fans out to the
//! in-process handlers, then marks the row processed inside the same
//! transaction. Failures back off exponentially (2^n minutes, jittered)
//! and dead-letter after `max_retries`. When one event of an aggregate
//! fails, the rest of that aggregate's events in the batch are deferred so
//! consumers never observe reordering.

use crate::config::Config;
use crate::error::AppError;
use crate::models::outbox::OutboxEvent;
use crate::repositories::{transaction, OutboxRepository};
use crate::services::events::{EventEnvelope, EventPublisher, HandlerRegistry};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Backoff in minutes after the `retry_count`-th failure: 2, 4, 8, 16, 32.
pub fn backoff_minutes(retry_count: i32) -> i64 {
    1_i64 << retry_count.clamp(1, 5)
}

/// Counters for one dispatcher pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub processed: u32,
    pub failed: u32,
    pub dead_lettered: u32,
    pub deferred: u32,
}

pub struct OutboxDispatcher {
    pool: PgPool,
    outbox: OutboxRepository,
    publisher: Arc<dyn EventPublisher>,
    registry: Arc<HandlerRegistry>,
    batch_size: i64,
    max_retries: i32,
    poll_interval: std::time::Duration,
}

impl OutboxDispatcher {
    pub fn new(
        pool: PgPool,
        config: &Config,
        publisher: Arc<dyn EventPublisher>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            pool,
            outbox: OutboxRepository::new(),
            publisher,
            registry,
            batch_size: config.dispatcher_batch_size,
            max_retries: config.outbox_max_retries,
            poll_interval: std::time::Duration::from_secs(config.dispatcher_poll_secs),
        }
    }

    /// Polls until the task is aborted. Used by the dispatcher binary.
    pub async fn run_loop(&self) {
        loop {
            match self.run_once(Utc::now()).await {
                Ok(stats) if stats != DispatchStats::default() => {
                    tracing::info!(?stats, "outbox dispatch pass");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(error = ?err, "outbox dispatch pass failed");
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One dispatcher pass at the injected clock.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<DispatchStats, AppError> {
        let mut stats = DispatchStats::default();
        let mut tx = transaction::begin_transaction(&self.pool).await?;
        let batch = self.outbox.claim_batch(&mut *tx, now, self.batch_size).await?;

        // Aggregates that already failed this pass; later events for them
        // must wait so per-aggregate ordering survives the retry.
        let mut poisoned: HashSet<Uuid> = HashSet::new();

        for event in &batch {
            if poisoned.contains(&event.aggregate_id) {
                stats.deferred += 1;
                continue;
            }
            match self.deliver(event).await {
                Ok(()) => {
                    self.outbox.mark_processed(&mut *tx, event.id, now).await?;
                    stats.processed += 1;
                }
                Err(err) => {
                    poisoned.insert(event.aggregate_id);
                    let next_retry_count = event.retry_count + 1;
                    let dead = next_retry_count > self.max_retries;
                    let next_retry_at = if dead {
                        None
                    } else {
                        Some(now + jittered_backoff(next_retry_count))
                    };
                    self.outbox
                        .mark_failed(
                            &mut *tx,
                            event.id,
                            &err.to_string(),
                            next_retry_at,
                            self.max_retries,
                        )
                        .await?;
                    if dead {
                        tracing::error!(
                            event_id = %event.id,
                            event_name = %event.event_name,
                            error = %err,
                            "event dead-lettered"
                        );
                        stats.dead_lettered += 1;
                    } else {
                        tracing::warn!(
                            event_id = %event.id,
                            event_name = %event.event_name,
                            retry = next_retry_count,
                            error = %err,
                            "event delivery failed, scheduled for retry"
                        );
                        stats.failed += 1;
                    }
                }
            }
        }
        transaction::commit_transaction(tx).await?;
        Ok(stats)
    }

    async fn deliver(&self, event: &OutboxEvent) -> anyhow::Result<()> {
        deliver_envelope(self.publisher.as_ref(), &self.registry, event).await
    }
}

/// Publishes to the bus and invokes every matching in-process handler.
/// Unknown event names fail delivery so they end in the dead letter queue
/// instead of disappearing.
pub async fn deliver_envelope(
    publisher: &dyn EventPublisher,
    registry: &HandlerRegistry,
    event: &OutboxEvent,
) -> anyhow::Result<()> {
    if !registry.is_known(&event.event_name) {
        anyhow::bail!("unknown event name '{}'", event.event_name);
    }
    let envelope = EventEnvelope::from_outbox(event);
    publisher.publish(&envelope).await?;
    for handler in registry.handlers_for(&event.event_name) {
        handler
            .handle(&envelope)
            .await
            .map_err(|e| anyhow::anyhow!("handler '{}' failed: {}", handler.name(), e))?;
    }
    Ok(())
}

fn jittered_backoff(retry_count: i32) -> Duration {
    let base = Duration::minutes(backoff_minutes(retry_count));
    // Up to 10% jitter keeps retried batches from thundering in step.
    let jitter_secs = (base.num_seconds() / 10).max(1);
    let jitter = rand::thread_rng().gen_range(0..jitter_secs);
    base + Duration::seconds(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::events::MockEventPublisher;
    use crate::types::OrganizationId;
    use serde_json::json;

    fn event(name: &str) -> OutboxEvent {
        OutboxEvent::new(
            OrganizationId::new(),
            name,
            "leave_request",
            Uuid::new_v4(),
            json!({}),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn delivery_publishes_known_events() {
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().times(1).returning(|_| Ok(()));
        let registry = HandlerRegistry::new();
        let result =
            deliver_envelope(&publisher, &registry, &event(crate::services::events::names::LEAVE_APPROVED))
                .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unknown_events_fail_before_publish() {
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().times(0);
        let registry = HandlerRegistry::new();
        let result = deliver_envelope(&publisher, &registry, &event("mystery.event")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn publish_failures_propagate_for_retry() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("bus down")));
        let registry = HandlerRegistry::new();
        let result =
            deliver_envelope(&publisher, &registry, &event(crate::services::events::names::LEAVE_APPROVED))
                .await;
        assert!(result.is_err());
    }

    #[test]
    fn backoff_schedule_doubles_per_retry() {
        assert_eq!(backoff_minutes(1), 2);
        assert_eq!(backoff_minutes(2), 4);
        assert_eq!(backoff_minutes(3), 8);
        assert_eq!(backoff_minutes(4), 16);
        assert_eq!(backoff_minutes(5), 32);
        // Clamped at the dead-letter boundary.
        assert_eq!(backoff_minutes(50), 32);
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        for retry in 1..=5 {
            let base = Duration::minutes(backoff_minutes(retry));
            for _ in 0..50 {
                let d = jittered_backoff(retry);
                assert!(d >= base);
                assert!(d <= base + Duration::seconds(base.num_seconds() / 10 + 1));
            }
        }
    }
}
