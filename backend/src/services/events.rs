//! Event names, the bus envelope, the publisher seam and the in-process
//! handler registry.
//!
//! The broker itself is an external collaborator; the core only knows the
//! [`EventPublisher`] trait and the message envelope. In-process consumers
//! implement [`EventHandler`] and register at startup; unknown event names
//! are dead-lettered by the dispatcher rather than silently dropped.

use crate::models::outbox::OutboxEvent;
use crate::types::{EventId, OrganizationId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Routing keys. Consumers bind per pattern, e.g. `leave.*`.
pub mod names {
    pub const LEAVE_REQUESTED: &str = "leave.requested";
    pub const LEAVE_APPROVED: &str = "leave.approved";
    pub const LEAVE_REJECTED: &str = "leave.rejected";
    pub const LEAVE_CANCELLED: &str = "leave.cancelled";
    pub const LEAVE_ACCRUED: &str = "leave.accrued";
    pub const LEAVE_CARRIED_FORWARD: &str = "leave.carried_forward";
    pub const LEAVE_EXPIRED: &str = "leave.expired";

    pub const ATTENDANCE_CHECKED_IN: &str = "attendance.checked_in";
    pub const ATTENDANCE_CHECKED_OUT: &str = "attendance.checked_out";
    pub const ATTENDANCE_REGULARIZED: &str = "attendance.regularized";
    pub const REGULARIZATION_REQUESTED: &str = "attendance.regularization_requested";
    pub const REGULARIZATION_REJECTED: &str = "attendance.regularization_rejected";

    pub const PAYROLL_RUN_STARTED: &str = "payroll.run_started";
    pub const PAYROLL_RUN_PROCESSED: &str = "payroll.run_processed";
    pub const PAYROLL_RUN_APPROVED: &str = "payroll.run_approved";
    pub const PAYROLL_RUN_PAID: &str = "payroll.run_paid";
    pub const PAYROLL_RUN_CANCELLED: &str = "payroll.run_cancelled";

    pub const WORKFLOW_STARTED: &str = "workflow.started";
    pub const WORKFLOW_TASK_CREATED: &str = "workflow.task_created";
    pub const WORKFLOW_TASK_APPROVED: &str = "workflow.task_approved";
    pub const WORKFLOW_TASK_REJECTED: &str = "workflow.task_rejected";
    pub const WORKFLOW_TASK_DELEGATED: &str = "workflow.task_delegated";
    pub const WORKFLOW_TASK_ESCALATED: &str = "workflow.task_escalated";
    pub const WORKFLOW_TASK_EXPIRED: &str = "workflow.task_expired";
    pub const WORKFLOW_TASK_SLA_WARNING: &str = "workflow.task_sla_warning";
    pub const WORKFLOW_CHANGES_REQUESTED: &str = "workflow.changes_requested";
    pub const WORKFLOW_COMPLETED: &str = "workflow.completed";
    pub const WORKFLOW_REJECTED: &str = "workflow.rejected";
    pub const WORKFLOW_CANCELLED: &str = "workflow.cancelled";
    pub const WORKFLOW_ERROR: &str = "workflow.error";

    pub const NOTIFICATION_QUEUED: &str = "notification.queued";
    pub const SYSTEM_INVARIANT_VIOLATED: &str = "system.invariant_violated";

    /// Every name the core publishes. The dispatcher treats anything else
    /// as unknown.
    pub const ALL: &[&str] = &[
        LEAVE_REQUESTED,
        LEAVE_APPROVED,
        LEAVE_REJECTED,
        LEAVE_CANCELLED,
        LEAVE_ACCRUED,
        LEAVE_CARRIED_FORWARD,
        LEAVE_EXPIRED,
        ATTENDANCE_CHECKED_IN,
        ATTENDANCE_CHECKED_OUT,
        ATTENDANCE_REGULARIZED,
        REGULARIZATION_REQUESTED,
        REGULARIZATION_REJECTED,
        PAYROLL_RUN_STARTED,
        PAYROLL_RUN_PROCESSED,
        PAYROLL_RUN_APPROVED,
        PAYROLL_RUN_PAID,
        PAYROLL_RUN_CANCELLED,
        WORKFLOW_STARTED,
        WORKFLOW_TASK_CREATED,
        WORKFLOW_TASK_APPROVED,
        WORKFLOW_TASK_REJECTED,
        WORKFLOW_TASK_DELEGATED,
        WORKFLOW_TASK_ESCALATED,
        WORKFLOW_TASK_EXPIRED,
        WORKFLOW_TASK_SLA_WARNING,
        WORKFLOW_CHANGES_REQUESTED,
        WORKFLOW_COMPLETED,
        WORKFLOW_REJECTED,
        WORKFLOW_CANCELLED,
        WORKFLOW_ERROR,
        NOTIFICATION_QUEUED,
        SYSTEM_INVARIANT_VIOLATED,
    ];
}

/// Message body published to the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub event_name: String,
    pub organization_id: OrganizationId,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub metadata: Value,
}

impl EventEnvelope {
    pub fn from_outbox(event: &OutboxEvent) -> Self {
        Self {
            event_id: event.id,
            event_name: event.event_name.clone(),
            organization_id: event.organization_id,
            aggregate_type: event.aggregate_type.clone(),
            aggregate_id: event.aggregate_id,
            timestamp: event.created_at,
            payload: event.payload.0.clone(),
            metadata: event.metadata.0.clone(),
        }
    }
}

/// Seam to the external bus. The production implementation lives with the
/// deployment; the default logs deliveries so a broker-less environment
/// still drains its outbox.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one envelope; the routing key is `envelope.event_name`.
    async fn publish(&self, envelope: &EventEnvelope) -> anyhow::Result<()>;
}

/// Publisher used when no broker is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

#[async_trait]
impl EventPublisher for TracingPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        tracing::info!(
            event_id = %envelope.event_id,
            event_name = %envelope.event_name,
            aggregate_type = %envelope.aggregate_type,
            aggregate_id = %envelope.aggregate_id,
            "event published"
        );
        Ok(())
    }
}

/// In-process consumer of dispatched events. Handlers must be idempotent
/// keyed by `event_id`: delivery is at-least-once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable handler name, used in logs.
    fn name(&self) -> &'static str;

    /// Whether this handler wants `event_name`. Patterns are exact names or
    /// a `prefix.*` wildcard.
    fn handles(&self, event_name: &str) -> bool;

    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()>;
}

/// Returns true when `pattern` matches `event_name` (`leave.*` style).
pub fn pattern_matches(pattern: &str, event_name: &str) -> bool {
    match pattern.strip_suffix(".*") {
        Some(prefix) => event_name
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.')),
        None => pattern == event_name,
    }
}

/// Registry of in-process handlers, populated at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        tracing::info!(handler = handler.name(), "event handler registered");
        self.handlers.push(handler);
    }

    pub fn handlers_for(&self, event_name: &str) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .iter()
            .filter(|h| h.handles(event_name))
            .cloned()
            .collect()
    }

    /// Known means the core publishes it or some handler consumes it.
    /// Unknown events are dead-lettered by the dispatcher.
    pub fn is_known(&self, event_name: &str) -> bool {
        names::ALL.contains(&event_name) || self.handlers.iter().any(|h| h.handles(event_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matching_supports_wildcards() {
        assert!(pattern_matches("leave.approved", "leave.approved"));
        assert!(!pattern_matches("leave.approved", "leave.rejected"));
        assert!(pattern_matches("leave.*", "leave.approved"));
        assert!(pattern_matches("workflow.*", "workflow.task_escalated"));
        assert!(!pattern_matches("leave.*", "leaves.approved"));
        assert!(!pattern_matches("leave.*", "leave"));
    }

    struct Probe;

    #[async_trait]
    impl EventHandler for Probe {
        fn name(&self) -> &'static str {
            "probe"
        }

        fn handles(&self, event_name: &str) -> bool {
            pattern_matches("custom.*", event_name)
        }

        async fn handle(&self, _envelope: &EventEnvelope) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn registry_knows_published_and_handled_names() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.is_known(names::LEAVE_APPROVED));
        assert!(!registry.is_known("custom.thing"));

        registry.register(Arc::new(Probe));
        assert!(registry.is_known("custom.thing"));
        assert_eq!(registry.handlers_for("custom.thing").len(), 1);
        assert_eq!(registry.handlers_for(names::LEAVE_APPROVED).len(), 0);
    }
}
