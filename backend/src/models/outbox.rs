//! Transactional event outbox rows.
//!
//! Rows are written in the same transaction as the state change they
//! describe and drained by the dispatcher with at-least-once delivery.

use crate::types::{EventId, OrganizationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processed,
    DeadLetter,
}

impl OutboxStatus {
    pub fn db_value(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processed => "processed",
            OutboxStatus::DeadLetter => "dead_letter",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct OutboxEvent {
    pub id: EventId,
    pub organization_id: OrganizationId,
    /// Routing key on the bus, e.g. `leave.approved`.
    pub event_name: String,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    #[schema(value_type = Object)]
    pub payload: Json<Value>,
    #[schema(value_type = Object)]
    pub metadata: Json<Value>,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn new(
        organization_id: OrganizationId,
        event_name: &str,
        aggregate_type: &str,
        aggregate_id: Uuid,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            organization_id,
            event_name: event_name.to_string(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
            payload: Json(payload),
            metadata: Json(Value::Object(Default::default())),
            status: OutboxStatus::Pending,
            created_at: now,
            processed_at: None,
            retry_count: 0,
            last_error: None,
            next_retry_at: None,
        }
    }

}
