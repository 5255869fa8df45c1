//! Running workflow instances and their human tasks.

use crate::types::{
    EmployeeId, OrganizationId, WorkflowDefinitionId, WorkflowInstanceId, WorkflowNodeId,
    WorkflowTaskId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    InProgress,
    Completed,
    Rejected,
    Cancelled,
    Error,
}

impl InstanceStatus {
    pub fn db_value(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::InProgress => "in_progress",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Rejected => "rejected",
            InstanceStatus::Cancelled => "cancelled",
            InstanceStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Completed
                | InstanceStatus::Rejected
                | InstanceStatus::Cancelled
                | InstanceStatus::Error
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Approved,
    Rejected,
    Delegated,
    Escalated,
    Expired,
}

impl TaskStatus {
    pub fn db_value(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Approved => "approved",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Delegated => "delegated",
            TaskStatus::Escalated => "escalated",
            TaskStatus::Expired => "expired",
        }
    }

    /// Every status except `pending` is terminal for the task; delegation
    /// and escalation spawn new pending tasks instead of mutating this one.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

/// Decision submitted by a principal acting on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskDecision {
    Approve,
    Reject,
    Delegate,
    RequestChanges,
}

/// Captured context snapshot plus running variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct InstanceData {
    /// Immutable subject snapshot taken at instantiation.
    #[schema(value_type = Object)]
    pub subject: Value,
    /// Variables mutated by action nodes.
    #[schema(value_type = Object)]
    pub variables: Map<String, Value>,
}

impl InstanceData {
    pub fn new(subject: Value) -> Self {
        Self {
            subject,
            variables: Map::new(),
        }
    }

    /// Evaluation context: subject snapshot merged with variables, the
    /// variables winning on key collision.
    pub fn evaluation_context(&self) -> Value {
        let mut merged = match &self.subject {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                if !other.is_null() {
                    map.insert("subject".to_string(), other.clone());
                }
                map
            }
        };
        for (k, v) in &self.variables {
            merged.insert(k.clone(), v.clone());
        }
        Value::Object(merged)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
/// One entry of the append-only execution log.
pub struct ExecutionLogEntry {
    pub at: DateTime<Utc>,
    pub event: String,
    pub node_id: Option<WorkflowNodeId>,
    #[schema(value_type = Object)]
    pub detail: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// A per-subject run of a workflow definition.
pub struct WorkflowInstance {
    pub id: WorkflowInstanceId,
    pub organization_id: OrganizationId,
    pub workflow_id: WorkflowDefinitionId,
    /// Subject reference, e.g. `("leave_request", <uuid>)`.
    pub entity_type: String,
    pub entity_id: Uuid,
    pub current_node_id: Option<WorkflowNodeId>,
    pub status: InstanceStatus,
    #[schema(value_type = Object)]
    pub instance_data: Json<InstanceData>,
    /// Visit counts per node key; bounds cyclic graphs.
    #[schema(value_type = Object)]
    pub node_visits: Json<HashMap<String, i32>>,
    #[schema(value_type = Vec<ExecutionLogEntry>)]
    pub execution_log: Json<Vec<ExecutionLogEntry>>,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn new(
        organization_id: OrganizationId,
        workflow_id: WorkflowDefinitionId,
        entity_type: String,
        entity_id: Uuid,
        subject: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WorkflowInstanceId::new(),
            organization_id,
            workflow_id,
            entity_type,
            entity_id,
            current_node_id: None,
            status: InstanceStatus::Pending,
            instance_data: Json(InstanceData::new(subject)),
            node_visits: Json(HashMap::new()),
            execution_log: Json(Vec::new()),
            retry_count: 0,
            next_retry_at: None,
            error_message: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends to the execution log.
    pub fn log(&mut self, at: DateTime<Utc>, event: &str, node_id: Option<WorkflowNodeId>, detail: Option<Value>) {
        self.execution_log.0.push(ExecutionLogEntry {
            at,
            event: event.to_string(),
            node_id,
            detail,
        });
    }

    /// Increments and returns the visit count for `node_key`.
    pub fn record_visit(&mut self, node_key: &str) -> i32 {
        let count = self.node_visits.0.entry(node_key.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// A human approval task. Terminal once acted on; delegation and escalation
/// create replacement tasks carrying a back-reference.
pub struct WorkflowTask {
    pub id: WorkflowTaskId,
    pub organization_id: OrganizationId,
    pub instance_id: WorkflowInstanceId,
    pub node_id: WorkflowNodeId,
    /// Direct assignee; `None` when assigned to a role.
    pub assignee_id: Option<EmployeeId>,
    pub assignee_role: Option<String>,
    pub status: TaskStatus,
    pub due_at: Option<DateTime<Utc>>,
    /// Set once the single SLA warning for this task has been emitted.
    pub sla_warning_sent: bool,
    pub action_at: Option<DateTime<Utc>>,
    pub action_by: Option<EmployeeId>,
    pub decision_comment: Option<String>,
    /// Original task when this one was created by delegation.
    pub delegated_from: Option<WorkflowTaskId>,
    /// Original task when this one was created by escalation.
    pub escalated_from: Option<WorkflowTaskId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        organization_id: OrganizationId,
        instance_id: WorkflowInstanceId,
        node_id: WorkflowNodeId,
        assignee_id: Option<EmployeeId>,
        assignee_role: Option<String>,
        due_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WorkflowTaskId::new(),
            organization_id,
            instance_id,
            node_id,
            assignee_id,
            assignee_role,
            status: TaskStatus::Pending,
            due_at,
            sla_warning_sent: false,
            action_at: None,
            action_by: None,
            decision_comment: None,
            delegated_from: None,
            escalated_from: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == TaskStatus::Pending
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
/// Payload for acting on a task.
pub struct ActRequest {
    pub decision: TaskDecision,
    /// Required when `decision` is `delegate`.
    pub delegate_to: Option<EmployeeId>,
    pub comments: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WorkflowTaskResponse {
    pub id: WorkflowTaskId,
    pub instance_id: WorkflowInstanceId,
    pub node_id: WorkflowNodeId,
    pub assignee_id: Option<EmployeeId>,
    pub assignee_role: Option<String>,
    pub status: TaskStatus,
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<WorkflowTask> for WorkflowTaskResponse {
    fn from(t: WorkflowTask) -> Self {
        Self {
            id: t.id,
            instance_id: t.instance_id,
            node_id: t.node_id,
            assignee_id: t.assignee_id,
            assignee_role: t.assignee_role,
            status: t.status,
            due_at: t.due_at,
            created_at: t.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_statuses_are_terminal_except_pending() {
        assert!(!TaskStatus::Pending.is_terminal());
        for s in [
            TaskStatus::Approved,
            TaskStatus::Rejected,
            TaskStatus::Delegated,
            TaskStatus::Escalated,
            TaskStatus::Expired,
        ] {
            assert!(s.is_terminal());
        }
    }

    #[test]
    fn evaluation_context_merges_variables_over_subject() {
        let mut data = InstanceData::new(serde_json::json!({
            "employee": { "code": "E001" },
            "working_days": 5.0,
        }));
        data.variables
            .insert("working_days".to_string(), serde_json::json!(3.0));
        let ctx = data.evaluation_context();
        assert_eq!(ctx["working_days"], serde_json::json!(3.0));
        assert_eq!(ctx["employee"]["code"], serde_json::json!("E001"));
    }

    #[test]
    fn visit_counts_accumulate() {
        let mut i = WorkflowInstance::new(
            OrganizationId::new(),
            WorkflowDefinitionId::new(),
            "leave_request".into(),
            Uuid::new_v4(),
            Value::Null,
            Utc::now(),
        );
        assert_eq!(i.record_visit("manager"), 1);
        assert_eq!(i.record_visit("manager"), 2);
        assert_eq!(i.record_visit("end"), 1);
    }
}
