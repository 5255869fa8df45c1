//! Workflow task repository.
//!
//! Terminal transitions are guarded on `status = 'pending'`; once a task
//! leaves pending it never changes again. Scheduler queries lock candidate
//! rows with `FOR UPDATE SKIP LOCKED` so contended tasks are skipped, not
//! waited on.

use crate::error::AppError;
use crate::models::principal::Principal;
use crate::models::workflow_instance::{TaskStatus, WorkflowTask};
use crate::types::{EmployeeId, OrganizationId, WorkflowInstanceId, WorkflowNodeId, WorkflowTaskId};
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

const TABLE_NAME: &str = "workflow_tasks";
const SELECT_COLUMNS: &str = "id, organization_id, instance_id, node_id, assignee_id, \
assignee_role, status, due_at, sla_warning_sent, action_at, action_by, decision_comment, \
delegated_from, escalated_from, created_at, updated_at";

#[derive(Debug, Default, Clone, Copy)]
pub struct WorkflowTaskRepository;

impl WorkflowTaskRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn find_by_id(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        id: WorkflowTaskId,
    ) -> Result<WorkflowTask, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = $1 AND organization_id = $2",
            SELECT_COLUMNS, TABLE_NAME
        );
        sqlx::query_as::<_, WorkflowTask>(&query)
            .bind(id)
            .bind(org)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Workflow task not found".into()))
    }

    pub async fn create(
        &self,
        db: impl PgExecutor<'_>,
        item: &WorkflowTask,
    ) -> Result<WorkflowTask, AppError> {
        let query = format!(
            "INSERT INTO {} (id, organization_id, instance_id, node_id, assignee_id, \
             assignee_role, status, due_at, sla_warning_sent, action_at, action_by, \
             decision_comment, delegated_from, escalated_from, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             RETURNING {}",
            TABLE_NAME, SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, WorkflowTask>(&query)
            .bind(item.id)
            .bind(item.organization_id)
            .bind(item.instance_id)
            .bind(item.node_id)
            .bind(item.assignee_id)
            .bind(&item.assignee_role)
            .bind(item.status.db_value())
            .bind(item.due_at)
            .bind(item.sla_warning_sent)
            .bind(item.action_at)
            .bind(item.action_by)
            .bind(&item.decision_comment)
            .bind(item.delegated_from)
            .bind(item.escalated_from)
            .bind(item.created_at)
            .bind(item.updated_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }

    /// Pending tasks visible to the principal: assigned directly or via one
    /// of their roles.
    pub async fn find_pending_for_principal(
        &self,
        db: impl PgExecutor<'_>,
        principal: &Principal,
    ) -> Result<Vec<WorkflowTask>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE organization_id = $1 AND status = 'pending' \
             AND (assignee_id = $2 OR assignee_role = ANY($3)) ORDER BY created_at",
            SELECT_COLUMNS, TABLE_NAME
        );
        let rows = sqlx::query_as::<_, WorkflowTask>(&query)
            .bind(principal.organization_id)
            .bind(principal.employee_id)
            .bind(&principal.roles)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    /// All tasks materialized for a node within an instance, any status.
    pub async fn find_for_node(
        &self,
        db: impl PgExecutor<'_>,
        instance_id: WorkflowInstanceId,
        node_id: WorkflowNodeId,
    ) -> Result<Vec<WorkflowTask>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE instance_id = $1 AND node_id = $2 ORDER BY created_at",
            SELECT_COLUMNS, TABLE_NAME
        );
        let rows = sqlx::query_as::<_, WorkflowTask>(&query)
            .bind(instance_id)
            .bind(node_id)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    pub async fn find_open_for_instance(
        &self,
        db: impl PgExecutor<'_>,
        instance_id: WorkflowInstanceId,
    ) -> Result<Vec<WorkflowTask>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE instance_id = $1 AND status = 'pending' ORDER BY created_at",
            SELECT_COLUMNS, TABLE_NAME
        );
        let rows = sqlx::query_as::<_, WorkflowTask>(&query)
            .bind(instance_id)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    /// Moves a pending task to a terminal status. Returns rows affected;
    /// zero means another actor got there first.
    pub async fn finish(
        &self,
        db: impl PgExecutor<'_>,
        id: WorkflowTaskId,
        to: TaskStatus,
        action_by: Option<EmployeeId>,
        comment: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let query = format!(
            "UPDATE {} SET status = $1, action_at = $2, action_by = $3, decision_comment = $4, \
             updated_at = $2 WHERE id = $5 AND status = 'pending'",
            TABLE_NAME
        );
        let result = sqlx::query(&query)
            .bind(to.db_value())
            .bind(now)
            .bind(action_by)
            .bind(comment)
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn record_comment(
        &self,
        db: impl PgExecutor<'_>,
        id: WorkflowTaskId,
        comment: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let query = format!(
            "UPDATE {} SET decision_comment = $1, updated_at = $2 \
             WHERE id = $3 AND status = 'pending'",
            TABLE_NAME
        );
        let result = sqlx::query(&query)
            .bind(comment)
            .bind(now)
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn mark_warning_sent(
        &self,
        db: impl PgExecutor<'_>,
        id: WorkflowTaskId,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let query = format!(
            "UPDATE {} SET sla_warning_sent = TRUE, updated_at = $1 \
             WHERE id = $2 AND status = 'pending' AND sla_warning_sent = FALSE",
            TABLE_NAME
        );
        let result = sqlx::query(&query).bind(now).bind(id).execute(db).await?;
        Ok(result.rows_affected())
    }

    /// Pending tasks at or past 90% of their SLA with no warning yet.
    /// Rows locked elsewhere are skipped.
    pub async fn find_due_for_warning(
        &self,
        db: impl PgExecutor<'_>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WorkflowTask>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE status = 'pending' AND sla_warning_sent = FALSE \
             AND due_at IS NOT NULL \
             AND $1 >= created_at + (due_at - created_at) * 0.9 \
             ORDER BY due_at LIMIT $2 FOR UPDATE SKIP LOCKED",
            SELECT_COLUMNS, TABLE_NAME
        );
        let rows = sqlx::query_as::<_, WorkflowTask>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    /// Pending tasks past `cutoff` relative to their due time, for
    /// escalation or expiry sweeps. Rows locked elsewhere are skipped.
    pub async fn find_overdue(
        &self,
        db: impl PgExecutor<'_>,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WorkflowTask>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE status = 'pending' AND due_at IS NOT NULL AND due_at <= $1 \
             ORDER BY due_at LIMIT $2 FOR UPDATE SKIP LOCKED",
            SELECT_COLUMNS, TABLE_NAME
        );
        let rows = sqlx::query_as::<_, WorkflowTask>(&query)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }
}
