//! Workflow instance repository.

use crate::error::AppError;
use crate::models::workflow_instance::WorkflowInstance;
use crate::types::{OrganizationId, WorkflowInstanceId};
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

const TABLE_NAME: &str = "workflow_instances";
const SELECT_COLUMNS: &str = "id, organization_id, workflow_id, entity_type, entity_id, \
current_node_id, status, instance_data, node_visits, execution_log, retry_count, next_retry_at, \
error_message, completed_at, created_at, updated_at";

#[derive(Debug, Default, Clone, Copy)]
pub struct WorkflowInstanceRepository;

impl WorkflowInstanceRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn find_by_id(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        id: WorkflowInstanceId,
    ) -> Result<WorkflowInstance, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = $1 AND organization_id = $2",
            SELECT_COLUMNS, TABLE_NAME
        );
        sqlx::query_as::<_, WorkflowInstance>(&query)
            .bind(id)
            .bind(org)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Workflow instance not found".into()))
    }

    pub async fn create(
        &self,
        db: impl PgExecutor<'_>,
        item: &WorkflowInstance,
    ) -> Result<WorkflowInstance, AppError> {
        let query = format!(
            "INSERT INTO {} (id, organization_id, workflow_id, entity_type, entity_id, \
             current_node_id, status, instance_data, node_visits, execution_log, retry_count, \
             next_retry_at, error_message, completed_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             RETURNING {}",
            TABLE_NAME, SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, WorkflowInstance>(&query)
            .bind(item.id)
            .bind(item.organization_id)
            .bind(item.workflow_id)
            .bind(&item.entity_type)
            .bind(item.entity_id)
            .bind(item.current_node_id)
            .bind(item.status.db_value())
            .bind(&item.instance_data)
            .bind(&item.node_visits)
            .bind(&item.execution_log)
            .bind(item.retry_count)
            .bind(item.next_retry_at)
            .bind(&item.error_message)
            .bind(item.completed_at)
            .bind(item.created_at)
            .bind(item.updated_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }

    /// Persists the mutable execution state of an instance.
    pub async fn save(
        &self,
        db: impl PgExecutor<'_>,
        item: &WorkflowInstance,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let query = format!(
            "UPDATE {} SET current_node_id = $1, status = $2, instance_data = $3, \
             node_visits = $4, execution_log = $5, retry_count = $6, next_retry_at = $7, \
             error_message = $8, completed_at = $9, updated_at = $10 WHERE id = $11",
            TABLE_NAME
        );
        sqlx::query(&query)
            .bind(item.current_node_id)
            .bind(item.status.db_value())
            .bind(&item.instance_data)
            .bind(&item.node_visits)
            .bind(&item.execution_log)
            .bind(item.retry_count)
            .bind(item.next_retry_at)
            .bind(&item.error_message)
            .bind(item.completed_at)
            .bind(now)
            .bind(item.id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Open instances whose transient-error backoff has elapsed.
    pub async fn find_due_for_retry(
        &self,
        db: impl PgExecutor<'_>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WorkflowInstance>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE status IN ('pending', 'in_progress') \
             AND next_retry_at IS NOT NULL AND next_retry_at <= $1 \
             ORDER BY next_retry_at LIMIT $2",
            SELECT_COLUMNS, TABLE_NAME
        );
        let rows = sqlx::query_as::<_, WorkflowInstance>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    pub async fn find_open_for_subject(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        entity_type: &str,
        entity_id: uuid::Uuid,
    ) -> Result<Vec<WorkflowInstance>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE organization_id = $1 AND entity_type = $2 \
             AND entity_id = $3 AND status IN ('pending', 'in_progress')",
            SELECT_COLUMNS, TABLE_NAME
        );
        let rows = sqlx::query_as::<_, WorkflowInstance>(&query)
            .bind(org)
            .bind(entity_type)
            .bind(entity_id)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

}
