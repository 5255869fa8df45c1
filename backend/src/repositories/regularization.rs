//! Regularization request repository.

use crate::error::AppError;
use crate::models::regularization::{RegularizationRequest, RequestStatus};
use crate::types::{EmployeeId, OrganizationId, RegularizationId, WorkflowInstanceId};
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

const TABLE_NAME: &str = "regularization_requests";
const SELECT_COLUMNS: &str = "id, organization_id, employee_id, attendance_id, date, \
regularization_type, proposed_check_in, proposed_check_out, reason, status, \
workflow_instance_id, decided_by, decided_at, decision_comment, created_at, updated_at";

#[derive(Debug, Default, Clone, Copy)]
pub struct RegularizationRepository;

impl RegularizationRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn find_by_id(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        id: RegularizationId,
    ) -> Result<RegularizationRequest, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = $1 AND organization_id = $2",
            SELECT_COLUMNS, TABLE_NAME
        );
        sqlx::query_as::<_, RegularizationRequest>(&query)
            .bind(id)
            .bind(org)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Regularization request not found".into()))
    }

    pub async fn find_by_employee(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        employee: EmployeeId,
    ) -> Result<Vec<RegularizationRequest>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE organization_id = $1 AND employee_id = $2 \
             ORDER BY created_at DESC",
            SELECT_COLUMNS, TABLE_NAME
        );
        let rows = sqlx::query_as::<_, RegularizationRequest>(&query)
            .bind(org)
            .bind(employee)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    pub async fn create(
        &self,
        db: impl PgExecutor<'_>,
        item: &RegularizationRequest,
    ) -> Result<RegularizationRequest, AppError> {
        let query = format!(
            "INSERT INTO {} (id, organization_id, employee_id, attendance_id, date, \
             regularization_type, proposed_check_in, proposed_check_out, reason, status, \
             workflow_instance_id, decided_by, decided_at, decision_comment, created_at, \
             updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             RETURNING {}",
            TABLE_NAME, SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, RegularizationRequest>(&query)
            .bind(item.id)
            .bind(item.organization_id)
            .bind(item.employee_id)
            .bind(item.attendance_id)
            .bind(item.date)
            .bind(item.regularization_type.db_value())
            .bind(item.proposed_check_in)
            .bind(item.proposed_check_out)
            .bind(&item.reason)
            .bind(item.status.db_value())
            .bind(item.workflow_instance_id)
            .bind(item.decided_by)
            .bind(item.decided_at)
            .bind(&item.decision_comment)
            .bind(item.created_at)
            .bind(item.updated_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }

    pub async fn attach_instance(
        &self,
        db: impl PgExecutor<'_>,
        id: RegularizationId,
        instance_id: WorkflowInstanceId,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let query = format!(
            "UPDATE {} SET workflow_instance_id = $1, updated_at = $2 WHERE id = $3",
            TABLE_NAME
        );
        let result = sqlx::query(&query)
            .bind(instance_id)
            .bind(now)
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn decide(
        &self,
        db: impl PgExecutor<'_>,
        id: RegularizationId,
        to: RequestStatus,
        decided_by: Option<EmployeeId>,
        comment: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let query = format!(
            "UPDATE {} SET status = $1, decided_by = $2, decided_at = $3, decision_comment = $4, \
             updated_at = $3 WHERE id = $5 AND status = 'pending'",
            TABLE_NAME
        );
        let result = sqlx::query(&query)
            .bind(to.db_value())
            .bind(decided_by)
            .bind(now)
            .bind(comment)
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }
}
