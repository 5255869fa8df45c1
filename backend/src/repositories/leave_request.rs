//! Leave request repository.
//!
//! Status updates are guarded (`WHERE status = ...`) so a lost race shows
//! up as zero rows affected instead of a silent overwrite.

use crate::error::AppError;
use crate::models::leave_request::{LeaveRequest, RequestStatus};
use crate::types::{EmployeeId, LeaveRequestId, OrganizationId, WorkflowInstanceId};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgExecutor;

const TABLE_NAME: &str = "leave_requests";
const SELECT_COLUMNS: &str = "id, organization_id, employee_id, leave_type_id, from_date, \
to_date, is_half_day, working_days, total_days, reason, status, workflow_instance_id, \
decided_by, decided_at, decision_comment, cancelled_at, is_deleted, deleted_at, created_at, \
updated_at";

#[derive(Debug, Default, Clone, Copy)]
pub struct LeaveRequestRepository;

impl LeaveRequestRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn find_by_id(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        id: LeaveRequestId,
    ) -> Result<LeaveRequest, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = $1 AND organization_id = $2 AND is_deleted = FALSE",
            SELECT_COLUMNS, TABLE_NAME
        );
        sqlx::query_as::<_, LeaveRequest>(&query)
            .bind(id)
            .bind(org)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Leave request not found".into()))
    }

    /// Whether an approved or completed request covers `date`.
    pub async fn covers_date(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        employee: EmployeeId,
        date: NaiveDate,
    ) -> Result<bool, AppError> {
        let query = format!(
            "SELECT 1 FROM {} WHERE organization_id = $1 AND employee_id = $2 \
             AND from_date <= $3 AND to_date >= $3 \
             AND status IN ('approved', 'completed') AND is_deleted = FALSE LIMIT 1",
            TABLE_NAME
        );
        let found = sqlx::query_scalar::<_, i32>(&query)
            .bind(org)
            .bind(employee)
            .bind(date)
            .fetch_optional(db)
            .await?;
        Ok(found.is_some())
    }

    pub async fn find_by_employee(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        employee: EmployeeId,
    ) -> Result<Vec<LeaveRequest>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE organization_id = $1 AND employee_id = $2 \
             AND is_deleted = FALSE ORDER BY created_at DESC",
            SELECT_COLUMNS, TABLE_NAME
        );
        let rows = sqlx::query_as::<_, LeaveRequest>(&query)
            .bind(org)
            .bind(employee)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    /// Requests of any blocking status intersecting `[from, to]`.
    pub async fn find_overlapping(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        employee: EmployeeId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LeaveRequest>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE organization_id = $1 AND employee_id = $2 \
             AND from_date <= $3 AND to_date >= $4 \
             AND status IN ('pending', 'approved', 'completed') AND is_deleted = FALSE",
            SELECT_COLUMNS, TABLE_NAME
        );
        let rows = sqlx::query_as::<_, LeaveRequest>(&query)
            .bind(org)
            .bind(employee)
            .bind(to)
            .bind(from)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    pub async fn create(
        &self,
        db: impl PgExecutor<'_>,
        item: &LeaveRequest,
    ) -> Result<LeaveRequest, AppError> {
        let query = format!(
            "INSERT INTO {} (id, organization_id, employee_id, leave_type_id, from_date, to_date, \
             is_half_day, working_days, total_days, reason, status, workflow_instance_id, \
             decided_by, decided_at, decision_comment, cancelled_at, is_deleted, deleted_at, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
             $18, $19, $20) RETURNING {}",
            TABLE_NAME, SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, LeaveRequest>(&query)
            .bind(item.id)
            .bind(item.organization_id)
            .bind(item.employee_id)
            .bind(item.leave_type_id)
            .bind(item.from_date)
            .bind(item.to_date)
            .bind(item.is_half_day)
            .bind(item.working_days)
            .bind(item.total_days)
            .bind(&item.reason)
            .bind(item.status.db_value())
            .bind(item.workflow_instance_id)
            .bind(item.decided_by)
            .bind(item.decided_at)
            .bind(&item.decision_comment)
            .bind(item.cancelled_at)
            .bind(item.is_deleted)
            .bind(item.deleted_at)
            .bind(item.created_at)
            .bind(item.updated_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }

    pub async fn attach_instance(
        &self,
        db: impl PgExecutor<'_>,
        id: LeaveRequestId,
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

    /// Moves a pending request to a terminal decision. Returns rows
    /// affected; zero means the request was no longer pending.
    pub async fn decide(
        &self,
        db: impl PgExecutor<'_>,
        id: LeaveRequestId,
        to: RequestStatus,
        decided_by: Option<EmployeeId>,
        comment: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let query = format!(
            "UPDATE {} SET status = $1, decided_by = $2, decided_at = $3, decision_comment = $4, \
             cancelled_at = CASE WHEN $1 = 'cancelled' THEN $3 ELSE cancelled_at END, \
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

    /// Marks approved requests whose period has fully elapsed as
    /// completed. Run daily.
    pub async fn complete_elapsed(
        &self,
        db: impl PgExecutor<'_>,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let query = format!(
            "UPDATE {} SET status = 'completed', updated_at = $1 \
             WHERE status = 'approved' AND to_date < $2 AND is_deleted = FALSE",
            TABLE_NAME
        );
        let result = sqlx::query(&query)
            .bind(now)
            .bind(today)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leave_request_select_columns_include_expected_fields() {
        assert!(SELECT_COLUMNS.contains("workflow_instance_id"));
        assert!(SELECT_COLUMNS.contains("working_days"));
        assert!(SELECT_COLUMNS.contains("decision_comment"));
    }
}
