//! Payroll run repository.
//!
//! The run row is locked `FOR UPDATE` for every transition, and the status
//! column is re-checked in the UPDATE guard, so transitions are serialized
//! per run and non-monotone writes surface as zero rows affected.

use crate::error::AppError;
use crate::models::payroll::{PayrollRun, PayrollRunItem, PayrollRunStatus};
use crate::types::{OrganizationId, PayrollRunId};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgConnection;
use sqlx::PgExecutor;

const TABLE_NAME: &str = "payroll_runs";
const SELECT_COLUMNS: &str = "id, organization_id, company, period_year, period_month, \
period_start, period_end, payment_date, status, employee_count, total_gross, total_deductions, \
total_net, input_hash, processed_by, approved_by, approved_at, paid_at, cancelled_at, \
cancel_reason, is_deleted, deleted_at, created_at, updated_at";

const ITEM_TABLE: &str = "payroll_run_items";
const ITEM_COLUMNS: &str = "id, run_id, organization_id, employee_id, gross, deductions, net, \
components, working_days, leave_days, overtime_hours, created_at";

#[derive(Debug, Default, Clone, Copy)]
pub struct PayrollRepository;

impl PayrollRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn find_by_id(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        id: PayrollRunId,
    ) -> Result<PayrollRun, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = $1 AND organization_id = $2 AND is_deleted = FALSE",
            SELECT_COLUMNS, TABLE_NAME
        );
        sqlx::query_as::<_, PayrollRun>(&query)
            .bind(id)
            .bind(org)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Payroll run not found".into()))
    }

    /// Locks the run row for the rest of the transaction.
    pub async fn lock_by_id(
        &self,
        conn: &mut PgConnection,
        org: OrganizationId,
        id: PayrollRunId,
    ) -> Result<PayrollRun, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = $1 AND organization_id = $2 AND is_deleted = FALSE \
             FOR UPDATE",
            SELECT_COLUMNS, TABLE_NAME
        );
        sqlx::query_as::<_, PayrollRun>(&query)
            .bind(id)
            .bind(org)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Payroll run not found".into()))
    }

    pub async fn create(
        &self,
        db: impl PgExecutor<'_>,
        item: &PayrollRun,
    ) -> Result<PayrollRun, AppError> {
        let query = format!(
            "INSERT INTO {} (id, organization_id, company, period_year, period_month, \
             period_start, period_end, payment_date, status, employee_count, total_gross, \
             total_deductions, total_net, input_hash, processed_by, approved_by, approved_at, \
             paid_at, cancelled_at, cancel_reason, is_deleted, deleted_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
             $18, $19, $20, $21, $22, $23, $24) RETURNING {}",
            TABLE_NAME, SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, PayrollRun>(&query)
            .bind(item.id)
            .bind(item.organization_id)
            .bind(&item.company)
            .bind(item.period_year)
            .bind(item.period_month)
            .bind(item.period_start)
            .bind(item.period_end)
            .bind(item.payment_date)
            .bind(item.status.db_value())
            .bind(item.employee_count)
            .bind(item.total_gross)
            .bind(item.total_deductions)
            .bind(item.total_net)
            .bind(&item.input_hash)
            .bind(item.processed_by)
            .bind(item.approved_by)
            .bind(item.approved_at)
            .bind(item.paid_at)
            .bind(item.cancelled_at)
            .bind(&item.cancel_reason)
            .bind(item.is_deleted)
            .bind(item.deleted_at)
            .bind(item.created_at)
            .bind(item.updated_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }

    /// Guarded status transition. Returns rows affected; zero means the
    /// run left `from` concurrently.
    pub async fn transition(
        &self,
        db: impl PgExecutor<'_>,
        id: PayrollRunId,
        from: PayrollRunStatus,
        to: PayrollRunStatus,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let query = format!(
            "UPDATE {} SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4",
            TABLE_NAME
        );
        let result = sqlx::query(&query)
            .bind(to.db_value())
            .bind(now)
            .bind(id)
            .bind(from.db_value())
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn save_calculation(
        &self,
        db: impl PgExecutor<'_>,
        id: PayrollRunId,
        employee_count: i32,
        total_gross: Decimal,
        total_deductions: Decimal,
        total_net: Decimal,
        input_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let query = format!(
            "UPDATE {} SET status = 'calculated', employee_count = $1, total_gross = $2, \
             total_deductions = $3, total_net = $4, input_hash = $5, updated_at = $6 \
             WHERE id = $7 AND status = 'in_progress'",
            TABLE_NAME
        );
        let result = sqlx::query(&query)
            .bind(employee_count)
            .bind(total_gross)
            .bind(total_deductions)
            .bind(total_net)
            .bind(input_hash)
            .bind(now)
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn mark_processing(
        &self,
        db: impl PgExecutor<'_>,
        id: PayrollRunId,
        processed_by: crate::types::EmployeeId,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let query = format!(
            "UPDATE {} SET status = 'in_progress', processed_by = $1, updated_at = $2 \
             WHERE id = $3 AND status = 'draft'",
            TABLE_NAME
        );
        let result = sqlx::query(&query)
            .bind(processed_by)
            .bind(now)
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Reverts a calculated run for recalculation after inputs changed.
    pub async fn revert_to_processing(
        &self,
        db: impl PgExecutor<'_>,
        id: PayrollRunId,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let query = format!(
            "UPDATE {} SET status = 'in_progress', input_hash = NULL, updated_at = $1 \
             WHERE id = $2 AND status = 'calculated'",
            TABLE_NAME
        );
        let result = sqlx::query(&query).bind(now).bind(id).execute(db).await?;
        Ok(result.rows_affected())
    }

    pub async fn approve(
        &self,
        db: impl PgExecutor<'_>,
        id: PayrollRunId,
        approved_by: crate::types::EmployeeId,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let query = format!(
            "UPDATE {} SET status = 'approved', approved_by = $1, approved_at = $2, \
             updated_at = $2 WHERE id = $3 AND status = 'calculated'",
            TABLE_NAME
        );
        let result = sqlx::query(&query)
            .bind(approved_by)
            .bind(now)
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn mark_paid(
        &self,
        db: impl PgExecutor<'_>,
        id: PayrollRunId,
        payment_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let query = format!(
            "UPDATE {} SET status = 'paid', payment_date = $1, paid_at = $2, updated_at = $2 \
             WHERE id = $3 AND status = 'approved'",
            TABLE_NAME
        );
        let result = sqlx::query(&query)
            .bind(payment_date)
            .bind(now)
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn cancel(
        &self,
        db: impl PgExecutor<'_>,
        id: PayrollRunId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let query = format!(
            "UPDATE {} SET status = 'cancelled', cancel_reason = $1, cancelled_at = $2, \
             updated_at = $2 WHERE id = $3 AND status NOT IN ('paid', 'cancelled')",
            TABLE_NAME
        );
        let result = sqlx::query(&query)
            .bind(reason)
            .bind(now)
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    // -- items ---------------------------------------------------------------

    pub async fn insert_item(
        &self,
        db: impl PgExecutor<'_>,
        item: &PayrollRunItem,
    ) -> Result<(), AppError> {
        let query = format!(
            "INSERT INTO {} (id, run_id, organization_id, employee_id, gross, deductions, net, \
             components, working_days, leave_days, overtime_hours, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            ITEM_TABLE
        );
        sqlx::query(&query)
            .bind(item.id)
            .bind(item.run_id)
            .bind(item.organization_id)
            .bind(item.employee_id)
            .bind(item.gross)
            .bind(item.deductions)
            .bind(item.net)
            .bind(&item.components)
            .bind(item.working_days)
            .bind(item.leave_days)
            .bind(item.overtime_hours)
            .bind(item.created_at)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Clears items before a recalculation.
    pub async fn delete_items(
        &self,
        db: impl PgExecutor<'_>,
        run_id: PayrollRunId,
    ) -> Result<u64, AppError> {
        let query = format!("DELETE FROM {} WHERE run_id = $1", ITEM_TABLE);
        let result = sqlx::query(&query).bind(run_id).execute(db).await?;
        Ok(result.rows_affected())
    }

    pub async fn find_items(
        &self,
        db: impl PgExecutor<'_>,
        run_id: PayrollRunId,
    ) -> Result<Vec<PayrollRunItem>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE run_id = $1 ORDER BY employee_id",
            ITEM_COLUMNS, ITEM_TABLE
        );
        let rows = sqlx::query_as::<_, PayrollRunItem>(&query)
            .bind(run_id)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }
}
