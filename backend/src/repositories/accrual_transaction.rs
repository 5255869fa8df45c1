//! Accrual ledger repository. Rows are append-only.
//!
//! Inserts use `ON CONFLICT DO NOTHING` against the per-period partial
//! unique indexes, which is what makes `run_for` idempotent: a second run
//! inserts nothing.

use crate::error::AppError;
use crate::models::accrual::AccrualTransaction;
use crate::types::{EmployeeId, LeaveTypeId, OrganizationId};
use chrono::NaiveDate;
use sqlx::PgExecutor;

const TABLE_NAME: &str = "accrual_transactions";
const SELECT_COLUMNS: &str = "id, organization_id, employee_id, leave_type_id, policy_id, \
transaction_type, days, previous_balance, new_balance, period_start, period_end, balance_year, \
calculation_basis, created_at";

#[derive(Debug, Default, Clone, Copy)]
pub struct AccrualTransactionRepository;

impl AccrualTransactionRepository {
    pub fn new() -> Self {
        Self
    }

    /// Inserts a ledger entry. Returns the stored row, or `None` when an
    /// entry for the same period already exists.
    pub async fn insert_if_absent(
        &self,
        db: impl PgExecutor<'_>,
        item: &AccrualTransaction,
    ) -> Result<Option<AccrualTransaction>, AppError> {
        let query = format!(
            "INSERT INTO {} (id, organization_id, employee_id, leave_type_id, policy_id, \
             transaction_type, days, previous_balance, new_balance, period_start, period_end, \
             balance_year, calculation_basis, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT DO NOTHING RETURNING {}",
            TABLE_NAME, SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, AccrualTransaction>(&query)
            .bind(item.id)
            .bind(item.organization_id)
            .bind(item.employee_id)
            .bind(item.leave_type_id)
            .bind(item.policy_id)
            .bind(item.transaction_type.db_value())
            .bind(item.days)
            .bind(item.previous_balance)
            .bind(item.new_balance)
            .bind(item.period_start)
            .bind(item.period_end)
            .bind(item.balance_year)
            .bind(&item.calculation_basis)
            .bind(item.created_at)
            .fetch_optional(db)
            .await?;
        Ok(row)
    }

    pub async fn exists_for_period(
        &self,
        db: impl PgExecutor<'_>,
        employee: EmployeeId,
        leave_type: LeaveTypeId,
        period_end: NaiveDate,
    ) -> Result<bool, AppError> {
        let query = format!(
            "SELECT 1 FROM {} WHERE employee_id = $1 AND leave_type_id = $2 \
             AND period_end = $3 AND transaction_type = 'accrual' LIMIT 1",
            TABLE_NAME
        );
        let found = sqlx::query_scalar::<_, i32>(&query)
            .bind(employee)
            .bind(leave_type)
            .bind(period_end)
            .fetch_optional(db)
            .await?;
        Ok(found.is_some())
    }

    pub async fn find_for_year(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        employee: EmployeeId,
        leave_type: LeaveTypeId,
        year: i32,
    ) -> Result<Vec<AccrualTransaction>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE organization_id = $1 AND employee_id = $2 \
             AND leave_type_id = $3 AND balance_year = $4 ORDER BY created_at",
            SELECT_COLUMNS, TABLE_NAME
        );
        let rows = sqlx::query_as::<_, AccrualTransaction>(&query)
            .bind(org)
            .bind(employee)
            .bind(leave_type)
            .bind(year)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }
}
