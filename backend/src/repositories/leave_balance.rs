//! Leave balance repository.
//!
//! Mutations run under `FOR UPDATE` on the balance row so reservation and
//! accrual arithmetic is serialized per (employee, leave type, year).

use crate::error::AppError;
use crate::models::accrual::LeaveBalance;
use crate::types::{EmployeeId, LeaveTypeId, OrganizationId};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgConnection;
use sqlx::PgExecutor;

const TABLE_NAME: &str = "leave_balances";
const SELECT_COLUMNS: &str = "id, organization_id, employee_id, leave_type_id, balance_year, \
allocated, used, pending, carried_forward, carry_forward_expiry, carry_forward_expired, \
created_at, updated_at";

#[derive(Debug, Default, Clone, Copy)]
pub struct LeaveBalanceRepository;

impl LeaveBalanceRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn find(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        employee: EmployeeId,
        leave_type: LeaveTypeId,
        year: i32,
    ) -> Result<Option<LeaveBalance>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE organization_id = $1 AND employee_id = $2 \
             AND leave_type_id = $3 AND balance_year = $4",
            SELECT_COLUMNS, TABLE_NAME
        );
        let row = sqlx::query_as::<_, LeaveBalance>(&query)
            .bind(org)
            .bind(employee)
            .bind(leave_type)
            .bind(year)
            .fetch_optional(db)
            .await?;
        Ok(row)
    }

    /// Locks the balance row for the rest of the transaction, creating it
    /// first if missing.
    pub async fn lock_or_create(
        &self,
        conn: &mut PgConnection,
        org: OrganizationId,
        employee: EmployeeId,
        leave_type: LeaveTypeId,
        year: i32,
        now: DateTime<Utc>,
    ) -> Result<LeaveBalance, AppError> {
        let insert = format!(
            "INSERT INTO {} (id, organization_id, employee_id, leave_type_id, balance_year, \
             allocated, used, pending, carried_forward, carry_forward_expiry, \
             carry_forward_expired, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, 0, 0, 0, 0, NULL, FALSE, $6, $6) \
             ON CONFLICT (employee_id, leave_type_id, balance_year) DO NOTHING",
            TABLE_NAME
        );
        sqlx::query(&insert)
            .bind(crate::types::LeaveBalanceId::new())
            .bind(org)
            .bind(employee)
            .bind(leave_type)
            .bind(year)
            .bind(now)
            .execute(&mut *conn)
            .await?;

        let select = format!(
            "SELECT {} FROM {} WHERE organization_id = $1 AND employee_id = $2 \
             AND leave_type_id = $3 AND balance_year = $4 FOR UPDATE",
            SELECT_COLUMNS, TABLE_NAME
        );
        sqlx::query_as::<_, LeaveBalance>(&select)
            .bind(org)
            .bind(employee)
            .bind(leave_type)
            .bind(year)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Leave balance not found".into()))
    }

    /// Persists the mutable amounts of a balance row.
    pub async fn save_amounts(
        &self,
        db: impl PgExecutor<'_>,
        balance: &LeaveBalance,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let query = format!(
            "UPDATE {} SET allocated = $1, used = $2, pending = $3, carried_forward = $4, \
             carry_forward_expiry = $5, carry_forward_expired = $6, updated_at = $7 WHERE id = $8",
            TABLE_NAME
        );
        sqlx::query(&query)
            .bind(balance.allocated)
            .bind(balance.used)
            .bind(balance.pending)
            .bind(balance.carried_forward)
            .bind(balance.carry_forward_expiry)
            .bind(balance.carry_forward_expired)
            .bind(now)
            .bind(balance.id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn find_all_for_employee(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        employee: EmployeeId,
        year: i32,
    ) -> Result<Vec<LeaveBalance>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE organization_id = $1 AND employee_id = $2 \
             AND balance_year = $3 ORDER BY leave_type_id",
            SELECT_COLUMNS, TABLE_NAME
        );
        let rows = sqlx::query_as::<_, LeaveBalance>(&query)
            .bind(org)
            .bind(employee)
            .bind(year)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }
}
