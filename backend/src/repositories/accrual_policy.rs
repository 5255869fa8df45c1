//! Accrual policy repository.

use crate::error::AppError;
use crate::models::accrual::AccrualPolicy;
use crate::types::{LeaveTypeId, OrganizationId};
use chrono::NaiveDate;
use sqlx::PgExecutor;

const TABLE_NAME: &str = "accrual_policies";
const SELECT_COLUMNS: &str = "id, organization_id, leave_type_id, method, frequency, \
days_per_period, tier_rules, rule_expression, prorate_on_join, prorate_on_leave, \
minimum_service_days, carry_forward_expiry_months, max_balance_cap, effective_from, \
effective_to, is_deleted, deleted_at, created_at, updated_at";

#[derive(Debug, Default, Clone, Copy)]
pub struct AccrualPolicyRepository;

impl AccrualPolicyRepository {
    pub fn new() -> Self {
        Self
    }

    /// The policy in effect for `leave_type` on `date`, preferring the most
    /// recently effective one.
    pub async fn effective_for(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        leave_type: LeaveTypeId,
        date: NaiveDate,
    ) -> Result<Option<AccrualPolicy>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE organization_id = $1 AND leave_type_id = $2 \
             AND effective_from <= $3 AND (effective_to IS NULL OR effective_to >= $3) \
             AND is_deleted = FALSE ORDER BY effective_from DESC LIMIT 1",
            SELECT_COLUMNS, TABLE_NAME
        );
        let row = sqlx::query_as::<_, AccrualPolicy>(&query)
            .bind(org)
            .bind(leave_type)
            .bind(date)
            .fetch_optional(db)
            .await?;
        Ok(row)
    }

    pub async fn create(
        &self,
        db: impl PgExecutor<'_>,
        item: &AccrualPolicy,
    ) -> Result<AccrualPolicy, AppError> {
        let query = format!(
            "INSERT INTO {} (id, organization_id, leave_type_id, method, frequency, \
             days_per_period, tier_rules, rule_expression, prorate_on_join, prorate_on_leave, \
             minimum_service_days, carry_forward_expiry_months, max_balance_cap, effective_from, \
             effective_to, is_deleted, deleted_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
             $18, $19) RETURNING {}",
            TABLE_NAME, SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, AccrualPolicy>(&query)
            .bind(item.id)
            .bind(item.organization_id)
            .bind(item.leave_type_id)
            .bind(item.method.db_value())
            .bind(item.frequency.db_value())
            .bind(item.days_per_period)
            .bind(&item.tier_rules)
            .bind(&item.rule_expression)
            .bind(item.prorate_on_join)
            .bind(item.prorate_on_leave)
            .bind(item.minimum_service_days)
            .bind(item.carry_forward_expiry_months)
            .bind(item.max_balance_cap)
            .bind(item.effective_from)
            .bind(item.effective_to)
            .bind(item.is_deleted)
            .bind(item.deleted_at)
            .bind(item.created_at)
            .bind(item.updated_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }
}
