//! Leave type repository.

use crate::error::AppError;
use crate::models::leave_type::LeaveType;
use crate::repositories::repository::Repository;
use crate::types::{LeaveTypeId, OrganizationId};
use sqlx::PgExecutor;

const TABLE_NAME: &str = "leave_types";
const SELECT_COLUMNS: &str = "id, organization_id, code, name, is_accrual_based, \
requires_approval, workflow_code, applicable_gender, max_days_per_year, carry_forward_allowed, \
max_carry_forward_days, allow_negative_balance, overdraft_limit_days, is_deleted, deleted_at, \
created_at, updated_at";

#[derive(Debug, Default, Clone, Copy)]
pub struct LeaveTypeRepository;

impl LeaveTypeRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn find_all(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
    ) -> Result<Vec<LeaveType>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE organization_id = $1 AND is_deleted = FALSE ORDER BY code",
            SELECT_COLUMNS, TABLE_NAME
        );
        let rows = sqlx::query_as::<_, LeaveType>(&query)
            .bind(org)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

}

impl Repository<LeaveType> for LeaveTypeRepository {
    const TABLE: &'static str = TABLE_NAME;
    type Id = LeaveTypeId;

    async fn find_by_id(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        id: LeaveTypeId,
    ) -> Result<LeaveType, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = $1 AND organization_id = $2 AND is_deleted = FALSE",
            SELECT_COLUMNS, TABLE_NAME
        );
        sqlx::query_as::<_, LeaveType>(&query)
            .bind(id)
            .bind(org)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Leave type not found".into()))
    }

    async fn create(
        &self,
        db: impl PgExecutor<'_>,
        item: &LeaveType,
    ) -> Result<LeaveType, AppError> {
        let query = format!(
            "INSERT INTO {} (id, organization_id, code, name, is_accrual_based, \
             requires_approval, workflow_code, applicable_gender, max_days_per_year, \
             carry_forward_allowed, max_carry_forward_days, allow_negative_balance, \
             overdraft_limit_days, is_deleted, deleted_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             RETURNING {}",
            TABLE_NAME, SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, LeaveType>(&query)
            .bind(item.id)
            .bind(item.organization_id)
            .bind(&item.code)
            .bind(&item.name)
            .bind(item.is_accrual_based)
            .bind(item.requires_approval)
            .bind(&item.workflow_code)
            .bind(item.applicable_gender.map(|g| g.db_value()))
            .bind(item.max_days_per_year)
            .bind(item.carry_forward_allowed)
            .bind(item.max_carry_forward_days)
            .bind(item.allow_negative_balance)
            .bind(item.overdraft_limit_days)
            .bind(item.is_deleted)
            .bind(item.deleted_at)
            .bind(item.created_at)
            .bind(item.updated_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }
}
