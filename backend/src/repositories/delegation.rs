//! Approval delegation repository.

use crate::error::AppError;
use crate::models::delegation::ApprovalDelegation;
use crate::types::{EmployeeId, OrganizationId};
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

const TABLE_NAME: &str = "approval_delegations";
const SELECT_COLUMNS: &str = "id, organization_id, delegator_id, delegate_id, starts_at, \
ends_at, reason, is_active, created_at";

#[derive(Debug, Default, Clone, Copy)]
pub struct DelegationRepository;

impl DelegationRepository {
    pub fn new() -> Self {
        Self
    }

    /// The delegation window covering `now` for `delegator`, if any.
    /// Overlapping windows resolve to the most recently created one.
    pub async fn active_for(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        delegator: EmployeeId,
        now: DateTime<Utc>,
    ) -> Result<Option<ApprovalDelegation>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE organization_id = $1 AND delegator_id = $2 \
             AND is_active = TRUE AND starts_at <= $3 AND ends_at > $3 \
             ORDER BY created_at DESC LIMIT 1",
            SELECT_COLUMNS, TABLE_NAME
        );
        let row = sqlx::query_as::<_, ApprovalDelegation>(&query)
            .bind(org)
            .bind(delegator)
            .bind(now)
            .fetch_optional(db)
            .await?;
        Ok(row)
    }

    pub async fn create(
        &self,
        db: impl PgExecutor<'_>,
        item: &ApprovalDelegation,
    ) -> Result<ApprovalDelegation, AppError> {
        let query = format!(
            "INSERT INTO {} (id, organization_id, delegator_id, delegate_id, starts_at, ends_at, \
             reason, is_active, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {}",
            TABLE_NAME, SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, ApprovalDelegation>(&query)
            .bind(item.id)
            .bind(item.organization_id)
            .bind(item.delegator_id)
            .bind(item.delegate_id)
            .bind(item.starts_at)
            .bind(item.ends_at)
            .bind(&item.reason)
            .bind(item.is_active)
            .bind(item.created_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }
}
