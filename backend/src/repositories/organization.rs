//! Organization repository.

use crate::error::AppError;
use crate::models::organization::Organization;
use crate::types::OrganizationId;
use sqlx::PgExecutor;

const TABLE_NAME: &str = "organizations";
const SELECT_COLUMNS: &str = "id, name, code, is_active, default_currency, default_locale, \
is_deleted, deleted_at, created_at, updated_at";

#[derive(Debug, Default, Clone, Copy)]
pub struct OrganizationRepository;

impl OrganizationRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn find_by_id(
        &self,
        db: impl PgExecutor<'_>,
        id: OrganizationId,
    ) -> Result<Organization, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = $1 AND is_deleted = FALSE",
            SELECT_COLUMNS, TABLE_NAME
        );
        sqlx::query_as::<_, Organization>(&query)
            .bind(id)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Organization not found".into()))
    }

    pub async fn create(
        &self,
        db: impl PgExecutor<'_>,
        item: &Organization,
    ) -> Result<Organization, AppError> {
        let query = format!(
            "INSERT INTO {} (id, name, code, is_active, default_currency, default_locale, \
             is_deleted, deleted_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {}",
            TABLE_NAME, SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, Organization>(&query)
            .bind(item.id)
            .bind(&item.name)
            .bind(&item.code)
            .bind(item.is_active)
            .bind(&item.default_currency)
            .bind(&item.default_locale)
            .bind(item.is_deleted)
            .bind(item.deleted_at)
            .bind(item.created_at)
            .bind(item.updated_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }
}
