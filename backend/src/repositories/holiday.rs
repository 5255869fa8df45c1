//! Holiday calendar repository.

use crate::error::AppError;
use crate::models::holiday::Holiday;
use crate::types::OrganizationId;
use chrono::NaiveDate;
use sqlx::PgExecutor;

const TABLE_NAME: &str = "holidays";
const SELECT_COLUMNS: &str = "id, organization_id, holiday_date, name, created_at";

#[derive(Debug, Default, Clone, Copy)]
pub struct HolidayRepository;

impl HolidayRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn find_dates_in_range(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NaiveDate>, AppError> {
        let query = format!(
            "SELECT holiday_date FROM {} WHERE organization_id = $1 \
             AND holiday_date BETWEEN $2 AND $3 ORDER BY holiday_date",
            TABLE_NAME
        );
        let dates = sqlx::query_scalar::<_, NaiveDate>(&query)
            .bind(org)
            .bind(from)
            .bind(to)
            .fetch_all(db)
            .await?;
        Ok(dates)
    }

    pub async fn create(&self, db: impl PgExecutor<'_>, item: &Holiday) -> Result<Holiday, AppError> {
        let query = format!(
            "INSERT INTO {} (id, organization_id, holiday_date, name, created_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            TABLE_NAME, SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, Holiday>(&query)
            .bind(item.id)
            .bind(item.organization_id)
            .bind(item.holiday_date)
            .bind(&item.name)
            .bind(item.created_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }
}
