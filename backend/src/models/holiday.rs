//! Organization holiday calendar.

use crate::types::{HolidayId, OrganizationId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Holiday {
    pub id: HolidayId,
    pub organization_id: OrganizationId,
    pub holiday_date: NaiveDate,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Holiday {
    pub fn new(
        organization_id: OrganizationId,
        holiday_date: NaiveDate,
        name: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: HolidayId::new(),
            organization_id,
            holiday_date,
            name,
            created_at: now,
        }
    }
}
