//! Organization model, the root of tenant isolation.

use crate::types::OrganizationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// A tenant. Every other entity carries an `organization_id` referencing one of these.
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    /// Short code unique across the system.
    pub code: String,
    pub is_active: bool,
    pub default_currency: String,
    pub default_locale: String,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: String, code: String, now: DateTime<Utc>) -> Self {
        Self {
            id: OrganizationId::new(),
            name,
            code,
            is_active: true,
            default_currency: "USD".to_string(),
            default_locale: "en".to_string(),
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
