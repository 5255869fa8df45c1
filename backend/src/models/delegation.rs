//! Approval delegation windows.
//!
//! While a window covers `now`, tasks selected for the delegator are
//! assigned to the delegate with the original approver preserved for audit.

use crate::types::{DelegationId, EmployeeId, OrganizationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ApprovalDelegation {
    pub id: DelegationId,
    pub organization_id: OrganizationId,
    pub delegator_id: EmployeeId,
    pub delegate_id: EmployeeId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ApprovalDelegation {
    pub fn covers(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.starts_at <= now && now < self.ends_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_bounds_are_half_open() {
        let d = ApprovalDelegation {
            id: DelegationId::new(),
            organization_id: OrganizationId::new(),
            delegator_id: EmployeeId::new(),
            delegate_id: EmployeeId::new(),
            starts_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            ends_at: Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap(),
            reason: None,
            is_active: true,
            created_at: Utc::now(),
        };
        assert!(d.covers(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));
        assert!(d.covers(Utc.with_ymd_and_hms(2025, 6, 14, 23, 59, 59).unwrap()));
        assert!(!d.covers(Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap()));
        assert!(!d.covers(Utc.with_ymd_and_hms(2025, 5, 31, 0, 0, 0).unwrap()));
    }
}
