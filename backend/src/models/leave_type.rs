//! Leave type model: the per-organization catalog of leave categories.

use crate::models::employee::Gender;
use crate::types::{LeaveTypeId, OrganizationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// A category of leave (annual, sick, parental, ...), tenant-scoped.
pub struct LeaveType {
    pub id: LeaveTypeId,
    pub organization_id: OrganizationId,
    /// Code unique per organization, e.g. `AL` or `SICK`.
    pub code: String,
    pub name: String,
    /// Whether balances come from the accrual engine or are unlimited.
    pub is_accrual_based: bool,
    /// Whether requests run through the approval workflow.
    pub requires_approval: bool,
    /// Workflow definition code used when approval is required.
    pub workflow_code: Option<String>,
    /// Restricts applicability to a gender when set (e.g. maternity leave).
    pub applicable_gender: Option<Gender>,
    pub max_days_per_year: Option<f64>,
    pub carry_forward_allowed: bool,
    pub max_carry_forward_days: f64,
    /// Overdraft policy: when false, `available` must cover the request.
    pub allow_negative_balance: bool,
    /// How far below zero `available` may go when overdraft is allowed.
    pub overdraft_limit_days: f64,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeaveType {
    /// Whether `employee_gender` may request this leave type.
    pub fn applicable_to(&self, employee_gender: Option<Gender>) -> bool {
        match self.applicable_gender {
            None => true,
            Some(required) => employee_gender == Some(required),
        }
    }

    /// The furthest `available` may drop at reservation time.
    pub fn overdraft_floor(&self) -> f64 {
        if self.allow_negative_balance {
            -self.overdraft_limit_days
        } else {
            0.0
        }
    }
}
