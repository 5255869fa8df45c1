//! Accrual policies, the append-only accrual ledger and leave balances.

use crate::types::{
    AccrualPolicyId, AccrualTransactionId, EmployeeId, LeaveBalanceId, LeaveTypeId, OrganizationId,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
/// How entitlement days are computed per period.
pub enum AccrualMethod {
    Fixed,
    Prorated,
    Tiered,
    RuleBased,
}

impl AccrualMethod {
    pub fn db_value(&self) -> &'static str {
        match self {
            AccrualMethod::Fixed => "fixed",
            AccrualMethod::Prorated => "prorated",
            AccrualMethod::Tiered => "tiered",
            AccrualMethod::RuleBased => "rule_based",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccrualFrequency {
    Monthly,
    Quarterly,
    Annual,
    Anniversary,
    PerPayroll,
}

impl AccrualFrequency {
    pub fn db_value(&self) -> &'static str {
        match self {
            AccrualFrequency::Monthly => "monthly",
            AccrualFrequency::Quarterly => "quarterly",
            AccrualFrequency::Annual => "annual",
            AccrualFrequency::Anniversary => "anniversary",
            AccrualFrequency::PerPayroll => "per_payroll",
        }
    }

    /// Number of accrual periods in a calendar year.
    pub fn periods_per_year(&self) -> f64 {
        match self {
            AccrualFrequency::Monthly | AccrualFrequency::PerPayroll => 12.0,
            AccrualFrequency::Quarterly => 4.0,
            AccrualFrequency::Annual | AccrualFrequency::Anniversary => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
/// One tier of a service-length-based accrual table.
pub struct TierRule {
    pub min_years: f64,
    /// Inclusive upper bound; `None` means open-ended.
    pub max_years: Option<f64>,
    pub days_per_year: f64,
}

impl TierRule {
    pub fn matches(&self, service_years: f64) -> bool {
        service_years >= self.min_years
            && self.max_years.map_or(true, |max| service_years <= max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// Accrual policy bound to a leave type.
pub struct AccrualPolicy {
    pub id: AccrualPolicyId,
    pub organization_id: OrganizationId,
    pub leave_type_id: LeaveTypeId,
    pub method: AccrualMethod,
    pub frequency: AccrualFrequency,
    /// Days granted per period for `fixed` and `prorated` methods.
    pub days_per_period: f64,
    /// Ordered tier table for the `tiered` method.
    #[schema(value_type = Vec<TierRule>)]
    pub tier_rules: Json<Vec<TierRule>>,
    /// Expression evaluated by the safe evaluator for `rule_based`.
    pub rule_expression: Option<String>,
    pub prorate_on_join: bool,
    pub prorate_on_leave: bool,
    /// Minimum service before any accrual is granted, in days.
    pub minimum_service_days: i32,
    /// Months after year end before carried-forward days expire.
    pub carry_forward_expiry_months: i32,
    /// Hard cap on `available`; accruals beyond it are truncated.
    pub max_balance_cap: Option<f64>,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccrualPolicy {
    /// Whether the policy covers `on`.
    pub fn effective_on(&self, on: NaiveDate) -> bool {
        on >= self.effective_from && self.effective_to.map_or(true, |to| on <= to)
    }

    /// Locates the first tier covering `service_years`.
    pub fn tier_for(&self, service_years: f64) -> Option<&TierRule> {
        self.tier_rules.0.iter().find(|t| t.matches(service_years))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccrualTransactionType {
    Accrual,
    Adjustment,
    CarryForward,
    Expiry,
}

impl AccrualTransactionType {
    pub fn db_value(&self) -> &'static str {
        match self {
            AccrualTransactionType::Accrual => "accrual",
            AccrualTransactionType::Adjustment => "adjustment",
            AccrualTransactionType::CarryForward => "carry_forward",
            AccrualTransactionType::Expiry => "expiry",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// Append-only ledger entry. Rows are never updated or deleted.
pub struct AccrualTransaction {
    pub id: AccrualTransactionId,
    pub organization_id: OrganizationId,
    pub employee_id: EmployeeId,
    pub leave_type_id: LeaveTypeId,
    pub policy_id: Option<AccrualPolicyId>,
    pub transaction_type: AccrualTransactionType,
    /// Signed day delta applied to the balance.
    pub days: f64,
    pub previous_balance: f64,
    pub new_balance: f64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub balance_year: i32,
    /// Opaque record of how `days` was computed.
    #[schema(value_type = Object)]
    pub calculation_basis: Json<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// Running balance per (employee, leave type, year). Unique on that triple.
pub struct LeaveBalance {
    pub id: LeaveBalanceId,
    pub organization_id: OrganizationId,
    pub employee_id: EmployeeId,
    pub leave_type_id: LeaveTypeId,
    pub balance_year: i32,
    /// Total granted by the accrual ledger for the year.
    pub allocated: f64,
    /// Consumed by completed leave.
    pub used: f64,
    /// Reserved by in-flight requests.
    pub pending: f64,
    pub carried_forward: f64,
    /// Date after which the carried-forward remainder expires.
    pub carry_forward_expiry: Option<NaiveDate>,
    /// Set once the expiry sweep has run for this row.
    pub carry_forward_expired: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeaveBalance {
    pub fn new(
        organization_id: OrganizationId,
        employee_id: EmployeeId,
        leave_type_id: LeaveTypeId,
        balance_year: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LeaveBalanceId::new(),
            organization_id,
            employee_id,
            leave_type_id,
            balance_year,
            allocated: 0.0,
            used: 0.0,
            pending: 0.0,
            carried_forward: 0.0,
            carry_forward_expiry: None,
            carry_forward_expired: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Days currently spendable.
    pub fn available(&self) -> f64 {
        self.allocated - self.used - self.pending + self.carried_forward
    }

    /// Whether `days` can be reserved given the leave type's overdraft floor.
    pub fn can_reserve(&self, days: f64, overdraft_floor: f64) -> bool {
        self.available() - days >= overdraft_floor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_rule_bounds_are_inclusive() {
        let tier = TierRule {
            min_years: 2.0,
            max_years: Some(5.0),
            days_per_year: 18.0,
        };
        assert!(!tier.matches(1.99));
        assert!(tier.matches(2.0));
        assert!(tier.matches(5.0));
        assert!(!tier.matches(5.01));

        let open = TierRule {
            min_years: 5.0,
            max_years: None,
            days_per_year: 24.0,
        };
        assert!(open.matches(30.0));
    }

    #[test]
    fn balance_available_arithmetic() {
        let mut b = LeaveBalance::new(
            OrganizationId::new(),
            EmployeeId::new(),
            LeaveTypeId::new(),
            2025,
            Utc::now(),
        );
        b.allocated = 21.0;
        b.used = 5.0;
        b.pending = 2.0;
        b.carried_forward = 3.0;
        assert_eq!(b.available(), 17.0);
    }

    #[test]
    fn reservation_respects_overdraft_floor() {
        let mut b = LeaveBalance::new(
            OrganizationId::new(),
            EmployeeId::new(),
            LeaveTypeId::new(),
            2025,
            Utc::now(),
        );
        b.allocated = 2.0;
        assert!(b.can_reserve(2.0, 0.0));
        assert!(!b.can_reserve(2.5, 0.0));
        assert!(b.can_reserve(2.5, -1.0));
    }

    #[test]
    fn frequency_periods_per_year() {
        assert_eq!(AccrualFrequency::Monthly.periods_per_year(), 12.0);
        assert_eq!(AccrualFrequency::Quarterly.periods_per_year(), 4.0);
        assert_eq!(AccrualFrequency::Annual.periods_per_year(), 1.0);
    }
}
