//! Payroll run state machine entities.
//!
//! Run statuses move strictly forward within
//! draft → in_progress → calculated → approved → paid; any non-paid state
//! may cancel.

use crate::types::{EmployeeId, OrganizationId, PayrollRunId, PayrollRunItemId};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PayrollRunStatus {
    Draft,
    InProgress,
    Calculated,
    Approved,
    Paid,
    Cancelled,
}

impl PayrollRunStatus {
    pub fn db_value(&self) -> &'static str {
        match self {
            PayrollRunStatus::Draft => "draft",
            PayrollRunStatus::InProgress => "in_progress",
            PayrollRunStatus::Calculated => "calculated",
            PayrollRunStatus::Approved => "approved",
            PayrollRunStatus::Paid => "paid",
            PayrollRunStatus::Cancelled => "cancelled",
        }
    }

    /// Position in the forward-only order; terminal states have none.
    fn rank(&self) -> Option<u8> {
        match self {
            PayrollRunStatus::Draft => Some(0),
            PayrollRunStatus::InProgress => Some(1),
            PayrollRunStatus::Calculated => Some(2),
            PayrollRunStatus::Approved => Some(3),
            PayrollRunStatus::Paid => Some(4),
            PayrollRunStatus::Cancelled => None,
        }
    }

    /// Whether `self → to` is an allowed transition. Forward steps advance by
    /// exactly one; cancel is allowed from everything except `paid`.
    pub fn can_transition(&self, to: PayrollRunStatus) -> bool {
        if to == PayrollRunStatus::Cancelled {
            return !matches!(self, PayrollRunStatus::Paid | PayrollRunStatus::Cancelled);
        }
        match (self.rank(), to.rank()) {
            (Some(from), Some(target)) => target == from + 1,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PayrollRunStatus::Paid | PayrollRunStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// One payroll cycle for an organization and period.
pub struct PayrollRun {
    pub id: PayrollRunId,
    pub organization_id: OrganizationId,
    /// Optional legal-entity subdivision within the organization.
    pub company: Option<String>,
    pub period_year: i32,
    pub period_month: i32,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub payment_date: Option<NaiveDate>,
    pub status: PayrollRunStatus,
    pub employee_count: i32,
    #[schema(value_type = String)]
    pub total_gross: Decimal,
    #[schema(value_type = String)]
    pub total_deductions: Decimal,
    #[schema(value_type = String)]
    pub total_net: Decimal,
    /// Content hash of calculation inputs; guards idempotent recalculation.
    pub input_hash: Option<String>,
    /// Principal who started processing. The approver must differ.
    pub processed_by: Option<EmployeeId>,
    pub approved_by: Option<EmployeeId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayrollRun {
    pub fn new(
        organization_id: OrganizationId,
        company: Option<String>,
        period_year: i32,
        period_month: i32,
        period_start: NaiveDate,
        period_end: NaiveDate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PayrollRunId::new(),
            organization_id,
            company,
            period_year,
            period_month,
            period_start,
            period_end,
            payment_date: None,
            status: PayrollRunStatus::Draft,
            employee_count: 0,
            total_gross: Decimal::ZERO,
            total_deductions: Decimal::ZERO,
            total_net: Decimal::ZERO,
            input_hash: None,
            processed_by: None,
            approved_by: None,
            approved_at: None,
            paid_at: None,
            cancelled_at: None,
            cancel_reason: None,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// Per-employee computation row backing the run aggregates.
pub struct PayrollRunItem {
    pub id: PayrollRunItemId,
    pub run_id: PayrollRunId,
    pub organization_id: OrganizationId,
    pub employee_id: EmployeeId,
    #[schema(value_type = String)]
    pub gross: Decimal,
    #[schema(value_type = String)]
    pub deductions: Decimal,
    #[schema(value_type = String)]
    pub net: Decimal,
    /// Component breakdown: earnings, statutory, loans, voluntary.
    #[schema(value_type = Object)]
    pub components: Json<Value>,
    pub working_days: f64,
    pub leave_days: f64,
    pub overtime_hours: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PayrollRunResponse {
    pub id: PayrollRunId,
    pub company: Option<String>,
    pub period_year: i32,
    pub period_month: i32,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: PayrollRunStatus,
    pub employee_count: i32,
    #[schema(value_type = String)]
    pub total_gross: Decimal,
    #[schema(value_type = String)]
    pub total_deductions: Decimal,
    #[schema(value_type = String)]
    pub total_net: Decimal,
    pub approved_by: Option<EmployeeId>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<PayrollRun> for PayrollRunResponse {
    fn from(r: PayrollRun) -> Self {
        Self {
            id: r.id,
            company: r.company,
            period_year: r.period_year,
            period_month: r.period_month,
            period_start: r.period_start,
            period_end: r.period_end,
            status: r.status,
            employee_count: r.employee_count,
            total_gross: r.total_gross,
            total_deductions: r.total_deductions,
            total_net: r.total_net,
            approved_by: r.approved_by,
            paid_at: r.paid_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PayrollRunStatus::*;

    #[test]
    fn forward_transitions_advance_by_one() {
        assert!(Draft.can_transition(InProgress));
        assert!(InProgress.can_transition(Calculated));
        assert!(Calculated.can_transition(Approved));
        assert!(Approved.can_transition(Paid));

        assert!(!Draft.can_transition(Calculated));
        assert!(!Calculated.can_transition(InProgress));
        assert!(!Paid.can_transition(Draft));
        assert!(!InProgress.can_transition(InProgress));
    }

    #[test]
    fn cancel_allowed_everywhere_but_paid() {
        assert!(Draft.can_transition(Cancelled));
        assert!(InProgress.can_transition(Cancelled));
        assert!(Calculated.can_transition(Cancelled));
        assert!(Approved.can_transition(Cancelled));
        assert!(!Paid.can_transition(Cancelled));
        assert!(!Cancelled.can_transition(Cancelled));
    }

    #[test]
    fn nothing_leaves_terminal_states() {
        for to in [Draft, InProgress, Calculated, Approved, Paid] {
            assert!(!Paid.can_transition(to));
            assert!(!Cancelled.can_transition(to));
        }
    }
}
