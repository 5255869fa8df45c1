//! Attendance regularization: employee-initiated corrections that run
//! through the approval workflow before the record is amended.

use crate::types::{
    AttendanceId, EmployeeId, OrganizationId, RegularizationId, WorkflowInstanceId,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

pub use crate::models::request_status::RequestStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RegularizationType {
    MissingIn,
    MissingOut,
    Late,
    Early,
    FullDay,
}

impl RegularizationType {
    pub fn db_value(&self) -> &'static str {
        match self {
            RegularizationType::MissingIn => "missing_in",
            RegularizationType::MissingOut => "missing_out",
            RegularizationType::Late => "late",
            RegularizationType::Early => "early",
            RegularizationType::FullDay => "full_day",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct RegularizationRequest {
    pub id: RegularizationId,
    pub organization_id: OrganizationId,
    pub employee_id: EmployeeId,
    /// The record being corrected; absent for full-day insertions.
    pub attendance_id: Option<AttendanceId>,
    pub date: NaiveDate,
    pub regularization_type: RegularizationType,
    pub proposed_check_in: Option<DateTime<Utc>>,
    pub proposed_check_out: Option<DateTime<Utc>>,
    pub reason: String,
    pub status: RequestStatus,
    pub workflow_instance_id: Option<WorkflowInstanceId>,
    pub decided_by: Option<EmployeeId>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decision_comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RegularizationRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        organization_id: OrganizationId,
        employee_id: EmployeeId,
        attendance_id: Option<AttendanceId>,
        date: NaiveDate,
        regularization_type: RegularizationType,
        proposed_check_in: Option<DateTime<Utc>>,
        proposed_check_out: Option<DateTime<Utc>>,
        reason: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RegularizationId::new(),
            organization_id,
            employee_id,
            attendance_id,
            date,
            regularization_type,
            proposed_check_in,
            proposed_check_out,
            reason,
            status: RequestStatus::Pending,
            workflow_instance_id: None,
            decided_by: None,
            decided_at: None,
            decision_comment: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
/// Payload used to file a regularization.
pub struct CreateRegularization {
    pub date: NaiveDate,
    pub regularization_type: RegularizationType,
    pub proposed_check_in: Option<DateTime<Utc>>,
    pub proposed_check_out: Option<DateTime<Utc>>,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegularizationResponse {
    pub id: RegularizationId,
    pub employee_id: EmployeeId,
    pub attendance_id: Option<AttendanceId>,
    pub date: NaiveDate,
    pub regularization_type: RegularizationType,
    pub proposed_check_in: Option<DateTime<Utc>>,
    pub proposed_check_out: Option<DateTime<Utc>>,
    pub reason: String,
    pub status: RequestStatus,
    pub workflow_instance_id: Option<WorkflowInstanceId>,
    pub created_at: DateTime<Utc>,
}

impl From<RegularizationRequest> for RegularizationResponse {
    fn from(r: RegularizationRequest) -> Self {
        Self {
            id: r.id,
            employee_id: r.employee_id,
            attendance_id: r.attendance_id,
            date: r.date,
            regularization_type: r.regularization_type,
            proposed_check_in: r.proposed_check_in,
            proposed_check_out: r.proposed_check_out,
            reason: r.reason,
            status: r.status,
            workflow_instance_id: r.workflow_instance_id,
            created_at: r.created_at,
        }
    }
}
