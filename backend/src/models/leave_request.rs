//! Models describing employee leave requests and their lifecycle.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use crate::types::{EmployeeId, LeaveRequestId, LeaveTypeId, OrganizationId, WorkflowInstanceId};

pub use crate::models::request_status::RequestStatus;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// Database representation of a leave request submitted by an employee.
pub struct LeaveRequest {
    /// Unique identifier for the leave request.
    pub id: LeaveRequestId,
    pub organization_id: OrganizationId,
    /// Identifier of the employee who submitted the request.
    pub employee_id: EmployeeId,
    pub leave_type_id: LeaveTypeId,
    /// First day of the requested leave period.
    pub from_date: NaiveDate,
    /// Last day of the requested leave period.
    pub to_date: NaiveDate,
    /// Half-day request; only meaningful for single-day spans.
    pub is_half_day: bool,
    /// Working days consumed, weekends and holidays excluded.
    pub working_days: f64,
    /// Calendar span of the request.
    pub total_days: f64,
    /// Optional employee-provided explanation.
    pub reason: Option<String>,
    pub status: RequestStatus,
    /// Approval workflow instance driving this request, when one exists.
    pub workflow_instance_id: Option<WorkflowInstanceId>,
    /// Reviewer who made the terminal decision, if any.
    pub decided_by: Option<EmployeeId>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decision_comment: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeaveRequest {
    /// Creates a new leave request pending approval.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        organization_id: OrganizationId,
        employee_id: EmployeeId,
        leave_type_id: LeaveTypeId,
        from_date: NaiveDate,
        to_date: NaiveDate,
        is_half_day: bool,
        working_days: f64,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LeaveRequestId::new(),
            organization_id,
            employee_id,
            leave_type_id,
            from_date,
            to_date,
            is_half_day,
            working_days,
            total_days: (to_date - from_date).num_days() as f64 + 1.0,
            reason,
            status: RequestStatus::Pending,
            workflow_instance_id: None,
            decided_by: None,
            decided_at: None,
            decision_comment: None,
            cancelled_at: None,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns `true` while the request is awaiting a reviewer decision.
    pub fn is_pending(&self) -> bool {
        matches!(self.status, RequestStatus::Pending)
    }

    /// Whether this request's window intersects `[from, to]`.
    pub fn overlaps(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.from_date <= to && from <= self.to_date
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
/// Payload used to create a new leave request.
#[validate(schema(function = "validate_leave_date_range"))]
pub struct CreateLeaveRequest {
    pub leave_type_id: LeaveTypeId,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    #[serde(default)]
    pub is_half_day: bool,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

fn validate_leave_date_range(req: &CreateLeaveRequest) -> Result<(), validator::ValidationError> {
    if req.from_date > req.to_date {
        return Err(validator::ValidationError::new("from_date_after_to_date"));
    }
    if req.is_half_day && req.from_date != req.to_date {
        return Err(validator::ValidationError::new("half_day_spans_multiple_days"));
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
/// API representation shared with clients.
pub struct LeaveRequestResponse {
    pub id: LeaveRequestId,
    pub employee_id: EmployeeId,
    pub leave_type_id: LeaveTypeId,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub is_half_day: bool,
    pub working_days: f64,
    pub total_days: f64,
    pub reason: Option<String>,
    pub status: RequestStatus,
    pub workflow_instance_id: Option<WorkflowInstanceId>,
    pub decided_by: Option<EmployeeId>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decision_comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<LeaveRequest> for LeaveRequestResponse {
    fn from(request: LeaveRequest) -> Self {
        LeaveRequestResponse {
            id: request.id,
            employee_id: request.employee_id,
            leave_type_id: request.leave_type_id,
            from_date: request.from_date,
            to_date: request.to_date,
            is_half_day: request.is_half_day,
            working_days: request.working_days,
            total_days: request.total_days,
            reason: request.reason,
            status: request.status,
            workflow_instance_id: request.workflow_instance_id,
            decided_by: request.decided_by,
            decided_at: request.decided_at,
            decision_comment: request.decision_comment,
            created_at: request.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    fn request(from: NaiveDate, to: NaiveDate) -> LeaveRequest {
        LeaveRequest::new(
            OrganizationId::new(),
            EmployeeId::new(),
            LeaveTypeId::new(),
            from,
            to,
            false,
            5.0,
            None,
            Utc::now(),
        )
    }

    #[test]
    fn overlap_detection_covers_boundaries() {
        let feb = |d| NaiveDate::from_ymd_opt(2025, 2, d).unwrap();
        let r = request(feb(3), feb(7));

        assert!(r.overlaps(feb(5), feb(6)));
        assert!(r.overlaps(feb(7), feb(10)));
        assert!(r.overlaps(feb(1), feb(3)));
        assert!(!r.overlaps(feb(8), feb(10)));
        assert!(!r.overlaps(feb(1), feb(2)));
    }

    #[test]
    fn total_days_is_inclusive_span() {
        let feb = |d| NaiveDate::from_ymd_opt(2025, 2, d).unwrap();
        let r = request(feb(3), feb(7));
        assert_eq!(r.total_days, 5.0);
    }

    #[test]
    fn create_payload_rejects_inverted_range() {
        let req = CreateLeaveRequest {
            leave_type_id: LeaveTypeId::new(),
            from_date: NaiveDate::from_ymd_opt(2025, 2, 7).unwrap(),
            to_date: NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
            is_half_day: false,
            reason: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn create_payload_rejects_multi_day_half_day() {
        let req = CreateLeaveRequest {
            leave_type_id: LeaveTypeId::new(),
            from_date: NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
            to_date: NaiveDate::from_ymd_opt(2025, 2, 4).unwrap(),
            is_half_day: true,
            reason: None,
        };
        assert!(req.validate().is_err());
    }
}
