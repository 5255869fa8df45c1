//! OpenAPI document assembled from the handler DTO schemas.

use crate::handlers::{
    accrual::{CarryForwardRequest, RunAccrualRequest, RunAccrualResponse},
    calendar::CreateHoliday,
    employee::SetManagerRequest,
    leave::LeaveDecisionRequest,
    payroll::{CancelRunRequest, MarkPaidRequest},
    workflow::{ActResponse, CancelInstanceRequest, CreateDelegationRequest},
};
use crate::models::{
    attendance::{AttendanceResponse, CheckInRequest, CheckOutRequest},
    employee::{CreateEmployee, EmployeeResponse},
    leave_request::{CreateLeaveRequest, LeaveRequestResponse},
    payroll::PayrollRunResponse,
    regularization::{CreateRegularization, RegularizationResponse},
    workflow_instance::{ActRequest, WorkflowTaskResponse},
};
use crate::services::payroll::CreatePayrollRun;
use crate::services::workflow::CreateWorkflowDefinition;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "peopleflow-backend",
        description = "Multi-tenant HR core: leave, attendance, payroll and approval workflows."
    ),
    components(schemas(
        CreateEmployee,
        EmployeeResponse,
        SetManagerRequest,
        CreateLeaveRequest,
        LeaveDecisionRequest,
        LeaveRequestResponse,
        CheckInRequest,
        CheckOutRequest,
        AttendanceResponse,
        CreateRegularization,
        RegularizationResponse,
        ActRequest,
        ActResponse,
        WorkflowTaskResponse,
        CreateWorkflowDefinition,
        CancelInstanceRequest,
        CreatePayrollRun,
        PayrollRunResponse,
        MarkPaidRequest,
        CancelRunRequest,
        RunAccrualRequest,
        RunAccrualResponse,
        CarryForwardRequest,
        CreateHoliday,
        CreateDelegationRequest,
    ))
)]
pub struct ApiDoc;

pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
