//! Employee endpoints: the minimal surface the core needs. Creating and
//! re-parenting employees enforces reporting-chain acyclicity; everything
//! else about HRIS profiles lives outside the core.

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use chrono::{NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::handlers::common::validate_payload;
use crate::models::employee::{CreateEmployee, Employee, EmployeeResponse, EmployeeStatus};
use crate::models::principal::Principal;
use crate::models::response::ApiResponse;
use crate::repositories::{EmployeeRepository, OrganizationRepository};
use crate::state::AppState;
use crate::types::EmployeeId;

fn require_hr(principal: &Principal) -> Result<(), AppError> {
    if principal.has_role("hr_manager") {
        Ok(())
    } else {
        Err(AppError::Forbidden("requires the hr_manager role".into()))
    }
}

pub async fn create_employee(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CreateEmployee>,
) -> Result<Json<ApiResponse<EmployeeResponse>>, AppError> {
    require_hr(&principal)?;
    validate_payload(&payload)?;

    let repo = EmployeeRepository::new();
    let org = principal.organization_id;
    let now = Utc::now();
    let employee_id = EmployeeId::new();

    let organization = OrganizationRepository::new()
        .find_by_id(&state.write_pool, org)
        .await?;
    if !organization.is_active {
        return Err(AppError::conflict_reason(
            "organization is not active",
            "org_inactive",
        ));
    }

    if let Some(manager_id) = payload.manager_id {
        // The manager must exist; a fresh employee cannot be on anyone's
        // chain yet, so existence is the whole check here.
        repo.find_by_id(&state.write_pool, org, manager_id).await?;
    }

    let employee = Employee {
        id: employee_id,
        organization_id: org,
        code: payload.code,
        first_name: payload.first_name,
        last_name: payload.last_name,
        email: payload.email,
        status: EmployeeStatus::Active,
        employment_type: payload.employment_type,
        gender: payload.gender,
        hire_date: payload.hire_date,
        termination_date: None,
        manager_id: payload.manager_id,
        department_code: payload.department_code,
        location: payload.location,
        roles: payload.roles,
        scheduled_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
        scheduled_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
        monthly_salary: Decimal::ZERO,
        is_deleted: false,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    };
    let employee = repo.create(&state.write_pool, &employee).await?;
    Ok(Json(ApiResponse::ok(employee.into())))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetManagerRequest {
    pub manager_id: Option<EmployeeId>,
}

pub async fn set_manager(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<EmployeeId>,
    Json(payload): Json<SetManagerRequest>,
) -> Result<Json<ApiResponse<EmployeeResponse>>, AppError> {
    require_hr(&principal)?;
    let repo = EmployeeRepository::new();
    let org = principal.organization_id;
    repo.find_by_id(&state.write_pool, org, id).await?;

    if let Some(manager_id) = payload.manager_id {
        repo.find_by_id(&state.write_pool, org, manager_id).await?;
        let cycle = repo
            .would_create_cycle(
                &state.write_pool,
                org,
                id,
                manager_id,
                state.config.manager_chain_max_depth * 4,
            )
            .await?;
        if cycle {
            return Err(AppError::conflict_reason(
                "assignment would create a reporting cycle",
                "manager_cycle",
            ));
        }
    }

    repo.set_manager(&state.write_pool, org, id, payload.manager_id, Utc::now())
        .await?;
    let employee = repo.find_by_id(&state.write_pool, org, id).await?;
    Ok(Json(ApiResponse::ok(employee.into())))
}
