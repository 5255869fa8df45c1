//! On-demand accrual endpoints for HR administrators.

use axum::{
    extract::{Extension, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::models::accrual::AccrualTransaction;
use crate::models::principal::Principal;
use crate::models::response::ApiResponse;
use crate::repositories::AccrualTransactionRepository;
use crate::services::AccrualEngine;
use crate::state::AppState;
use crate::types::{EmployeeId, LeaveTypeId};
use crate::utils::time;
use utoipa::IntoParams;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RunAccrualRequest {
    pub leave_type_id: LeaveTypeId,
    pub period_end: NaiveDate,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RunAccrualResponse {
    pub created: usize,
}

fn require_hr(principal: &Principal) -> Result<(), AppError> {
    if principal.has_role("hr_manager") {
        Ok(())
    } else {
        Err(AppError::Forbidden("requires the hr_manager role".into()))
    }
}

pub async fn run_accrual(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<RunAccrualRequest>,
) -> Result<Json<ApiResponse<RunAccrualResponse>>, AppError> {
    require_hr(&principal)?;
    let now = time::now_utc(&state.config.time_zone);
    let engine = AccrualEngine::new(state.write_pool.clone(), state.config.clone());
    let created = engine
        .run_for(
            principal.organization_id,
            payload.leave_type_id,
            payload.period_end,
            now,
        )
        .await?;
    Ok(Json(ApiResponse::ok(RunAccrualResponse {
        created: created.len(),
    })))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LedgerQuery {
    pub leave_type_id: LeaveTypeId,
    pub year: i32,
}

/// The caller's own accrual ledger for a year: the audit trail behind the
/// balance numbers.
pub async fn my_ledger(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    axum::extract::Query(query): axum::extract::Query<LedgerQuery>,
) -> Result<Json<ApiResponse<Vec<AccrualTransaction>>>, AppError> {
    let entries = AccrualTransactionRepository::new()
        .find_for_year(
            state.read_pool(),
            principal.organization_id,
            principal.employee_id,
            query.leave_type_id,
            query.year,
        )
        .await?;
    Ok(Json(ApiResponse::ok(entries)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CarryForwardRequest {
    pub employee_id: EmployeeId,
    pub leave_type_id: LeaveTypeId,
    pub from_year: i32,
}

pub async fn carry_forward(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CarryForwardRequest>,
) -> Result<Json<ApiResponse<RunAccrualResponse>>, AppError> {
    require_hr(&principal)?;
    let now = time::now_utc(&state.config.time_zone);
    let engine = AccrualEngine::new(state.write_pool.clone(), state.config.clone());
    let created = engine
        .carry_forward(
            principal.organization_id,
            payload.employee_id,
            payload.leave_type_id,
            payload.from_year,
            now,
        )
        .await?;
    Ok(Json(ApiResponse::ok(RunAccrualResponse {
        created: usize::from(created.is_some()),
    })))
}
