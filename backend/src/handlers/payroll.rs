//! Payroll endpoints.

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::handlers::common::validate_payload;
use crate::models::payroll::{PayrollRunItem, PayrollRunResponse};
use crate::models::principal::Principal;
use crate::models::response::ApiResponse;
use crate::services::payroll::{CreatePayrollRun, PayrollService};
use crate::state::AppState;
use crate::types::PayrollRunId;
use crate::utils::time;

const PAYROLL_ROLE: &str = "payroll_admin";

fn service(state: &AppState) -> PayrollService {
    PayrollService::new(state.write_pool.clone(), state.config.clone())
}

fn require_payroll_role(principal: &Principal) -> Result<(), AppError> {
    if principal.has_role(PAYROLL_ROLE) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "requires the {} role",
            PAYROLL_ROLE
        )))
    }
}

pub async fn create_run(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CreatePayrollRun>,
) -> Result<Json<ApiResponse<PayrollRunResponse>>, AppError> {
    require_payroll_role(&principal)?;
    validate_payload(&payload)?;
    let now = time::now_utc(&state.config.time_zone);
    let run = service(&state).create_run(&principal, payload, now).await?;
    Ok(Json(ApiResponse::ok(run.into())))
}

pub async fn start_processing(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<PayrollRunId>,
) -> Result<Json<ApiResponse<PayrollRunResponse>>, AppError> {
    require_payroll_role(&principal)?;
    let today = time::today_local(&state.config.time_zone);
    let now = time::now_utc(&state.config.time_zone);
    let run = service(&state)
        .start_processing(&principal, id, today, now)
        .await?;
    Ok(Json(ApiResponse::ok(run.into())))
}

pub async fn mark_calculated(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<PayrollRunId>,
) -> Result<Json<ApiResponse<PayrollRunResponse>>, AppError> {
    require_payroll_role(&principal)?;
    let now = time::now_utc(&state.config.time_zone);
    let run = service(&state).mark_calculated(&principal, id, now).await?;
    Ok(Json(ApiResponse::ok(run.into())))
}

pub async fn revert_run(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<PayrollRunId>,
) -> Result<Json<ApiResponse<PayrollRunResponse>>, AppError> {
    require_payroll_role(&principal)?;
    let now = time::now_utc(&state.config.time_zone);
    let run = service(&state)
        .revert_to_processing(&principal, id, now)
        .await?;
    Ok(Json(ApiResponse::ok(run.into())))
}

pub async fn approve_run(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<PayrollRunId>,
) -> Result<Json<ApiResponse<PayrollRunResponse>>, AppError> {
    require_payroll_role(&principal)?;
    let now = time::now_utc(&state.config.time_zone);
    let run = service(&state).approve(&principal, id, now).await?;
    Ok(Json(ApiResponse::ok(run.into())))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MarkPaidRequest {
    pub payment_date: NaiveDate,
}

pub async fn mark_paid(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<PayrollRunId>,
    Json(payload): Json<MarkPaidRequest>,
) -> Result<Json<ApiResponse<PayrollRunResponse>>, AppError> {
    require_payroll_role(&principal)?;
    let now = time::now_utc(&state.config.time_zone);
    let run = service(&state)
        .mark_paid(&principal, id, payload.payment_date, now)
        .await?;
    Ok(Json(ApiResponse::ok(run.into())))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelRunRequest {
    pub reason: String,
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<PayrollRunId>,
    Json(payload): Json<CancelRunRequest>,
) -> Result<Json<ApiResponse<PayrollRunResponse>>, AppError> {
    require_payroll_role(&principal)?;
    let now = time::now_utc(&state.config.time_zone);
    let run = service(&state)
        .cancel(&principal, id, &payload.reason, now)
        .await?;
    Ok(Json(ApiResponse::ok(run.into())))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PayrollRunDetail {
    pub run: PayrollRunResponse,
    pub items: Vec<PayrollRunItem>,
}

pub async fn get_run(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<PayrollRunId>,
) -> Result<Json<ApiResponse<PayrollRunDetail>>, AppError> {
    require_payroll_role(&principal)?;
    let (run, items) = service(&state).get(&principal, id).await?;
    Ok(Json(ApiResponse::ok(PayrollRunDetail {
        run: run.into(),
        items,
    })))
}
