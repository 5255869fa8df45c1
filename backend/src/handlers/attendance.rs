//! Attendance endpoints.

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::error::AppError;
use crate::handlers::common::validate_payload;
use crate::models::attendance::{AttendanceResponse, CheckInRequest, CheckOutRequest};
use crate::models::principal::Principal;
use crate::models::regularization::{CreateRegularization, RegularizationResponse};
use crate::models::response::ApiResponse;
use crate::services::AttendanceService;
use crate::state::AppState;
use crate::utils::time;

fn service(state: &AppState) -> AttendanceService {
    AttendanceService::new(state.write_pool.clone(), state.config.clone())
}

pub async fn check_in(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CheckInRequest>,
) -> Result<Json<ApiResponse<AttendanceResponse>>, AppError> {
    let now = time::now_utc(&state.config.time_zone);
    let record = service(&state).check_in(&principal, payload, now).await?;
    Ok(Json(ApiResponse::ok(record.into())))
}

pub async fn check_out(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CheckOutRequest>,
) -> Result<Json<ApiResponse<AttendanceResponse>>, AppError> {
    let now = time::now_utc(&state.config.time_zone);
    let record = service(&state).check_out(&principal, payload, now).await?;
    Ok(Json(ApiResponse::ok(record.into())))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AttendanceRangeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

pub async fn list_my_attendance(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(range): Query<AttendanceRangeQuery>,
) -> Result<Json<ApiResponse<Vec<AttendanceResponse>>>, AppError> {
    if range.to < range.from {
        return Err(AppError::validation("from must not be after to"));
    }
    let records = service(&state)
        .find_range(&principal, range.from, range.to)
        .await?;
    let responses = records.into_iter().map(Into::into).collect();
    Ok(Json(ApiResponse::ok(responses)))
}

pub async fn submit_regularization(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CreateRegularization>,
) -> Result<Json<ApiResponse<RegularizationResponse>>, AppError> {
    validate_payload(&payload)?;
    let now = time::now_utc(&state.config.time_zone);
    let request = service(&state)
        .submit_regularization(&principal, payload, now)
        .await?;
    Ok(Json(ApiResponse::ok(request.into())))
}

pub async fn list_my_regularizations(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ApiResponse<Vec<RegularizationResponse>>>, AppError> {
    let requests = service(&state).list_regularizations(&principal).await?;
    Ok(Json(ApiResponse::ok(
        requests.into_iter().map(Into::into).collect(),
    )))
}
