//! Leave endpoints: thin translation onto the lifecycle service.

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chrono::Datelike;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::handlers::common::{paginate, validate_payload, PageQuery};
use crate::models::leave_request::{CreateLeaveRequest, LeaveRequestResponse};
use crate::models::principal::Principal;
use crate::models::response::ApiResponse;
use crate::repositories::LeaveBalanceRepository;
use crate::services::{CalendarService, LeaveService};
use crate::state::AppState;
use crate::types::LeaveRequestId;
use crate::utils::time;

fn service(state: &AppState) -> LeaveService {
    let calendar = CalendarService::new(state.write_pool.clone(), state.redis().cloned());
    LeaveService::new(state.write_pool.clone(), state.config.clone(), calendar)
}

pub async fn submit_leave_request(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CreateLeaveRequest>,
) -> Result<Json<ApiResponse<LeaveRequestResponse>>, AppError> {
    validate_payload(&payload)?;
    let now = time::now_utc(&state.config.time_zone);
    let request = service(&state).submit(&principal, payload, now).await?;
    Ok(Json(ApiResponse::ok(request.into())))
}

pub async fn list_my_leave_requests(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(page): Query<PageQuery>,
) -> Result<Json<ApiResponse<Vec<LeaveRequestResponse>>>, AppError> {
    let requests = service(&state).list_for_employee(&principal).await?;
    let (page_no, page_size) = page.resolve();
    let responses: Vec<LeaveRequestResponse> = requests.into_iter().map(Into::into).collect();
    let (slice, meta) = paginate(responses, page_no, page_size);
    Ok(Json(ApiResponse::paginated(slice, meta)))
}

pub async fn cancel_leave_request(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<LeaveRequestId>,
) -> Result<Json<ApiResponse<LeaveRequestResponse>>, AppError> {
    let now = time::now_utc(&state.config.time_zone);
    let request = service(&state).cancel(&principal, id, now).await?;
    Ok(Json(ApiResponse::ok(request.into())))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LeaveDecisionRequest {
    pub approve: bool,
    pub comment: Option<String>,
}

pub async fn decide_leave_request(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<LeaveRequestId>,
    Json(payload): Json<LeaveDecisionRequest>,
) -> Result<Json<ApiResponse<LeaveRequestResponse>>, AppError> {
    let now = time::now_utc(&state.config.time_zone);
    let request = service(&state)
        .decide(&principal, id, payload.approve, payload.comment.as_deref(), now)
        .await?;
    Ok(Json(ApiResponse::ok(request.into())))
}

pub async fn list_my_balances(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ApiResponse<Vec<crate::models::accrual::LeaveBalance>>>, AppError> {
    let year = time::today_local(&state.config.time_zone).year();
    let balances = LeaveBalanceRepository::new()
        .find_all_for_employee(
            state.read_pool(),
            principal.organization_id,
            principal.employee_id,
            year,
        )
        .await?;
    Ok(Json(ApiResponse::ok(balances)))
}
