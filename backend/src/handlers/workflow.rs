//! Workflow endpoints: task inbox, acting on tasks, definition authoring
//! and instance cancellation.

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::handlers::common::{paginate, validate_payload, PageQuery};
use crate::models::principal::Principal;
use crate::models::response::ApiResponse;
use crate::models::workflow::WorkflowDefinition;
use crate::models::workflow_instance::{ActRequest, TaskDecision, WorkflowTaskResponse};
use crate::services::workflow::{CreateWorkflowDefinition, WorkflowDefinitionService};
use crate::services::WorkflowEngine;
use crate::state::AppState;
use crate::types::{WorkflowInstanceId, WorkflowTaskId};
use crate::utils::time;

fn engine(state: &AppState) -> WorkflowEngine {
    WorkflowEngine::new(state.write_pool.clone(), state.config.clone())
}

pub async fn list_my_tasks(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(page): Query<PageQuery>,
) -> Result<Json<ApiResponse<Vec<WorkflowTaskResponse>>>, AppError> {
    let tasks = engine(&state).list_pending_tasks(&principal).await?;
    let (page_no, page_size) = page.resolve();
    let responses: Vec<WorkflowTaskResponse> = tasks.into_iter().map(Into::into).collect();
    let (slice, meta) = paginate(responses, page_no, page_size);
    Ok(Json(ApiResponse::paginated(slice, meta)))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ActResponse {
    pub advanced: bool,
    pub instance_status: crate::models::workflow_instance::InstanceStatus,
    pub task_status: crate::models::workflow_instance::TaskStatus,
}

pub async fn act_on_task(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(task_id): Path<WorkflowTaskId>,
    Json(payload): Json<ActRequest>,
) -> Result<Json<ApiResponse<ActResponse>>, AppError> {
    if payload.decision == TaskDecision::Delegate && payload.delegate_to.is_none() {
        return Err(AppError::validation("delegate_to is required for delegation"));
    }
    let now = time::now_utc(&state.config.time_zone);
    let outcome = engine(&state)
        .act(
            &principal,
            task_id,
            payload.decision,
            payload.delegate_to,
            payload.comments.as_deref(),
            now,
        )
        .await?;
    Ok(Json(ApiResponse::ok(ActResponse {
        advanced: outcome.advanced,
        instance_status: outcome.instance_status,
        task_status: outcome.task_status,
    })))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelInstanceRequest {
    pub reason: String,
}

pub async fn cancel_instance(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(instance_id): Path<WorkflowInstanceId>,
    Json(payload): Json<CancelInstanceRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    if !principal.has_role("hr_manager") {
        return Err(AppError::Forbidden(
            "only hr_manager may cancel workflow instances".into(),
        ));
    }
    let now = time::now_utc(&state.config.time_zone);
    engine(&state)
        .cancel(
            principal.organization_id,
            instance_id,
            Some(principal.employee_id),
            &payload.reason,
            now,
        )
        .await?;
    Ok(Json(ApiResponse::ok(
        serde_json::json!({ "cancelled": true }),
    )))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDelegationRequest {
    pub delegate_to: crate::types::EmployeeId,
    pub starts_at: chrono::DateTime<chrono::Utc>,
    pub ends_at: chrono::DateTime<chrono::Utc>,
    pub reason: Option<String>,
}

/// Opens a delegation window for the calling principal's own approvals.
pub async fn create_delegation(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CreateDelegationRequest>,
) -> Result<Json<ApiResponse<crate::models::delegation::ApprovalDelegation>>, AppError> {
    if payload.ends_at <= payload.starts_at {
        return Err(AppError::validation("ends_at must be after starts_at"));
    }
    if payload.delegate_to == principal.employee_id {
        return Err(AppError::validation("cannot delegate approvals to yourself"));
    }
    let delegation = crate::models::delegation::ApprovalDelegation {
        id: crate::types::DelegationId::new(),
        organization_id: principal.organization_id,
        delegator_id: principal.employee_id,
        delegate_id: payload.delegate_to,
        starts_at: payload.starts_at,
        ends_at: payload.ends_at,
        reason: payload.reason,
        is_active: true,
        created_at: time::now_utc(&state.config.time_zone),
    };
    let delegation = crate::repositories::DelegationRepository::new()
        .create(&state.write_pool, &delegation)
        .await?;
    Ok(Json(ApiResponse::ok(delegation)))
}

pub async fn create_definition(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CreateWorkflowDefinition>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    if !principal.has_role("hr_manager") {
        return Err(AppError::Forbidden(
            "only hr_manager may author workflow definitions".into(),
        ));
    }
    validate_payload(&payload)?;
    let now = time::now_utc(&state.config.time_zone);
    let service = WorkflowDefinitionService::new(state.write_pool.clone(), state.config.clone());
    let def = service
        .create_from_graph(principal.organization_id, payload, now)
        .await?;
    Ok(Json(ApiResponse::ok(def)))
}
