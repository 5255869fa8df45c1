//! HTTP router: versioned under `/api/v1`, every route behind the tenant
//! context middleware. The HTTP layer translates service operations 1:1.

use crate::handlers;
use crate::middleware::tenant_context;
use crate::state::AppState;
use axum::{
    http::Method,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa_swagger_ui::SwaggerUi;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
        .allow_origin(Any);

    let api = Router::new()
        // Employees (core surface only; full HRIS CRUD lives elsewhere)
        .route("/employees", post(handlers::employee::create_employee))
        .route(
            "/employees/{id}/manager",
            axum::routing::put(handlers::employee::set_manager),
        )
        // Leave
        .route(
            "/leave/requests",
            post(handlers::leave::submit_leave_request).get(handlers::leave::list_my_leave_requests),
        )
        .route(
            "/leave/requests/{id}",
            axum::routing::delete(handlers::leave::cancel_leave_request),
        )
        .route(
            "/leave/requests/{id}/decision",
            post(handlers::leave::decide_leave_request),
        )
        .route("/leave/balances", get(handlers::leave::list_my_balances))
        // Accrual administration
        .route("/accruals/run", post(handlers::accrual::run_accrual))
        .route(
            "/accruals/carry-forward",
            post(handlers::accrual::carry_forward),
        )
        .route("/accruals/ledger", get(handlers::accrual::my_ledger))
        // Holiday calendar
        .route(
            "/holidays",
            post(handlers::calendar::create_holiday).get(handlers::calendar::list_holidays),
        )
        // Attendance
        .route("/attendance/check-in", post(handlers::attendance::check_in))
        .route("/attendance/check-out", post(handlers::attendance::check_out))
        .route("/attendance", get(handlers::attendance::list_my_attendance))
        .route(
            "/attendance/regularizations",
            post(handlers::attendance::submit_regularization)
                .get(handlers::attendance::list_my_regularizations),
        )
        // Workflows
        .route("/workflows/tasks", get(handlers::workflow::list_my_tasks))
        .route(
            "/workflows/tasks/{id}/act",
            post(handlers::workflow::act_on_task),
        )
        .route(
            "/workflows/instances/{id}/cancel",
            post(handlers::workflow::cancel_instance),
        )
        .route(
            "/workflows/definitions",
            post(handlers::workflow::create_definition),
        )
        .route(
            "/workflows/delegations",
            post(handlers::workflow::create_delegation),
        )
        // Payroll
        .route("/payroll/runs", post(handlers::payroll::create_run))
        .route("/payroll/runs/{id}", get(handlers::payroll::get_run))
        .route(
            "/payroll/runs/{id}/start",
            post(handlers::payroll::start_processing),
        )
        .route(
            "/payroll/runs/{id}/calculate",
            post(handlers::payroll::mark_calculated),
        )
        .route(
            "/payroll/runs/{id}/revert",
            post(handlers::payroll::revert_run),
        )
        .route(
            "/payroll/runs/{id}/approve",
            post(handlers::payroll::approve_run),
        )
        .route("/payroll/runs/{id}/pay", post(handlers::payroll::mark_paid))
        .route(
            "/payroll/runs/{id}/cancel",
            post(handlers::payroll::cancel_run),
        )
        .layer(axum_middleware::from_fn(tenant_context));

    let timeout = Duration::from_secs(state.config.request_deadline_secs);

    Router::new()
        .merge(
            SwaggerUi::new("/docs").url("/api-docs/openapi.json", crate::docs::openapi()),
        )
        .nest("/api/v1", api)
        .route("/healthz", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
