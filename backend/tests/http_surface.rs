//! HTTP surface checks that need no database: health, tenant-context
//! enforcement, the error envelope and the OpenAPI document. The pool is
//! created lazily, so no connection is ever attempted.

mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use peopleflow_backend::{router::build_router, state::AppState};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

fn app() -> axum::Router {
    let config = support::test_config();
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_lazy(&config.database_url)
        .expect("lazy pool");
    build_router(AppState::new(pool, None, None, config))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_endpoint_answers() {
    let response = app()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn requests_without_tenant_context_are_forbidden() {
    let response = app()
        .oneshot(
            Request::get("/api/v1/leave/requests")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = body_json(response).await;
    assert_eq!(body["success"], serde_json::json!(false));
    assert_eq!(body["error"]["code"], serde_json::json!("forbidden"));
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn malformed_tenant_headers_are_forbidden() {
    let response = app()
        .oneshot(
            Request::get("/api/v1/workflows/tasks")
                .header("x-organization-id", "not-a-uuid")
                .header("x-employee-id", "also-not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let response = app()
        .oneshot(
            Request::get("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["info"]["title"], serde_json::json!("peopleflow-backend"));
    assert!(body["components"]["schemas"]["CreateLeaveRequest"].is_object());
}
