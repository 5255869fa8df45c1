use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
}

#[derive(Debug)]
pub enum AppError {
    /// Malformed input or an invariant violated before any state change.
    Validation(Vec<String>),
    /// The principal lacks a scope or permission.
    Forbidden(String),
    /// Tenant-scoped lookup miss. Never leaks cross-tenant existence.
    NotFound(String),
    /// Optimistic-lock or state-transition mismatch. Retryable after re-read.
    Conflict {
        message: String,
        details: Option<Value>,
    },
    /// Deadlock, bus failure or provider timeout past the retry budget.
    Transient(String),
    InternalServerError(anyhow::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(vec![message.into()])
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        AppError::Conflict {
            message: message.into(),
            details: None,
        }
    }

    /// Conflict with a machine-readable reason carried in `details.reason`.
    pub fn conflict_reason(message: impl Into<String>, reason: &str) -> Self {
        AppError::Conflict {
            message: message.into(),
            details: Some(serde_json::json!({ "reason": reason })),
        }
    }

    /// Stable error code used in the response envelope and in logs.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict { .. } => "conflict",
            AppError::Transient(_) => "transient",
            AppError::InternalServerError(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code().to_string();
        let (status, message, details) = match self {
            AppError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "Validation failed".to_string(),
                Some(serde_json::json!({ "errors": errors })),
            ),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::Conflict { message, details } => (StatusCode::CONFLICT, message, details),
            AppError::Transient(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg, None),
            AppError::InternalServerError(err) => {
                tracing::error!("Internal server error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            error: ErrorBody {
                code,
                message,
                details,
            },
        });

        (status, body).into_response()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(errors) => write!(f, "validation error: {}", errors.join(", ")),
            AppError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            AppError::NotFound(msg) => write!(f, "not found: {msg}"),
            AppError::Conflict { message, .. } => write!(f, "conflict: {message}"),
            AppError::Transient(msg) => write!(f, "transient error: {msg}"),
            AppError::InternalServerError(err) => write!(f, "internal server error: {err}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::InternalServerError(err) => err.source(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalServerError(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(ref db_err)
                if db_err.is_unique_violation()
                    // 23P01: exclusion constraint (overlapping ranges).
                    || db_err.code().as_deref() == Some("23P01") =>
            {
                AppError::conflict("Resource already exists")
            }
            sqlx::Error::PoolTimedOut => {
                AppError::Transient("Database connection pool exhausted".to_string())
            }
            _ => AppError::InternalServerError(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_taxonomy() {
        assert_eq!(AppError::validation("x").code(), "validation");
        assert_eq!(AppError::Forbidden("x".into()).code(), "forbidden");
        assert_eq!(AppError::NotFound("x".into()).code(), "not_found");
        assert_eq!(AppError::conflict("x").code(), "conflict");
        assert_eq!(AppError::Transient("x".into()).code(), "transient");
    }

    #[test]
    fn conflict_reason_is_carried_in_details() {
        let err = AppError::conflict_reason("overlapping leave", "overlap");
        match err {
            AppError::Conflict { details, .. } => {
                assert_eq!(
                    details.unwrap(),
                    serde_json::json!({ "reason": "overlap" })
                );
            }
            _ => panic!("expected conflict"),
        }
    }
}
