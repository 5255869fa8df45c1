//! Tenant context extraction.
//!
//! Authentication is an external collaborator: an API gateway validates
//! credentials and forwards the verified identity in trusted headers. This
//! middleware turns those headers into the service-layer [`Principal`];
//! requests without them never reach a handler.

use crate::error::AppError;
use crate::models::principal::Principal;
use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};

pub const ORGANIZATION_HEADER: &str = "x-organization-id";
pub const EMPLOYEE_HEADER: &str = "x-employee-id";
pub const ROLES_HEADER: &str = "x-roles";

fn parse_principal(headers: &HeaderMap) -> Result<Principal, AppError> {
    let organization_id = headers
        .get(ORGANIZATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| AppError::Forbidden("missing or invalid organization context".into()))?;
    let employee_id = headers
        .get(EMPLOYEE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| AppError::Forbidden("missing or invalid employee context".into()))?;
    let roles = headers
        .get(ROLES_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect()
        })
        .unwrap_or_default();
    Ok(Principal::new(organization_id, employee_id, roles))
}

/// Extracts the [`Principal`] and makes it available as an extension.
pub async fn tenant_context(mut request: Request, next: Next) -> Result<Response, AppError> {
    let principal = parse_principal(request.headers())?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use uuid::Uuid;

    #[test]
    fn parses_complete_headers() {
        let mut headers = HeaderMap::new();
        let org = Uuid::new_v4().to_string();
        let emp = Uuid::new_v4().to_string();
        headers.insert(ORGANIZATION_HEADER, HeaderValue::from_str(&org).unwrap());
        headers.insert(EMPLOYEE_HEADER, HeaderValue::from_str(&emp).unwrap());
        headers.insert(ROLES_HEADER, HeaderValue::from_static("employee, hr_manager"));

        let principal = parse_principal(&headers).unwrap();
        assert_eq!(principal.organization_id.to_string(), org);
        assert_eq!(principal.employee_id.to_string(), emp);
        assert!(principal.has_role("hr_manager"));
        assert!(!principal.has_role("payroll_admin"));
    }

    #[test]
    fn missing_or_malformed_headers_are_rejected() {
        let headers = HeaderMap::new();
        assert!(parse_principal(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(ORGANIZATION_HEADER, HeaderValue::from_static("not-a-uuid"));
        headers.insert(
            EMPLOYEE_HEADER,
            HeaderValue::from_str(&Uuid::new_v4().to_string()).unwrap(),
        );
        assert!(parse_principal(&headers).is_err());
    }
}
