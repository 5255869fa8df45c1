//! The service-layer caller identity.
//!
//! Authentication is an external collaborator; the HTTP layer turns trusted
//! gateway headers into a `Principal` and every service call tenant-checks
//! against it.

use crate::types::{EmployeeId, OrganizationId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub organization_id: OrganizationId,
    pub employee_id: EmployeeId,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(
        organization_id: OrganizationId,
        employee_id: EmployeeId,
        roles: Vec<String>,
    ) -> Self {
        Self {
            organization_id,
            employee_id,
            roles,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
