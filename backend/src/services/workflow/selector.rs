//! Approver resolution.
//!
//! Turns an [`ApproverSelector`] into concrete assignees: a fixed user, the
//! members of a role, or the result of climbing the reporting-manager chain
//! from the subject employee. Active delegation windows re-route the
//! assignment to the delegate while keeping the original approver on the
//! task for audit.

use crate::error::AppError;
use crate::models::workflow::ApproverSelector;
use crate::repositories::{DelegationRepository, EmployeeRepository};
use crate::types::{EmployeeId, OrganizationId};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// One resolved assignee.
///
/// `role` records the role the assignee was selected through, which keeps
/// any member of that role eligible to act on the task. `delegated_from`
/// is set when a delegation window re-routed the assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedApprover {
    pub employee_id: EmployeeId,
    pub role: Option<String>,
    pub delegated_from: Option<EmployeeId>,
}

#[derive(Clone)]
pub struct ApproverResolver {
    employees: EmployeeRepository,
    delegations: DelegationRepository,
    /// Cap on `reporting_manager` hops; corrupt data must not loop forever.
    max_chain_depth: u32,
}

impl ApproverResolver {
    pub fn new(max_chain_depth: u32) -> Self {
        Self {
            employees: EmployeeRepository::new(),
            delegations: DelegationRepository::new(),
            max_chain_depth,
        }
    }

    /// Resolves `selector` for the given subject employee. The returned
    /// list is ordered; the engine decides how many tasks to materialize
    /// from it based on the definition's parallelism settings.
    pub async fn resolve(
        &self,
        db: &PgPool,
        org: OrganizationId,
        selector: &ApproverSelector,
        subject_employee: EmployeeId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResolvedApprover>, AppError> {
        match selector {
            ApproverSelector::User(uuid) => {
                let employee_id = EmployeeId::from_uuid(*uuid);
                // Validates tenant membership before assignment.
                self.employees.find_by_id(db, org, employee_id).await?;
                Ok(vec![
                    self.apply_delegation(db, org, employee_id, None, now).await?,
                ])
            }
            ApproverSelector::Role { code, scope } => {
                let members = self
                    .employees
                    .find_by_role(db, org, code, scope.as_deref())
                    .await?;
                if members.is_empty() {
                    return Err(AppError::validation(format!(
                        "no active members in role '{}'",
                        code
                    )));
                }
                let mut resolved = Vec::with_capacity(members.len());
                for member in members {
                    resolved.push(
                        self.apply_delegation(db, org, member.id, Some(code.clone()), now)
                            .await?,
                    );
                }
                Ok(resolved)
            }
            ApproverSelector::Expression(path) => {
                let target = self.climb_chain(db, org, subject_employee, path).await?;
                Ok(vec![self.apply_delegation(db, org, target, None, now).await?])
            }
        }
    }

    /// Resolves a dotted `reporting_manager` path by walking up from the
    /// subject. A leading `subject.` or `employee.` segment is accepted and
    /// ignored; every remaining segment must be a manager hop.
    async fn climb_chain(
        &self,
        db: &PgPool,
        org: OrganizationId,
        subject: EmployeeId,
        path: &str,
    ) -> Result<EmployeeId, AppError> {
        let mut hops = 0u32;
        let mut current = subject;
        for segment in path.split('.') {
            match segment {
                "subject" | "employee" => continue,
                "reporting_manager" | "manager" => {
                    hops += 1;
                    if hops > self.max_chain_depth {
                        return Err(AppError::validation(format!(
                            "approver expression '{}' exceeds manager chain depth {}",
                            path, self.max_chain_depth
                        )));
                    }
                    let employee = self.employees.find_by_id(db, org, current).await?;
                    current = employee.manager_id.ok_or_else(|| {
                        AppError::validation(format!(
                            "employee {} has no reporting manager for '{}'",
                            current, path
                        ))
                    })?;
                }
                other => {
                    return Err(AppError::validation(format!(
                        "unsupported approver expression segment '{}'",
                        other
                    )));
                }
            }
        }
        if hops == 0 {
            return Err(AppError::validation(format!(
                "approver expression '{}' selects nobody",
                path
            )));
        }
        Ok(current)
    }

    /// Re-routes to the delegate when an active delegation window covers
    /// `now`.
    async fn apply_delegation(
        &self,
        db: &PgPool,
        org: OrganizationId,
        employee: EmployeeId,
        role: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ResolvedApprover, AppError> {
        match self.delegations.active_for(db, org, employee, now).await? {
            Some(delegation) => Ok(ResolvedApprover {
                employee_id: delegation.delegate_id,
                role,
                delegated_from: Some(employee),
            }),
            None => Ok(ResolvedApprover {
                employee_id: employee,
                role,
                delegated_from: None,
            }),
        }
    }
}
