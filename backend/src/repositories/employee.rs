//! Employee repository.
//!
//! All lookups are tenant-scoped. The manager chain is kept acyclic by a
//! bounded climb performed before any manager change is persisted.

use crate::error::AppError;
use crate::models::employee::Employee;
use crate::types::{EmployeeId, OrganizationId};
use sqlx::{PgExecutor, PgPool};

const TABLE_NAME: &str = "employees";
const SELECT_COLUMNS: &str = "id, organization_id, code, first_name, last_name, email, status, \
employment_type, gender, hire_date, termination_date, manager_id, department_code, location, \
roles, scheduled_start, scheduled_end, monthly_salary, is_deleted, deleted_at, created_at, \
updated_at";

#[derive(Debug, Default, Clone, Copy)]
pub struct EmployeeRepository;

impl EmployeeRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn find_by_id(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        id: EmployeeId,
    ) -> Result<Employee, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = $1 AND organization_id = $2 AND is_deleted = FALSE",
            SELECT_COLUMNS, TABLE_NAME
        );
        sqlx::query_as::<_, Employee>(&query)
            .bind(id)
            .bind(org)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Employee not found".into()))
    }

    pub async fn find_by_id_opt(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        id: EmployeeId,
    ) -> Result<Option<Employee>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = $1 AND organization_id = $2 AND is_deleted = FALSE",
            SELECT_COLUMNS, TABLE_NAME
        );
        let row = sqlx::query_as::<_, Employee>(&query)
            .bind(id)
            .bind(org)
            .fetch_optional(db)
            .await?;
        Ok(row)
    }

    /// Active employees holding `role`, optionally restricted to a
    /// department scope.
    pub async fn find_by_role(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        role: &str,
        department_scope: Option<&str>,
    ) -> Result<Vec<Employee>, AppError> {
        let mut query = format!(
            "SELECT {} FROM {} WHERE organization_id = $1 AND $2 = ANY(roles) \
             AND status NOT IN ('terminated', 'resigned') AND is_deleted = FALSE",
            SELECT_COLUMNS, TABLE_NAME
        );
        if department_scope.is_some() {
            query.push_str(" AND department_code = $3");
        }
        query.push_str(" ORDER BY code");

        let mut q = sqlx::query_as::<_, Employee>(&query).bind(org).bind(role);
        if let Some(scope) = department_scope {
            q = q.bind(scope);
        }
        Ok(q.fetch_all(db).await?)
    }

    /// Employees employed at any point within `[start, end]`.
    pub async fn find_employed_in_period(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    ) -> Result<Vec<Employee>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE organization_id = $1 AND hire_date <= $2 \
             AND (termination_date IS NULL OR termination_date >= $3) \
             AND is_deleted = FALSE ORDER BY code",
            SELECT_COLUMNS, TABLE_NAME
        );
        let rows = sqlx::query_as::<_, Employee>(&query)
            .bind(org)
            .bind(end)
            .bind(start)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    pub async fn create(
        &self,
        db: impl PgExecutor<'_>,
        item: &Employee,
    ) -> Result<Employee, AppError> {
        let query = format!(
            "INSERT INTO {} (id, organization_id, code, first_name, last_name, email, status, \
             employment_type, gender, hire_date, termination_date, manager_id, department_code, \
             location, roles, scheduled_start, scheduled_end, monthly_salary, is_deleted, \
             deleted_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
             $18, $19, $20, $21, $22) RETURNING {}",
            TABLE_NAME, SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, Employee>(&query)
            .bind(item.id)
            .bind(item.organization_id)
            .bind(&item.code)
            .bind(&item.first_name)
            .bind(&item.last_name)
            .bind(&item.email)
            .bind(item.status.db_value())
            .bind(item.employment_type.db_value())
            .bind(item.gender.map(|g| g.db_value()))
            .bind(item.hire_date)
            .bind(item.termination_date)
            .bind(item.manager_id)
            .bind(&item.department_code)
            .bind(&item.location)
            .bind(&item.roles)
            .bind(item.scheduled_start)
            .bind(item.scheduled_end)
            .bind(item.monthly_salary)
            .bind(item.is_deleted)
            .bind(item.deleted_at)
            .bind(item.created_at)
            .bind(item.updated_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }

    pub async fn set_manager(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        id: EmployeeId,
        manager_id: Option<EmployeeId>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64, AppError> {
        let query = format!(
            "UPDATE {} SET manager_id = $1, updated_at = $2 \
             WHERE id = $3 AND organization_id = $4 AND is_deleted = FALSE",
            TABLE_NAME
        );
        let result = sqlx::query(&query)
            .bind(manager_id)
            .bind(now)
            .bind(id)
            .bind(org)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Walks up from `candidate_manager`; returns `true` if `employee` is
    /// found within `max_depth` hops, which would close a reporting cycle.
    pub async fn would_create_cycle(
        &self,
        db: &PgPool,
        org: OrganizationId,
        employee: EmployeeId,
        candidate_manager: EmployeeId,
        max_depth: u32,
    ) -> Result<bool, AppError> {
        if employee == candidate_manager {
            return Ok(true);
        }
        let mut current = Some(candidate_manager);
        for _ in 0..max_depth {
            let Some(id) = current else { break };
            if id == employee {
                return Ok(true);
            }
            current = self
                .find_by_id_opt(db, org, id)
                .await?
                .and_then(|e| e.manager_id);
        }
        // A chain deeper than max_depth is treated as suspect data.
        Ok(current.map_or(false, |id| id == employee))
    }
}
