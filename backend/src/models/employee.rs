//! Employee model and lifecycle status values.

use crate::types::{EmployeeId, OrganizationId};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
/// Employment lifecycle status.
pub enum EmployeeStatus {
    Active,
    OnLeave,
    Probation,
    Notice,
    Terminated,
    Resigned,
}

impl EmployeeStatus {
    pub fn db_value(&self) -> &'static str {
        match self {
            EmployeeStatus::Active => "active",
            EmployeeStatus::OnLeave => "on_leave",
            EmployeeStatus::Probation => "probation",
            EmployeeStatus::Notice => "notice",
            EmployeeStatus::Terminated => "terminated",
            EmployeeStatus::Resigned => "resigned",
        }
    }

    /// Whether the employee is still on payroll and eligible for accruals.
    pub fn is_employed(&self) -> bool {
        !matches!(self, EmployeeStatus::Terminated | EmployeeStatus::Resigned)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EmploymentType {
    FullTime,
    PartTime,
    Contract,
    Intern,
}

impl EmploymentType {
    pub fn db_value(&self) -> &'static str {
        match self {
            EmploymentType::FullTime => "full_time",
            EmploymentType::PartTime => "part_time",
            EmploymentType::Contract => "contract",
            EmploymentType::Intern => "intern",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn db_value(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// Database representation of an employee.
pub struct Employee {
    pub id: EmployeeId,
    pub organization_id: OrganizationId,
    /// Employee code, unique per organization.
    pub code: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub status: EmployeeStatus,
    pub employment_type: EmploymentType,
    pub gender: Option<Gender>,
    pub hire_date: NaiveDate,
    pub termination_date: Option<NaiveDate>,
    /// Reporting manager. The chain must stay acyclic.
    pub manager_id: Option<EmployeeId>,
    pub department_code: Option<String>,
    pub location: Option<String>,
    /// Role codes used for task assignment and scope checks.
    pub roles: Vec<String>,
    /// Scheduled shift start, used for late detection.
    pub scheduled_start: NaiveTime,
    /// Scheduled shift end, used for early-departure detection.
    pub scheduled_end: NaiveTime,
    /// Monthly base pay in the organization currency.
    #[schema(value_type = String)]
    pub monthly_salary: Decimal,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Employee {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Completed years of service as of `on`, fractional.
    pub fn service_years(&self, on: NaiveDate) -> f64 {
        let days = (on - self.hire_date).num_days();
        if days <= 0 {
            return 0.0;
        }
        days as f64 / 365.25
    }

    /// Completed days of service as of `on`.
    pub fn service_days(&self, on: NaiveDate) -> i64 {
        (on - self.hire_date).num_days().max(0)
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
/// Payload used to create an employee.
pub struct CreateEmployee {
    #[validate(length(min = 1, max = 32))]
    pub code: String,
    #[validate(length(min = 1, max = 128))]
    pub first_name: String,
    #[validate(length(min = 1, max = 128))]
    pub last_name: String,
    #[validate(email)]
    pub email: String,
    pub employment_type: EmploymentType,
    pub gender: Option<Gender>,
    pub hire_date: NaiveDate,
    pub manager_id: Option<EmployeeId>,
    pub department_code: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
/// API representation shared with clients.
pub struct EmployeeResponse {
    pub id: EmployeeId,
    pub code: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub status: EmployeeStatus,
    pub employment_type: EmploymentType,
    pub hire_date: NaiveDate,
    pub manager_id: Option<EmployeeId>,
    pub department_code: Option<String>,
    pub location: Option<String>,
    pub roles: Vec<String>,
}

impl From<Employee> for EmployeeResponse {
    fn from(e: Employee) -> Self {
        Self {
            id: e.id,
            code: e.code,
            first_name: e.first_name,
            last_name: e.last_name,
            email: e.email,
            status: e.status,
            employment_type: e.employment_type,
            hire_date: e.hire_date,
            manager_id: e.manager_id,
            department_code: e.department_code,
            location: e.location,
            roles: e.roles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee(hire: NaiveDate) -> Employee {
        Employee {
            id: EmployeeId::new(),
            organization_id: OrganizationId::new(),
            code: "E001".into(),
            first_name: "Asha".into(),
            last_name: "Rao".into(),
            email: "asha@example.com".into(),
            status: EmployeeStatus::Active,
            employment_type: EmploymentType::FullTime,
            gender: None,
            hire_date: hire,
            termination_date: None,
            manager_id: None,
            department_code: Some("ENG".into()),
            location: None,
            roles: vec!["employee".into()],
            scheduled_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            scheduled_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            monthly_salary: Decimal::new(5_000, 0),
            is_deleted: false,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn service_years_counts_fractional_years() {
        let e = employee(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        let on = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let years = e.service_years(on);
        assert!((years - 5.0).abs() < 0.01, "got {}", years);
    }

    #[test]
    fn service_before_hire_is_zero() {
        let e = employee(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        let on = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(e.service_years(on), 0.0);
        assert_eq!(e.service_days(on), 0);
    }

    #[test]
    fn employee_status_serde_snake_case() {
        let s: EmployeeStatus = serde_json::from_str("\"on_leave\"").unwrap();
        assert_eq!(s, EmployeeStatus::OnLeave);
        assert!(!EmployeeStatus::Terminated.is_employed());
        assert!(EmployeeStatus::Probation.is_employed());
    }
}
