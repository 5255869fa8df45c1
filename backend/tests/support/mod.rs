#![allow(dead_code)]
//! Shared fixtures for integration tests.
//!
//! DB tests run only when `TEST_DATABASE_URL` points at a Postgres with
//! the btree_gist extension available; without it they skip. Every test
//! seeds its own organization so suites can run concurrently.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use peopleflow_backend::{
    config::Config,
    models::accrual::{AccrualFrequency, AccrualMethod, AccrualPolicy},
    models::employee::{Employee, EmployeeStatus, EmploymentType},
    models::leave_type::LeaveType,
    models::organization::Organization,
    models::principal::Principal,
    models::workflow::{EdgeKind, GraphDoc, GraphEdgeDoc, GraphNodeDoc, NodeKind},
    repositories::{
        AccrualPolicyRepository, EmployeeRepository, LeaveTypeRepository, OrganizationRepository,
        Repository,
    },
    services::workflow::{CreateWorkflowDefinition, WorkflowDefinitionService},
    types::{EmployeeId, LeaveTypeId, OrganizationId},
};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

/// Connects to the test database or skips the calling test.
pub async fn try_pool() -> Option<PgPool> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping DB-backed test");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to TEST_DATABASE_URL");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    Some(pool)
}

pub fn test_config() -> Config {
    Config::for_tests()
}

pub async fn seed_org(pool: &PgPool) -> Organization {
    let suffix = &Uuid::new_v4().to_string()[..8];
    let org = Organization::new(
        format!("Test Org {}", suffix),
        format!("ORG-{}", suffix),
        Utc::now(),
    );
    OrganizationRepository::new()
        .create(pool, &org)
        .await
        .expect("seed organization")
}

pub struct EmployeeSpec<'a> {
    pub code: &'a str,
    pub manager_id: Option<EmployeeId>,
    pub roles: Vec<String>,
    pub hire_date: NaiveDate,
}

pub async fn seed_employee(
    pool: &PgPool,
    org: OrganizationId,
    spec: EmployeeSpec<'_>,
) -> Employee {
    let now = Utc::now();
    let employee = Employee {
        id: EmployeeId::new(),
        organization_id: org,
        code: spec.code.to_string(),
        first_name: spec.code.to_string(),
        last_name: "Test".to_string(),
        email: format!("{}@example.com", spec.code.to_lowercase()),
        status: EmployeeStatus::Active,
        employment_type: EmploymentType::FullTime,
        gender: None,
        hire_date: spec.hire_date,
        termination_date: None,
        manager_id: spec.manager_id,
        department_code: Some("ENG".to_string()),
        location: None,
        roles: spec.roles,
        scheduled_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        scheduled_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        monthly_salary: Decimal::new(5_000, 0),
        is_deleted: false,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    };
    EmployeeRepository::new()
        .create(pool, &employee)
        .await
        .expect("seed employee")
}

pub async fn seed_leave_type(
    pool: &PgPool,
    org: OrganizationId,
    code: &str,
    requires_approval: bool,
    workflow_code: Option<&str>,
) -> LeaveType {
    let now = Utc::now();
    let leave_type = LeaveType {
        id: LeaveTypeId::new(),
        organization_id: org,
        code: code.to_string(),
        name: format!("{} leave", code),
        is_accrual_based: true,
        requires_approval,
        workflow_code: workflow_code.map(String::from),
        applicable_gender: None,
        max_days_per_year: None,
        carry_forward_allowed: true,
        max_carry_forward_days: 5.0,
        allow_negative_balance: false,
        overdraft_limit_days: 0.0,
        is_deleted: false,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    };
    LeaveTypeRepository::new()
        .create(pool, &leave_type)
        .await
        .expect("seed leave type")
}

pub async fn seed_monthly_policy(
    pool: &PgPool,
    org: OrganizationId,
    leave_type: LeaveTypeId,
    days_per_period: f64,
) -> AccrualPolicy {
    let now = Utc::now();
    let policy = AccrualPolicy {
        id: peopleflow_backend::types::AccrualPolicyId::new(),
        organization_id: org,
        leave_type_id: leave_type,
        method: AccrualMethod::Fixed,
        frequency: AccrualFrequency::Monthly,
        days_per_period,
        tier_rules: Json(vec![]),
        rule_expression: None,
        prorate_on_join: true,
        prorate_on_leave: true,
        minimum_service_days: 0,
        carry_forward_expiry_months: 3,
        max_balance_cap: None,
        effective_from: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
        effective_to: None,
        is_deleted: false,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    };
    AccrualPolicyRepository::new()
        .create(pool, &policy)
        .await
        .expect("seed accrual policy")
}

/// start → manager approval (reporting_manager) → end, with an optional
/// skip-level escalation target.
pub fn single_approval_graph(sla_hours: Option<i64>) -> GraphDoc {
    GraphDoc {
        nodes: vec![
            GraphNodeDoc {
                key: "start".into(),
                kind: NodeKind::Start,
                name: "Start".into(),
                approver: None,
                sla_hours: None,
                escalation_target: None,
                condition: None,
                action: None,
            },
            GraphNodeDoc {
                key: "manager".into(),
                kind: NodeKind::Approval,
                name: "Manager approval".into(),
                approver: Some("reporting_manager".into()),
                sla_hours,
                escalation_target: Some("reporting_manager.reporting_manager".into()),
                condition: None,
                action: None,
            },
            GraphNodeDoc {
                key: "end".into(),
                kind: NodeKind::End,
                name: "End".into(),
                approver: None,
                sla_hours: None,
                escalation_target: None,
                condition: None,
                action: None,
            },
        ],
        edges: vec![
            GraphEdgeDoc {
                from: "start".into(),
                to: "manager".into(),
                guard: None,
                priority: 0,
                kind: EdgeKind::Default,
            },
            GraphEdgeDoc {
                from: "manager".into(),
                to: "end".into(),
                guard: None,
                priority: 0,
                kind: EdgeKind::Success,
            },
        ],
    }
}

pub async fn seed_workflow(
    pool: &PgPool,
    org: OrganizationId,
    code: &str,
    graph: GraphDoc,
    escalation_after_hours: Option<i64>,
) {
    let service = WorkflowDefinitionService::new(pool.clone(), test_config());
    service
        .create_from_graph(
            org,
            CreateWorkflowDefinition {
                code: code.to_string(),
                name: format!("{} workflow", code),
                workflow_type: "approval".to_string(),
                allow_parallel_approvals: false,
                require_all_approvals: false,
                auto_escalation: true,
                escalation_after_hours,
                graph,
            },
            Utc::now(),
        )
        .await
        .expect("seed workflow definition");
}

pub fn principal_for(employee: &Employee) -> Principal {
    Principal::new(employee.organization_id, employee.id, employee.roles.clone())
}

pub fn at(date: NaiveDate, hour: u32) -> DateTime<Utc> {
    date.and_hms_opt(hour, 0, 0).unwrap().and_utc()
}
