//! Payroll run state machine: monotone transitions, idempotent
//! calculation, the two-person rule and period overlap exclusion.

mod support;

use chrono::{NaiveDate, Utc};
use peopleflow_backend::{
    error::AppError,
    models::attendance::{AttendanceRecord, AttendanceStatus},
    models::payroll::PayrollRunStatus,
    repositories::AttendanceRepository,
    services::payroll::{CreatePayrollRun, PayrollService},
    types::OrganizationId,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

async fn seed_attendance(
    pool: &sqlx::PgPool,
    org: OrganizationId,
    employee: &peopleflow_backend::models::employee::Employee,
    date: NaiveDate,
    overtime_hours: f64,
) {
    let mut record = AttendanceRecord::new(org, employee.id, date, Utc::now());
    record.status = AttendanceStatus::Present;
    record.working_hours = Some(8.0 + overtime_hours);
    record.overtime_hours = Some(overtime_hours);
    AttendanceRepository::new()
        .create(pool, &record)
        .await
        .expect("seed attendance");
}

#[tokio::test]
async fn payroll_run_walks_the_state_machine() {
    let Some(pool) = support::try_pool().await else { return };
    let config = support::test_config();

    let org = support::seed_org(&pool).await;
    let hire = d(2024, 1, 1);
    let admin = support::seed_employee(
        &pool,
        org.id,
        support::EmployeeSpec {
            code: "PAYADM",
            manager_id: None,
            roles: vec!["payroll_admin".into()],
            hire_date: hire,
        },
    )
    .await;
    let approver = support::seed_employee(
        &pool,
        org.id,
        support::EmployeeSpec {
            code: "PAYAPR",
            manager_id: None,
            roles: vec!["payroll_admin".into()],
            hire_date: hire,
        },
    )
    .await;
    let worker = support::seed_employee(
        &pool,
        org.id,
        support::EmployeeSpec { code: "W1", manager_id: None, roles: vec![], hire_date: hire },
    )
    .await;
    seed_attendance(&pool, org.id, &worker, d(2025, 1, 6), 0.0).await;
    seed_attendance(&pool, org.id, &worker, d(2025, 1, 7), 2.0).await;

    let service = PayrollService::new(pool.clone(), config);
    let admin_principal = support::principal_for(&admin);
    let approver_principal = support::principal_for(&approver);
    let now = Utc::now();

    let run = service
        .create_run(
            &admin_principal,
            CreatePayrollRun { company: None, period_year: 2025, period_month: 1 },
            now,
        )
        .await
        .expect("create run");
    assert_eq!(run.status, PayrollRunStatus::Draft);

    // Overlapping run for the same period is excluded by the constraint.
    let err = service
        .create_run(
            &admin_principal,
            CreatePayrollRun { company: None, period_year: 2025, period_month: 1 },
            now,
        )
        .await
        .expect_err("overlap rejected");
    assert!(matches!(err, AppError::Conflict { .. }));

    // Calculation before processing is a non-monotone transition.
    let err = service
        .mark_calculated(&admin_principal, run.id, now)
        .await
        .expect_err("draft cannot calculate");
    assert!(matches!(err, AppError::Conflict { .. }));

    // Start requires a closed period.
    let err = service
        .start_processing(&admin_principal, run.id, d(2025, 1, 20), now)
        .await
        .expect_err("open period");
    assert!(matches!(err, AppError::Conflict { .. }));

    let run = service
        .start_processing(&admin_principal, run.id, d(2025, 2, 5), now)
        .await
        .expect("start processing");
    assert_eq!(run.status, PayrollRunStatus::InProgress);

    let run = service
        .mark_calculated(&admin_principal, run.id, now)
        .await
        .expect("calculate");
    assert_eq!(run.status, PayrollRunStatus::Calculated);
    assert!(run.input_hash.is_some());
    assert_eq!(run.employee_count, 3);
    assert!(run.total_net < run.total_gross);
    let first_hash = run.input_hash.clone();

    // Identical inputs: idempotent no-op.
    let replay = service
        .mark_calculated(&admin_principal, run.id, now)
        .await
        .expect("idempotent recalculation");
    assert_eq!(replay.input_hash, first_hash);

    // Changed inputs: refuse until the run is reverted.
    seed_attendance(&pool, org.id, &worker, d(2025, 1, 8), 1.0).await;
    let err = service
        .mark_calculated(&admin_principal, run.id, now)
        .await
        .expect_err("inputs changed");
    match err {
        AppError::Conflict { details, .. } => {
            assert_eq!(details.unwrap()["reason"], "inputs_changed_requires_revert");
        }
        other => panic!("expected conflict, got {:?}", other),
    }

    let run = service
        .revert_to_processing(&admin_principal, run.id, now)
        .await
        .expect("revert");
    assert_eq!(run.status, PayrollRunStatus::InProgress);
    let run = service
        .mark_calculated(&admin_principal, run.id, now)
        .await
        .expect("recalculate");
    assert_ne!(run.input_hash, first_hash);

    // Two-person rule: the processor cannot approve.
    let err = service
        .approve(&admin_principal, run.id, now)
        .await
        .expect_err("processor cannot approve");
    assert!(matches!(err, AppError::Forbidden(_)));

    let run = service
        .approve(&approver_principal, run.id, now)
        .await
        .expect("approve");
    assert_eq!(run.status, PayrollRunStatus::Approved);
    assert_eq!(run.approved_by, Some(approver.id));

    let run = service
        .mark_paid(&approver_principal, run.id, d(2025, 2, 10), now)
        .await
        .expect("mark paid");
    assert_eq!(run.status, PayrollRunStatus::Paid);

    // Paid is terminal.
    let err = service
        .cancel(&approver_principal, run.id, "oops", now)
        .await
        .expect_err("paid cannot cancel");
    assert!(matches!(err, AppError::Conflict { .. }));
}

#[tokio::test]
async fn cancelled_runs_free_the_period() {
    let Some(pool) = support::try_pool().await else { return };
    let config = support::test_config();

    let org = support::seed_org(&pool).await;
    let admin = support::seed_employee(
        &pool,
        org.id,
        support::EmployeeSpec {
            code: "PAYADM",
            manager_id: None,
            roles: vec!["payroll_admin".into()],
            hire_date: d(2024, 1, 1),
        },
    )
    .await;
    let service = PayrollService::new(pool.clone(), config);
    let principal = support::principal_for(&admin);
    let now = Utc::now();

    let run = service
        .create_run(
            &principal,
            CreatePayrollRun { company: None, period_year: 2025, period_month: 3 },
            now,
        )
        .await
        .unwrap();
    service
        .cancel(&principal, run.id, "created in error", now)
        .await
        .unwrap();

    // The cancelled run no longer blocks the period.
    let replacement = service
        .create_run(
            &principal,
            CreatePayrollRun { company: None, period_year: 2025, period_month: 3 },
            now,
        )
        .await
        .expect("period free after cancel");
    assert_eq!(replacement.status, PayrollRunStatus::Draft);
}
