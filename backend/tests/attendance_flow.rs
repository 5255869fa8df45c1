//! Attendance rules and the regularization path through the workflow
//! engine.

mod support;

use chrono::{NaiveDate, TimeZone, Utc};
use peopleflow_backend::{
    error::AppError,
    models::attendance::{AttendanceRecord, CheckInRequest, CheckOutRequest},
    models::regularization::{CreateRegularization, RegularizationType, RequestStatus},
    models::workflow_instance::{InstanceStatus, TaskDecision},
    repositories::{AttendanceRepository, RegularizationRepository},
    services::{
        events::{HandlerRegistry, TracingPublisher},
        AttendanceService, OutboxDispatcher, RegularizationSubscriber, WorkflowEngine,
    },
};
use std::sync::Arc;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

#[tokio::test]
async fn check_in_and_out_compute_hours_and_flags() {
    let Some(pool) = support::try_pool().await else { return };
    let config = support::test_config();

    let org = support::seed_org(&pool).await;
    let employee = support::seed_employee(
        &pool,
        org.id,
        support::EmployeeSpec {
            code: "EMP",
            manager_id: None,
            roles: vec![],
            hire_date: d(2024, 1, 1),
        },
    )
    .await;
    let service = AttendanceService::new(pool.clone(), config);
    let principal = support::principal_for(&employee);

    // 09:25 check-in against a 09:00 scheduled start: 25 minutes late.
    let check_in_ts = Utc.with_ymd_and_hms(2025, 3, 10, 9, 25, 0).unwrap();
    let record = service
        .check_in(
            &principal,
            CheckInRequest { ts: Some(check_in_ts), device_info: None, latitude: None, longitude: None },
            check_in_ts,
        )
        .await
        .expect("check in");
    assert!(record.is_late);
    assert_eq!(record.late_minutes, 25);

    // A second check-in the same day is refused.
    let err = service
        .check_in(
            &principal,
            CheckInRequest { ts: Some(check_in_ts), device_info: None, latitude: None, longitude: None },
            check_in_ts,
        )
        .await
        .expect_err("double check-in");
    assert!(matches!(err, AppError::Conflict { .. }));

    // 18:25 check-out: 9h gross, rounded hours, overtime over 8h.
    let check_out_ts = Utc.with_ymd_and_hms(2025, 3, 10, 18, 25, 0).unwrap();
    let record = service
        .check_out(
            &principal,
            CheckOutRequest { ts: Some(check_out_ts), device_info: None },
            check_out_ts,
        )
        .await
        .expect("check out");
    assert_eq!(record.working_hours, Some(9.0));
    assert_eq!(record.overtime_hours, Some(1.0));
    assert!(!record.early_departure);

    // Checking out twice is refused.
    let err = service
        .check_out(
            &principal,
            CheckOutRequest { ts: Some(check_out_ts), device_info: None },
            check_out_ts,
        )
        .await
        .expect_err("double check-out");
    assert!(matches!(err, AppError::Conflict { .. }));
}

#[tokio::test]
async fn check_out_past_cutoff_flags_for_review() {
    let Some(pool) = support::try_pool().await else { return };
    let config = support::test_config();

    let org = support::seed_org(&pool).await;
    let employee = support::seed_employee(
        &pool,
        org.id,
        support::EmployeeSpec {
            code: "NIGHT",
            manager_id: None,
            roles: vec![],
            hire_date: d(2024, 1, 1),
        },
    )
    .await;
    let service = AttendanceService::new(pool.clone(), config);
    let principal = support::principal_for(&employee);

    let check_in_ts = Utc.with_ymd_and_hms(2025, 3, 10, 18, 0, 0).unwrap();
    service
        .check_in(
            &principal,
            CheckInRequest { ts: Some(check_in_ts), device_info: None, latitude: None, longitude: None },
            check_in_ts,
        )
        .await
        .unwrap();

    // 02:30 next day: within the 27:00 cut-off, attributed to the
    // check-in date.
    let check_out_ts = Utc.with_ymd_and_hms(2025, 3, 11, 2, 30, 0).unwrap();
    let record = service
        .check_out(
            &principal,
            CheckOutRequest { ts: Some(check_out_ts), device_info: None },
            check_out_ts,
        )
        .await
        .unwrap();
    assert_eq!(record.date, d(2025, 3, 10));
    assert_eq!(record.working_hours, Some(8.5));

    // A different employee checking out past 27:00 is parked for review.
    let owl = support::seed_employee(
        &pool,
        org.id,
        support::EmployeeSpec {
            code: "OWL",
            manager_id: None,
            roles: vec![],
            hire_date: d(2024, 1, 1),
        },
    )
    .await;
    let owl_principal = support::principal_for(&owl);
    let check_in_ts = Utc.with_ymd_and_hms(2025, 3, 10, 18, 0, 0).unwrap();
    AttendanceService::new(pool.clone(), support::test_config())
        .check_in(
            &owl_principal,
            CheckInRequest { ts: Some(check_in_ts), device_info: None, latitude: None, longitude: None },
            check_in_ts,
        )
        .await
        .unwrap();
    let late_out = Utc.with_ymd_and_hms(2025, 3, 11, 4, 0, 0).unwrap();
    let record = AttendanceService::new(pool.clone(), support::test_config())
        .check_out(
            &owl_principal,
            CheckOutRequest { ts: Some(late_out), device_info: None },
            late_out,
        )
        .await
        .unwrap();
    assert!(record.needs_review);
    assert!(record.check_out_ts.is_none(), "record is not auto-closed");
}

#[tokio::test]
async fn regularization_amends_the_record_on_approval() {
    let Some(pool) = support::try_pool().await else { return };
    let config = support::test_config();

    // Drain the outbox so the dispatcher passes below only handle rows
    // from this test.
    sqlx::query("DELETE FROM event_outbox")
        .execute(&pool)
        .await
        .unwrap();

    let org = support::seed_org(&pool).await;
    let hire = d(2024, 1, 1);
    let manager = support::seed_employee(
        &pool,
        org.id,
        support::EmployeeSpec { code: "MGR", manager_id: None, roles: vec![], hire_date: hire },
    )
    .await;
    let employee = support::seed_employee(
        &pool,
        org.id,
        support::EmployeeSpec {
            code: "EMP",
            manager_id: Some(manager.id),
            roles: vec![],
            hire_date: hire,
        },
    )
    .await;
    support::seed_workflow(
        &pool,
        org.id,
        "regularization",
        support::single_approval_graph(Some(24)),
        Some(48),
    )
    .await;

    // Attendance for 2025-03-10 with a missing check-in.
    let date = d(2025, 3, 10);
    let mut seeded = AttendanceRecord::new(org.id, employee.id, date, Utc::now());
    seeded.check_out_ts = Some(Utc.with_ymd_and_hms(2025, 3, 10, 18, 0, 0).unwrap());
    let seeded = AttendanceRepository::new().create(&pool, &seeded).await.unwrap();

    let service = AttendanceService::new(pool.clone(), config.clone());
    let request = service
        .submit_regularization(
            &support::principal_for(&employee),
            CreateRegularization {
                date,
                regularization_type: RegularizationType::MissingIn,
                proposed_check_in: Some(Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()),
                proposed_check_out: None,
                reason: "badge reader was down".into(),
            },
            Utc::now(),
        )
        .await
        .expect("submit regularization");
    assert_eq!(request.status, RequestStatus::Pending);
    let instance_id = request.workflow_instance_id.expect("workflow attached");

    // Manager approves the task.
    let engine = WorkflowEngine::new(pool.clone(), config.clone());
    let manager_principal = support::principal_for(&manager);
    let tasks = engine.list_pending_tasks(&manager_principal).await.unwrap();
    assert_eq!(tasks.len(), 1);
    let outcome = engine
        .act(&manager_principal, tasks[0].id, TaskDecision::Approve, None, None, Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome.instance_status, InstanceStatus::Completed);
    let _ = instance_id;

    // Dispatch applies the amendment and emits attendance.regularized.
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(RegularizationSubscriber::new(
        AttendanceService::new(pool.clone(), config.clone()),
    )));
    let dispatcher = OutboxDispatcher::new(
        pool.clone(),
        &config,
        Arc::new(TracingPublisher),
        Arc::new(registry),
    );
    dispatcher.run_once(Utc::now()).await.unwrap();
    dispatcher.run_once(Utc::now()).await.unwrap();

    let request = RegularizationRepository::new()
        .find_by_id(&pool, org.id, request.id)
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Approved);

    let record = AttendanceRepository::new()
        .find_by_id(&pool, org.id, seeded.id)
        .await
        .unwrap();
    assert_eq!(
        record.check_in_ts,
        Some(Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap())
    );
    assert_eq!(record.working_hours, Some(9.0));

    let regularized: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM event_outbox WHERE event_name = 'attendance.regularized' \
         AND organization_id = $1",
    )
    .bind(org.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(regularized, 1);
}
