//! Leave lifecycle end-to-end: accrual, submission with reservation,
//! approval through the workflow engine, dispatcher-driven finalization
//! and overlap rejection.

mod support;

use chrono::{NaiveDate, Utc};
use peopleflow_backend::{
    error::AppError,
    models::leave_request::{CreateLeaveRequest, RequestStatus},
    models::workflow_instance::{InstanceStatus, TaskDecision},
    repositories::LeaveBalanceRepository,
    services::{
        events::{HandlerRegistry, TracingPublisher},
        AccrualEngine, CalendarService, LeaveService, LeaveWorkflowSubscriber, OutboxDispatcher,
        WorkflowEngine,
    },
};
use std::sync::Arc;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let next = if month == 12 {
        d(year + 1, 1, 1)
    } else {
        d(year, month + 1, 1)
    };
    next.pred_opt().unwrap()
}

#[tokio::test]
async fn leave_happy_path_reserves_and_finalizes_balance() {
    let Some(pool) = support::try_pool().await else { return };
    let config = support::test_config();

    // Start from a drained outbox so this test's dispatcher passes only
    // chew through rows it created.
    sqlx::query("DELETE FROM event_outbox")
        .execute(&pool)
        .await
        .unwrap();

    let org = support::seed_org(&pool).await;
    let hire = d(2024, 1, 1);
    let skip = support::seed_employee(
        &pool,
        org.id,
        support::EmployeeSpec { code: "SKIP", manager_id: None, roles: vec![], hire_date: hire },
    )
    .await;
    let manager = support::seed_employee(
        &pool,
        org.id,
        support::EmployeeSpec {
            code: "MGR",
            manager_id: Some(skip.id),
            roles: vec![],
            hire_date: hire,
        },
    )
    .await;
    let employee = support::seed_employee(
        &pool,
        org.id,
        support::EmployeeSpec {
            code: "EMP",
            manager_id: Some(manager.id),
            roles: vec!["employee".into()],
            hire_date: hire,
        },
    )
    .await;

    support::seed_workflow(
        &pool,
        org.id,
        "leave_approval",
        support::single_approval_graph(Some(24)),
        Some(48),
    )
    .await;
    let leave_type =
        support::seed_leave_type(&pool, org.id, "AL", true, Some("leave_approval")).await;
    support::seed_monthly_policy(&pool, org.id, leave_type.id, 1.75).await;

    // Twelve monthly accruals: allocated reaches 21 for the balance year.
    let accrual = AccrualEngine::new(pool.clone(), config.clone());
    let now = Utc::now();
    for month in 1..=12 {
        accrual
            .run_for(org.id, leave_type.id, last_day_of_month(2025, month), now)
            .await
            .expect("accrual run");
    }
    let balances = LeaveBalanceRepository::new();
    let balance = balances
        .find(&pool, org.id, employee.id, leave_type.id, 2025)
        .await
        .unwrap()
        .expect("balance exists");
    assert!((balance.allocated - 21.0).abs() < 1e-9);

    // A second pass over the same periods adds nothing.
    for month in 1..=12 {
        let created = accrual
            .run_for(org.id, leave_type.id, last_day_of_month(2025, month), now)
            .await
            .unwrap();
        assert!(created.is_empty(), "accrual re-run must be idempotent");
    }

    // Submit five working days (Mon..Fri).
    let calendar = CalendarService::new(pool.clone(), None);
    let leave = LeaveService::new(pool.clone(), config.clone(), calendar);
    let request = leave
        .submit(
            &support::principal_for(&employee),
            CreateLeaveRequest {
                leave_type_id: leave_type.id,
                from_date: d(2025, 2, 3),
                to_date: d(2025, 2, 7),
                is_half_day: false,
                reason: Some("family visit".into()),
            },
            now,
        )
        .await
        .expect("submit leave");
    assert_eq!(request.working_days, 5.0);
    assert_eq!(request.status, RequestStatus::Pending);
    assert!(request.workflow_instance_id.is_some());

    let balance = balances
        .find(&pool, org.id, employee.id, leave_type.id, 2025)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(balance.pending, 5.0);
    assert_eq!(balance.available(), 16.0);

    // The manager sees exactly one task and approves it.
    let engine = WorkflowEngine::new(pool.clone(), config.clone());
    let manager_principal = support::principal_for(&manager);
    let tasks = engine.list_pending_tasks(&manager_principal).await.unwrap();
    assert_eq!(tasks.len(), 1);
    let outcome = engine
        .act(
            &manager_principal,
            tasks[0].id,
            TaskDecision::Approve,
            None,
            Some("enjoy"),
            now,
        )
        .await
        .expect("approve task");
    assert!(outcome.advanced);
    assert_eq!(outcome.instance_status, InstanceStatus::Completed);

    // A duplicate approval replays idempotently.
    let replay = engine
        .act(&manager_principal, tasks[0].id, TaskDecision::Approve, None, None, now)
        .await
        .expect("idempotent replay");
    assert!(!replay.advanced);

    // The dispatcher fans the terminal event out to the subscriber, which
    // finalizes the balance.
    let calendar = CalendarService::new(pool.clone(), None);
    let leave_for_sub = LeaveService::new(pool.clone(), config.clone(), calendar);
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(LeaveWorkflowSubscriber::new(leave_for_sub)));
    let dispatcher = OutboxDispatcher::new(
        pool.clone(),
        &config,
        Arc::new(TracingPublisher),
        Arc::new(registry),
    );
    // Two passes: terminal event first, then the events it emits.
    dispatcher.run_once(Utc::now()).await.expect("dispatch");
    dispatcher.run_once(Utc::now()).await.expect("dispatch");

    let balance = balances
        .find(&pool, org.id, employee.id, leave_type.id, 2025)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(balance.used, 5.0);
    assert_eq!(balance.pending, 0.0);
    assert_eq!(balance.available(), 16.0);

    let requests = leave
        .list_for_employee(&support::principal_for(&employee))
        .await
        .unwrap();
    assert_eq!(requests[0].status, RequestStatus::Approved);

    // Overlapping submission fails with a conflict and leaves the balance
    // untouched.
    let err = leave
        .submit(
            &support::principal_for(&employee),
            CreateLeaveRequest {
                leave_type_id: leave_type.id,
                from_date: d(2025, 2, 5),
                to_date: d(2025, 2, 6),
                is_half_day: false,
                reason: None,
            },
            Utc::now(),
        )
        .await
        .expect_err("overlap must be rejected");
    match err {
        AppError::Conflict { details, .. } => {
            assert_eq!(details.unwrap()["reason"], "overlap");
        }
        other => panic!("expected conflict, got {:?}", other),
    }
    let balance = balances
        .find(&pool, org.id, employee.id, leave_type.id, 2025)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(balance.available(), 16.0);
    assert_eq!(balance.pending, 0.0);
}

#[tokio::test]
async fn weekend_only_requests_are_rejected() {
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
    let leave_type = support::seed_leave_type(&pool, org.id, "AL", false, None).await;

    let calendar = CalendarService::new(pool.clone(), None);
    let leave = LeaveService::new(pool.clone(), config, calendar);
    // 2025-02-08/09 is a weekend.
    let err = leave
        .submit(
            &support::principal_for(&employee),
            CreateLeaveRequest {
                leave_type_id: leave_type.id,
                from_date: d(2025, 2, 8),
                to_date: d(2025, 2, 9),
                is_half_day: false,
                reason: None,
            },
            Utc::now(),
        )
        .await
        .expect_err("no working days");
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn no_approval_leave_types_finalize_immediately() {
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
    let leave_type = support::seed_leave_type(&pool, org.id, "CASUAL", false, None).await;
    support::seed_monthly_policy(&pool, org.id, leave_type.id, 2.0).await;

    let accrual = AccrualEngine::new(pool.clone(), config.clone());
    accrual
        .run_for(org.id, leave_type.id, last_day_of_month(2025, 1), Utc::now())
        .await
        .unwrap();

    let calendar = CalendarService::new(pool.clone(), None);
    let leave = LeaveService::new(pool.clone(), config, calendar);
    let request = leave
        .submit(
            &support::principal_for(&employee),
            CreateLeaveRequest {
                leave_type_id: leave_type.id,
                from_date: d(2025, 2, 4),
                to_date: d(2025, 2, 4),
                is_half_day: true,
                reason: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Approved);
    assert_eq!(request.working_days, 0.5);

    let balance = LeaveBalanceRepository::new()
        .find(&pool, org.id, employee.id, leave_type.id, 2025)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(balance.used, 0.5);
    assert_eq!(balance.pending, 0.0);
}
