//! Scheduler behavior against SLA windows: one warning, one escalation
//! with preserved quorum, expiry past the combined window.

mod support;

use chrono::Duration;
use peopleflow_backend::{
    models::workflow::{EdgeKind, GraphDoc, GraphEdgeDoc, GraphNodeDoc, NodeKind},
    models::workflow_instance::{InstanceStatus, TaskDecision, TaskStatus},
    repositories::{WorkflowInstanceRepository, WorkflowTaskRepository},
    services::{WorkflowEngine, WorkflowScheduler},
};
use serde_json::json;
use uuid::Uuid;

fn graph_without_escalation(sla_hours: i64) -> GraphDoc {
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
                sla_hours: Some(sla_hours),
                escalation_target: None,
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

#[tokio::test]
async fn sla_warning_escalation_and_quorum() {
    let Some(pool) = support::try_pool().await else { return };
    let config = support::test_config();

    let org = support::seed_org(&pool).await;
    let hire = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
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
            roles: vec![],
            hire_date: hire,
        },
    )
    .await;

    // sla_hours = 24, escalation_after_hours = 48.
    support::seed_workflow(
        &pool,
        org.id,
        "escalating",
        support::single_approval_graph(Some(24)),
        Some(48),
    )
    .await;

    let engine = WorkflowEngine::new(pool.clone(), config.clone());
    let t0 = support::at(chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(), 9);
    let instance = engine
        .instantiate(
            org.id,
            "escalating",
            "leave_request",
            Uuid::new_v4(),
            json!({ "employee": { "id": employee.id } }),
            t0,
        )
        .await
        .expect("instantiate");
    assert_eq!(instance.status, InstanceStatus::InProgress);

    let scheduler = WorkflowScheduler::new(pool.clone(), config.clone());

    // Before the warning window: nothing happens.
    let stats = scheduler.tick(t0 + Duration::hours(20)).await.unwrap();
    assert_eq!(stats.warnings, 0);
    assert_eq!(stats.escalations, 0);

    // At 22h (inside [0.9 * 24h, 24h]): exactly one warning.
    let stats = scheduler.tick(t0 + Duration::hours(22)).await.unwrap();
    assert_eq!(stats.warnings, 1);
    let stats = scheduler.tick(t0 + Duration::hours(23)).await.unwrap();
    assert_eq!(stats.warnings, 0, "warning must fire exactly once");

    let warnings: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM event_outbox WHERE event_name = 'workflow.task_sla_warning' \
         AND organization_id = $1",
    )
    .bind(org.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(warnings, 1);

    // At 49h: the original task escalates to the skip-level manager.
    let stats = scheduler.tick(t0 + Duration::hours(49)).await.unwrap();
    assert_eq!(stats.escalations, 1);

    let tasks = WorkflowTaskRepository::new();
    let all = tasks
        .find_pending_for_principal(&pool, &support::principal_for(&skip))
        .await
        .unwrap();
    assert_eq!(all.len(), 1, "escalation task belongs to the skip-level");
    let escalation_task = &all[0];
    assert_eq!(escalation_task.escalated_from.is_some(), true);

    let original = tasks
        .find_by_id(&pool, org.id, escalation_task.escalated_from.unwrap())
        .await
        .unwrap();
    assert_eq!(original.status, TaskStatus::Escalated);

    // Quorum stays one: the skip-level approval completes the node.
    let outcome = engine
        .act(
            &support::principal_for(&skip),
            escalation_task.id,
            TaskDecision::Approve,
            None,
            None,
            t0 + Duration::hours(50),
        )
        .await
        .unwrap();
    assert_eq!(outcome.instance_status, InstanceStatus::Completed);
}

#[tokio::test]
async fn tasks_expire_past_the_combined_window() {
    let Some(pool) = support::try_pool().await else { return };
    let config = support::test_config();

    let org = support::seed_org(&pool).await;
    let hire = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
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

    // No escalation target: the task can only expire, at S + E = 72h.
    support::seed_workflow(&pool, org.id, "expiring", graph_without_escalation(24), Some(48))
        .await;

    let engine = WorkflowEngine::new(pool.clone(), config.clone());
    let t0 = support::at(chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(), 9);
    let instance = engine
        .instantiate(
            org.id,
            "expiring",
            "leave_request",
            Uuid::new_v4(),
            json!({ "employee": { "id": employee.id } }),
            t0,
        )
        .await
        .unwrap();

    let scheduler = WorkflowScheduler::new(pool.clone(), config.clone());
    let stats = scheduler.tick(t0 + Duration::hours(71)).await.unwrap();
    assert_eq!(stats.expirations, 0);

    let stats = scheduler.tick(t0 + Duration::hours(72)).await.unwrap();
    assert_eq!(stats.expirations, 1);

    let instance = WorkflowInstanceRepository::new()
        .find_by_id(&pool, org.id, instance.id)
        .await
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::Rejected);
}
