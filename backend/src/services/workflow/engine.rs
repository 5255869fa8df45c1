//! Workflow engine: turns a definition into a running instance that
//! advances deterministically under approvals, conditions, timers and
//! actions.
//!
//! Every state transition and its outbox events commit in one transaction;
//! side effects fire from the dispatcher afterwards. Instance advancement
//! is serialized by an advisory lock keyed on the instance id, task
//! transitions by guarded updates on the task row.

use crate::config::Config;
use crate::error::AppError;
use crate::models::outbox::OutboxEvent;
use crate::models::principal::Principal;
use crate::models::workflow::{
    ActionSpec, ApproverSelector, EdgeKind, NodeKind, WorkflowDefinition, WorkflowEdge,
    WorkflowNode,
};
use crate::models::workflow_instance::{
    InstanceStatus, TaskDecision, TaskStatus, WorkflowInstance, WorkflowTask,
};
use crate::repositories::{
    locks, transaction, OutboxRepository, WorkflowDefinitionRepository, WorkflowInstanceRepository,
    WorkflowTaskRepository,
};
use crate::services::events::names;
use crate::services::expression;
use crate::services::workflow::selector::{ApproverResolver, ResolvedApprover};
use crate::types::{EmployeeId, OrganizationId, WorkflowInstanceId, WorkflowNodeId, WorkflowTaskId};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use sqlx::postgres::PgConnection;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

/// Transient-failure backoff schedule in minutes: 1, 2, 4, 8, 16.
pub const MAX_INSTANCE_RETRIES: i32 = 5;

pub fn retry_backoff_minutes(retry_count: i32) -> i64 {
    1_i64 << (retry_count - 1).clamp(0, 4)
}

/// Quorum decision for an approval node given all its tasks so far.
///
/// Delegated and escalated tasks are replaced slots: their replacements are
/// in the same list, so the originals are ignored. Expired tasks reject the
/// node under `require_all`, otherwise they just drop out of the quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Wait,
    Approved,
    Rejected,
}

pub fn evaluate_approval_node(tasks: &[WorkflowTask], require_all: bool) -> ApprovalOutcome {
    let mut pending = 0;
    let mut approved = 0;
    let mut expired = 0;
    for task in tasks {
        match task.status {
            TaskStatus::Rejected => return ApprovalOutcome::Rejected,
            TaskStatus::Pending => pending += 1,
            TaskStatus::Approved => approved += 1,
            TaskStatus::Expired => expired += 1,
            // Replaced slots; the replacement task carries the vote.
            TaskStatus::Delegated | TaskStatus::Escalated => {}
        }
    }
    if require_all {
        if expired > 0 {
            return ApprovalOutcome::Rejected;
        }
        if pending > 0 {
            return ApprovalOutcome::Wait;
        }
        if approved > 0 {
            return ApprovalOutcome::Approved;
        }
        ApprovalOutcome::Wait
    } else {
        if approved > 0 {
            return ApprovalOutcome::Approved;
        }
        if pending > 0 {
            return ApprovalOutcome::Wait;
        }
        // Every slot burned out without a single approval.
        ApprovalOutcome::Rejected
    }
}

/// Picks the outgoing edge: guards in descending priority, first truthy
/// guard wins; success/failure edges match a condition node's result; the
/// guardless default edge is the fallback.
pub fn choose_edge<'a>(
    edges: &'a [WorkflowEdge],
    ctx: &Value,
    condition_result: Option<bool>,
) -> Result<Option<&'a WorkflowEdge>, AppError> {
    let mut ordered: Vec<&WorkflowEdge> = edges.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut fallback: Option<&WorkflowEdge> = None;
    for edge in ordered {
        if let Some(result) = condition_result {
            match edge.kind {
                EdgeKind::Success if edge.guard_expression.is_none() => {
                    if result {
                        return Ok(Some(edge));
                    }
                    continue;
                }
                EdgeKind::Failure if edge.guard_expression.is_none() => {
                    if !result {
                        return Ok(Some(edge));
                    }
                    continue;
                }
                _ => {}
            }
        }
        match &edge.guard_expression {
            Some(guard) => {
                let matched = expression::evaluate_bool(guard, ctx)
                    .map_err(|e| AppError::validation(format!("edge guard failed: {}", e)))?;
                if matched {
                    return Ok(Some(edge));
                }
            }
            None => {
                if fallback.is_none() && edge.kind != EdgeKind::Failure {
                    fallback = Some(edge);
                }
            }
        }
    }
    Ok(fallback)
}

/// A definition with its graph rows loaded and indexed.
pub(crate) struct LoadedGraph {
    pub def: WorkflowDefinition,
    pub nodes: HashMap<WorkflowNodeId, WorkflowNode>,
    pub edges_from: HashMap<WorkflowNodeId, Vec<WorkflowEdge>>,
    pub start: WorkflowNodeId,
}

impl LoadedGraph {
    pub fn node(&self, id: WorkflowNodeId) -> Result<&WorkflowNode, AppError> {
        self.nodes
            .get(&id)
            .ok_or_else(|| AppError::validation(format!("workflow node {} missing from graph", id)))
    }

    pub fn edges(&self, from: WorkflowNodeId) -> &[WorkflowEdge] {
        self.edges_from.get(&from).map_or(&[], |v| v.as_slice())
    }
}

/// Outcome of [`WorkflowEngine::act`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActOutcome {
    /// Whether the instance moved past the current node.
    pub advanced: bool,
    pub instance_status: InstanceStatus,
    pub task_status: TaskStatus,
}

#[derive(Clone)]
pub struct WorkflowEngine {
    pool: PgPool,
    config: Config,
    definitions: WorkflowDefinitionRepository,
    instances: WorkflowInstanceRepository,
    tasks: WorkflowTaskRepository,
    outbox: OutboxRepository,
    resolver: ApproverResolver,
}

impl WorkflowEngine {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let resolver = ApproverResolver::new(config.manager_chain_max_depth);
        Self {
            pool,
            config,
            definitions: WorkflowDefinitionRepository::new(),
            instances: WorkflowInstanceRepository::new(),
            tasks: WorkflowTaskRepository::new(),
            outbox: OutboxRepository::new(),
            resolver,
        }
    }

    /// Creates an instance for `(entity_type, entity_id)` under the active
    /// version of `workflow_code` and advances until it blocks on a human
    /// task or a terminal state. Runs inside the caller's transaction so
    /// subject state, instance and outbox events commit together.
    pub async fn instantiate_in_tx(
        &self,
        conn: &mut PgConnection,
        org: OrganizationId,
        workflow_code: &str,
        entity_type: &str,
        entity_id: Uuid,
        subject: Value,
        now: DateTime<Utc>,
    ) -> Result<WorkflowInstance, AppError> {
        let def = self
            .definitions
            .find_active_by_code(&mut *conn, org, workflow_code)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("no active workflow for code '{}'", workflow_code))
            })?;
        let graph = self.load_graph(&mut *conn, def).await?;

        let mut instance = WorkflowInstance::new(
            org,
            graph.def.id,
            entity_type.to_string(),
            entity_id,
            subject,
            now,
        );
        instance.status = InstanceStatus::InProgress;
        instance.current_node_id = Some(graph.start);
        let start_key = graph.node(graph.start)?.node_key.clone();
        instance.record_visit(&start_key);
        instance.log(now, "instance_created", Some(graph.start), None);

        let mut instance = self.instances.create(&mut *conn, &instance).await?;
        self.emit(
            &mut *conn,
            &instance,
            names::WORKFLOW_STARTED,
            json!({
                "workflow_code": graph.def.code,
                "workflow_version": graph.def.version,
                "entity_type": entity_type,
                "entity_id": entity_id,
            }),
            now,
        )
        .await?;

        self.advance(&mut *conn, &graph, &mut instance, now).await?;
        self.instances.save(&mut *conn, &instance, now).await?;
        Ok(instance)
    }

    /// Convenience wrapper running [`Self::instantiate_in_tx`] in its own
    /// transaction.
    pub async fn instantiate(
        &self,
        org: OrganizationId,
        workflow_code: &str,
        entity_type: &str,
        entity_id: Uuid,
        subject: Value,
        now: DateTime<Utc>,
    ) -> Result<WorkflowInstance, AppError> {
        let mut tx = transaction::begin_transaction(&self.pool).await?;
        let instance = self
            .instantiate_in_tx(&mut tx, org, workflow_code, entity_type, entity_id, subject, now)
            .await?;
        transaction::commit_transaction(tx).await?;
        Ok(instance)
    }

    /// Tasks awaiting the principal, directly assigned or via a role.
    pub async fn list_pending_tasks(
        &self,
        principal: &Principal,
    ) -> Result<Vec<WorkflowTask>, AppError> {
        self.tasks
            .find_pending_for_principal(&self.pool, principal)
            .await
    }

    /// Records a decision on a task and advances the instance.
    ///
    /// Duplicate calls with the same `(task, principal, decision)` after
    /// the terminal transition are idempotent and return the prior outcome.
    pub async fn act(
        &self,
        principal: &Principal,
        task_id: WorkflowTaskId,
        decision: TaskDecision,
        delegate_to: Option<EmployeeId>,
        comments: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ActOutcome, AppError> {
        let org = principal.organization_id;
        let mut tx = transaction::begin_transaction(&self.pool).await?;

        // Serialize against concurrent advancement of the same instance.
        let probe = self.tasks.find_by_id(&mut *tx, org, task_id).await?;
        locks::acquire_xact_lock(&mut *tx, "workflow_instance", probe.instance_id.as_uuid())
            .await?;
        let task = self.tasks.find_by_id(&mut *tx, org, task_id).await?;

        self.ensure_eligible(&task, principal)?;

        if task.status.is_terminal() {
            let replay = matches!(
                (decision, task.status),
                (TaskDecision::Approve, TaskStatus::Approved)
                    | (TaskDecision::Reject, TaskStatus::Rejected)
                    | (TaskDecision::Delegate, TaskStatus::Delegated)
            ) && task.action_by == Some(principal.employee_id);
            if replay {
                let instance = self.instances.find_by_id(&mut *tx, org, task.instance_id).await?;
                transaction::commit_transaction(tx).await?;
                return Ok(ActOutcome {
                    advanced: false,
                    instance_status: instance.status,
                    task_status: task.status,
                });
            }
            return Err(AppError::conflict_reason(
                "task already actioned",
                "task_terminal",
            ));
        }

        let mut instance = self.instances.find_by_id(&mut *tx, org, task.instance_id).await?;
        if instance.status.is_terminal() {
            return Err(AppError::conflict_reason(
                "workflow instance already finished",
                "instance_terminal",
            ));
        }

        let outcome = match decision {
            TaskDecision::RequestChanges => {
                let comment = comments.unwrap_or("changes requested");
                self.tasks
                    .record_comment(&mut *tx, task.id, comment, now)
                    .await?;
                instance.log(now, "changes_requested", Some(task.node_id), None);
                self.emit(
                    &mut *tx,
                    &instance,
                    names::WORKFLOW_CHANGES_REQUESTED,
                    json!({
                        "task_id": task.id,
                        "requested_by": principal.employee_id,
                        "comments": comment,
                    }),
                    now,
                )
                .await?;
                self.instances.save(&mut *tx, &instance, now).await?;
                ActOutcome {
                    advanced: false,
                    instance_status: instance.status,
                    task_status: TaskStatus::Pending,
                }
            }
            TaskDecision::Delegate => {
                let delegate = delegate_to.ok_or_else(|| {
                    AppError::validation("delegate_to is required for delegation")
                })?;
                self.delegate_task(&mut tx, &mut instance, &task, principal, delegate, comments, now)
                    .await?
            }
            TaskDecision::Approve | TaskDecision::Reject => {
                self.decide_task(&mut tx, &mut instance, &task, principal, decision, comments, now)
                    .await?
            }
        };

        transaction::commit_transaction(tx).await?;
        Ok(outcome)
    }

    /// Cancels a non-terminal instance, expiring all open tasks.
    pub async fn cancel(
        &self,
        org: OrganizationId,
        instance_id: WorkflowInstanceId,
        cancelled_by: Option<EmployeeId>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tx = transaction::begin_transaction(&self.pool).await?;
        locks::acquire_xact_lock(&mut *tx, "workflow_instance", instance_id.as_uuid()).await?;

        let mut instance = self.instances.find_by_id(&mut *tx, org, instance_id).await?;
        if instance.status.is_terminal() {
            return Err(AppError::conflict_reason(
                "workflow instance already finished",
                "instance_terminal",
            ));
        }

        let open = self.tasks.find_open_for_instance(&mut *tx, instance.id).await?;
        for task in &open {
            self.tasks
                .finish(
                    &mut *tx,
                    task.id,
                    TaskStatus::Expired,
                    None,
                    Some("instance cancelled"),
                    now,
                )
                .await?;
        }

        instance.status = InstanceStatus::Cancelled;
        instance.completed_at = Some(now);
        instance.log(now, "instance_cancelled", None, Some(json!({ "reason": reason })));
        self.emit(
            &mut *tx,
            &instance,
            names::WORKFLOW_CANCELLED,
            json!({
                "entity_type": instance.entity_type,
                "entity_id": instance.entity_id,
                "cancelled_by": cancelled_by,
                "reason": reason,
            }),
            now,
        )
        .await?;
        self.instances.save(&mut *tx, &instance, now).await?;
        transaction::commit_transaction(tx).await?;
        Ok(())
    }

    /// Re-attempts advancement for an instance whose transient-failure
    /// backoff elapsed. Exceeding the retry budget moves it to `error`.
    pub async fn retry(
        &self,
        org: OrganizationId,
        instance_id: WorkflowInstanceId,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let result = self.try_resume(org, instance_id, now).await;
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                self.schedule_retry(org, instance_id, &err, now).await?;
                Err(err)
            }
        }
    }

    async fn try_resume(
        &self,
        org: OrganizationId,
        instance_id: WorkflowInstanceId,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tx = transaction::begin_transaction(&self.pool).await?;
        locks::acquire_xact_lock(&mut *tx, "workflow_instance", instance_id.as_uuid()).await?;
        let mut instance = self.instances.find_by_id(&mut *tx, org, instance_id).await?;
        if instance.status.is_terminal() {
            transaction::commit_transaction(tx).await?;
            return Ok(());
        }
        let graph = self.load_graph_for(&mut *tx, &instance).await?;
        instance.retry_count = 0;
        instance.next_retry_at = None;
        self.advance(&mut *tx, &graph, &mut instance, now).await?;
        self.instances.save(&mut *tx, &instance, now).await?;
        transaction::commit_transaction(tx).await?;
        Ok(())
    }

    /// Books the next retry attempt, or fails the instance once the budget
    /// is spent. Runs in its own transaction: it must survive the rollback
    /// of the attempt that failed.
    pub async fn schedule_retry(
        &self,
        org: OrganizationId,
        instance_id: WorkflowInstanceId,
        err: &AppError,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tx = transaction::begin_transaction(&self.pool).await?;
        let mut instance = self.instances.find_by_id(&mut *tx, org, instance_id).await?;
        if instance.status.is_terminal() {
            transaction::commit_transaction(tx).await?;
            return Ok(());
        }
        instance.retry_count += 1;
        if instance.retry_count > MAX_INSTANCE_RETRIES {
            instance.status = InstanceStatus::Error;
            instance.error_message = Some(format!("retry budget exhausted: {:?}", err));
            instance.completed_at = Some(now);
            instance.next_retry_at = None;
            instance.log(now, "retries_exhausted", None, None);
            self.emit(
                &mut *tx,
                &instance,
                names::WORKFLOW_ERROR,
                json!({
                    "entity_type": instance.entity_type,
                    "entity_id": instance.entity_id,
                    "error": instance.error_message,
                }),
                now,
            )
            .await?;
        } else {
            let delay = Duration::minutes(retry_backoff_minutes(instance.retry_count));
            instance.next_retry_at = Some(now + delay);
            instance.log(
                now,
                "retry_scheduled",
                None,
                Some(json!({ "attempt": instance.retry_count })),
            );
        }
        self.instances.save(&mut *tx, &instance, now).await?;
        transaction::commit_transaction(tx).await?;
        Ok(())
    }

    // -- internals -----------------------------------------------------------

    fn ensure_eligible(&self, task: &WorkflowTask, principal: &Principal) -> Result<(), AppError> {
        let direct = task.assignee_id == Some(principal.employee_id);
        let via_role = task
            .assignee_role
            .as_deref()
            .is_some_and(|role| principal.has_role(role));
        if direct || via_role {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "principal is not an eligible actor for this task".into(),
            ))
        }
    }

    async fn delegate_task(
        &self,
        tx: &mut PgConnection,
        instance: &mut WorkflowInstance,
        task: &WorkflowTask,
        principal: &Principal,
        delegate: EmployeeId,
        comments: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ActOutcome, AppError> {
        let changed = self
            .tasks
            .finish(
                &mut *tx,
                task.id,
                TaskStatus::Delegated,
                Some(principal.employee_id),
                comments,
                now,
            )
            .await?;
        if changed == 0 {
            return Err(AppError::conflict_reason("task already actioned", "task_terminal"));
        }

        let mut replacement = WorkflowTask::new(
            task.organization_id,
            task.instance_id,
            task.node_id,
            Some(delegate),
            task.assignee_role.clone(),
            task.due_at,
            now,
        );
        replacement.delegated_from = Some(task.id);
        let replacement = self.tasks.create(&mut *tx, &replacement).await?;

        instance.log(
            now,
            "task_delegated",
            Some(task.node_id),
            Some(json!({ "from": task.id, "to": replacement.id })),
        );
        self.emit(
            &mut *tx,
            instance,
            names::WORKFLOW_TASK_DELEGATED,
            json!({
                "task_id": task.id,
                "replacement_task_id": replacement.id,
                "delegated_by": principal.employee_id,
                "delegate": delegate,
            }),
            now,
        )
        .await?;
        self.instances.save(&mut *tx, instance, now).await?;
        Ok(ActOutcome {
            advanced: false,
            instance_status: instance.status,
            task_status: TaskStatus::Delegated,
        })
    }

    async fn decide_task(
        &self,
        tx: &mut PgConnection,
        instance: &mut WorkflowInstance,
        task: &WorkflowTask,
        principal: &Principal,
        decision: TaskDecision,
        comments: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ActOutcome, AppError> {
        let (status, event) = match decision {
            TaskDecision::Approve => (TaskStatus::Approved, names::WORKFLOW_TASK_APPROVED),
            TaskDecision::Reject => (TaskStatus::Rejected, names::WORKFLOW_TASK_REJECTED),
            _ => unreachable!("decide_task handles approve/reject only"),
        };
        let changed = self
            .tasks
            .finish(&mut *tx, task.id, status, Some(principal.employee_id), comments, now)
            .await?;
        if changed == 0 {
            return Err(AppError::conflict_reason("task already actioned", "task_terminal"));
        }
        instance.log(
            now,
            if status == TaskStatus::Approved {
                "task_approved"
            } else {
                "task_rejected"
            },
            Some(task.node_id),
            Some(json!({ "task_id": task.id, "by": principal.employee_id })),
        );
        self.emit(
            &mut *tx,
            instance,
            event,
            json!({
                "task_id": task.id,
                "decided_by": principal.employee_id,
                "comments": comments,
            }),
            now,
        )
        .await?;

        let graph = self.load_graph_for(&mut *tx, instance).await?;
        let before = (instance.current_node_id, instance.status);
        self.advance(&mut *tx, &graph, instance, now).await?;
        self.instances.save(&mut *tx, instance, now).await?;

        Ok(ActOutcome {
            advanced: (instance.current_node_id, instance.status) != before,
            instance_status: instance.status,
            task_status: status,
        })
    }

    pub(crate) async fn load_graph(
        &self,
        conn: &mut PgConnection,
        def: WorkflowDefinition,
    ) -> Result<LoadedGraph, AppError> {
        let nodes = self.definitions.find_nodes(&mut *conn, def.id).await?;
        let start = nodes
            .iter()
            .find(|n| n.kind == NodeKind::Start)
            .map(|n| n.id)
            .ok_or_else(|| {
                AppError::validation(format!("workflow '{}' has no start node", def.code))
            })?;

        let mut edges_from: HashMap<WorkflowNodeId, Vec<WorkflowEdge>> = HashMap::new();
        for node in &nodes {
            let edges = self
                .definitions
                .find_edges_from(&mut *conn, def.id, node.id)
                .await?;
            if !edges.is_empty() {
                edges_from.insert(node.id, edges);
            }
        }
        let nodes = nodes.into_iter().map(|n| (n.id, n)).collect();
        Ok(LoadedGraph {
            def,
            nodes,
            edges_from,
            start,
        })
    }

    pub(crate) async fn load_graph_for(
        &self,
        conn: &mut PgConnection,
        instance: &WorkflowInstance,
    ) -> Result<LoadedGraph, AppError> {
        let def = self.definitions.find_by_id(&mut *conn, instance.workflow_id).await?;
        self.load_graph(conn, def).await
    }

    /// The employee the workflow runs about, taken from the subject
    /// snapshot (`employee.id`). Approver expressions climb from here.
    fn subject_employee(&self, instance: &WorkflowInstance) -> Result<EmployeeId, AppError> {
        instance.instance_data.0.subject["employee"]["id"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                AppError::validation("instance subject carries no employee.id".to_string())
            })
    }

    /// Drives the instance forward until it blocks on a human task or a
    /// terminal state. Deterministic failures (bad guard, missing edge,
    /// unresolvable approver) park the instance in `error` rather than
    /// aborting the surrounding transaction.
    pub(crate) async fn advance(
        &self,
        conn: &mut PgConnection,
        graph: &LoadedGraph,
        instance: &mut WorkflowInstance,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        loop {
            if instance.status.is_terminal() {
                return Ok(());
            }
            let Some(current_id) = instance.current_node_id else {
                return Ok(());
            };
            let node = graph.node(current_id)?.clone();
            let ctx = instance.instance_data.0.evaluation_context();

            match node.kind {
                NodeKind::Start => {
                    if !self.step(conn, graph, instance, &node, &ctx, None, now).await? {
                        return Ok(());
                    }
                }
                NodeKind::Approval => {
                    let tasks = self.tasks.find_for_node(&mut *conn, instance.id, node.id).await?;
                    if tasks.is_empty() {
                        match self.materialize_tasks(conn, graph, instance, &node, now).await {
                            Ok(()) => return Ok(()),
                            Err(err) if err_is_deterministic(&err) => {
                                self.fail_instance(conn, instance, &node, &err, now).await?;
                                return Ok(());
                            }
                            Err(err) => return Err(err),
                        }
                    }
                    match evaluate_approval_node(&tasks, graph.def.require_all_approvals) {
                        ApprovalOutcome::Wait => return Ok(()),
                        ApprovalOutcome::Approved => {
                            self.expire_superseded(conn, instance, &tasks, now).await?;
                            if !self
                                .step(conn, graph, instance, &node, &ctx, Some(true), now)
                                .await?
                            {
                                return Ok(());
                            }
                        }
                        ApprovalOutcome::Rejected => {
                            self.reject_instance(conn, instance, &node, "approval rejected", now)
                                .await?;
                            return Ok(());
                        }
                    }
                }
                NodeKind::Condition => {
                    let expr = node.condition_expression.as_deref().unwrap_or("true");
                    let result = match expression::evaluate_bool(expr, &ctx) {
                        Ok(r) => r,
                        Err(e) => {
                            let err = AppError::validation(format!("condition failed: {}", e));
                            self.fail_instance(conn, instance, &node, &err, now).await?;
                            return Ok(());
                        }
                    };
                    instance.log(
                        now,
                        "condition_evaluated",
                        Some(node.id),
                        Some(json!({ "expression": expr, "result": result })),
                    );
                    if !self
                        .step(conn, graph, instance, &node, &ctx, Some(result), now)
                        .await?
                    {
                        return Ok(());
                    }
                }
                NodeKind::Action => {
                    if let Err(err) = self.run_action(conn, instance, &node, now).await {
                        if err_is_deterministic(&err) {
                            self.fail_instance(conn, instance, &node, &err, now).await?;
                            return Ok(());
                        }
                        return Err(err);
                    }
                    let ctx = instance.instance_data.0.evaluation_context();
                    if !self.step(conn, graph, instance, &node, &ctx, None, now).await? {
                        return Ok(());
                    }
                }
                NodeKind::Notification => {
                    self.emit(
                        &mut *conn,
                        instance,
                        names::NOTIFICATION_QUEUED,
                        json!({
                            "node": node.node_key,
                            "entity_type": instance.entity_type,
                            "entity_id": instance.entity_id,
                        }),
                        now,
                    )
                    .await?;
                    instance.log(now, "notification_queued", Some(node.id), None);
                    if !self.step(conn, graph, instance, &node, &ctx, None, now).await? {
                        return Ok(());
                    }
                }
                NodeKind::End => {
                    instance.status = InstanceStatus::Completed;
                    instance.completed_at = Some(now);
                    instance.log(now, "instance_completed", Some(node.id), None);
                    self.emit(
                        &mut *conn,
                        instance,
                        names::WORKFLOW_COMPLETED,
                        json!({
                            "entity_type": instance.entity_type,
                            "entity_id": instance.entity_id,
                        }),
                        now,
                    )
                    .await?;
                    return Ok(());
                }
            }
        }
    }

    /// Follows the chosen outgoing edge. Returns `false` when the instance
    /// stopped (no edge, or the visit bound tripped).
    async fn step(
        &self,
        conn: &mut PgConnection,
        graph: &LoadedGraph,
        instance: &mut WorkflowInstance,
        node: &WorkflowNode,
        ctx: &Value,
        condition_result: Option<bool>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let edge = match choose_edge(graph.edges(node.id), ctx, condition_result) {
            Ok(edge) => edge,
            Err(err) => {
                self.fail_instance(conn, instance, node, &err, now).await?;
                return Ok(false);
            }
        };
        let Some(edge) = edge else {
            let err = AppError::validation(format!(
                "no outgoing edge matched from node '{}'",
                node.node_key
            ));
            self.fail_instance(conn, instance, node, &err, now).await?;
            return Ok(false);
        };

        let target = graph.node(edge.to_node_id)?;
        let visits = instance.record_visit(&target.node_key);
        if visits > self.config.workflow_max_node_visits {
            let err = AppError::validation(format!(
                "node '{}' visited {} times, exceeding the loop bound",
                target.node_key, visits
            ));
            self.fail_instance(conn, instance, node, &err, now).await?;
            return Ok(false);
        }
        instance.current_node_id = Some(edge.to_node_id);
        instance.log(
            now,
            "node_entered",
            Some(edge.to_node_id),
            Some(json!({ "from": node.node_key, "to": target.node_key })),
        );
        Ok(true)
    }

    /// Creates the human tasks for an approval node per the definition's
    /// parallelism settings and emits `task_created` events.
    async fn materialize_tasks(
        &self,
        conn: &mut PgConnection,
        graph: &LoadedGraph,
        instance: &mut WorkflowInstance,
        node: &WorkflowNode,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let selector: ApproverSelector = node
            .approver_selector
            .as_deref()
            .ok_or_else(|| {
                AppError::validation(format!("approval node '{}' has no approver", node.node_key))
            })?
            .parse()
            .map_err(AppError::validation)?;

        let subject = self.subject_employee(instance)?;
        let resolved = self
            .resolver
            .resolve(&self.pool, instance.organization_id, &selector, subject, now)
            .await?;
        let selected: Vec<&ResolvedApprover> = if graph.def.allow_parallel_approvals {
            resolved.iter().collect()
        } else {
            resolved.iter().take(1).collect()
        };

        let due_at = node
            .sla_hours
            .filter(|h| *h > 0)
            .map(|h| now + Duration::hours(h));

        for approver in selected {
            let mut task = WorkflowTask::new(
                instance.organization_id,
                instance.id,
                node.id,
                Some(approver.employee_id),
                approver.role.clone(),
                due_at,
                now,
            );
            if approver.delegated_from.is_some() {
                // Assignment re-routed by a delegation window; keep the
                // original approver on the audit trail.
                task.decision_comment = approver
                    .delegated_from
                    .map(|from| format!("auto-delegated from {}", from));
            }
            let task = self.tasks.create(&mut *conn, &task).await?;
            instance.log(
                now,
                "task_created",
                Some(node.id),
                Some(json!({ "task_id": task.id, "assignee": task.assignee_id })),
            );
            self.emit(
                &mut *conn,
                instance,
                names::WORKFLOW_TASK_CREATED,
                json!({
                    "task_id": task.id,
                    "node": node.node_key,
                    "assignee": task.assignee_id,
                    "assignee_role": task.assignee_role,
                    "due_at": task.due_at,
                }),
                now,
            )
            .await?;
        }
        self.instances.save(&mut *conn, instance, now).await?;
        Ok(())
    }

    /// First-approval-wins: outstanding sibling tasks expire with a
    /// synthesized reason.
    async fn expire_superseded(
        &self,
        conn: &mut PgConnection,
        instance: &mut WorkflowInstance,
        tasks: &[WorkflowTask],
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        for task in tasks.iter().filter(|t| t.is_open()) {
            self.tasks
                .finish(
                    &mut *conn,
                    task.id,
                    TaskStatus::Expired,
                    None,
                    Some("superseded by first approval"),
                    now,
                )
                .await?;
            self.emit(
                &mut *conn,
                instance,
                names::WORKFLOW_TASK_EXPIRED,
                json!({ "task_id": task.id, "reason": "superseded" }),
                now,
            )
            .await?;
        }
        Ok(())
    }

    /// Executes a declarative action exactly once per (instance, node).
    async fn run_action(
        &self,
        conn: &mut PgConnection,
        instance: &mut WorkflowInstance,
        node: &WorkflowNode,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let already_ran = instance
            .execution_log
            .0
            .iter()
            .any(|e| e.event == "action_executed" && e.node_id == Some(node.id));
        if already_ran {
            return Ok(());
        }
        let Some(action) = node.action.as_ref().map(|a| a.0.clone()) else {
            return Ok(());
        };
        match action {
            ActionSpec::EmitEvent { event_name, payload } => {
                self.emit(&mut *conn, instance, &event_name, payload, now).await?;
            }
            ActionSpec::SetVariable { name, value } => {
                instance.instance_data.0.variables.insert(name, value);
            }
            ActionSpec::Notify { template, recipients } => {
                self.emit(
                    &mut *conn,
                    instance,
                    names::NOTIFICATION_QUEUED,
                    json!({
                        "template": template,
                        "recipients": recipients,
                        "entity_type": instance.entity_type,
                        "entity_id": instance.entity_id,
                    }),
                    now,
                )
                .await?;
            }
        }
        instance.log(now, "action_executed", Some(node.id), None);
        Ok(())
    }

    pub(crate) async fn reject_instance(
        &self,
        conn: &mut PgConnection,
        instance: &mut WorkflowInstance,
        node: &WorkflowNode,
        cause: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let open = self.tasks.find_open_for_instance(&mut *conn, instance.id).await?;
        for task in &open {
            self.tasks
                .finish(&mut *conn, task.id, TaskStatus::Expired, None, Some(cause), now)
                .await?;
        }
        instance.status = InstanceStatus::Rejected;
        instance.completed_at = Some(now);
        instance.log(now, "instance_rejected", Some(node.id), Some(json!({ "cause": cause })));
        self.emit(
            &mut *conn,
            instance,
            names::WORKFLOW_REJECTED,
            json!({
                "entity_type": instance.entity_type,
                "entity_id": instance.entity_id,
                "cause": cause,
            }),
            now,
        )
        .await?;
        Ok(())
    }

    async fn fail_instance(
        &self,
        conn: &mut PgConnection,
        instance: &mut WorkflowInstance,
        node: &WorkflowNode,
        err: &AppError,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let message = format!("{:?}", err);
        instance.status = InstanceStatus::Error;
        instance.error_message = Some(message.clone());
        instance.completed_at = Some(now);
        instance.log(now, "instance_error", Some(node.id), Some(json!({ "error": message })));
        self.emit(
            &mut *conn,
            instance,
            names::WORKFLOW_ERROR,
            json!({
                "entity_type": instance.entity_type,
                "entity_id": instance.entity_id,
                "error": message,
            }),
            now,
        )
        .await?;
        self.instances.save(&mut *conn, instance, now).await?;
        Ok(())
    }

    pub(crate) async fn emit(
        &self,
        conn: &mut PgConnection,
        instance: &WorkflowInstance,
        event_name: &str,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let event = OutboxEvent::new(
            instance.organization_id,
            event_name,
            "workflow_instance",
            *instance.id.as_uuid(),
            payload,
            now,
        );
        self.outbox.enqueue(&mut *conn, &event).await?;
        Ok(())
    }
}

fn err_is_deterministic(err: &AppError) -> bool {
    matches!(
        err,
        AppError::Validation(_) | AppError::NotFound(_) | AppError::Conflict { .. }
    )
}
