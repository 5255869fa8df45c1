//! Scheduled workflow maintenance: SLA warnings, escalations, expiries and
//! transient-failure retries.
//!
//! `tick(now)` is pure apart from DB and outbox effects; the clock is
//! always injected so the windows are deterministic under test. Contended
//! instances are skipped and picked up on the next tick.

use crate::config::Config;
use crate::error::AppError;
use crate::models::workflow::ApproverSelector;
use crate::models::workflow_instance::{TaskStatus, WorkflowTask};
use crate::repositories::{
    locks, transaction, WorkflowInstanceRepository, WorkflowTaskRepository,
};
use crate::services::events::names;
use crate::services::workflow::engine::{evaluate_approval_node, ApprovalOutcome, WorkflowEngine};
use crate::services::workflow::selector::ApproverResolver;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::PgPool;

/// Rows examined per category per tick.
const TICK_BATCH: i64 = 100;

/// What the scheduler owes an overdue task at `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaAction {
    None,
    Warn,
    Escalate,
    Expire,
}

/// Classifies a pending task against its SLA windows.
///
/// With SLA `S` (due − created) and escalation window `E`:
/// a single warning fires once elapsed ≥ 0.9·S, escalation once
/// elapsed ≥ E, and the task expires once elapsed ≥ S + E.
pub fn classify_sla(
    created_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
    escalation_after_hours: Option<i64>,
    warning_sent: bool,
    can_escalate: bool,
    now: DateTime<Utc>,
) -> SlaAction {
    let sla = due_at - created_at;
    if sla <= Duration::zero() {
        return SlaAction::None;
    }
    if let Some(escalation_hours) = escalation_after_hours {
        let escalation = Duration::hours(escalation_hours);
        if now >= created_at + sla + escalation {
            return SlaAction::Expire;
        }
        if can_escalate && now >= created_at + escalation {
            return SlaAction::Escalate;
        }
    }
    let warn_at = created_at + sla * 9 / 10;
    if !warning_sent && now >= warn_at {
        return SlaAction::Warn;
    }
    SlaAction::None
}

/// Counters reported by one tick, for logs and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub warnings: u32,
    pub escalations: u32,
    pub expirations: u32,
    pub retries: u32,
    pub skipped: u32,
}

pub struct WorkflowScheduler {
    pool: PgPool,
    config: Config,
    engine: WorkflowEngine,
    tasks: WorkflowTaskRepository,
    instances: WorkflowInstanceRepository,
    resolver: ApproverResolver,
}

impl WorkflowScheduler {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let engine = WorkflowEngine::new(pool.clone(), config.clone());
        let resolver = ApproverResolver::new(config.manager_chain_max_depth);
        Self {
            pool,
            config,
            engine,
            tasks: WorkflowTaskRepository::new(),
            instances: WorkflowInstanceRepository::new(),
            resolver,
        }
    }

    /// One maintenance pass. Invoked by the scheduler binary every
    /// `scheduler_tick_minutes`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickStats, AppError> {
        let mut stats = TickStats::default();
        self.emit_warnings(now, &mut stats).await?;
        self.process_overdue(now, &mut stats).await?;
        self.retry_failed(now, &mut stats).await?;
        if stats != TickStats::default() {
            tracing::info!(?stats, "workflow scheduler tick");
        }
        Ok(stats)
    }

    async fn emit_warnings(&self, now: DateTime<Utc>, stats: &mut TickStats) -> Result<(), AppError> {
        let mut tx = transaction::begin_transaction(&self.pool).await?;
        let due = self.tasks.find_due_for_warning(&mut *tx, now, TICK_BATCH).await?;
        for task in due {
            let Some(due_at) = task.due_at else { continue };
            let action = classify_sla(
                task.created_at,
                due_at,
                None,
                task.sla_warning_sent,
                false,
                now,
            );
            if action != SlaAction::Warn {
                continue;
            }
            let changed = self.tasks.mark_warning_sent(&mut *tx, task.id, now).await?;
            if changed == 0 {
                continue;
            }
            let instance = self
                .instances
                .find_by_id(&mut *tx, task.organization_id, task.instance_id)
                .await?;
            self.engine
                .emit(
                    &mut *tx,
                    &instance,
                    names::WORKFLOW_TASK_SLA_WARNING,
                    json!({
                        "task_id": task.id,
                        "assignee": task.assignee_id,
                        "due_at": due_at,
                    }),
                    now,
                )
                .await?;
            stats.warnings += 1;
        }
        transaction::commit_transaction(tx).await?;
        Ok(())
    }

    async fn process_overdue(&self, now: DateTime<Utc>, stats: &mut TickStats) -> Result<(), AppError> {
        let mut tx = transaction::begin_transaction(&self.pool).await?;
        let overdue = self.tasks.find_overdue(&mut *tx, now, TICK_BATCH).await?;
        for task in overdue {
            let Some(due_at) = task.due_at else { continue };

            // Escalation checks must not block behind an in-flight act().
            let granted =
                locks::try_xact_lock(&mut *tx, "workflow_instance", task.instance_id.as_uuid())
                    .await?;
            if !granted {
                stats.skipped += 1;
                continue;
            }

            let mut instance = self
                .instances
                .find_by_id(&mut *tx, task.organization_id, task.instance_id)
                .await?;
            if instance.status.is_terminal() {
                continue;
            }
            let graph = self.engine.load_graph_for(&mut *tx, &instance).await?;
            let node = graph.node(task.node_id)?.clone();

            let escalation_hours = if graph.def.auto_escalation {
                Some(
                    graph
                        .def
                        .escalation_after_hours
                        .unwrap_or(self.config.default_escalation_hours),
                )
            } else {
                None
            };
            // Escalation tasks do not escalate again; expiry still applies.
            let can_escalate =
                task.escalated_from.is_none() && node.escalation_target.is_some();

            match classify_sla(
                task.created_at,
                due_at,
                escalation_hours,
                task.sla_warning_sent,
                can_escalate,
                now,
            ) {
                SlaAction::Expire => {
                    self.tasks
                        .finish(&mut *tx, task.id, TaskStatus::Expired, None, Some("sla_expired"), now)
                        .await?;
                    instance.log(
                        now,
                        "task_expired",
                        Some(task.node_id),
                        Some(json!({ "task_id": task.id, "cause": "sla_expired" })),
                    );
                    self.engine
                        .emit(
                            &mut *tx,
                            &instance,
                            names::WORKFLOW_TASK_EXPIRED,
                            json!({ "task_id": task.id, "cause": "sla_expired" }),
                            now,
                        )
                        .await?;

                    let siblings = self
                        .tasks
                        .find_for_node(&mut *tx, instance.id, task.node_id)
                        .await?;
                    match evaluate_approval_node(&siblings, graph.def.require_all_approvals) {
                        ApprovalOutcome::Rejected => {
                            self.engine
                                .reject_instance(&mut *tx, &mut instance, &node, "sla_expired", now)
                                .await?;
                        }
                        // Remaining tasks keep the node open.
                        ApprovalOutcome::Wait | ApprovalOutcome::Approved => {}
                    }
                    self.instances.save(&mut *tx, &instance, now).await?;
                    stats.expirations += 1;
                }
                SlaAction::Escalate => {
                    let Some(target_selector) = node.escalation_target.as_deref() else {
                        continue;
                    };
                    let selector: ApproverSelector =
                        target_selector.parse().map_err(AppError::validation)?;
                    let subject = instance.instance_data.0.subject["employee"]["id"]
                        .as_str()
                        .and_then(|s| s.parse().ok());
                    let Some(subject) = subject else {
                        stats.skipped += 1;
                        continue;
                    };
                    let resolved = match self
                        .resolver
                        .resolve(&self.pool, instance.organization_id, &selector, subject, now)
                        .await
                    {
                        Ok(r) => r,
                        Err(err) => {
                            tracing::warn!(task = %task.id, error = ?err, "escalation target unresolvable");
                            stats.skipped += 1;
                            continue;
                        }
                    };
                    let Some(target) = resolved.first() else {
                        stats.skipped += 1;
                        continue;
                    };

                    let changed = self
                        .tasks
                        .finish(&mut *tx, task.id, TaskStatus::Escalated, None, Some("sla_breached"), now)
                        .await?;
                    if changed == 0 {
                        continue;
                    }

                    // The replacement fills the same approval slot with a
                    // fresh SLA window.
                    let sla = due_at - task.created_at;
                    let mut replacement = WorkflowTask::new(
                        task.organization_id,
                        task.instance_id,
                        task.node_id,
                        Some(target.employee_id),
                        target.role.clone(),
                        Some(now + sla),
                        now,
                    );
                    replacement.escalated_from = Some(task.id);
                    let replacement = self.tasks.create(&mut *tx, &replacement).await?;

                    instance.log(
                        now,
                        "task_escalated",
                        Some(task.node_id),
                        Some(json!({ "from": task.id, "to": replacement.id })),
                    );
                    self.engine
                        .emit(
                            &mut *tx,
                            &instance,
                            names::WORKFLOW_TASK_ESCALATED,
                            json!({
                                "task_id": task.id,
                                "replacement_task_id": replacement.id,
                                "escalated_to": replacement.assignee_id,
                                "due_at": replacement.due_at,
                            }),
                            now,
                        )
                        .await?;
                    self.instances.save(&mut *tx, &instance, now).await?;
                    stats.escalations += 1;
                }
                SlaAction::Warn | SlaAction::None => {}
            }
        }
        transaction::commit_transaction(tx).await?;
        Ok(())
    }

    async fn retry_failed(&self, now: DateTime<Utc>, stats: &mut TickStats) -> Result<(), AppError> {
        let due = self
            .instances
            .find_due_for_retry(&self.pool, now, TICK_BATCH)
            .await?;
        for instance in due {
            match self
                .engine
                .retry(instance.organization_id, instance.id, now)
                .await
            {
                Ok(()) => stats.retries += 1,
                Err(err) => {
                    tracing::warn!(instance = %instance.id, error = ?err, "instance retry failed");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    /// Scenario: sla_hours = 24, escalation_after_hours = 48.
    fn classify_at(elapsed_hours: i64, warning_sent: bool) -> SlaAction {
        classify_sla(t(0), t(24), Some(48), warning_sent, true, t(elapsed_hours))
    }

    #[test]
    fn warning_fires_in_the_ninety_percent_window() {
        assert_eq!(classify_at(20, false), SlaAction::None);
        // 0.9 * 24h = 21.6h; 22h is inside the window.
        assert_eq!(classify_at(22, false), SlaAction::Warn);
        assert_eq!(classify_at(22, true), SlaAction::None);
    }

    #[test]
    fn escalation_fires_at_the_escalation_window() {
        assert_eq!(classify_at(47, true), SlaAction::None);
        assert_eq!(classify_at(49, true), SlaAction::Escalate);
        // Warning still owed wins only below the escalation point.
        assert_eq!(classify_at(49, false), SlaAction::Escalate);
    }

    #[test]
    fn expiry_fires_at_sla_plus_escalation() {
        assert_eq!(classify_at(71, true), SlaAction::Escalate);
        assert_eq!(classify_at(72, true), SlaAction::Expire);
        assert_eq!(classify_at(100, true), SlaAction::Expire);
    }

    #[test]
    fn tasks_that_cannot_escalate_still_expire() {
        let action = classify_sla(t(0), t(24), Some(48), true, false, t(49));
        assert_eq!(action, SlaAction::None);
        let action = classify_sla(t(0), t(24), Some(48), true, false, t(72));
        assert_eq!(action, SlaAction::Expire);
    }

    #[test]
    fn no_escalation_window_means_warn_only() {
        let action = classify_sla(t(0), t(24), None, false, true, t(23));
        assert_eq!(action, SlaAction::Warn);
        let action = classify_sla(t(0), t(24), None, true, true, t(300));
        assert_eq!(action, SlaAction::None);
    }

    #[test]
    fn degenerate_sla_is_ignored() {
        let action = classify_sla(t(0), t(0), Some(48), false, true, t(10));
        assert_eq!(action, SlaAction::None);
    }
}
