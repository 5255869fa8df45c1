//! Leave lifecycle: submission with balance reservation, approval through
//! the workflow engine, and terminal finalization of balances.
//!
//! Submission is one transaction: overlap check, reservation, request
//! insert, workflow instantiation and the `leave.requested` outbox row
//! commit together or not at all. Terminal transitions come back from the
//! workflow engine through the dispatcher: the subscriber at the bottom of
//! this file finalizes balances idempotently.

use crate::config::Config;
use crate::error::AppError;
use crate::models::leave_request::{CreateLeaveRequest, LeaveRequest, RequestStatus};
use crate::models::outbox::OutboxEvent;
use crate::models::principal::Principal;
use crate::repositories::{
    transaction, EmployeeRepository, LeaveBalanceRepository, LeaveRequestRepository,
    LeaveTypeRepository, OutboxRepository, Repository,
};
use crate::services::calendar::CalendarService;
use crate::services::events::{pattern_matches, names, EventEnvelope, EventHandler};
use crate::services::workflow::WorkflowEngine;
use crate::types::{EmployeeId, LeaveRequestId, OrganizationId, WorkflowInstanceId};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde_json::json;
use sqlx::postgres::PgConnection;
use sqlx::PgPool;

const ENTITY_TYPE: &str = "leave_request";

#[derive(Clone)]
pub struct LeaveService {
    pool: PgPool,
    config: Config,
    requests: LeaveRequestRepository,
    balances: LeaveBalanceRepository,
    leave_types: LeaveTypeRepository,
    employees: EmployeeRepository,
    outbox: OutboxRepository,
    calendar: CalendarService,
    engine: WorkflowEngine,
}

impl LeaveService {
    pub fn new(pool: PgPool, config: Config, calendar: CalendarService) -> Self {
        let engine = WorkflowEngine::new(pool.clone(), config.clone());
        Self {
            pool,
            config,
            requests: LeaveRequestRepository::new(),
            balances: LeaveBalanceRepository::new(),
            leave_types: LeaveTypeRepository::new(),
            employees: EmployeeRepository::new(),
            outbox: OutboxRepository::new(),
            calendar,
            engine,
        }
    }

    /// Submits a leave request: validates, reserves balance, instantiates
    /// the approval workflow and emits `leave.requested`, atomically.
    pub async fn submit(
        &self,
        principal: &Principal,
        payload: CreateLeaveRequest,
        now: DateTime<Utc>,
    ) -> Result<LeaveRequest, AppError> {
        let org = principal.organization_id;
        let employee = self
            .employees
            .find_by_id(&self.pool, org, principal.employee_id)
            .await?;
        let leave_type = self
            .leave_types
            .find_by_id(&self.pool, org, payload.leave_type_id)
            .await?;

        if !leave_type.applicable_to(employee.gender) {
            return Err(AppError::validation(format!(
                "leave type '{}' is not applicable to this employee",
                leave_type.code
            )));
        }

        // A balance read crossing the carry-forward expiry date triggers
        // the expiry transaction before anything is reserved.
        if leave_type.is_accrual_based {
            let today = now.with_timezone(&self.config.time_zone).date_naive();
            crate::services::accrual::AccrualEngine::new(self.pool.clone(), self.config.clone())
                .expire_carry_forward(
                    org,
                    employee.id,
                    leave_type.id,
                    payload.from_date.year(),
                    today,
                    now,
                )
                .await?;
        }

        let working_days = self
            .calendar
            .working_days(org, payload.from_date, payload.to_date, payload.is_half_day)
            .await?;
        if working_days <= 0.0 {
            return Err(AppError::validation(
                "requested period contains no working days",
            ));
        }
        if let Some(max) = leave_type.max_days_per_year {
            if working_days > max {
                return Err(AppError::validation(format!(
                    "request exceeds the {} day annual limit for '{}'",
                    max, leave_type.code
                )));
            }
        }

        let mut tx = transaction::begin_transaction(&self.pool).await?;

        let overlapping = self
            .requests
            .find_overlapping(&mut *tx, org, employee.id, payload.from_date, payload.to_date)
            .await?;
        if !overlapping.is_empty() {
            return Err(AppError::conflict_reason(
                "an existing leave request overlaps this period",
                "overlap",
            ));
        }

        // Reserve under the balance row lock.
        if leave_type.is_accrual_based {
            let year = payload.from_date.year();
            let mut balance = self
                .balances
                .lock_or_create(&mut tx, org, employee.id, leave_type.id, year, now)
                .await?;
            if !balance.can_reserve(working_days, leave_type.overdraft_floor()) {
                return Err(AppError::conflict_reason(
                    "insufficient leave balance",
                    "insufficient_balance",
                ));
            }
            balance.pending += working_days;
            self.balances.save_amounts(&mut *tx, &balance, now).await?;
        }

        let request = LeaveRequest::new(
            org,
            employee.id,
            leave_type.id,
            payload.from_date,
            payload.to_date,
            payload.is_half_day,
            working_days,
            payload.reason,
            now,
        );
        let mut request = self.requests.create(&mut *tx, &request).await?;

        self.emit_for(
            &mut tx,
            &request,
            names::LEAVE_REQUESTED,
            json!({
                "employee_id": employee.id,
                "leave_type": leave_type.code,
                "from_date": request.from_date,
                "to_date": request.to_date,
                "working_days": request.working_days,
                "notify_email": employee.email,
            }),
            now,
        )
        .await?;

        if leave_type.requires_approval {
            let workflow_code = leave_type
                .workflow_code
                .clone()
                .unwrap_or_else(|| "leave_approval".to_string());
            let subject = json!({
                "employee": {
                    "id": employee.id,
                    "code": employee.code,
                    "email": employee.email,
                    "department_code": employee.department_code,
                },
                "roles": employee.roles,
                "leave": {
                    "leave_type": leave_type.code,
                    "from_date": request.from_date,
                    "to_date": request.to_date,
                },
                "working_days": request.working_days,
                "total_days": request.total_days,
            });
            let instance = self
                .engine
                .instantiate_in_tx(
                    &mut tx,
                    org,
                    &workflow_code,
                    ENTITY_TYPE,
                    *request.id.as_uuid(),
                    subject,
                    now,
                )
                .await?;
            self.requests
                .attach_instance(&mut *tx, request.id, instance.id, now)
                .await?;
            request.workflow_instance_id = Some(instance.id);

            // Trivial graphs (start → end) complete inside instantiation.
            match instance.status {
                crate::models::workflow_instance::InstanceStatus::Completed => {
                    self.finalize_in_tx(&mut tx, org, request.id, RequestStatus::Approved, None, None, now)
                        .await?;
                }
                crate::models::workflow_instance::InstanceStatus::Rejected => {
                    self.finalize_in_tx(&mut tx, org, request.id, RequestStatus::Rejected, None, None, now)
                        .await?;
                }
                _ => {}
            }
        } else {
            // No approval required: terminal immediately.
            self.finalize_in_tx(&mut tx, org, request.id, RequestStatus::Approved, None, None, now)
                .await?;
        }

        transaction::commit_transaction(tx).await?;
        self.requests.find_by_id(&self.pool, org, request.id).await
    }

    /// Direct decision on a request whose leave type needs no workflow, or
    /// whose workflow the reviewer bypasses with an HR role.
    pub async fn decide(
        &self,
        principal: &Principal,
        request_id: LeaveRequestId,
        approve: bool,
        comment: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<LeaveRequest, AppError> {
        if !principal.has_role("hr_manager") {
            return Err(AppError::Forbidden(
                "only hr_manager may decide leave requests directly".into(),
            ));
        }
        let org = principal.organization_id;
        let request = self.requests.find_by_id(&self.pool, org, request_id).await?;
        if let Some(instance_id) = request.workflow_instance_id {
            return Err(AppError::conflict_reason(
                format!(
                    "request is driven by workflow instance {}; act on its tasks instead",
                    instance_id
                ),
                "workflow_driven",
            ));
        }

        let status = if approve {
            RequestStatus::Approved
        } else {
            RequestStatus::Rejected
        };
        let mut tx = transaction::begin_transaction(&self.pool).await?;
        self.finalize_in_tx(
            &mut tx,
            org,
            request_id,
            status,
            Some(principal.employee_id),
            comment,
            now,
        )
        .await?;
        transaction::commit_transaction(tx).await?;
        self.requests.find_by_id(&self.pool, org, request_id).await
    }

    /// Employee-initiated cancellation of a pending request.
    pub async fn cancel(
        &self,
        principal: &Principal,
        request_id: LeaveRequestId,
        now: DateTime<Utc>,
    ) -> Result<LeaveRequest, AppError> {
        let org = principal.organization_id;
        let request = self.requests.find_by_id(&self.pool, org, request_id).await?;
        if request.employee_id != principal.employee_id {
            return Err(AppError::Forbidden("not your leave request".into()));
        }
        if !request.is_pending() {
            return Err(AppError::conflict_reason(
                "only pending requests can be cancelled",
                "not_pending",
            ));
        }

        if let Some(instance_id) = request.workflow_instance_id {
            // Cancels tasks and emits workflow.cancelled; the subscriber
            // releases the reservation when the event is dispatched.
            self.engine
                .cancel(org, instance_id, Some(principal.employee_id), "cancelled by requester", now)
                .await?;
        } else {
            let mut tx = transaction::begin_transaction(&self.pool).await?;
            self.finalize_in_tx(
                &mut tx,
                org,
                request_id,
                RequestStatus::Cancelled,
                Some(principal.employee_id),
                None,
                now,
            )
            .await?;
            transaction::commit_transaction(tx).await?;
        }
        self.requests.find_by_id(&self.pool, org, request_id).await
    }

    pub async fn list_for_employee(
        &self,
        principal: &Principal,
    ) -> Result<Vec<LeaveRequest>, AppError> {
        self.requests
            .find_by_employee(&self.pool, principal.organization_id, principal.employee_id)
            .await
    }

    /// Moves approved requests whose window has fully elapsed to
    /// `completed`. Invoked by the daily worker.
    pub async fn complete_elapsed(
        &self,
        today: chrono::NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        self.requests.complete_elapsed(&self.pool, today, now).await
    }

    /// Applies a terminal decision and its balance arithmetic atomically.
    /// Guarded on the pending status: replays are no-ops at the repo layer,
    /// making the workflow subscriber idempotent.
    async fn finalize_in_tx(
        &self,
        tx: &mut PgConnection,
        org: OrganizationId,
        request_id: LeaveRequestId,
        status: RequestStatus,
        decided_by: Option<EmployeeId>,
        comment: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let request = self.requests.find_by_id(&mut *tx, org, request_id).await?;
        let changed = self
            .requests
            .decide(&mut *tx, request_id, status, decided_by, comment, now)
            .await?;
        if changed == 0 {
            // Already finalized by a concurrent path.
            return Ok(false);
        }

        let leave_type = self
            .leave_types
            .find_by_id(&mut *tx, org, request.leave_type_id)
            .await?;
        if leave_type.is_accrual_based {
            let year = request.from_date.year();
            let mut balance = self
                .balances
                .lock_or_create(&mut *tx, org, request.employee_id, request.leave_type_id, year, now)
                .await?;
            match status {
                RequestStatus::Approved => {
                    balance.used += request.working_days;
                    balance.pending -= request.working_days;
                }
                RequestStatus::Rejected | RequestStatus::Cancelled => {
                    balance.pending -= request.working_days;
                }
                _ => {}
            }
            if balance.pending < -1e-9 {
                return Err(AppError::conflict_reason(
                    "balance reservation drifted; re-read and retry",
                    "reservation_drift",
                ));
            }
            balance.pending = balance.pending.max(0.0);

            // Post-transition audit of the consumption bound. A breach
            // means prior state was already inconsistent: surface it
            // loudly instead of silently clamping.
            let ceiling = balance.allocated + balance.carried_forward + leave_type.overdraft_limit_days;
            if status == RequestStatus::Approved && balance.used > ceiling + 1e-9 {
                tracing::error!(
                    employee = %request.employee_id,
                    leave_type = %leave_type.code,
                    used = balance.used,
                    ceiling,
                    "leave balance invariant violated"
                );
                let event = OutboxEvent::new(
                    org,
                    names::SYSTEM_INVARIANT_VIOLATED,
                    "leave_balance",
                    *balance.id.as_uuid(),
                    json!({
                        "invariant": "used_within_allocation",
                        "employee_id": request.employee_id,
                        "leave_type_id": request.leave_type_id,
                        "used": balance.used,
                        "ceiling": ceiling,
                    }),
                    now,
                );
                self.outbox.enqueue(&mut *tx, &event).await?;
            }
            self.balances.save_amounts(&mut *tx, &balance, now).await?;
        }

        let event_name = match status {
            RequestStatus::Approved => names::LEAVE_APPROVED,
            RequestStatus::Rejected => names::LEAVE_REJECTED,
            RequestStatus::Cancelled => names::LEAVE_CANCELLED,
            _ => names::LEAVE_REQUESTED,
        };
        let employee = self
            .employees
            .find_by_id(&mut *tx, org, request.employee_id)
            .await?;
        self.emit_for(
            tx,
            &request,
            event_name,
            json!({
                "employee_id": request.employee_id,
                "leave_type_id": request.leave_type_id,
                "from_date": request.from_date,
                "to_date": request.to_date,
                "working_days": request.working_days,
                "decided_by": decided_by,
                "notify_email": employee.email,
            }),
            now,
        )
        .await?;
        Ok(true)
    }

    async fn emit_for(
        &self,
        tx: &mut PgConnection,
        request: &LeaveRequest,
        event_name: &str,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let event = OutboxEvent::new(
            request.organization_id,
            event_name,
            ENTITY_TYPE,
            *request.id.as_uuid(),
            payload,
            now,
        );
        self.outbox.enqueue(&mut *tx, &event).await?;
        Ok(())
    }
}

/// Dispatcher-side consumer finalizing leave requests when their workflow
/// instance reaches a terminal state. Idempotent: the underlying decide is
/// guarded on `status = 'pending'`.
pub struct LeaveWorkflowSubscriber {
    service: LeaveService,
}

impl LeaveWorkflowSubscriber {
    pub fn new(service: LeaveService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl EventHandler for LeaveWorkflowSubscriber {
    fn name(&self) -> &'static str {
        "leave_workflow_subscriber"
    }

    fn handles(&self, event_name: &str) -> bool {
        pattern_matches("workflow.*", event_name)
    }

    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        let entity_type = envelope.payload.get("entity_type").and_then(|v| v.as_str());
        if entity_type != Some(ENTITY_TYPE) {
            return Ok(());
        }
        let status = match envelope.event_name.as_str() {
            names::WORKFLOW_COMPLETED => RequestStatus::Approved,
            names::WORKFLOW_REJECTED => RequestStatus::Rejected,
            names::WORKFLOW_CANCELLED | names::WORKFLOW_ERROR => RequestStatus::Cancelled,
            _ => return Ok(()),
        };
        let Some(request_id) = envelope
            .payload
            .get("entity_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<LeaveRequestId>().ok())
        else {
            return Ok(());
        };

        let instance_id: Option<WorkflowInstanceId> = Some(envelope.aggregate_id.into());
        tracing::debug!(
            request = %request_id,
            instance = ?instance_id,
            outcome = ?status,
            "finalizing leave request from workflow event"
        );

        let now = Utc::now();
        let mut tx = transaction::begin_transaction(&self.service.pool).await?;
        self.service
            .finalize_in_tx(&mut tx, envelope.organization_id, request_id, status, None, None, now)
            .await?;
        transaction::commit_transaction(tx).await?;
        Ok(())
    }
}
