//! Payroll run state machine.
//!
//! Transitions are forward-only and serialized per run by a `FOR UPDATE`
//! on the run row plus guarded status updates. Calculation is idempotent:
//! a content hash of the inputs is stored on the run, identical re-runs
//! are no-ops, and changed inputs demand an explicit revert first.

use crate::config::Config;
use crate::error::AppError;
use crate::models::outbox::OutboxEvent;
use crate::models::payroll::{PayrollRun, PayrollRunItem, PayrollRunStatus};
use crate::models::principal::Principal;
use crate::repositories::{
    transaction, AttendanceRepository, EmployeeRepository, OutboxRepository, PayrollRepository,
};
use crate::services::events::names;
use crate::types::{PayrollRunId, PayrollRunItemId};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::types::Json;
use sqlx::PgPool;
use utoipa::ToSchema;
use validator::Validate;

/// Working days assumed per month for daily-rate proration.
const WORKING_DAYS_PER_MONTH: f64 = 22.0;
/// Overtime premium over the derived hourly rate.
const OVERTIME_MULTIPLIER: f64 = 1.5;
/// Flat statutory deduction rate applied to gross. Deployment-specific
/// rules belong in configuration seeded per tenant; this is the default.
const STATUTORY_RATE: f64 = 0.10;

#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
pub struct CreatePayrollRun {
    pub company: Option<String>,
    #[validate(range(min = 2000, max = 2100))]
    pub period_year: i32,
    #[validate(range(min = 1, max = 12))]
    pub period_month: i32,
}

/// The per-employee inputs the calculation consumed. Hashed for the
/// idempotence check.
#[derive(Debug, Clone, Serialize)]
struct EmployeeInputs {
    employee_id: String,
    monthly_salary: String,
    present_days: i64,
    leave_days: i64,
    overtime_hours: f64,
}

fn hash_inputs(inputs: &[EmployeeInputs]) -> String {
    let mut hasher = Sha256::new();
    for input in inputs {
        hasher.update(input.employee_id.as_bytes());
        hasher.update(input.monthly_salary.as_bytes());
        hasher.update(input.present_days.to_le_bytes());
        hasher.update(input.leave_days.to_le_bytes());
        hasher.update(input.overtime_hours.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

fn month_bounds(year: i32, month: i32) -> Result<(NaiveDate, NaiveDate), AppError> {
    let start = NaiveDate::from_ymd_opt(year, month as u32, 1)
        .ok_or_else(|| AppError::validation("invalid payroll period"))?;
    let end = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month as u32 + 1, 1)
    }
    .map(|d| d.pred_opt().unwrap_or(start))
    .ok_or_else(|| AppError::validation("invalid payroll period"))?;
    Ok((start, end))
}

fn decimal(v: f64) -> Decimal {
    Decimal::from_f64(v).unwrap_or(Decimal::ZERO).round_dp(2)
}

#[derive(Clone)]
pub struct PayrollService {
    pool: PgPool,
    #[allow(dead_code)]
    config: Config,
    runs: PayrollRepository,
    employees: EmployeeRepository,
    attendance: AttendanceRepository,
    outbox: OutboxRepository,
}

impl PayrollService {
    pub fn new(pool: PgPool, config: Config) -> Self {
        Self {
            pool,
            config,
            runs: PayrollRepository::new(),
            employees: EmployeeRepository::new(),
            attendance: AttendanceRepository::new(),
            outbox: OutboxRepository::new(),
        }
    }

    pub async fn create_run(
        &self,
        principal: &Principal,
        payload: CreatePayrollRun,
        now: DateTime<Utc>,
    ) -> Result<PayrollRun, AppError> {
        let org = principal.organization_id;
        let (start, end) = month_bounds(payload.period_year, payload.period_month)?;
        let run = PayrollRun::new(
            org,
            payload.company,
            payload.period_year,
            payload.period_month,
            start,
            end,
            now,
        );
        // The range exclusion constraint turns an overlapping period into
        // a conflict here.
        self.runs.create(&self.pool, &run).await.map_err(|err| {
            if matches!(err, AppError::Conflict { .. }) {
                AppError::conflict_reason(
                    "a payroll run already covers this period",
                    "period_overlap",
                )
            } else {
                err
            }
        })
    }

    /// draft → in_progress. Requires a closed pay period and in-scope
    /// employees to process.
    pub async fn start_processing(
        &self,
        principal: &Principal,
        run_id: PayrollRunId,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<PayrollRun, AppError> {
        let org = principal.organization_id;
        let mut tx = transaction::begin_transaction(&self.pool).await?;
        let run = self.runs.lock_by_id(&mut tx, org, run_id).await?;
        Self::ensure_transition(&run, PayrollRunStatus::InProgress)?;
        if run.period_end >= today {
            return Err(AppError::conflict_reason(
                "pay period is still open",
                "period_open",
            ));
        }
        let in_scope = self
            .employees
            .find_employed_in_period(&mut *tx, org, run.period_start, run.period_end)
            .await?;
        if in_scope.is_empty() {
            return Err(AppError::conflict_reason(
                "no employees in scope for this period",
                "missing_inputs",
            ));
        }

        let changed = self
            .runs
            .mark_processing(&mut *tx, run_id, principal.employee_id, now)
            .await?;
        if changed == 0 {
            return Err(AppError::conflict_reason(
                "payroll run left draft concurrently",
                "invalid_transition",
            ));
        }
        self.emit(&mut tx, &run, names::PAYROLL_RUN_STARTED, json!({}), now)
            .await?;
        transaction::commit_transaction(tx).await?;
        self.runs.find_by_id(&self.pool, org, run_id).await
    }

    /// in_progress → calculated, or an idempotent no-op when the run is
    /// already calculated from identical inputs.
    pub async fn mark_calculated(
        &self,
        principal: &Principal,
        run_id: PayrollRunId,
        now: DateTime<Utc>,
    ) -> Result<PayrollRun, AppError> {
        let org = principal.organization_id;
        let mut tx = transaction::begin_transaction(&self.pool).await?;
        let run = self.runs.lock_by_id(&mut tx, org, run_id).await?;

        let mut employees = self
            .employees
            .find_employed_in_period(&mut *tx, org, run.period_start, run.period_end)
            .await?;
        // Stable order: the content hash and the item rows must pair the
        // same inputs with the same employees on every run.
        employees.sort_by_key(|e| e.id);

        let mut inputs = Vec::with_capacity(employees.len());
        for employee in &employees {
            let summary = self
                .attendance
                .summarize_period(&mut *tx, org, employee.id, run.period_start, run.period_end)
                .await?;
            inputs.push(EmployeeInputs {
                employee_id: employee.id.to_string(),
                monthly_salary: employee.monthly_salary.to_string(),
                present_days: summary.present_days,
                leave_days: summary.leave_days,
                overtime_hours: summary.overtime_hours,
            });
        }
        let input_hash = hash_inputs(&inputs);

        match run.status {
            PayrollRunStatus::Calculated => {
                return if run.input_hash.as_deref() == Some(input_hash.as_str()) {
                    // Same inputs: no-op.
                    transaction::commit_transaction(tx).await?;
                    Ok(run)
                } else {
                    Err(AppError::conflict_reason(
                        "inputs changed since calculation; revert the run first",
                        "inputs_changed_requires_revert",
                    ))
                };
            }
            PayrollRunStatus::InProgress => {}
            _ => {
                return Err(AppError::conflict_reason(
                    format!("cannot calculate a {} run", run.status.db_value()),
                    "invalid_transition",
                ));
            }
        }

        self.runs.delete_items(&mut *tx, run_id).await?;
        let mut total_gross = Decimal::ZERO;
        let mut total_deductions = Decimal::ZERO;
        let mut total_net = Decimal::ZERO;

        for (employee, input) in employees.iter().zip(&inputs) {
            let salary = employee.monthly_salary.to_f64().unwrap_or(0.0);
            let daily_rate = salary / WORKING_DAYS_PER_MONTH;
            let hourly_rate = daily_rate / 8.0;

            let paid_days = (input.present_days + input.leave_days) as f64;
            let base = salary.min(daily_rate * paid_days.max(0.0));
            let overtime_pay = input.overtime_hours * hourly_rate * OVERTIME_MULTIPLIER;
            let gross = base + overtime_pay;
            let statutory = gross * STATUTORY_RATE;
            let net = gross - statutory;

            let item = PayrollRunItem {
                id: PayrollRunItemId::new(),
                run_id,
                organization_id: org,
                employee_id: employee.id,
                gross: decimal(gross),
                deductions: decimal(statutory),
                net: decimal(net),
                components: Json(json!({
                    "earnings": { "base": decimal(base), "overtime": decimal(overtime_pay) },
                    "deductions": { "statutory": decimal(statutory) },
                    "basis": {
                        "present_days": input.present_days,
                        "leave_days": input.leave_days,
                        "overtime_hours": input.overtime_hours,
                    },
                })),
                working_days: input.present_days as f64,
                leave_days: input.leave_days as f64,
                overtime_hours: input.overtime_hours,
                created_at: now,
            };
            self.runs.insert_item(&mut *tx, &item).await?;
            total_gross += item.gross;
            total_deductions += item.deductions;
            total_net += item.net;
        }

        let changed = self
            .runs
            .save_calculation(
                &mut *tx,
                run_id,
                employees.len() as i32,
                total_gross,
                total_deductions,
                total_net,
                &input_hash,
                now,
            )
            .await?;
        if changed == 0 {
            return Err(AppError::conflict_reason(
                "payroll run left in_progress concurrently",
                "invalid_transition",
            ));
        }
        self.emit(
            &mut tx,
            &run,
            names::PAYROLL_RUN_PROCESSED,
            json!({
                "employee_count": employees.len(),
                "total_gross": total_gross,
                "total_net": total_net,
            }),
            now,
        )
        .await?;
        transaction::commit_transaction(tx).await?;
        self.runs.find_by_id(&self.pool, org, run_id).await
    }

    /// calculated → in_progress, demanded before recalculation when inputs
    /// changed.
    pub async fn revert_to_processing(
        &self,
        principal: &Principal,
        run_id: PayrollRunId,
        now: DateTime<Utc>,
    ) -> Result<PayrollRun, AppError> {
        let org = principal.organization_id;
        let mut tx = transaction::begin_transaction(&self.pool).await?;
        let run = self.runs.lock_by_id(&mut tx, org, run_id).await?;
        if run.status != PayrollRunStatus::Calculated {
            return Err(AppError::conflict_reason(
                "only calculated runs can be reverted",
                "invalid_transition",
            ));
        }
        self.runs.revert_to_processing(&mut *tx, run_id, now).await?;
        transaction::commit_transaction(tx).await?;
        self.runs.find_by_id(&self.pool, org, run_id).await
    }

    /// calculated → approved. Two-person rule: the approver must differ
    /// from whoever started processing.
    pub async fn approve(
        &self,
        principal: &Principal,
        run_id: PayrollRunId,
        now: DateTime<Utc>,
    ) -> Result<PayrollRun, AppError> {
        let org = principal.organization_id;
        let mut tx = transaction::begin_transaction(&self.pool).await?;
        let run = self.runs.lock_by_id(&mut tx, org, run_id).await?;
        Self::ensure_transition(&run, PayrollRunStatus::Approved)?;
        if run.processed_by == Some(principal.employee_id) {
            return Err(AppError::Forbidden(
                "payroll approval requires a principal distinct from the processor".into(),
            ));
        }
        let changed = self
            .runs
            .approve(&mut *tx, run_id, principal.employee_id, now)
            .await?;
        if changed == 0 {
            return Err(AppError::conflict_reason(
                "payroll run left calculated concurrently",
                "invalid_transition",
            ));
        }
        self.emit(
            &mut tx,
            &run,
            names::PAYROLL_RUN_APPROVED,
            json!({ "approved_by": principal.employee_id }),
            now,
        )
        .await?;
        transaction::commit_transaction(tx).await?;
        self.runs.find_by_id(&self.pool, org, run_id).await
    }

    /// approved → paid, once external payment confirmation arrives.
    pub async fn mark_paid(
        &self,
        principal: &Principal,
        run_id: PayrollRunId,
        payment_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<PayrollRun, AppError> {
        let org = principal.organization_id;
        let mut tx = transaction::begin_transaction(&self.pool).await?;
        let run = self.runs.lock_by_id(&mut tx, org, run_id).await?;
        Self::ensure_transition(&run, PayrollRunStatus::Paid)?;
        let changed = self.runs.mark_paid(&mut *tx, run_id, payment_date, now).await?;
        if changed == 0 {
            return Err(AppError::conflict_reason(
                "payroll run left approved concurrently",
                "invalid_transition",
            ));
        }
        self.emit(
            &mut tx,
            &run,
            names::PAYROLL_RUN_PAID,
            json!({ "payment_date": payment_date }),
            now,
        )
        .await?;
        transaction::commit_transaction(tx).await?;
        self.runs.find_by_id(&self.pool, org, run_id).await
    }

    /// Any non-paid state → cancelled.
    pub async fn cancel(
        &self,
        principal: &Principal,
        run_id: PayrollRunId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<PayrollRun, AppError> {
        let org = principal.organization_id;
        let mut tx = transaction::begin_transaction(&self.pool).await?;
        let run = self.runs.lock_by_id(&mut tx, org, run_id).await?;
        Self::ensure_transition(&run, PayrollRunStatus::Cancelled)?;
        let changed = self.runs.cancel(&mut *tx, run_id, reason, now).await?;
        if changed == 0 {
            return Err(AppError::conflict_reason(
                "payroll run reached a terminal state concurrently",
                "invalid_transition",
            ));
        }
        self.emit(
            &mut tx,
            &run,
            names::PAYROLL_RUN_CANCELLED,
            json!({ "reason": reason }),
            now,
        )
        .await?;
        transaction::commit_transaction(tx).await?;
        self.runs.find_by_id(&self.pool, org, run_id).await
    }

    pub async fn get(
        &self,
        principal: &Principal,
        run_id: PayrollRunId,
    ) -> Result<(PayrollRun, Vec<PayrollRunItem>), AppError> {
        let org = principal.organization_id;
        let run = self.runs.find_by_id(&self.pool, org, run_id).await?;
        let items = self.runs.find_items(&self.pool, run_id).await?;
        Ok((run, items))
    }

    fn ensure_transition(run: &PayrollRun, to: PayrollRunStatus) -> Result<(), AppError> {
        if run.status.can_transition(to) {
            Ok(())
        } else {
            Err(AppError::conflict_reason(
                format!(
                    "transition {} → {} is not allowed",
                    run.status.db_value(),
                    to.db_value()
                ),
                "invalid_transition",
            ))
        }
    }

    async fn emit(
        &self,
        tx: &mut sqlx::postgres::PgConnection,
        run: &PayrollRun,
        event_name: &str,
        mut payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if let Some(map) = payload.as_object_mut() {
            map.insert("period_year".to_string(), json!(run.period_year));
            map.insert("period_month".to_string(), json!(run.period_month));
        }
        let event = OutboxEvent::new(
            run.organization_id,
            event_name,
            "payroll_run",
            *run.id.as_uuid(),
            payload,
            now,
        );
        self.outbox.enqueue(&mut *tx, &event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_bounds_cover_whole_months() {
        let (start, end) = month_bounds(2025, 1).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 1, 31).unwrap());

        let (start, end) = month_bounds(2025, 12).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());

        let (_, end) = month_bounds(2024, 2).unwrap();
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn input_hash_is_stable_and_input_sensitive() {
        let base = vec![
            EmployeeInputs {
                employee_id: "a".into(),
                monthly_salary: "5000".into(),
                present_days: 20,
                leave_days: 2,
                overtime_hours: 3.5,
            },
            EmployeeInputs {
                employee_id: "b".into(),
                monthly_salary: "6500".into(),
                present_days: 22,
                leave_days: 0,
                overtime_hours: 0.0,
            },
        ];
        let h1 = hash_inputs(&base);
        let h2 = hash_inputs(&base);
        assert_eq!(h1, h2);

        let mut changed = base.clone();
        changed[0].present_days = 21;
        assert_ne!(h1, hash_inputs(&changed));

        let mut changed = base;
        changed[1].overtime_hours = 0.25;
        assert_ne!(h1, hash_inputs(&changed));
    }

    #[test]
    fn decimal_rounds_to_cents() {
        assert_eq!(decimal(1234.5678).to_string(), "1234.57");
        assert_eq!(decimal(0.004).to_string(), "0.00");
    }
}
