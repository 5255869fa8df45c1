//! Attendance accounting: check-in/out capture, duration and overtime
//! computation, and the regularization path through the approval workflow.

use crate::config::Config;
use crate::error::AppError;
use crate::models::attendance::{
    round2, AttendanceRecord, AttendanceStatus, CheckInRequest, CheckOutRequest, WorkMode,
    SHIFT_CUTOFF_HOURS,
};
use crate::models::outbox::OutboxEvent;
use crate::models::principal::Principal;
use crate::models::regularization::{
    CreateRegularization, RegularizationRequest, RegularizationType, RequestStatus,
};
use crate::repositories::{
    transaction, AttendanceRepository, EmployeeRepository, LeaveRequestRepository,
    OutboxRepository, RegularizationRepository,
};
use crate::services::calendar::CalendarService;
use crate::services::events::{names, pattern_matches, EventEnvelope, EventHandler};
use crate::services::workflow::WorkflowEngine;
use crate::types::{EmployeeId, OrganizationId, RegularizationId};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::json;
use sqlx::postgres::PgConnection;
use sqlx::types::Json;
use sqlx::PgPool;

const ENTITY_TYPE: &str = "regularization_request";

/// Great-circle distance in meters; used for the office geo-fence.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let (dphi, dlambda) = ((lat2 - lat1).to_radians(), (lon2 - lon1).to_radians());
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// A shift closes by 27:00 of its check-in day (3 AM next day). Later
/// check-outs need a manual look.
pub fn shift_cutoff(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc() + Duration::hours(SHIFT_CUTOFF_HOURS))
        .unwrap_or_else(Utc::now)
}

#[derive(Clone)]
pub struct AttendanceService {
    pool: PgPool,
    config: Config,
    records: AttendanceRepository,
    regularizations: RegularizationRepository,
    employees: EmployeeRepository,
    outbox: OutboxRepository,
    engine: WorkflowEngine,
}

impl AttendanceService {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let engine = WorkflowEngine::new(pool.clone(), config.clone());
        Self {
            pool,
            config,
            records: AttendanceRepository::new(),
            regularizations: RegularizationRepository::new(),
            employees: EmployeeRepository::new(),
            outbox: OutboxRepository::new(),
            engine,
        }
    }

    /// Records a check-in. At most one per (employee, date); the date is
    /// the check-in day in the organization timezone.
    pub async fn check_in(
        &self,
        principal: &Principal,
        payload: CheckInRequest,
        now: DateTime<Utc>,
    ) -> Result<AttendanceRecord, AppError> {
        let org = principal.organization_id;
        let employee = self
            .employees
            .find_by_id(&self.pool, org, principal.employee_id)
            .await?;

        let ts = payload.ts.unwrap_or(now);
        let local = ts.with_timezone(&self.config.time_zone);
        let date = local.date_naive();

        let mut tx = transaction::begin_transaction(&self.pool).await?;
        let existing = self
            .records
            .find_by_employee_date(&mut *tx, org, employee.id, date)
            .await?;

        let is_new = existing.is_none();
        let mut record = match existing {
            Some(record) if record.check_in_ts.is_some() => {
                return Err(AppError::conflict_reason(
                    "already checked in for this date",
                    "already_checked_in",
                ));
            }
            Some(record) => record,
            None => AttendanceRecord::new(org, employee.id, date, now),
        };

        record.check_in_ts = Some(ts);
        // A pre-materialized absence row becomes a presence on check-in.
        record.status = AttendanceStatus::Present;
        let scheduled = local.date_naive().and_time(employee.scheduled_start);
        let late_by = local.naive_local() - scheduled;
        if late_by > Duration::zero() {
            record.is_late = true;
            record.late_minutes = late_by.num_minutes() as i32;
        }

        record.device_info = payload.device_info.map(Json);
        record.latitude = payload.latitude;
        record.longitude = payload.longitude;
        record.work_mode = self.classify_work_mode(payload.latitude, payload.longitude);

        let stored = if is_new {
            self.records.create(&mut *tx, &record).await?
        } else {
            self.records.save(&mut *tx, &record, now).await?;
            record
        };

        let event = OutboxEvent::new(
            org,
            names::ATTENDANCE_CHECKED_IN,
            "attendance_record",
            *stored.id.as_uuid(),
            json!({
                "employee_id": employee.id,
                "date": stored.date,
                "check_in_ts": stored.check_in_ts,
                "late": stored.is_late,
                "late_minutes": stored.late_minutes,
                "work_mode": stored.work_mode,
            }),
            now,
        );
        self.outbox.enqueue(&mut *tx, &event).await?;
        transaction::commit_transaction(tx).await?;
        Ok(stored)
    }

    /// Records a check-out and computes hours. A check-out past the 27:00
    /// cut-off of the check-in day does not close the record; it flags it
    /// for manual review instead.
    pub async fn check_out(
        &self,
        principal: &Principal,
        payload: CheckOutRequest,
        now: DateTime<Utc>,
    ) -> Result<AttendanceRecord, AppError> {
        let org = principal.organization_id;
        let employee = self
            .employees
            .find_by_id(&self.pool, org, principal.employee_id)
            .await?;

        let ts = payload.ts.unwrap_or(now);
        let local = ts.with_timezone(&self.config.time_zone);
        // A shift straddling midnight belongs to the check-in date.
        let mut date = local.date_naive();
        let mut tx = transaction::begin_transaction(&self.pool).await?;
        let mut record = match self
            .records
            .find_by_employee_date(&mut *tx, org, employee.id, date)
            .await?
        {
            Some(r) if r.check_in_ts.is_some() => r,
            _ => {
                date -= Duration::days(1);
                self.records
                    .find_by_employee_date(&mut *tx, org, employee.id, date)
                    .await?
                    .filter(|r| r.check_in_ts.is_some())
                    .ok_or_else(|| {
                        AppError::conflict_reason(
                            "no open check-in found for this check-out",
                            "not_checked_in",
                        )
                    })?
            }
        };

        if record.check_out_ts.is_some() {
            return Err(AppError::conflict_reason(
                "already checked out for this date",
                "already_checked_out",
            ));
        }

        if ts > shift_cutoff(record.date) {
            record.needs_review = true;
            self.records.save(&mut *tx, &record, now).await?;
            transaction::commit_transaction(tx).await?;
            return Ok(record);
        }

        record.check_out_ts = Some(ts);
        record.compute_hours();

        let scheduled_end = record.date.and_time(employee.scheduled_end);
        let local_out = ts.with_timezone(&self.config.time_zone).naive_local();
        let early_by = scheduled_end - local_out;
        if early_by > Duration::zero() {
            record.early_departure = true;
            record.early_departure_minutes = early_by.num_minutes() as i32;
        }
        if let Some(hours) = record.working_hours {
            if hours < 4.0 {
                record.status = AttendanceStatus::HalfDay;
            }
        }

        self.records.save(&mut *tx, &record, now).await?;

        let event = OutboxEvent::new(
            org,
            names::ATTENDANCE_CHECKED_OUT,
            "attendance_record",
            *record.id.as_uuid(),
            json!({
                "employee_id": employee.id,
                "date": record.date,
                "working_hours": record.working_hours,
                "overtime_hours": record.overtime_hours,
                "early_departure": record.early_departure,
            }),
            now,
        );
        self.outbox.enqueue(&mut *tx, &event).await?;
        transaction::commit_transaction(tx).await?;
        Ok(record)
    }

    fn classify_work_mode(&self, latitude: Option<f64>, longitude: Option<f64>) -> WorkMode {
        let (Some(office_lat), Some(office_lon)) =
            (self.config.office_latitude, self.config.office_longitude)
        else {
            return WorkMode::Office;
        };
        let (Some(lat), Some(lon)) = (latitude, longitude) else {
            return WorkMode::Office;
        };
        let distance = haversine_meters(office_lat, office_lon, lat, lon);
        if distance > self.config.geofence_radius_meters {
            WorkMode::Remote
        } else {
            WorkMode::Office
        }
    }

    /// Files a regularization request and routes it through the approval
    /// workflow.
    pub async fn submit_regularization(
        &self,
        principal: &Principal,
        payload: CreateRegularization,
        now: DateTime<Utc>,
    ) -> Result<RegularizationRequest, AppError> {
        let org = principal.organization_id;
        let employee = self
            .employees
            .find_by_id(&self.pool, org, principal.employee_id)
            .await?;

        let mut tx = transaction::begin_transaction(&self.pool).await?;
        let attendance = self
            .records
            .find_by_employee_date(&mut *tx, org, employee.id, payload.date)
            .await?;

        if matches!(
            payload.regularization_type,
            RegularizationType::MissingIn | RegularizationType::Late
        ) && payload.proposed_check_in.is_none()
        {
            return Err(AppError::validation(
                "proposed_check_in is required for this regularization type",
            ));
        }
        if matches!(
            payload.regularization_type,
            RegularizationType::MissingOut | RegularizationType::Early
        ) && payload.proposed_check_out.is_none()
        {
            return Err(AppError::validation(
                "proposed_check_out is required for this regularization type",
            ));
        }

        let request = RegularizationRequest::new(
            org,
            employee.id,
            attendance.as_ref().map(|a| a.id),
            payload.date,
            payload.regularization_type,
            payload.proposed_check_in,
            payload.proposed_check_out,
            payload.reason,
            now,
        );
        let mut request = self.regularizations.create(&mut *tx, &request).await?;

        let subject = json!({
            "employee": {
                "id": employee.id,
                "code": employee.code,
                "email": employee.email,
                "department_code": employee.department_code,
            },
            "roles": employee.roles,
            "regularization": {
                "date": request.date,
                "type": request.regularization_type,
            },
        });
        let instance = self
            .engine
            .instantiate_in_tx(
                &mut tx,
                org,
                "regularization",
                ENTITY_TYPE,
                *request.id.as_uuid(),
                subject,
                now,
            )
            .await?;
        self.regularizations
            .attach_instance(&mut *tx, request.id, instance.id, now)
            .await?;
        request.workflow_instance_id = Some(instance.id);

        let event = OutboxEvent::new(
            org,
            names::REGULARIZATION_REQUESTED,
            ENTITY_TYPE,
            *request.id.as_uuid(),
            json!({
                "employee_id": employee.id,
                "date": request.date,
                "type": request.regularization_type,
                "notify_email": employee.email,
            }),
            now,
        );
        self.outbox.enqueue(&mut *tx, &event).await?;

        if instance.status == crate::models::workflow_instance::InstanceStatus::Completed {
            self.apply_regularization_in_tx(&mut tx, org, request.id, None, now).await?;
        }

        transaction::commit_transaction(tx).await?;
        self.regularizations.find_by_id(&self.pool, org, request.id).await
    }

    /// Amends the attendance record per the approved proposal and emits
    /// `attendance.regularized` with before/after snapshots. Idempotent via
    /// the guarded status transition.
    pub async fn apply_regularization_in_tx(
        &self,
        tx: &mut PgConnection,
        org: OrganizationId,
        id: RegularizationId,
        decided_by: Option<EmployeeId>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let request = self.regularizations.find_by_id(&mut *tx, org, id).await?;
        let changed = self
            .regularizations
            .decide(&mut *tx, id, RequestStatus::Approved, decided_by, None, now)
            .await?;
        if changed == 0 {
            return Ok(false);
        }

        let mut record = match request.attendance_id {
            Some(attendance_id) => self.records.find_by_id(&mut *tx, org, attendance_id).await?,
            None => AttendanceRecord::new(org, request.employee_id, request.date, now),
        };
        let before = json!({
            "check_in_ts": record.check_in_ts,
            "check_out_ts": record.check_out_ts,
            "working_hours": record.working_hours,
            "status": record.status,
        });

        if let Some(check_in) = request.proposed_check_in {
            record.check_in_ts = Some(check_in);
        }
        if let Some(check_out) = request.proposed_check_out {
            record.check_out_ts = Some(check_out);
        }
        if request.regularization_type == RegularizationType::FullDay {
            record.status = AttendanceStatus::Present;
        }
        record.is_late = false;
        record.late_minutes = 0;
        record.needs_review = false;
        record.compute_hours();
        if let Some(hours) = record.working_hours {
            record.working_hours = Some(round2(hours));
        }

        if request.attendance_id.is_some() {
            self.records.save(&mut *tx, &record, now).await?;
        } else {
            self.records.create(&mut *tx, &record).await?;
        }

        let after = json!({
            "check_in_ts": record.check_in_ts,
            "check_out_ts": record.check_out_ts,
            "working_hours": record.working_hours,
            "status": record.status,
        });
        let event = OutboxEvent::new(
            org,
            names::ATTENDANCE_REGULARIZED,
            "attendance_record",
            *record.id.as_uuid(),
            json!({
                "regularization_id": request.id,
                "employee_id": request.employee_id,
                "date": request.date,
                "before": before,
                "after": after,
            }),
            now,
        );
        self.outbox.enqueue(&mut *tx, &event).await?;
        Ok(true)
    }

    pub async fn reject_regularization_in_tx(
        &self,
        tx: &mut PgConnection,
        org: OrganizationId,
        id: RegularizationId,
        status: RequestStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let request = self.regularizations.find_by_id(&mut *tx, org, id).await?;
        let changed = self
            .regularizations
            .decide(&mut *tx, id, status, None, None, now)
            .await?;
        if changed == 0 {
            return Ok(false);
        }
        let event = OutboxEvent::new(
            org,
            names::REGULARIZATION_REJECTED,
            ENTITY_TYPE,
            *request.id.as_uuid(),
            json!({
                "regularization_id": request.id,
                "employee_id": request.employee_id,
                "date": request.date,
            }),
            now,
        );
        self.outbox.enqueue(&mut *tx, &event).await?;
        Ok(true)
    }

    pub async fn list_regularizations(
        &self,
        principal: &Principal,
    ) -> Result<Vec<RegularizationRequest>, AppError> {
        self.regularizations
            .find_by_employee(&self.pool, principal.organization_id, principal.employee_id)
            .await
    }

    pub async fn find_range(
        &self,
        principal: &Principal,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, AppError> {
        self.records
            .find_range(&self.pool, principal.organization_id, principal.employee_id, from, to)
            .await
    }

    /// Materializes attendance rows for employees without one on `date`:
    /// weekend, holiday, approved leave or plain absence. Run daily by the
    /// worker so payroll's period summaries see every day accounted for.
    pub async fn mark_absences(
        &self,
        org: OrganizationId,
        calendar: &CalendarService,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<u32, AppError> {
        let employees = self
            .employees
            .find_employed_in_period(&self.pool, org, date, date)
            .await?;
        let is_weekend = crate::services::calendar::is_weekend(date);
        let holidays = calendar.holiday_dates(org, date, date).await?;
        let is_holiday = holidays.contains(&date);
        let leave_requests = LeaveRequestRepository::new();

        let mut created = 0;
        for employee in &employees {
            let existing = self
                .records
                .find_by_employee_date(&self.pool, org, employee.id, date)
                .await?;
            if existing.is_some() {
                continue;
            }
            let status = if is_weekend {
                AttendanceStatus::Weekend
            } else if is_holiday {
                AttendanceStatus::Holiday
            } else if leave_requests
                .covers_date(&self.pool, org, employee.id, date)
                .await?
            {
                AttendanceStatus::OnLeave
            } else {
                AttendanceStatus::Absent
            };
            let mut record = AttendanceRecord::new(org, employee.id, date, now);
            record.status = status;
            self.records.create(&self.pool, &record).await?;
            created += 1;
        }
        Ok(created)
    }
}

/// Dispatcher-side consumer applying or rejecting regularizations when
/// their workflow instance finishes.
pub struct RegularizationSubscriber {
    service: AttendanceService,
}

impl RegularizationSubscriber {
    pub fn new(service: AttendanceService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl EventHandler for RegularizationSubscriber {
    fn name(&self) -> &'static str {
        "regularization_subscriber"
    }

    fn handles(&self, event_name: &str) -> bool {
        pattern_matches("workflow.*", event_name)
    }

    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        let entity_type = envelope.payload.get("entity_type").and_then(|v| v.as_str());
        if entity_type != Some(ENTITY_TYPE) {
            return Ok(());
        }
        let Some(id) = envelope
            .payload
            .get("entity_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<RegularizationId>().ok())
        else {
            return Ok(());
        };

        let now = Utc::now();
        let mut tx = transaction::begin_transaction(&self.service.pool).await?;
        match envelope.event_name.as_str() {
            names::WORKFLOW_COMPLETED => {
                self.service
                    .apply_regularization_in_tx(&mut tx, envelope.organization_id, id, None, now)
                    .await?;
            }
            names::WORKFLOW_REJECTED => {
                self.service
                    .reject_regularization_in_tx(
                        &mut tx,
                        envelope.organization_id,
                        id,
                        RequestStatus::Rejected,
                        now,
                    )
                    .await?;
            }
            names::WORKFLOW_CANCELLED | names::WORKFLOW_ERROR => {
                self.service
                    .reject_regularization_in_tx(
                        &mut tx,
                        envelope.organization_id,
                        id,
                        RequestStatus::Cancelled,
                        now,
                    )
                    .await?;
            }
            _ => {}
        }
        transaction::commit_transaction(tx).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_is_zero_at_identity_and_sane_at_distance() {
        assert!(haversine_meters(51.5, -0.12, 51.5, -0.12) < 1e-6);
        // London to Paris is ~344 km.
        let d = haversine_meters(51.5074, -0.1278, 48.8566, 2.3522);
        assert!((d - 344_000.0).abs() < 10_000.0, "got {}", d);
        // A block away stays within a typical fence.
        let d = haversine_meters(51.5074, -0.1278, 51.5082, -0.1278);
        assert!(d < 100.0, "got {}", d);
    }

    #[test]
    fn shift_cutoff_is_three_am_next_day() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let cutoff = shift_cutoff(date);
        assert_eq!(
            cutoff,
            NaiveDate::from_ymd_opt(2025, 3, 11)
                .unwrap()
                .and_hms_opt(3, 0, 0)
                .unwrap()
                .and_utc()
        );
    }
}
