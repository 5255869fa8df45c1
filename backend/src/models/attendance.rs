//! Models that represent daily attendance records.

use crate::types::{AttendanceId, EmployeeId, OrganizationId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use utoipa::ToSchema;

/// Standard working day length used for overtime computation, hours.
pub const STANDARD_WORK_HOURS: f64 = 8.0;

/// A shift may run past midnight but must close by 27:00 of the check-in
/// day (3 AM next day). Later check-outs are flagged for manual review.
pub const SHIFT_CUTOFF_HOURS: i64 = 27;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema, Default)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
/// Normalized status values stored in the database.
pub enum AttendanceStatus {
    #[default]
    Present,
    Absent,
    HalfDay,
    OnLeave,
    Holiday,
    Weekend,
    Wfh,
}

impl AttendanceStatus {
    pub fn db_value(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::HalfDay => "half_day",
            AttendanceStatus::OnLeave => "on_leave",
            AttendanceStatus::Holiday => "holiday",
            AttendanceStatus::Weekend => "weekend",
            AttendanceStatus::Wfh => "wfh",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema, Default)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkMode {
    #[default]
    Office,
    Remote,
}

impl WorkMode {
    pub fn db_value(&self) -> &'static str {
        match self {
            WorkMode::Office => "office",
            WorkMode::Remote => "remote",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// Persistent record of a single day's attendance for an employee.
/// Unique per (employee, date); a shift straddling midnight belongs to the
/// check-in date.
pub struct AttendanceRecord {
    pub id: AttendanceId,
    pub organization_id: OrganizationId,
    pub employee_id: EmployeeId,
    /// Calendar day the record tracks (the check-in day).
    pub date: NaiveDate,
    pub check_in_ts: Option<DateTime<Utc>>,
    pub check_out_ts: Option<DateTime<Utc>>,
    /// Net hours once both timestamps are present, rounded to 2 decimals.
    pub working_hours: Option<f64>,
    pub overtime_hours: Option<f64>,
    /// Total break minutes subtracted from the gross span.
    pub break_minutes: i32,
    pub status: AttendanceStatus,
    pub is_late: bool,
    pub late_minutes: i32,
    pub early_departure: bool,
    pub early_departure_minutes: i32,
    pub work_mode: WorkMode,
    /// Device fingerprint captured at check-in.
    #[schema(value_type = Object)]
    pub device_info: Option<Json<Value>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Set when a check-out past the 27:00 cut-off needs a human look.
    pub needs_review: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttendanceRecord {
    /// Builds a new attendance record with default status and timestamps.
    pub fn new(
        organization_id: OrganizationId,
        employee_id: EmployeeId,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AttendanceId::new(),
            organization_id,
            employee_id,
            date,
            check_in_ts: None,
            check_out_ts: None,
            working_hours: None,
            overtime_hours: None,
            break_minutes: 0,
            status: AttendanceStatus::Present,
            is_late: false,
            late_minutes: 0,
            early_departure: false,
            early_departure_minutes: 0,
            work_mode: WorkMode::Office,
            device_info: None,
            latitude: None,
            longitude: None,
            needs_review: false,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Recomputes `working_hours` and `overtime_hours` when both timestamps
    /// are present. Breaks are subtracted before rounding.
    pub fn compute_hours(&mut self) {
        if let (Some(check_in), Some(check_out)) = (self.check_in_ts, self.check_out_ts) {
            let gross_minutes = (check_out - check_in).num_minutes();
            let net_minutes = (gross_minutes - self.break_minutes as i64).max(0);
            let hours = round2(net_minutes as f64 / 60.0);
            self.working_hours = Some(hours);
            self.overtime_hours = Some(round2((hours - STANDARD_WORK_HOURS).max(0.0)));
        }
    }

    pub fn is_checked_in(&self) -> bool {
        self.check_in_ts.is_some() && self.check_out_ts.is_none()
    }

    pub fn is_checked_out(&self) -> bool {
        self.check_out_ts.is_some()
    }
}

/// Rounds half-up to 2 decimal places.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
/// Request payload used when an employee checks in.
pub struct CheckInRequest {
    /// Defaults to the current instant when omitted.
    pub ts: Option<DateTime<Utc>>,
    pub device_info: Option<Value>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
/// Request payload used when an employee checks out.
pub struct CheckOutRequest {
    pub ts: Option<DateTime<Utc>>,
    pub device_info: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
/// API representation of a day's attendance.
pub struct AttendanceResponse {
    pub id: AttendanceId,
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
    pub check_in_ts: Option<DateTime<Utc>>,
    pub check_out_ts: Option<DateTime<Utc>>,
    pub working_hours: Option<f64>,
    pub overtime_hours: Option<f64>,
    pub status: AttendanceStatus,
    pub is_late: bool,
    pub late_minutes: i32,
    pub early_departure: bool,
    pub work_mode: WorkMode,
    pub needs_review: bool,
}

impl From<AttendanceRecord> for AttendanceResponse {
    fn from(a: AttendanceRecord) -> Self {
        Self {
            id: a.id,
            employee_id: a.employee_id,
            date: a.date,
            check_in_ts: a.check_in_ts,
            check_out_ts: a.check_out_ts,
            working_hours: a.working_hours,
            overtime_hours: a.overtime_hours,
            status: a.status,
            is_late: a.is_late,
            late_minutes: a.late_minutes,
            early_departure: a.early_departure,
            work_mode: a.work_mode,
            needs_review: a.needs_review,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> AttendanceRecord {
        AttendanceRecord::new(
            OrganizationId::new(),
            EmployeeId::new(),
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn hours_subtract_breaks_and_round() {
        let mut a = record();
        a.check_in_ts = Some(Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap());
        a.check_out_ts = Some(Utc.with_ymd_and_hms(2025, 3, 10, 18, 10, 0).unwrap());
        a.break_minutes = 60;
        a.compute_hours();
        assert_eq!(a.working_hours, Some(8.17));
        assert_eq!(a.overtime_hours, Some(0.17));
    }

    #[test]
    fn overtime_never_negative() {
        let mut a = record();
        a.check_in_ts = Some(Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap());
        a.check_out_ts = Some(Utc.with_ymd_and_hms(2025, 3, 10, 13, 0, 0).unwrap());
        a.compute_hours();
        assert_eq!(a.working_hours, Some(4.0));
        assert_eq!(a.overtime_hours, Some(0.0));
    }

    #[test]
    fn clock_state_helpers() {
        let mut a = record();
        assert!(!a.is_checked_in());
        a.check_in_ts = Some(Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap());
        assert!(a.is_checked_in());
        a.check_out_ts = Some(Utc.with_ymd_and_hms(2025, 3, 10, 17, 0, 0).unwrap());
        assert!(a.is_checked_out());
        assert!(!a.is_checked_in());
    }

    #[test]
    fn attendance_status_db_value_matches_schema() {
        assert_eq!(AttendanceStatus::Present.db_value(), "present");
        assert_eq!(AttendanceStatus::HalfDay.db_value(), "half_day");
        assert_eq!(AttendanceStatus::Wfh.db_value(), "wfh");
    }
}
