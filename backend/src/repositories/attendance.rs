//! Attendance repository.

use crate::error::AppError;
use crate::models::attendance::AttendanceRecord;
use crate::types::{AttendanceId, EmployeeId, OrganizationId};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgExecutor;

const TABLE_NAME: &str = "attendance_records";
const SELECT_COLUMNS: &str = "id, organization_id, employee_id, date, check_in_ts, check_out_ts, \
working_hours, overtime_hours, break_minutes, status, is_late, late_minutes, early_departure, \
early_departure_minutes, work_mode, device_info, latitude, longitude, needs_review, is_deleted, \
deleted_at, created_at, updated_at";

#[derive(Debug, Default, Clone, Copy)]
pub struct AttendanceRepository;

impl AttendanceRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn find_by_id(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        id: AttendanceId,
    ) -> Result<AttendanceRecord, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = $1 AND organization_id = $2 AND is_deleted = FALSE",
            SELECT_COLUMNS, TABLE_NAME
        );
        sqlx::query_as::<_, AttendanceRecord>(&query)
            .bind(id)
            .bind(org)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Attendance record not found".into()))
    }

    pub async fn find_by_employee_date(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        employee: EmployeeId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE organization_id = $1 AND employee_id = $2 AND date = $3 \
             AND is_deleted = FALSE",
            SELECT_COLUMNS, TABLE_NAME
        );
        let row = sqlx::query_as::<_, AttendanceRecord>(&query)
            .bind(org)
            .bind(employee)
            .bind(date)
            .fetch_optional(db)
            .await?;
        Ok(row)
    }

    pub async fn find_range(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        employee: EmployeeId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE organization_id = $1 AND employee_id = $2 \
             AND date BETWEEN $3 AND $4 AND is_deleted = FALSE ORDER BY date",
            SELECT_COLUMNS, TABLE_NAME
        );
        let rows = sqlx::query_as::<_, AttendanceRecord>(&query)
            .bind(org)
            .bind(employee)
            .bind(from)
            .bind(to)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    pub async fn create(
        &self,
        db: impl PgExecutor<'_>,
        item: &AttendanceRecord,
    ) -> Result<AttendanceRecord, AppError> {
        let query = format!(
            "INSERT INTO {} (id, organization_id, employee_id, date, check_in_ts, check_out_ts, \
             working_hours, overtime_hours, break_minutes, status, is_late, late_minutes, \
             early_departure, early_departure_minutes, work_mode, device_info, latitude, \
             longitude, needs_review, is_deleted, deleted_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
             $18, $19, $20, $21, $22, $23) RETURNING {}",
            TABLE_NAME, SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, AttendanceRecord>(&query)
            .bind(item.id)
            .bind(item.organization_id)
            .bind(item.employee_id)
            .bind(item.date)
            .bind(item.check_in_ts)
            .bind(item.check_out_ts)
            .bind(item.working_hours)
            .bind(item.overtime_hours)
            .bind(item.break_minutes)
            .bind(item.status.db_value())
            .bind(item.is_late)
            .bind(item.late_minutes)
            .bind(item.early_departure)
            .bind(item.early_departure_minutes)
            .bind(item.work_mode.db_value())
            .bind(&item.device_info)
            .bind(item.latitude)
            .bind(item.longitude)
            .bind(item.needs_review)
            .bind(item.is_deleted)
            .bind(item.deleted_at)
            .bind(item.created_at)
            .bind(item.updated_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }

    /// Rewrites the mutable fields of a record (check-out, computed hours,
    /// flags). The identity columns never change.
    pub async fn save(
        &self,
        db: impl PgExecutor<'_>,
        item: &AttendanceRecord,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let query = format!(
            "UPDATE {} SET check_in_ts = $1, check_out_ts = $2, working_hours = $3, \
             overtime_hours = $4, break_minutes = $5, status = $6, is_late = $7, \
             late_minutes = $8, early_departure = $9, early_departure_minutes = $10, \
             work_mode = $11, device_info = $12, latitude = $13, longitude = $14, \
             needs_review = $15, updated_at = $16 WHERE id = $17",
            TABLE_NAME
        );
        sqlx::query(&query)
            .bind(item.check_in_ts)
            .bind(item.check_out_ts)
            .bind(item.working_hours)
            .bind(item.overtime_hours)
            .bind(item.break_minutes)
            .bind(item.status.db_value())
            .bind(item.is_late)
            .bind(item.late_minutes)
            .bind(item.early_departure)
            .bind(item.early_departure_minutes)
            .bind(item.work_mode.db_value())
            .bind(&item.device_info)
            .bind(item.latitude)
            .bind(item.longitude)
            .bind(item.needs_review)
            .bind(now)
            .bind(item.id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Aggregate working days / leave days / overtime for a period, used by
    /// payroll calculation.
    pub async fn summarize_period(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        employee: EmployeeId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<AttendanceSummary, AppError> {
        let query = format!(
            "SELECT COUNT(*) FILTER (WHERE status IN ('present', 'wfh', 'half_day')) AS present_days, \
             COUNT(*) FILTER (WHERE status = 'on_leave') AS leave_days, \
             COALESCE(SUM(overtime_hours), 0) AS overtime_hours \
             FROM {} WHERE organization_id = $1 AND employee_id = $2 \
             AND date BETWEEN $3 AND $4 AND is_deleted = FALSE",
            TABLE_NAME
        );
        let row: (i64, i64, f64) = sqlx::query_as(&query)
            .bind(org)
            .bind(employee)
            .bind(from)
            .bind(to)
            .fetch_one(db)
            .await?;
        Ok(AttendanceSummary {
            present_days: row.0,
            leave_days: row.1,
            overtime_hours: row.2,
        })
    }
}

/// Per-employee attendance aggregates for a pay period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttendanceSummary {
    pub present_days: i64,
    pub leave_days: i64,
    pub overtime_hours: f64,
}
