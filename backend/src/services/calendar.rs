//! Working-day computation against the organization holiday calendar.
//!
//! Weekends are Saturday and Sunday; holidays come from the tenant's
//! calendar. Holiday date sets are cached in Redis per (org, year) when a
//! cache pool is configured; the database stays authoritative.

use crate::db::redis::RedisPool;
use crate::error::AppError;
use crate::repositories::HolidayRepository;
use crate::types::OrganizationId;
use bb8_redis::redis::AsyncCommands;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use sqlx::PgPool;
use std::collections::HashSet;

const HOLIDAY_CACHE_TTL_SECS: u64 = 6 * 60 * 60;

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Pure core: working days in `[from, to]` given the holiday set.
/// A single-day span with `half_day` counts 0.5.
pub fn working_days_in(
    from: NaiveDate,
    to: NaiveDate,
    holidays: &HashSet<NaiveDate>,
    half_day: bool,
) -> f64 {
    if to < from {
        return 0.0;
    }
    let mut days = 0.0;
    let mut current = from;
    while current <= to {
        if !is_weekend(current) && !holidays.contains(&current) {
            days += 1.0;
        }
        current += Duration::days(1);
    }
    if half_day && from == to && days > 0.0 {
        days = 0.5;
    }
    days
}

#[derive(Clone)]
pub struct CalendarService {
    pool: PgPool,
    redis: Option<RedisPool>,
    holidays: HolidayRepository,
}

impl CalendarService {
    pub fn new(pool: PgPool, redis: Option<RedisPool>) -> Self {
        Self {
            pool,
            redis,
            holidays: HolidayRepository::new(),
        }
    }

    /// Holiday dates intersecting `[from, to]`, via the per-year cache.
    pub async fn holiday_dates(
        &self,
        org: OrganizationId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<HashSet<NaiveDate>, AppError> {
        let mut dates = HashSet::new();
        for year in from.year()..=to.year() {
            for date in self.holidays_for_year(org, year).await? {
                if date >= from && date <= to {
                    dates.insert(date);
                }
            }
        }
        Ok(dates)
    }

    pub async fn working_days(
        &self,
        org: OrganizationId,
        from: NaiveDate,
        to: NaiveDate,
        half_day: bool,
    ) -> Result<f64, AppError> {
        let holidays = self.holiday_dates(org, from, to).await?;
        Ok(working_days_in(from, to, &holidays, half_day))
    }

    pub async fn is_working_day(
        &self,
        org: OrganizationId,
        date: NaiveDate,
    ) -> Result<bool, AppError> {
        if is_weekend(date) {
            return Ok(false);
        }
        let holidays = self.holiday_dates(org, date, date).await?;
        Ok(!holidays.contains(&date))
    }

    async fn holidays_for_year(
        &self,
        org: OrganizationId,
        year: i32,
    ) -> Result<Vec<NaiveDate>, AppError> {
        let cache_key = format!("holidays:{}:{}", org, year);
        if let Some(cached) = self.cache_get(&cache_key).await {
            return Ok(cached);
        }

        let from = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| AppError::validation(format!("invalid year {}", year)))?;
        let to = NaiveDate::from_ymd_opt(year, 12, 31)
            .ok_or_else(|| AppError::validation(format!("invalid year {}", year)))?;
        let dates = self
            .holidays
            .find_dates_in_range(&self.pool, org, from, to)
            .await?;

        self.cache_put(&cache_key, &dates).await;
        Ok(dates)
    }

    async fn cache_get(&self, key: &str) -> Option<Vec<NaiveDate>> {
        let pool = self.redis.as_ref()?;
        let mut conn = pool.get().await.ok()?;
        let raw: String = conn.get(key).await.ok()?;
        serde_json::from_str(&raw).ok()
    }

    async fn cache_put(&self, key: &str, dates: &[NaiveDate]) {
        let Some(pool) = self.redis.as_ref() else {
            return;
        };
        let Ok(mut conn) = pool.get().await else {
            return;
        };
        let Ok(raw) = serde_json::to_string(dates) else {
            return;
        };
        // Cache misses are fine; failures here must never fail the caller.
        let result: Result<(), _> = conn.set_ex(key, raw, HOLIDAY_CACHE_TTL_SECS).await;
        if let Err(err) = result {
            tracing::debug!(error = %err, "holiday cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn weekends_are_excluded() {
        // 2025-02-03 is a Monday; 03..07 is a full working week.
        let holidays = HashSet::new();
        assert_eq!(
            working_days_in(d(2025, 2, 3), d(2025, 2, 7), &holidays, false),
            5.0
        );
        // Spanning the weekend adds nothing.
        assert_eq!(
            working_days_in(d(2025, 2, 3), d(2025, 2, 9), &holidays, false),
            5.0
        );
    }

    #[test]
    fn holidays_are_excluded() {
        let mut holidays = HashSet::new();
        holidays.insert(d(2025, 2, 5));
        assert_eq!(
            working_days_in(d(2025, 2, 3), d(2025, 2, 7), &holidays, false),
            4.0
        );
    }

    #[test]
    fn half_day_counts_half() {
        let holidays = HashSet::new();
        assert_eq!(
            working_days_in(d(2025, 2, 3), d(2025, 2, 3), &holidays, true),
            0.5
        );
        // Half-day on a weekend is still zero.
        assert_eq!(
            working_days_in(d(2025, 2, 8), d(2025, 2, 8), &holidays, true),
            0.0
        );
    }

    #[test]
    fn inverted_range_is_zero() {
        let holidays = HashSet::new();
        assert_eq!(
            working_days_in(d(2025, 2, 7), d(2025, 2, 3), &holidays, false),
            0.0
        );
    }
}
