//! Accrual worker: accrues the period ending yesterday for every
//! accrual-based leave type of every active organization. Scheduled by
//! cron at each period boundary; re-runs are no-ops.

use chrono::{Duration, Utc};
use peopleflow_backend::{
    config::Config,
    db::connection::create_pool,
    services::{AccrualEngine, AttendanceService, CalendarService, LeaveService},
    types::{LeaveTypeId, OrganizationId},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "peopleflow_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    let engine = AccrualEngine::new(pool.clone(), config.clone());

    let now = Utc::now();
    let period_end = (now - Duration::days(1)).date_naive();

    let targets: Vec<(OrganizationId, LeaveTypeId)> = sqlx::query_as(
        "SELECT lt.organization_id, lt.id FROM leave_types lt \
         JOIN organizations o ON o.id = lt.organization_id \
         WHERE lt.is_accrual_based = TRUE AND lt.is_deleted = FALSE \
           AND o.is_active = TRUE AND o.is_deleted = FALSE",
    )
    .fetch_all(&pool)
    .await?;

    for (org, leave_type) in targets {
        match engine.run_for(org, leave_type, period_end, now).await {
            Ok(created) => {
                if !created.is_empty() {
                    tracing::info!(%org, %leave_type, created = created.len(), "accrual run");
                }
            }
            Err(err) => {
                tracing::error!(%org, %leave_type, error = ?err, "accrual run failed");
            }
        }
    }

    // Daily housekeeping alongside accrual: expire lapsed carry-forward
    // windows, close out consumed leave, and account for yesterday's
    // non-working or absent days.
    let today = now.date_naive();
    let expired = engine.sweep_expired(today, now).await?;
    if expired > 0 {
        tracing::info!(expired, "carry-forward balances expired");
    }

    let calendar = CalendarService::new(pool.clone(), None);
    let leave = LeaveService::new(pool.clone(), config.clone(), calendar.clone());
    let completed = leave.complete_elapsed(today, now).await?;
    if completed > 0 {
        tracing::info!(completed, "leave requests completed");
    }

    let orgs: Vec<OrganizationId> = sqlx::query_scalar(
        "SELECT id FROM organizations WHERE is_active = TRUE AND is_deleted = FALSE",
    )
    .fetch_all(&pool)
    .await?;
    let attendance = AttendanceService::new(pool, config);
    for org in orgs {
        let marked = attendance.mark_absences(org, &calendar, period_end, now).await?;
        if marked > 0 {
            tracing::info!(%org, marked, "attendance rows materialized");
        }
    }
    Ok(())
}
