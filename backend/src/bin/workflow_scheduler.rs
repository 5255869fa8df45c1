//! Workflow scheduler worker: SLA warnings, escalations, expiries and
//! instance retries on a fixed tick.

use chrono::Utc;
use peopleflow_backend::{
    config::Config, db::connection::create_pool, services::WorkflowScheduler,
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
    let interval = std::time::Duration::from_secs(config.scheduler_tick_minutes * 60);
    let scheduler = WorkflowScheduler::new(pool, config);

    tracing::info!(interval_secs = interval.as_secs(), "workflow scheduler started");
    loop {
        if let Err(err) = scheduler.tick(Utc::now()).await {
            tracing::error!(error = ?err, "scheduler tick failed");
        }
        tokio::time::sleep(interval).await;
    }
}
