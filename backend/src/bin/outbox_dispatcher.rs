//! Outbox dispatcher worker. Runs the single-writer drain loop with the
//! in-process handler registry populated the same way the deployment's
//! consumers expect.

use std::sync::Arc;

use peopleflow_backend::{
    config::Config,
    db::connection::create_pool,
    services::{
        events::{HandlerRegistry, TracingPublisher},
        AttendanceService, CalendarService, LeaveService, LeaveWorkflowSubscriber,
        NotificationService, OutboxDispatcher, RegularizationSubscriber,
    },
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

    let calendar = CalendarService::new(pool.clone(), None);
    let leave = LeaveService::new(pool.clone(), config.clone(), calendar);
    let attendance = AttendanceService::new(pool.clone(), config.clone());

    // Handlers register at startup; unknown events dead-letter.
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(LeaveWorkflowSubscriber::new(leave)));
    registry.register(Arc::new(RegularizationSubscriber::new(attendance)));
    registry.register(Arc::new(NotificationService::new(&config)?));

    let dispatcher = OutboxDispatcher::new(
        pool,
        &config,
        Arc::new(TracingPublisher),
        Arc::new(registry),
    );
    tracing::info!("outbox dispatcher started");
    dispatcher.run_loop().await;
    Ok(())
}
