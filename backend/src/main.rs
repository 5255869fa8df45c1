use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peopleflow_backend::{
    config::Config,
    db::connection::create_pool,
    db::redis::create_redis_pool,
    router::build_router,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "peopleflow_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        bind_addr = %config.bind_addr,
        time_zone = %config.time_zone,
        db_max_connections = config.db_max_connections,
        scheduler_tick_minutes = config.scheduler_tick_minutes,
        "Loaded configuration from environment/.env"
    );

    // Initialize database
    let write_pool = create_pool(&config.database_url, config.db_max_connections).await?;
    sqlx::migrate!("./migrations").run(&write_pool).await?;

    let read_pool = match &config.read_database_url {
        Some(url) => Some(create_pool(url, config.db_max_connections).await?),
        None => None,
    };
    let redis_pool = create_redis_pool(&config).await?;

    let state = AppState::new(write_pool, read_pool, redis_pool, config.clone());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
