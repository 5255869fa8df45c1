use sqlx::postgres::{PgPool, PgPoolOptions};

/// Type alias so downstream code can reference the logical database pool in a single place.
pub type DbPool = PgPool;

pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}
