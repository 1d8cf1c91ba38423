use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::ServiceRole;

/// Creates a PostgreSQL connection pool
///
/// Every command handler takes one connection for the length of its
/// transaction, so the pool size bounds concurrent durable writes.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Applies the embedded migrations owned by `role`
pub async fn run_migrations(pool: &PgPool, role: ServiceRole) -> anyhow::Result<()> {
    match role {
        ServiceRole::Video => sqlx::migrate!("./migrations/video").run(pool).await?,
        ServiceRole::Recommendation => {
            sqlx::migrate!("./migrations/recommendation")
                .run(pool)
                .await?
        }
    }

    tracing::info!(role = role.as_str(), "Database migrations applied");
    Ok(())
}
