use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

use crate::repository::Kind;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Every resource kind shares the same shape: identity, version and a JSON body
    for kind in Kind::ALL {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                namespace VARCHAR(255) NOT NULL,
                name VARCHAR(255) NOT NULL,
                resource_version BIGINT NOT NULL,
                body JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (namespace, name)
            )
            "#,
            kind.table()
        ))
        .execute(pool)
        .await?;
    }

    // The syncer lists unfinished executions on every tick
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_executions_finish \
         ON pipeline_executions ((body->'meta'->'labels'->>'pipeline.weir.dev/finish'))",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
