use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weir_orchestrator::api::{self, AppState};
use weir_orchestrator::config::Config;
use weir_orchestrator::db;
use weir_orchestrator::engine::CiEngine;
use weir_orchestrator::engine::jenkins::JenkinsEngine;
use weir_orchestrator::repository::{Store, postgres::PgStore};
use weir_orchestrator::scheduler::ExecutionSyncer;
use weir_orchestrator::service::source_code::Remotes;
use weir_orchestrator::webhook::WebhookRouter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weir_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Weir Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!("Connecting to database...");

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    tracing::info!("Connecting to CI backend at {}", config.jenkins_url);

    let engine: Arc<dyn CiEngine> = Arc::new(
        JenkinsEngine::connect(&config, store.clone())
            .await
            .context("Failed to connect to the CI backend")?,
    );

    let syncer = ExecutionSyncer::new(
        store.clone(),
        engine.clone(),
        config.sync_interval,
        config.executor_quota,
    );
    tokio::spawn(async move { syncer.run().await });

    let state = AppState {
        store,
        engine,
        remotes: Remotes::from_config(&config),
        webhooks: WebhookRouter::default(),
    };
    let app = api::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
