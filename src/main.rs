mod api;
mod collector;
mod config;
mod db;
mod error;
mod index;
mod ingest;
mod metrics;
mod pipeline;
mod snapshot;
mod state;
mod types;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::{router, ApiState, HealthState};
use crate::config::Config;
use crate::db::SnapshotRepository;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::state::{EntityLocks, IdentifierAliases, SnapshotCache};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);
    let repo = SnapshotRepository::new(pool);

    // --- Identifier aliases ---
    let aliases = match &cfg.aliases_path {
        Some(path) => {
            let aliases = IdentifierAliases::load(path)?;
            info!(path = %path, aliases = aliases.len(), "Identifier aliases loaded");
            aliases
        }
        None => IdentifierAliases::default(),
    };

    // --- Shared state ---
    let cache = SnapshotCache::new(Duration::from_secs(cfg.cache_ttl_secs));
    let locks = EntityLocks::new();
    let health = Arc::new(HealthState::new());

    let aliases = Arc::new(aliases);
    let pipeline = Pipeline::new(&cfg, repo.clone(), Arc::clone(&cache), locks, Arc::clone(&aliases));

    // --- Operator back-dating replaces the daily run ---
    if let Some(req) = &cfg.recompute {
        info!(entity_id = %req.entity_id, from = %req.from, to = %req.to, "Recomputing stored range");
        pipeline.recompute_range(&req.entity_id, req.from, req.to).await?;
        return Ok(());
    }

    // Default the run date to today (UTC) when none is configured.
    let target_date = cfg.target_date.unwrap_or_else(|| Utc::now().date_naive());
    info!(
        target_date = %target_date,
        batch = %cfg.batch_path,
        data_epoch = %cfg.data_epoch,
        max_concurrency = cfg.max_concurrency,
        "Running metrics pipeline"
    );

    let summary = pipeline.run(target_date).await?;
    health.record_run(&summary, Utc::now().timestamp());

    if !cfg.serve_api {
        return Ok(());
    }

    // --- HTTP API server ---
    let app = router(ApiState {
        repo,
        cache,
        health,
        aliases,
    });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
