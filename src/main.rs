mod api;
mod clients;
mod config;
mod eligibility;
mod error;
mod ledger;
mod moderation;
mod payout;
mod store;
mod sweep;
#[cfg(test)]
mod test_util;
mod types;
mod wallet;

use std::sync::Arc;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::routes::{router, ApiState};
use crate::clients::{
    HttpProgressTracker, HttpSquadDirectory, ProgressTracker, SquadDirectory,
};
use crate::config::Config;
use crate::eligibility::EligibilityEngine;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::moderation::ModerationEngine;
use crate::store::PollStore;
use crate::sweep::DeadlineSweeper;

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
    let options = SqliteConnectOptions::new()
        .filename(&cfg.db_path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    if cfg.admin_user_ids.is_empty() {
        warn!("ADMIN_USER_IDS not set — every moderation call will be rejected. Example: ADMIN_USER_IDS=7,42");
    }

    // --- Engine assembly ---
    let cfg = Arc::new(cfg);
    let store = PollStore::new(pool.clone());
    let progress: Arc<dyn ProgressTracker> = Arc::new(HttpProgressTracker::new(&cfg)?);
    let squads: Arc<dyn SquadDirectory> = Arc::new(HttpSquadDirectory::new(&cfg)?);

    let eligibility = Arc::new(EligibilityEngine::new(
        Arc::clone(&cfg),
        Arc::clone(&store),
        Arc::clone(&progress),
        squads,
    ));
    let ledger = Arc::new(Ledger::new(Arc::clone(&store), progress));
    let moderation = Arc::new(ModerationEngine::new(Arc::clone(&cfg), Arc::clone(&store)));

    // --- Deadline sweeper (background) ---
    let sweeper = DeadlineSweeper::new(pool.clone());
    tokio::spawn(async move { sweeper.run().await });

    // --- HTTP API server ---
    let api_state = ApiState {
        cfg: Arc::clone(&cfg),
        store,
        eligibility,
        ledger,
        moderation,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
