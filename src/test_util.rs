//! Shared test fixtures: in-memory database, collaborator fakes, builders.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::clients::{ProgressTracker, SquadDirectory};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::store::PollStore;
use crate::types::{EligibilitySnapshot, NewPollRequest, SquadInfo};

/// Single-connection in-memory database with migrations applied. One
/// connection keeps every handle on the same `:memory:` instance.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}

pub async fn test_store() -> Arc<PollStore> {
    PollStore::new(test_pool().await)
}

pub fn test_config() -> Arc<Config> {
    Arc::new(Config {
        log_level: "info".to_string(),
        db_path: ":memory:".to_string(),
        api_port: 0,
        progress_api_url: String::new(),
        squad_api_url: String::new(),
        collaborator_timeout_ms: 100,
        required_completed_count: 3,
        monthly_poll_limit: 4,
        creation_cooldown_hours: 24,
        report_threshold: 5,
        moderation_required: true,
        admin_user_ids: vec![999],
    })
}

/// Seeds a wallet with spendable balance.
pub async fn fund(pool: &SqlitePool, user_id: i64, amount: f64) {
    let mut conn = pool.acquire().await.expect("conn");
    crate::wallet::credit(&mut conn, user_id, amount)
        .await
        .expect("credit");
}

pub fn new_poll_request(creator_id: i64) -> NewPollRequest {
    NewPollRequest {
        creator_id,
        title: "Will we win the derby?".to_string(),
        option_a_label: "Yes".to_string(),
        option_b_label: "No".to_string(),
        cover_image_url: None,
        deadline_at: Utc::now() + Duration::days(2),
        stake_enabled: None,
        vote_enabled: None,
        squad_id: None,
    }
}

pub fn eligible_snapshot(squad_id: i64) -> EligibilitySnapshot {
    EligibilitySnapshot {
        eligible: true,
        required_completed_count: 3,
        completed_count: 5,
        has_squad: true,
        squad_id: Some(squad_id),
        is_squad_captain: true,
        is_admin: false,
        monthly_limit: 4,
        used_this_month: 0,
        remaining_this_month: 4,
        cooldown_hours_left: 0,
        next_available_at: None,
        blocking_reason_code: None,
    }
}

// ---------------------------------------------------------------------------
// Collaborator fakes
// ---------------------------------------------------------------------------

/// Progress tracker returning fixed values.
pub struct FixedProgress {
    pub completed: u32,
    pub warm: bool,
}

#[async_trait]
impl ProgressTracker for FixedProgress {
    async fn completed_count(&self, _user_id: i64) -> Result<u32> {
        Ok(self.completed)
    }

    async fn warm_account(&self, _user_id: i64) -> Result<bool> {
        Ok(self.warm)
    }
}

/// Progress tracker whose backing service is down.
pub struct FailingProgress;

#[async_trait]
impl ProgressTracker for FailingProgress {
    async fn completed_count(&self, _user_id: i64) -> Result<u32> {
        Err(AppError::CollaboratorTimeout("progress tracker"))
    }

    async fn warm_account(&self, _user_id: i64) -> Result<bool> {
        Err(AppError::CollaboratorTimeout("progress tracker"))
    }
}

/// Squad directory returning a fixed membership.
pub struct FixedSquad {
    pub squad: Option<SquadInfo>,
}

impl FixedSquad {
    pub fn member(squad_id: i64, is_captain: bool) -> Self {
        Self {
            squad: Some(SquadInfo {
                squad_id,
                title: "Test Squad".to_string(),
                is_captain,
            }),
        }
    }

    pub fn none() -> Self {
        Self { squad: None }
    }
}

#[async_trait]
impl SquadDirectory for FixedSquad {
    async fn squad_of(&self, _user_id: i64) -> Result<Option<SquadInfo>> {
        Ok(self.squad.clone())
    }
}
