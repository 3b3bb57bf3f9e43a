use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::config::SWEEP_INTERVAL_SECS;
use crate::error::Result;
use crate::types::PollStatus;

/// Background task that locks open polls past their deadline. The UPDATE is
/// gated on the source status, so overlapping runs (or a manual
/// close_stakes racing the sweep) are harmless.
pub struct DeadlineSweeper {
    pool: SqlitePool,
}

impl DeadlineSweeper {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        interval.tick().await; // consume immediate first tick

        loop {
            interval.tick().await;
            match self.lock_expired().await {
                Ok(0) => {}
                Ok(n) => info!(locked = n, "deadline sweep locked expired polls"),
                Err(e) => error!("deadline sweep error: {e}"),
            }
        }
    }

    pub async fn lock_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let rows = sqlx::query(
            "UPDATE polls SET status = ?1, updated_at = ?2 \
             WHERE status = ?3 AND deadline_at <= ?2",
        )
        .bind(PollStatus::Locked)
        .bind(now)
        .bind(PollStatus::Open)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows)
    }
}
