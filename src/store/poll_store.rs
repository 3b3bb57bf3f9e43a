use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{DomainError, Result};
use crate::types::{
    EligibilitySnapshot, NewPollRequest, Participation, ParticipationMode, PollOption,
    PollStatus, PredictionPoll,
};

#[derive(Debug, Default, Clone)]
pub struct PollFilter {
    pub squad_id: Option<i64>,
    pub status: Option<PollStatus>,
    pub include_hidden: bool,
}

// ---------------------------------------------------------------------------
// PollStore
// ---------------------------------------------------------------------------

/// Durable poll store. Reads go straight to the pool; every status or pool
/// mutation is expressed as a compare-and-swap UPDATE so a lost race
/// surfaces as zero affected rows instead of a silently overwritten state.
pub struct PollStore {
    pool: SqlitePool,
    /// poll_id → mutation lock. All mutating paths for one poll are
    /// serialized through this before opening their transaction.
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl PollStore {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self {
            pool,
            locks: DashMap::new(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn mutation_lock(&self, poll_id: i64) -> Arc<Mutex<()>> {
        self.locks.entry(poll_id).or_default().value().clone()
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Creates a poll from a freshly server-side evaluated snapshot — the
    /// caller's own claim of eligibility is never consulted. New polls start
    /// pending when moderation is required, open otherwise.
    pub async fn create_poll(
        &self,
        req: &NewPollRequest,
        snapshot: &EligibilitySnapshot,
        moderation_required: bool,
    ) -> Result<PredictionPoll> {
        if !snapshot.eligible {
            let reason = snapshot
                .blocking_reason_code
                .unwrap_or(crate::types::BlockingReason::NeedProgress);
            return Err(DomainError::NotEligible(reason).into());
        }

        // Admins may create on behalf of an explicit squad; everyone else
        // gets the squad the directory reports, never a client-asserted id.
        let squad_id = if snapshot.is_admin {
            req.squad_id.or(snapshot.squad_id)
        } else {
            snapshot.squad_id
        };
        let Some(squad_id) = squad_id else {
            return Err(DomainError::InvalidSquad.into());
        };

        let now = Utc::now();
        if req.title.trim().is_empty() {
            return Err(DomainError::InvalidTitle.into());
        }
        if req.option_a_label.trim().is_empty() || req.option_b_label.trim().is_empty() {
            return Err(DomainError::InvalidOptionLabel.into());
        }
        if req.deadline_at <= now {
            return Err(DomainError::InvalidDeadline.into());
        }

        let status = if moderation_required {
            PollStatus::Pending
        } else {
            PollStatus::Open
        };

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO polls (
                squad_id, title, option_a_label, option_b_label, cover_image_url,
                deadline_at, status, created_by, submitted_at,
                stake_enabled, vote_enabled, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
            RETURNING id
            "#,
        )
        .bind(squad_id)
        .bind(req.title.trim())
        .bind(req.option_a_label.trim())
        .bind(req.option_b_label.trim())
        .bind(req.cover_image_url.as_deref())
        .bind(req.deadline_at)
        .bind(status)
        .bind(req.creator_id)
        .bind(now)
        .bind(req.stake_enabled.unwrap_or(true))
        .bind(req.vote_enabled.unwrap_or(true))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        info!(
            poll_id = id,
            squad_id,
            created_by = req.creator_id,
            status = %status,
            "poll created",
        );
        self.get(id).await
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get(&self, poll_id: i64) -> Result<PredictionPoll> {
        let mut conn = self.pool.acquire().await?;
        Self::get_with(&mut conn, poll_id).await
    }

    pub async fn get_with(conn: &mut SqliteConnection, poll_id: i64) -> Result<PredictionPoll> {
        sqlx::query_as::<_, PredictionPoll>("SELECT * FROM polls WHERE id = ?1")
            .bind(poll_id)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| DomainError::PollNotFound(poll_id).into())
    }

    /// Hidden polls are excluded unless the filter explicitly asks for them.
    pub async fn list(&self, filter: &PollFilter) -> Result<Vec<PredictionPoll>> {
        let mut sql = String::from("SELECT * FROM polls WHERE 1=1");
        if filter.squad_id.is_some() {
            sql.push_str(" AND squad_id = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if !filter.include_hidden {
            sql.push_str(" AND is_hidden = 0");
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut query = sqlx::query_as::<_, PredictionPoll>(&sql);
        if let Some(squad_id) = filter.squad_id {
            query = query.bind(squad_id);
        }
        if let Some(status) = filter.status {
            query = query.bind(status);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    pub async fn participations(
        conn: &mut SqliteConnection,
        poll_id: i64,
    ) -> Result<Vec<Participation>> {
        Ok(sqlx::query_as::<_, Participation>(
            "SELECT * FROM participations WHERE poll_id = ?1 ORDER BY created_at",
        )
        .bind(poll_id)
        .fetch_all(conn)
        .await?)
    }

    pub async fn participation_exists(
        conn: &mut SqliteConnection,
        poll_id: i64,
        user_id: i64,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM participations WHERE poll_id = ?1 AND user_id = ?2",
        )
        .bind(poll_id)
        .bind(user_id)
        .fetch_one(conn)
        .await?;
        Ok(count > 0)
    }

    /// Polls a squad has created since `since` (quota accounting).
    pub async fn squad_created_since(
        &self,
        squad_id: i64,
        since: DateTime<Utc>,
    ) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM polls WHERE squad_id = ?1 AND created_at >= ?2",
        )
        .bind(squad_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u32)
    }

    pub async fn squad_last_created_at(&self, squad_id: i64) -> Result<Option<DateTime<Utc>>> {
        Ok(sqlx::query_scalar(
            "SELECT created_at FROM polls WHERE squad_id = ?1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(squad_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    // -----------------------------------------------------------------------
    // Compare-and-swap mutations
    // -----------------------------------------------------------------------

    /// Status CAS: succeeds iff the current status is one of `sources`.
    /// Returns false on a lost race or illegal source state; the caller
    /// decides which error that is.
    pub async fn transition(
        conn: &mut SqliteConnection,
        poll_id: i64,
        sources: &[PollStatus],
        dest: PollStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let source_list = sources
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE polls SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status IN ({source_list})",
        );
        let rows = sqlx::query(&sql)
            .bind(dest)
            .bind(now)
            .bind(poll_id)
            .execute(conn)
            .await?
            .rows_affected();
        Ok(rows == 1)
    }

    /// Adds a stake to one pool and counts the participant, guarded on the
    /// poll still being open. Pool totals only ever move together with a
    /// participation row in the same transaction.
    pub async fn apply_stake(
        conn: &mut SqliteConnection,
        poll_id: i64,
        option: PollOption,
        amount: f64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = match option {
            PollOption::A => {
                "UPDATE polls SET pool_a = pool_a + ?1, participant_count = participant_count + 1, \
                 updated_at = ?2 WHERE id = ?3 AND status = 'open'"
            }
            PollOption::B => {
                "UPDATE polls SET pool_b = pool_b + ?1, participant_count = participant_count + 1, \
                 updated_at = ?2 WHERE id = ?3 AND status = 'open'"
            }
        };
        let rows = sqlx::query(sql)
            .bind(amount)
            .bind(now)
            .bind(poll_id)
            .execute(conn)
            .await?
            .rows_affected();
        Ok(rows == 1)
    }

    /// Counts a vote participant (no pool movement), open-guarded.
    pub async fn count_participant(
        conn: &mut SqliteConnection,
        poll_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE polls SET participant_count = participant_count + 1, updated_at = ?1 \
             WHERE id = ?2 AND status = 'open'",
        )
        .bind(now)
        .bind(poll_id)
        .execute(conn)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    pub async fn insert_participation(
        conn: &mut SqliteConnection,
        poll_id: i64,
        user_id: i64,
        mode: ParticipationMode,
        option: PollOption,
        stake_amount: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO participations (poll_id, user_id, mode, option, stake_amount, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(poll_id)
        .bind(user_id)
        .bind(mode)
        .bind(option)
        .bind(stake_amount)
        .bind(now)
        .execute(conn)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(DomainError::DuplicateParticipation.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Records a report; false means this (poll, user) already reported.
    pub async fn insert_report(
        conn: &mut SqliteConnection,
        poll_id: i64,
        user_id: i64,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let inserted = sqlx::query(
            "INSERT INTO poll_reports (poll_id, user_id, reason, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(poll_id)
        .bind(user_id)
        .bind(reason)
        .bind(now)
        .execute(conn)
        .await;

        match inserted {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Monotonic counter bump; returns the new count.
    pub async fn bump_report_count(
        conn: &mut SqliteConnection,
        poll_id: i64,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        Ok(sqlx::query_scalar(
            "UPDATE polls SET report_count = report_count + 1, updated_at = ?1 \
             WHERE id = ?2 RETURNING report_count",
        )
        .bind(now)
        .bind(poll_id)
        .fetch_one(conn)
        .await?)
    }

    pub async fn hard_delete(conn: &mut SqliteConnection, poll_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM poll_reports WHERE poll_id = ?1")
            .bind(poll_id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM polls WHERE id = ?1")
            .bind(poll_id)
            .execute(conn)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
