use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::info;

use crate::config::Config;
use crate::error::{DomainError, Result};
use crate::payout::{settle_cancellation, settle_resolution, SettlementBatch};
use crate::store::PollStore;
use crate::types::{ModerationAction, PollStatus, PredictionPoll};
use crate::wallet;

/// Statuses a report may be filed against. Reports on a poll already under
/// review keep counting; they just cannot re-trigger the transition.
const REPORTABLE: &[PollStatus] = &[
    PollStatus::Open,
    PollStatus::Locked,
    PollStatus::PendingResolution,
    PollStatus::UnderReview,
];

/// Statuses in which crossing the report threshold forces a review.
const REPORT_TRIGGER_SOURCES: &[PollStatus] = &[PollStatus::Open, PollStatus::Locked];

#[derive(Debug, Clone, Serialize)]
pub struct ModerationOutcome {
    pub next_status: PollStatus,
    pub updated_fields: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportOutcome {
    pub report_count: i64,
    pub transitioned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOperation {
    Deleted,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub operation: DeleteOperation,
}

/// Admin-editable poll fields. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollUpdate {
    pub title: Option<String>,
    pub option_a_label: Option<String>,
    pub option_b_label: Option<String>,
    pub cover_image_url: Option<String>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub stake_enabled: Option<bool>,
    pub vote_enabled: Option<bool>,
}

/// Minimal syntactic check: scheme + non-empty host, no whitespace.
/// Anything stricter belongs to the clients fetching the proof.
pub fn is_http_url(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some(rest) = s
        .strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"))
    else {
        return false;
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    !host.is_empty()
}

/// Walks polls through the moderation state machine and settles money at
/// the terminal transitions. Every action is a CAS under the poll's
/// mutation lock; two concurrent calls yield one success and one explicit
/// state conflict.
pub struct ModerationEngine {
    cfg: Arc<Config>,
    store: Arc<PollStore>,
}

impl ModerationEngine {
    pub fn new(cfg: Arc<Config>, store: Arc<PollStore>) -> Self {
        Self { cfg, store }
    }

    pub async fn moderate(
        &self,
        poll_id: i64,
        moderator_id: i64,
        action: ModerationAction,
    ) -> Result<ModerationOutcome> {
        if !self.cfg.is_admin(moderator_id) {
            return Err(DomainError::AdminRequired.into());
        }
        match &action {
            ModerationAction::Reject { reason } if reason.trim().is_empty() => {
                return Err(DomainError::EmptyRejectReason.into());
            }
            ModerationAction::Resolve { proof_url, .. } if !is_http_url(proof_url) => {
                return Err(DomainError::InvalidProofUrl.into());
            }
            _ => {}
        }

        let lock = self.store.mutation_lock(poll_id);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let mut tx = self.store.pool().begin().await?;
        let poll = PollStore::get_with(&mut tx, poll_id).await?;

        // toggle_hidden is orthogonal to status and skips the CAS entirely.
        if let ModerationAction::ToggleHidden = action {
            sqlx::query(
                "UPDATE polls SET is_hidden = 1 - is_hidden, updated_at = ?1 WHERE id = ?2",
            )
            .bind(now)
            .bind(poll_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            info!(poll_id, moderator_id, hidden = !poll.is_hidden, "poll visibility toggled");
            return Ok(ModerationOutcome {
                next_status: poll.status,
                updated_fields: vec!["is_hidden"],
            });
        }

        let dest = action
            .destination()
            .unwrap_or(poll.status);
        let moved =
            PollStore::transition(&mut tx, poll_id, action.sources(), dest, now).await?;
        if !moved {
            if matches!(action, ModerationAction::Resolve { .. })
                && poll.status == PollStatus::Resolved
            {
                return Err(DomainError::AlreadyResolved.into());
            }
            return Err(DomainError::StateConflict {
                action: action.name(),
                status: poll.status,
            }
            .into());
        }

        let updated_fields = match &action {
            ModerationAction::Approve => {
                sqlx::query(
                    "UPDATE polls SET rejection_reason = NULL, moderated_by = ?1, moderated_at = ?2 \
                     WHERE id = ?3",
                )
                .bind(moderator_id)
                .bind(now)
                .bind(poll_id)
                .execute(&mut *tx)
                .await?;
                vec!["status", "rejection_reason", "moderated_by", "moderated_at"]
            }
            ModerationAction::Reject { reason } => {
                sqlx::query(
                    "UPDATE polls SET rejection_reason = ?1, moderated_by = ?2, moderated_at = ?3 \
                     WHERE id = ?4",
                )
                .bind(reason.trim())
                .bind(moderator_id)
                .bind(now)
                .bind(poll_id)
                .execute(&mut *tx)
                .await?;
                vec!["status", "rejection_reason", "moderated_by", "moderated_at"]
            }
            ModerationAction::Resolve { option, proof_url } => {
                sqlx::query(
                    "UPDATE polls SET resolved_option = ?1, proof_url = ?2, resolved_by = ?3, \
                     resolved_at = ?4 WHERE id = ?5",
                )
                .bind(*option)
                .bind(proof_url.as_str())
                .bind(moderator_id)
                .bind(now)
                .bind(poll_id)
                .execute(&mut *tx)
                .await?;

                let participations = PollStore::participations(&mut tx, poll_id).await?;
                let batch =
                    settle_resolution(poll.pool_a, poll.pool_b, *option, &participations);
                Self::apply_settlements(&mut tx, poll_id, &batch, "resolution").await?;
                info!(
                    poll_id,
                    option = %option,
                    entries = batch.entries.len(),
                    paid_out = batch.paid_out,
                    house_take = batch.house_take,
                    "poll resolved, settlements applied",
                );
                vec!["status", "resolved_option", "proof_url", "resolved_by", "resolved_at"]
            }
            ModerationAction::Cancel | ModerationAction::MarkInvalid => {
                let participations = PollStore::participations(&mut tx, poll_id).await?;
                let batch = settle_cancellation(&participations);
                Self::apply_settlements(&mut tx, poll_id, &batch, "cancellation").await?;
                info!(
                    poll_id,
                    action = action.name(),
                    refunded = batch.paid_out,
                    "poll unwound, stakes refunded in full",
                );
                vec!["status"]
            }
            ModerationAction::CloseStakes
            | ModerationAction::SetUnderReview
            | ModerationAction::SetPendingResolution => vec!["status"],
            ModerationAction::ToggleHidden => unreachable!("handled above"),
        };

        tx.commit().await?;
        info!(
            poll_id,
            moderator_id,
            action = action.name(),
            from = %poll.status,
            to = %dest,
            "moderation applied",
        );
        Ok(ModerationOutcome {
            next_status: dest,
            updated_fields,
        })
    }

    async fn apply_settlements(
        tx: &mut SqliteConnection,
        poll_id: i64,
        batch: &SettlementBatch,
        kind: &str,
    ) -> Result<()> {
        let now = Utc::now();
        for entry in &batch.entries {
            if entry.balance_delta != 0.0 {
                wallet::credit(&mut *tx, entry.user_id, entry.balance_delta).await?;
            }
            if entry.reputation_delta != 0 {
                wallet::credit_reputation(&mut *tx, entry.user_id, entry.reputation_delta)
                    .await?;
            }
            sqlx::query(
                r#"
                INSERT INTO settlements (poll_id, user_id, balance_delta, reputation_delta, kind, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(poll_id)
            .bind(entry.user_id)
            .bind(entry.balance_delta)
            .bind(entry.reputation_delta)
            .bind(kind)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        Ok(())
    }

    /// One report per (poll, user). The counter is monotonic; the forced
    /// review fires exactly once, at the moment the count reaches the
    /// threshold while the poll is open or locked.
    pub async fn report(
        &self,
        poll_id: i64,
        user_id: i64,
        reason: Option<String>,
    ) -> Result<ReportOutcome> {
        let lock = self.store.mutation_lock(poll_id);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let mut tx = self.store.pool().begin().await?;
        let poll = PollStore::get_with(&mut tx, poll_id).await?;

        if !REPORTABLE.contains(&poll.status) {
            return Err(DomainError::StateConflict {
                action: "report",
                status: poll.status,
            }
            .into());
        }

        let inserted =
            PollStore::insert_report(&mut tx, poll_id, user_id, reason.as_deref(), now).await?;
        if !inserted {
            return Err(DomainError::AlreadyReported.into());
        }
        let report_count = PollStore::bump_report_count(&mut tx, poll_id, now).await?;

        let mut transitioned = false;
        if report_count == self.cfg.report_threshold as i64
            && REPORT_TRIGGER_SOURCES.contains(&poll.status)
        {
            transitioned = PollStore::transition(
                &mut tx,
                poll_id,
                REPORT_TRIGGER_SOURCES,
                PollStatus::UnderReview,
                now,
            )
            .await?;
        }

        tx.commit().await?;
        info!(
            poll_id,
            user_id,
            report_count,
            transitioned,
            "report recorded",
        );
        Ok(ReportOutcome {
            report_count,
            transitioned,
        })
    }

    /// Editable fields only; refused once money has been settled.
    pub async fn update_poll(
        &self,
        poll_id: i64,
        admin_id: i64,
        update: &PollUpdate,
    ) -> Result<ModerationOutcome> {
        if !self.cfg.is_admin(admin_id) {
            return Err(DomainError::AdminRequired.into());
        }

        let lock = self.store.mutation_lock(poll_id);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let mut tx = self.store.pool().begin().await?;
        let poll = PollStore::get_with(&mut tx, poll_id).await?;
        if matches!(poll.status, PollStatus::Resolved | PollStatus::Cancelled) {
            return Err(DomainError::StateConflict {
                action: "admin_update",
                status: poll.status,
            }
            .into());
        }

        if update.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(DomainError::InvalidTitle.into());
        }
        let label_empty = |l: &Option<String>| l.as_deref().is_some_and(|v| v.trim().is_empty());
        if label_empty(&update.option_a_label) || label_empty(&update.option_b_label) {
            return Err(DomainError::InvalidOptionLabel.into());
        }
        if update.deadline_at.is_some_and(|d| d <= now) {
            return Err(DomainError::InvalidDeadline.into());
        }

        let mut sets = Vec::new();
        let mut updated_fields = Vec::new();
        if update.title.is_some() {
            sets.push("title = ?");
            updated_fields.push("title");
        }
        if update.option_a_label.is_some() {
            sets.push("option_a_label = ?");
            updated_fields.push("option_a_label");
        }
        if update.option_b_label.is_some() {
            sets.push("option_b_label = ?");
            updated_fields.push("option_b_label");
        }
        if update.cover_image_url.is_some() {
            sets.push("cover_image_url = ?");
            updated_fields.push("cover_image_url");
        }
        if update.deadline_at.is_some() {
            sets.push("deadline_at = ?");
            updated_fields.push("deadline_at");
        }
        if update.stake_enabled.is_some() {
            sets.push("stake_enabled = ?");
            updated_fields.push("stake_enabled");
        }
        if update.vote_enabled.is_some() {
            sets.push("vote_enabled = ?");
            updated_fields.push("vote_enabled");
        }

        if !sets.is_empty() {
            let sql = format!(
                "UPDATE polls SET {}, updated_at = ? WHERE id = ?",
                sets.join(", "),
            );
            let mut query = sqlx::query(&sql);
            if let Some(v) = &update.title {
                query = query.bind(v.trim());
            }
            if let Some(v) = &update.option_a_label {
                query = query.bind(v.trim());
            }
            if let Some(v) = &update.option_b_label {
                query = query.bind(v.trim());
            }
            if let Some(v) = &update.cover_image_url {
                query = query.bind(v.as_str());
            }
            if let Some(v) = update.deadline_at {
                query = query.bind(v);
            }
            if let Some(v) = update.stake_enabled {
                query = query.bind(v);
            }
            if let Some(v) = update.vote_enabled {
                query = query.bind(v);
            }
            query.bind(now).bind(poll_id).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        info!(poll_id, admin_id, fields = ?updated_fields, "poll updated");
        Ok(ModerationOutcome {
            next_status: poll.status,
            updated_fields,
        })
    }

    /// No participants: the poll simply disappears. Any participation at
    /// all: the poll is cancelled (full refunds) and hidden instead, so
    /// money and history survive.
    pub async fn delete_poll(&self, poll_id: i64, admin_id: i64) -> Result<DeleteOutcome> {
        if !self.cfg.is_admin(admin_id) {
            return Err(DomainError::AdminRequired.into());
        }

        let lock = self.store.mutation_lock(poll_id);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let mut tx = self.store.pool().begin().await?;
        let poll = PollStore::get_with(&mut tx, poll_id).await?;

        if poll.participant_count == 0 {
            PollStore::hard_delete(&mut tx, poll_id).await?;
            tx.commit().await?;
            info!(poll_id, admin_id, "poll hard-deleted");
            return Ok(DeleteOutcome {
                operation: DeleteOperation::Deleted,
            });
        }

        let cancel = ModerationAction::Cancel;
        let moved = PollStore::transition(
            &mut tx,
            poll_id,
            cancel.sources(),
            PollStatus::Cancelled,
            now,
        )
        .await?;
        if !moved {
            return Err(DomainError::StateConflict {
                action: "delete",
                status: poll.status,
            }
            .into());
        }
        let participations = PollStore::participations(&mut tx, poll_id).await?;
        let batch = settle_cancellation(&participations);
        Self::apply_settlements(&mut tx, poll_id, &batch, "cancellation").await?;
        sqlx::query("UPDATE polls SET is_hidden = 1, updated_at = ?1 WHERE id = ?2")
            .bind(now)
            .bind(poll_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(
            poll_id,
            admin_id,
            refunded = batch.paid_out,
            "poll with participants soft-cancelled and hidden",
        );
        Ok(DeleteOutcome {
            operation: DeleteOperation::Cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::ledger::Ledger;
    use crate::test_util::{
        eligible_snapshot, fund, new_poll_request, test_config, test_store, FixedProgress,
    };
    use crate::types::{ParticipationMode, PollOption};

    const MOD: i64 = 999;

    async fn setup() -> (Arc<PollStore>, Ledger, ModerationEngine) {
        let store = test_store().await;
        let ledger = Ledger::new(
            Arc::clone(&store),
            Arc::new(FixedProgress { completed: 2, warm: true }),
        );
        let engine = ModerationEngine::new(test_config(), Arc::clone(&store));
        (store, ledger, engine)
    }

    async fn open_poll(store: &PollStore) -> PredictionPoll {
        store
            .create_poll(&new_poll_request(1), &eligible_snapshot(10), false)
            .await
            .unwrap()
    }

    async fn balance_of(store: &PollStore, user_id: i64) -> f64 {
        let mut conn = store.pool().acquire().await.unwrap();
        wallet::balance(&mut conn, user_id).await.unwrap()
    }

    async fn reputation_of(store: &PollStore, user_id: i64) -> i64 {
        let mut conn = store.pool().acquire().await.unwrap();
        wallet::reputation(&mut conn, user_id).await.unwrap()
    }

    fn resolve_a() -> ModerationAction {
        ModerationAction::Resolve {
            option: PollOption::A,
            proof_url: "https://example.com/proof".to_string(),
        }
    }

    #[test]
    fn proof_url_validation() {
        assert!(is_http_url("https://example.com/result?id=3"));
        assert!(is_http_url("http://news.example.org"));
        assert!(!is_http_url("ftp://example.com"));
        assert!(!is_http_url("example.com/result"));
        assert!(!is_http_url("https://"));
        assert!(!is_http_url("https://bad host/space"));
    }

    #[tokio::test]
    async fn approve_reopens_rejected_poll_and_clears_reason() {
        let store = test_store().await;
        let engine = ModerationEngine::new(test_config(), Arc::clone(&store));
        let poll = store
            .create_poll(&new_poll_request(1), &eligible_snapshot(10), true)
            .await
            .unwrap();

        engine
            .moderate(poll.id, MOD, ModerationAction::Reject { reason: "needs proof source".into() })
            .await
            .unwrap();
        let rejected = store.get(poll.id).await.unwrap();
        assert_eq!(rejected.status, PollStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("needs proof source"));

        let outcome = engine
            .moderate(poll.id, MOD, ModerationAction::Approve)
            .await
            .unwrap();
        assert_eq!(outcome.next_status, PollStatus::Open);
        let reopened = store.get(poll.id).await.unwrap();
        assert_eq!(reopened.status, PollStatus::Open);
        assert!(reopened.rejection_reason.is_none());
        assert_eq!(reopened.moderated_by, Some(MOD));
    }

    #[tokio::test]
    async fn reject_requires_reason_and_pending_source() {
        let (store, _ledger, engine) = setup().await;
        let poll = open_poll(&store).await;

        let err = engine
            .moderate(poll.id, MOD, ModerationAction::Reject { reason: "  ".into() })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Domain(DomainError::EmptyRejectReason)
        ));

        // open is not a valid reject source
        let err = engine
            .moderate(poll.id, MOD, ModerationAction::Reject { reason: "spam".into() })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Domain(DomainError::StateConflict { status: PollStatus::Open, .. })
        ));
    }

    #[tokio::test]
    async fn non_admin_cannot_moderate() {
        let (store, _ledger, engine) = setup().await;
        let poll = open_poll(&store).await;
        let err = engine
            .moderate(poll.id, 5, ModerationAction::CloseStakes)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::AdminRequired)));
    }

    #[tokio::test]
    async fn resolution_settles_winners_losers_and_votes() {
        let (store, ledger, engine) = setup().await;
        let poll = open_poll(&store).await;

        // pool_a = 700 (100 + 500 + 100), pool_b = 300 (250 + 50)
        for (user, option, amount) in [
            (1, PollOption::A, 100.0),
            (2, PollOption::A, 500.0),
            (4, PollOption::A, 100.0),
            (3, PollOption::B, 250.0),
            (5, PollOption::B, 50.0),
        ] {
            fund(store.pool(), user, amount).await;
            ledger
                .participate(poll.id, user, ParticipationMode::Stake, option, Some(amount))
                .await
                .unwrap();
        }
        ledger
            .participate(poll.id, 6, ParticipationMode::Vote, PollOption::A, None)
            .await
            .unwrap();
        ledger
            .participate(poll.id, 7, ParticipationMode::Vote, PollOption::B, None)
            .await
            .unwrap();

        engine
            .moderate(poll.id, MOD, ModerationAction::CloseStakes)
            .await
            .unwrap();
        let outcome = engine.moderate(poll.id, MOD, resolve_a()).await.unwrap();
        assert_eq!(outcome.next_status, PollStatus::Resolved);

        let resolved = store.get(poll.id).await.unwrap();
        assert_eq!(resolved.resolved_option, Some(PollOption::A));
        assert_eq!(resolved.proof_url.as_deref(), Some("https://example.com/proof"));
        assert_eq!(resolved.resolved_by, Some(MOD));
        assert!(resolved.resolved_at.is_some());

        // Winner with 100 on A: 100·0.15 + 100·(1000·0.85·0.93/700)
        let expected_winner = 100.0 * 0.15 + 100.0 * (1000.0 * 0.85 * 0.93 / 700.0);
        assert!((balance_of(&store, 1).await - expected_winner).abs() < 1e-9);
        // Loser with 50 on B: refund only, 7.5
        assert!((balance_of(&store, 5).await - 7.5).abs() < 1e-9);
        // Correct vote: reputation only
        assert_eq!(reputation_of(&store, 6).await, 12);
        assert_eq!(balance_of(&store, 6).await, 0.0);
        // Wrong vote: nothing
        assert_eq!(reputation_of(&store, 7).await, 0);

        let journal: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM settlements WHERE poll_id = ?1")
                .bind(poll.id)
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(journal, 6); // 5 stakes + 1 winning vote
    }

    #[tokio::test]
    async fn second_resolve_is_rejected_without_double_payout() {
        let (store, ledger, engine) = setup().await;
        let poll = open_poll(&store).await;
        fund(store.pool(), 1, 100.0).await;
        ledger
            .participate(poll.id, 1, ParticipationMode::Stake, PollOption::A, Some(100.0))
            .await
            .unwrap();
        engine
            .moderate(poll.id, MOD, ModerationAction::CloseStakes)
            .await
            .unwrap();
        engine.moderate(poll.id, MOD, resolve_a()).await.unwrap();
        let settled = balance_of(&store, 1).await;

        let err = engine.moderate(poll.id, MOD, resolve_a()).await.unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::AlreadyResolved)));
        assert_eq!(balance_of(&store, 1).await, settled);
    }

    #[tokio::test]
    async fn resolve_rejects_bad_proof_and_open_status() {
        let (store, _ledger, engine) = setup().await;
        let poll = open_poll(&store).await;

        let err = engine
            .moderate(
                poll.id,
                MOD,
                ModerationAction::Resolve {
                    option: PollOption::A,
                    proof_url: "not a url".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::InvalidProofUrl)));

        // open is not a resolvable status; stakes must close first
        let err = engine.moderate(poll.id, MOD, resolve_a()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Domain(DomainError::StateConflict { status: PollStatus::Open, .. })
        ));
    }

    #[tokio::test]
    async fn cancel_refunds_every_staker_in_full() {
        let (store, ledger, engine) = setup().await;
        let poll = open_poll(&store).await;
        for user in [1, 2, 3] {
            fund(store.pool(), user, 100.0).await;
            ledger
                .participate(
                    poll.id,
                    user,
                    ParticipationMode::Stake,
                    if user == 3 { PollOption::B } else { PollOption::A },
                    Some(100.0),
                )
                .await
                .unwrap();
            assert_eq!(balance_of(&store, user).await, 0.0);
        }

        let outcome = engine
            .moderate(poll.id, MOD, ModerationAction::Cancel)
            .await
            .unwrap();
        assert_eq!(outcome.next_status, PollStatus::Cancelled);
        for user in [1, 2, 3] {
            assert!((balance_of(&store, user).await - 100.0).abs() < 1e-9);
            assert_eq!(reputation_of(&store, user).await, 0);
        }
    }

    #[tokio::test]
    async fn mark_invalid_requires_review_and_refunds() {
        let (store, ledger, engine) = setup().await;
        let poll = open_poll(&store).await;
        fund(store.pool(), 1, 80.0).await;
        ledger
            .participate(poll.id, 1, ParticipationMode::Stake, PollOption::B, Some(80.0))
            .await
            .unwrap();

        let err = engine
            .moderate(poll.id, MOD, ModerationAction::MarkInvalid)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Domain(DomainError::StateConflict { status: PollStatus::Open, .. })
        ));

        engine
            .moderate(poll.id, MOD, ModerationAction::SetUnderReview)
            .await
            .unwrap();
        let outcome = engine
            .moderate(poll.id, MOD, ModerationAction::MarkInvalid)
            .await
            .unwrap();
        assert_eq!(outcome.next_status, PollStatus::Invalid);
        assert!((balance_of(&store, 1).await - 80.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn report_threshold_fires_exactly_once() {
        let (store, _ledger, engine) = setup().await;
        let poll = open_poll(&store).await;

        let mut transitions = 0;
        for user in 1..=10 {
            let outcome = engine.report(poll.id, user, None).await.unwrap();
            if outcome.transitioned {
                transitions += 1;
            }
        }
        assert_eq!(transitions, 1);

        let reviewed = store.get(poll.id).await.unwrap();
        assert_eq!(reviewed.status, PollStatus::UnderReview);
        assert_eq!(reviewed.report_count, 10);
    }

    #[tokio::test]
    async fn duplicate_report_is_an_explicit_error() {
        let (store, _ledger, engine) = setup().await;
        let poll = open_poll(&store).await;

        engine.report(poll.id, 4, Some("misleading".into())).await.unwrap();
        let err = engine.report(poll.id, 4, None).await.unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::AlreadyReported)));
        assert_eq!(store.get(poll.id).await.unwrap().report_count, 1);
    }

    #[tokio::test]
    async fn toggle_hidden_preserves_status() {
        let (store, _ledger, engine) = setup().await;
        let poll = open_poll(&store).await;

        let outcome = engine
            .moderate(poll.id, MOD, ModerationAction::ToggleHidden)
            .await
            .unwrap();
        assert_eq!(outcome.next_status, PollStatus::Open);
        assert!(store.get(poll.id).await.unwrap().is_hidden);

        engine
            .moderate(poll.id, MOD, ModerationAction::ToggleHidden)
            .await
            .unwrap();
        assert!(!store.get(poll.id).await.unwrap().is_hidden);
    }

    #[tokio::test]
    async fn update_is_blocked_after_resolution() {
        let (store, _ledger, engine) = setup().await;
        let poll = open_poll(&store).await;

        let outcome = engine
            .update_poll(
                poll.id,
                MOD,
                &PollUpdate {
                    title: Some("Derby rematch?".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.updated_fields, vec!["title"]);
        assert_eq!(store.get(poll.id).await.unwrap().title, "Derby rematch?");

        engine
            .moderate(poll.id, MOD, ModerationAction::CloseStakes)
            .await
            .unwrap();
        engine.moderate(poll.id, MOD, resolve_a()).await.unwrap();
        let err = engine
            .update_poll(
                poll.id,
                MOD,
                &PollUpdate {
                    title: Some("too late".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Domain(DomainError::StateConflict { status: PollStatus::Resolved, .. })
        ));
    }

    #[tokio::test]
    async fn delete_without_participants_hard_deletes() {
        let (store, _ledger, engine) = setup().await;
        let poll = open_poll(&store).await;

        let outcome = engine.delete_poll(poll.id, MOD).await.unwrap();
        assert_eq!(outcome.operation, DeleteOperation::Deleted);
        let err = store.get(poll.id).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Domain(DomainError::PollNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_with_stakes_cancels_refunds_and_hides() {
        let (store, ledger, engine) = setup().await;
        let poll = open_poll(&store).await;
        fund(store.pool(), 2, 60.0).await;
        ledger
            .participate(poll.id, 2, ParticipationMode::Stake, PollOption::A, Some(60.0))
            .await
            .unwrap();

        let outcome = engine.delete_poll(poll.id, MOD).await.unwrap();
        assert_eq!(outcome.operation, DeleteOperation::Cancelled);

        let cancelled = store.get(poll.id).await.unwrap();
        assert_eq!(cancelled.status, PollStatus::Cancelled);
        assert!(cancelled.is_hidden);
        assert!((balance_of(&store, 2).await - 60.0).abs() < 1e-9);
    }
}
