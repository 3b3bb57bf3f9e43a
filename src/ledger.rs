use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::clients::ProgressTracker;
use crate::config::STAKE_CAP;
use crate::error::{DomainError, Result};
use crate::store::PollStore;
use crate::types::{ParticipationMode, PollOption, PollStatus};
use crate::wallet;

#[derive(Debug, Clone, Serialize)]
pub struct ParticipateOutcome {
    pub pool_a: f64,
    pub pool_b: f64,
    pub participant_count: i64,
}

/// Records one participation per (poll, user), moving money and pool totals
/// as a single unit.
pub struct Ledger {
    store: Arc<PollStore>,
    progress: Arc<dyn ProgressTracker>,
}

impl Ledger {
    pub fn new(store: Arc<PollStore>, progress: Arc<dyn ProgressTracker>) -> Self {
        Self { store, progress }
    }

    /// The debit, the pool increment and the participation row commit
    /// together or not at all; a user can never be charged without a
    /// recorded stake. Duplicate calls for the same (poll, user) resolve to
    /// one success and one `already_participating`.
    pub async fn participate(
        &self,
        poll_id: i64,
        user_id: i64,
        mode: ParticipationMode,
        option: PollOption,
        stake_amount: Option<f64>,
    ) -> Result<ParticipateOutcome> {
        let amount = match mode {
            ParticipationMode::Stake => {
                let amount = stake_amount.unwrap_or(0.0);
                if amount <= 0.0 || amount > STAKE_CAP {
                    return Err(DomainError::StakeOutOfBounds { cap: STAKE_CAP }.into());
                }
                // Engagement gate, delegated to the progress tracker. A
                // lookup failure fails the stake, not the other way around.
                if !self.progress.warm_account(user_id).await? {
                    return Err(DomainError::WarmAccountRequired.into());
                }
                amount
            }
            ParticipationMode::Vote => 0.0,
        };

        let lock = self.store.mutation_lock(poll_id);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let mut tx = self.store.pool().begin().await?;

        let poll = PollStore::get_with(&mut tx, poll_id).await?;
        if poll.status != PollStatus::Open {
            return Err(DomainError::StateConflict {
                action: "participate",
                status: poll.status,
            }
            .into());
        }
        let mode_enabled = match mode {
            ParticipationMode::Stake => poll.stake_enabled,
            ParticipationMode::Vote => poll.vote_enabled,
        };
        if !mode_enabled {
            return Err(DomainError::ModeDisabled(mode).into());
        }
        if PollStore::participation_exists(&mut tx, poll_id, user_id).await? {
            return Err(DomainError::DuplicateParticipation.into());
        }

        let applied = match mode {
            ParticipationMode::Stake => {
                wallet::debit(&mut tx, user_id, amount).await?;
                PollStore::apply_stake(&mut tx, poll_id, option, amount, now).await?
            }
            ParticipationMode::Vote => PollStore::count_participant(&mut tx, poll_id, now).await?,
        };
        if !applied {
            // The open-guard on the UPDATE lost against a concurrent
            // transition; the transaction rolls back, including the debit.
            return Err(DomainError::StateConflict {
                action: "participate",
                status: poll.status,
            }
            .into());
        }

        PollStore::insert_participation(&mut tx, poll_id, user_id, mode, option, amount, now)
            .await?;

        let (pool_a, pool_b, participant_count): (f64, f64, i64) = sqlx::query_as(
            "SELECT pool_a, pool_b, participant_count FROM polls WHERE id = ?1",
        )
        .bind(poll_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            poll_id,
            user_id,
            mode = %mode,
            option = %option,
            amount,
            "participation recorded",
        );
        Ok(ParticipateOutcome {
            pool_a,
            pool_b,
            participant_count,
        })
    }
}
