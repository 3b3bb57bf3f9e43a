use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use tracing::warn;

use crate::clients::{ProgressTracker, SquadDirectory};
use crate::config::Config;
use crate::error::Result;
use crate::store::PollStore;
use crate::types::{BlockingReason, EligibilitySnapshot, SquadMonthlyQuota};

/// UTC month window containing `now`: (first instant of this month, first
/// instant of the next). Quota accounting and `resets_at` both hang off it.
pub fn month_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let (year, month) = (now.year(), now.month());
    let start = Utc
        .with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let next = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    (start, next)
}

/// Decides whether a user may create a poll. Pure read: evaluation never
/// mutates anything, and a fresh evaluation guards every create call —
/// client-side recomputation is UI sugar, not authorization.
pub struct EligibilityEngine {
    cfg: Arc<Config>,
    store: Arc<PollStore>,
    progress: Arc<dyn ProgressTracker>,
    squads: Arc<dyn SquadDirectory>,
}

impl EligibilityEngine {
    pub fn new(
        cfg: Arc<Config>,
        store: Arc<PollStore>,
        progress: Arc<dyn ProgressTracker>,
        squads: Arc<dyn SquadDirectory>,
    ) -> Self {
        Self {
            cfg,
            store,
            progress,
            squads,
        }
    }

    /// Never fails: any backing-data failure yields the conservative
    /// "not eligible / need_progress" snapshot. Fail closed, never open.
    pub async fn evaluate(&self, user_id: i64) -> EligibilitySnapshot {
        let is_admin = self.cfg.is_admin(user_id);
        match self.evaluate_inner(user_id, is_admin).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(user_id, error = %e, "eligibility lookup failed, failing closed");
                self.closed_snapshot(is_admin)
            }
        }
    }

    async fn evaluate_inner(&self, user_id: i64, is_admin: bool) -> Result<EligibilitySnapshot> {
        let completed_count = self.progress.completed_count(user_id).await?;
        let squad = self.squads.squad_of(user_id).await?;

        let now = Utc::now();
        let (month_start, _) = month_bounds(now);
        let monthly_limit = self.cfg.monthly_poll_limit;

        let (used_this_month, last_created_at) = match &squad {
            Some(info) => (
                self.store.squad_created_since(info.squad_id, month_start).await?,
                self.store.squad_last_created_at(info.squad_id).await?,
            ),
            None => (0, None),
        };
        let remaining_this_month = monthly_limit.saturating_sub(used_this_month);

        let (cooldown_hours_left, next_available_at) = match last_created_at {
            Some(last) => {
                let next = last + Duration::hours(self.cfg.creation_cooldown_hours);
                if next > now {
                    let minutes = (next - now).num_minutes().max(0);
                    ((minutes + 59) / 60, Some(next))
                } else {
                    (0, None)
                }
            }
            None => (0, None),
        };

        // First failing check wins; the order tells the caller which
        // requirement to fix first.
        let blocking_reason_code = if completed_count < self.cfg.required_completed_count {
            Some(BlockingReason::NeedProgress)
        } else if squad.is_none() {
            Some(BlockingReason::NeedSquad)
        } else if !squad.as_ref().is_some_and(|s| s.is_captain) {
            Some(BlockingReason::NeedCaptain)
        } else if remaining_this_month == 0 {
            Some(BlockingReason::MonthLimit)
        } else if cooldown_hours_left > 0 {
            Some(BlockingReason::Cooldown)
        } else {
            None
        };

        Ok(EligibilitySnapshot {
            eligible: is_admin || blocking_reason_code.is_none(),
            required_completed_count: self.cfg.required_completed_count,
            completed_count,
            has_squad: squad.is_some(),
            squad_id: squad.as_ref().map(|s| s.squad_id),
            is_squad_captain: squad.as_ref().is_some_and(|s| s.is_captain),
            is_admin,
            monthly_limit,
            used_this_month,
            remaining_this_month,
            cooldown_hours_left,
            next_available_at,
            blocking_reason_code: if is_admin { None } else { blocking_reason_code },
        })
    }

    fn closed_snapshot(&self, is_admin: bool) -> EligibilitySnapshot {
        EligibilitySnapshot {
            eligible: is_admin,
            required_completed_count: self.cfg.required_completed_count,
            completed_count: 0,
            has_squad: false,
            squad_id: None,
            is_squad_captain: false,
            is_admin,
            monthly_limit: self.cfg.monthly_poll_limit,
            used_this_month: 0,
            remaining_this_month: 0,
            cooldown_hours_left: 0,
            next_available_at: None,
            blocking_reason_code: if is_admin {
                None
            } else {
                Some(BlockingReason::NeedProgress)
            },
        }
    }

    pub async fn squad_quota(&self, squad_id: i64) -> Result<SquadMonthlyQuota> {
        let now = Utc::now();
        let (month_start, resets_at) = month_bounds(now);
        let used_this_month = self.store.squad_created_since(squad_id, month_start).await?;
        Ok(SquadMonthlyQuota {
            squad_id,
            monthly_limit: self.cfg.monthly_poll_limit,
            used_this_month,
            remaining_this_month: self.cfg.monthly_poll_limit.saturating_sub(used_this_month),
            resets_at,
        })
    }
}
