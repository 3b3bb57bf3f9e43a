use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Poll status state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PollStatus {
    /// Awaiting moderation approval.
    Pending,
    /// Accepting stakes and votes.
    Open,
    /// Deadline passed or stakes closed; no new participations.
    Locked,
    /// Flagged for moderator attention (manually or via report threshold).
    UnderReview,
    /// Outcome confirmation in progress.
    PendingResolution,
    Resolved,
    Rejected,
    Cancelled,
    Invalid,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Pending => "pending",
            PollStatus::Open => "open",
            PollStatus::Locked => "locked",
            PollStatus::UnderReview => "under_review",
            PollStatus::PendingResolution => "pending_resolution",
            PollStatus::Resolved => "resolved",
            PollStatus::Rejected => "rejected",
            PollStatus::Cancelled => "cancelled",
            PollStatus::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for PollStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Options and participation modes
// ---------------------------------------------------------------------------

/// The two outcomes of a binary poll. Labels live on the poll itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PollOption {
    A,
    B,
}

impl std::fmt::Display for PollOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollOption::A => write!(f, "a"),
            PollOption::B => write!(f, "b"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ParticipationMode {
    /// Wagered in-app currency, settled at resolution.
    Stake,
    /// Free commitment, rewarded with reputation only.
    Vote,
}

impl std::fmt::Display for ParticipationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParticipationMode::Stake => write!(f, "stake"),
            ParticipationMode::Vote => write!(f, "vote"),
        }
    }
}

// ---------------------------------------------------------------------------
// Durable entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PredictionPoll {
    pub id: i64,
    pub squad_id: i64,
    pub title: String,
    pub option_a_label: String,
    pub option_b_label: String,
    pub cover_image_url: Option<String>,
    pub deadline_at: DateTime<Utc>,
    pub status: PollStatus,
    pub created_by: i64,
    pub submitted_at: DateTime<Utc>,
    pub moderated_by: Option<i64>,
    pub moderated_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub pool_a: f64,
    pub pool_b: f64,
    pub participant_count: i64,
    pub resolved_option: Option<PollOption>,
    pub proof_url: Option<String>,
    pub resolved_by: Option<i64>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub report_count: i64,
    pub is_hidden: bool,
    pub stake_enabled: bool,
    pub vote_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable once written; one per (poll, user).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Participation {
    pub poll_id: i64,
    pub user_id: i64,
    pub mode: ParticipationMode,
    pub option: PollOption,
    pub stake_amount: f64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Eligibility
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingReason {
    NeedProgress,
    NeedSquad,
    NeedCaptain,
    MonthLimit,
    Cooldown,
}

impl std::fmt::Display for BlockingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BlockingReason::NeedProgress => "need_progress",
            BlockingReason::NeedSquad => "need_squad",
            BlockingReason::NeedCaptain => "need_captain",
            BlockingReason::MonthLimit => "month_limit",
            BlockingReason::Cooldown => "cooldown",
        };
        write!(f, "{s}")
    }
}

/// Computed per request; never persisted. The UI shows the first blocking
/// reason, so the evaluation order in the eligibility engine is load-bearing.
#[derive(Debug, Clone, Serialize)]
pub struct EligibilitySnapshot {
    pub eligible: bool,
    pub required_completed_count: u32,
    pub completed_count: u32,
    pub has_squad: bool,
    pub squad_id: Option<i64>,
    pub is_squad_captain: bool,
    pub is_admin: bool,
    pub monthly_limit: u32,
    pub used_this_month: u32,
    pub remaining_this_month: u32,
    pub cooldown_hours_left: i64,
    pub next_available_at: Option<DateTime<Utc>>,
    pub blocking_reason_code: Option<BlockingReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SquadMonthlyQuota {
    pub squad_id: i64,
    pub monthly_limit: u32,
    pub used_this_month: u32,
    pub remaining_this_month: u32,
    /// First instant of the next UTC month.
    pub resets_at: DateTime<Utc>,
}

/// Squad directory lookup result.
#[derive(Debug, Clone, Deserialize)]
pub struct SquadInfo {
    pub squad_id: i64,
    pub title: String,
    pub is_captain: bool,
}

/// Poll creation payload. `squad_id` is honored for admins only; everyone
/// else gets the squad the directory reports for them.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPollRequest {
    pub creator_id: i64,
    pub title: String,
    pub option_a_label: String,
    pub option_b_label: String,
    pub cover_image_url: Option<String>,
    pub deadline_at: DateTime<Utc>,
    pub stake_enabled: Option<bool>,
    pub vote_enabled: Option<bool>,
    pub squad_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// Moderation commands
// ---------------------------------------------------------------------------

/// Closed set of moderation commands, validated at the API boundary and
/// dispatched through one exhaustive match. The source system issued these
/// as dynamically-named remote calls; here an unknown action fails to parse
/// before it can touch a poll.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ModerationAction {
    Approve,
    Reject { reason: String },
    CloseStakes,
    SetUnderReview,
    SetPendingResolution,
    Resolve { option: PollOption, proof_url: String },
    Cancel,
    MarkInvalid,
    ToggleHidden,
}

impl ModerationAction {
    pub fn name(&self) -> &'static str {
        match self {
            ModerationAction::Approve => "approve",
            ModerationAction::Reject { .. } => "reject",
            ModerationAction::CloseStakes => "close_stakes",
            ModerationAction::SetUnderReview => "set_under_review",
            ModerationAction::SetPendingResolution => "set_pending_resolution",
            ModerationAction::Resolve { .. } => "resolve",
            ModerationAction::Cancel => "cancel",
            ModerationAction::MarkInvalid => "mark_invalid",
            ModerationAction::ToggleHidden => "toggle_hidden",
        }
    }

    /// Statuses the action may be applied from. `ToggleHidden` is valid from
    /// any status and is handled separately (it never changes status).
    pub fn sources(&self) -> &'static [PollStatus] {
        use PollStatus::*;
        match self {
            ModerationAction::Approve => &[Pending, Rejected],
            ModerationAction::Reject { .. } => &[Pending],
            ModerationAction::CloseStakes => &[Open],
            ModerationAction::SetUnderReview => &[Open, Locked, PendingResolution],
            ModerationAction::SetPendingResolution => &[Locked, UnderReview],
            ModerationAction::Resolve { .. } => &[Locked, PendingResolution, UnderReview],
            ModerationAction::Cancel => &[Pending, Open, Locked, PendingResolution, UnderReview],
            ModerationAction::MarkInvalid => &[UnderReview],
            ModerationAction::ToggleHidden => &[
                Pending,
                Open,
                Locked,
                UnderReview,
                PendingResolution,
                Resolved,
                Rejected,
                Cancelled,
                Invalid,
            ],
        }
    }

    /// Destination status, or None for actions that leave status unchanged.
    pub fn destination(&self) -> Option<PollStatus> {
        match self {
            ModerationAction::Approve => Some(PollStatus::Open),
            ModerationAction::Reject { .. } => Some(PollStatus::Rejected),
            ModerationAction::CloseStakes => Some(PollStatus::Locked),
            ModerationAction::SetUnderReview => Some(PollStatus::UnderReview),
            ModerationAction::SetPendingResolution => Some(PollStatus::PendingResolution),
            ModerationAction::Resolve { .. } => Some(PollStatus::Resolved),
            ModerationAction::Cancel => Some(PollStatus::Cancelled),
            ModerationAction::MarkInvalid => Some(PollStatus::Invalid),
            ModerationAction::ToggleHidden => None,
        }
    }
}
