use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

use crate::types::{BlockingReason, ParticipationMode, PollStatus};

/// Infrastructure failures. These are faults: the caller retries or gives
/// up, it does not branch on them as business outcomes.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Collaborator timeout: {0}")]
    CollaboratorTimeout(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Expected business rejections. Every variant carries a stable error_code
/// so clients branch on outcomes without parsing messages.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("title must not be empty")]
    InvalidTitle,

    #[error("both option labels must be non-empty")]
    InvalidOptionLabel,

    #[error("deadline must be in the future")]
    InvalidDeadline,

    #[error("no squad available for poll creation")]
    InvalidSquad,

    #[error("rejection reason must not be empty")]
    EmptyRejectReason,

    #[error("proof_url must be a syntactically valid http(s) URL")]
    InvalidProofUrl,

    #[error("stake must be greater than 0 and at most {cap}")]
    StakeOutOfBounds { cap: f64 },

    #[error("poll {0} not found")]
    PollNotFound(i64),

    #[error("action {action} is not allowed while the poll is {status}")]
    StateConflict {
        action: &'static str,
        status: PollStatus,
    },

    #[error("poll is already resolved")]
    AlreadyResolved,

    #[error("creator is not eligible: {0}")]
    NotEligible(BlockingReason),

    #[error("at least one completed quiz or test is required to stake")]
    WarmAccountRequired,

    #[error("user already participates in this poll")]
    DuplicateParticipation,

    #[error("user already reported this poll")]
    AlreadyReported,

    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: f64, required: f64 },

    #[error("{0} participation is disabled on this poll")]
    ModeDisabled(ParticipationMode),

    #[error("moderator privileges required")]
    AdminRequired,
}

impl DomainError {
    pub fn error_code(&self) -> &'static str {
        match self {
            DomainError::InvalidTitle => "invalid_title",
            DomainError::InvalidOptionLabel => "invalid_option_label",
            DomainError::InvalidDeadline => "invalid_deadline",
            DomainError::InvalidSquad => "invalid_squad",
            DomainError::EmptyRejectReason => "empty_reject_reason",
            DomainError::InvalidProofUrl => "invalid_proof_url",
            DomainError::StakeOutOfBounds { .. } => "stake_out_of_bounds",
            DomainError::PollNotFound(_) => "poll_not_found",
            DomainError::StateConflict { .. } => "state_conflict",
            DomainError::AlreadyResolved => "already_resolved",
            DomainError::NotEligible(_) => "not_eligible",
            DomainError::WarmAccountRequired => "warm_account_required",
            DomainError::DuplicateParticipation => "already_participating",
            DomainError::AlreadyReported => "already_reported",
            DomainError::InsufficientBalance { .. } => "insufficient_balance",
            DomainError::ModeDisabled(_) => "mode_disabled",
            DomainError::AdminRequired => "admin_required",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            DomainError::PollNotFound(_) => StatusCode::NOT_FOUND,
            DomainError::StateConflict { .. } | DomainError::AlreadyResolved => {
                StatusCode::CONFLICT
            }
            DomainError::DuplicateParticipation | DomainError::AlreadyReported => {
                StatusCode::CONFLICT
            }
            DomainError::NotEligible(_)
            | DomainError::WarmAccountRequired
            | DomainError::AdminRequired => StatusCode::FORBIDDEN,
            DomainError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AppError::Domain(e) => {
                let body = json!({
                    "success": false,
                    "error_code": e.error_code(),
                    "message": e.to_string(),
                });
                (e.status_code(), Json(body)).into_response()
            }
            other => {
                let body = json!({
                    "success": false,
                    "error_code": "internal",
                    "message": other.to_string(),
                });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}
