use crate::error::{AppError, Result};

/// Share of the combined pool withheld as the platform fee at resolution.
pub const FEE_TOTAL: f64 = 0.07;

/// Share of every stake returned unconditionally at resolution,
/// win or lose. The payout pool is computed net of this guarantee.
pub const REFUND_RATE: f64 = 0.15;

/// Maximum amount a single stake may commit.
pub const STAKE_CAP: f64 = 500.0;

/// Reputation granted to a free vote on the winning option at resolution.
pub const REPUTATION_REWARD: i64 = 12;

/// Default number of distinct reporters that pushes a poll into review.
pub const DEFAULT_REPORT_THRESHOLD: u32 = 5;

/// Default completed quizzes/tests required before a captain may create polls.
pub const DEFAULT_REQUIRED_COMPLETED: u32 = 3;

/// Default polls a squad may open per UTC month.
pub const DEFAULT_MONTHLY_LIMIT: u32 = 4;

/// Default hours a squad must wait between poll creations.
pub const DEFAULT_COOLDOWN_HOURS: i64 = 24;

/// Deadline sweeper interval (seconds) — how often open polls past
/// deadline_at are moved to locked.
pub const SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Base URL of the quiz/test progress tracker (PROGRESS_API_URL)
    pub progress_api_url: String,
    /// Base URL of the squad directory (SQUAD_API_URL)
    pub squad_api_url: String,
    /// Timeout applied to every collaborator call (COLLABORATOR_TIMEOUT_MS)
    pub collaborator_timeout_ms: u64,
    /// Completed quizzes/tests required to create polls (REQUIRED_COMPLETED_COUNT)
    pub required_completed_count: u32,
    /// Polls a squad may open per UTC month (MONTHLY_POLL_LIMIT)
    pub monthly_poll_limit: u32,
    /// Hours a squad must wait between creations (CREATION_COOLDOWN_HOURS)
    pub creation_cooldown_hours: i64,
    /// Distinct reports that push an open/locked poll into review (REPORT_THRESHOLD)
    pub report_threshold: u32,
    /// Whether new polls start in pending review instead of open (MODERATION_REQUIRED)
    pub moderation_required: bool,
    /// User ids with moderator/admin rights (ADMIN_USER_IDS, comma-separated).
    /// Example: "ADMIN_USER_IDS=7,42"
    pub admin_user_ids: Vec<i64>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "predictions.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            progress_api_url: std::env::var("PROGRESS_API_URL")
                .unwrap_or_else(|_| "http://localhost:8081".to_string()),
            squad_api_url: std::env::var("SQUAD_API_URL")
                .unwrap_or_else(|_| "http://localhost:8082".to_string()),
            collaborator_timeout_ms: std::env::var("COLLABORATOR_TIMEOUT_MS")
                .unwrap_or_else(|_| "1500".to_string())
                .parse::<u64>()
                .unwrap_or(1500),
            required_completed_count: std::env::var("REQUIRED_COMPLETED_COUNT")
                .unwrap_or_default()
                .parse::<u32>()
                .unwrap_or(DEFAULT_REQUIRED_COMPLETED),
            monthly_poll_limit: std::env::var("MONTHLY_POLL_LIMIT")
                .unwrap_or_default()
                .parse::<u32>()
                .unwrap_or(DEFAULT_MONTHLY_LIMIT),
            creation_cooldown_hours: std::env::var("CREATION_COOLDOWN_HOURS")
                .unwrap_or_default()
                .parse::<i64>()
                .unwrap_or(DEFAULT_COOLDOWN_HOURS),
            report_threshold: std::env::var("REPORT_THRESHOLD")
                .unwrap_or_default()
                .parse::<u32>()
                .unwrap_or(DEFAULT_REPORT_THRESHOLD),
            moderation_required: std::env::var("MODERATION_REQUIRED")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            admin_user_ids: std::env::var("ADMIN_USER_IDS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.parse::<i64>().ok())
                .collect(),
        })
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_user_ids.contains(&user_id)
    }
}
