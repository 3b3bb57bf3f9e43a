//! External collaborators: the quiz/test progress tracker and the squad
//! directory. Both sit behind traits so the engines can be exercised with
//! in-process fakes; production wires the HTTP implementations.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::timeout;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::types::SquadInfo;

#[async_trait]
pub trait ProgressTracker: Send + Sync {
    /// Completed quizzes/tests for a user.
    async fn completed_count(&self, user_id: i64) -> Result<u32>;

    /// Whether the user has cleared the minimum engagement bar to stake.
    async fn warm_account(&self, user_id: i64) -> Result<bool>;
}

#[async_trait]
pub trait SquadDirectory: Send + Sync {
    /// The user's squad, if any, with their captain flag.
    async fn squad_of(&self, user_id: i64) -> Result<Option<SquadInfo>>;
}

// ---------------------------------------------------------------------------
// HTTP implementations
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CompletedCountBody {
    completed_count: u32,
}

#[derive(Deserialize)]
struct WarmAccountBody {
    warm: bool,
}

pub struct HttpProgressTracker {
    client: reqwest::Client,
    base_url: String,
    call_timeout: Duration,
}

impl HttpProgressTracker {
    pub fn new(cfg: &Config) -> Result<Self> {
        let call_timeout = Duration::from_millis(cfg.collaborator_timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(AppError::Http)?;
        Ok(Self {
            client,
            base_url: cfg.progress_api_url.clone(),
            call_timeout,
        })
    }
}

#[async_trait]
impl ProgressTracker for HttpProgressTracker {
    async fn completed_count(&self, user_id: i64) -> Result<u32> {
        let url = format!("{}/users/{}/progress", self.base_url, user_id);
        let fut = async {
            let body: CompletedCountBody = self
                .client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok::<_, AppError>(body.completed_count)
        };
        timeout(self.call_timeout, fut)
            .await
            .map_err(|_| AppError::CollaboratorTimeout("progress tracker"))?
    }

    async fn warm_account(&self, user_id: i64) -> Result<bool> {
        let url = format!("{}/users/{}/warm", self.base_url, user_id);
        let fut = async {
            let body: WarmAccountBody = self
                .client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok::<_, AppError>(body.warm)
        };
        timeout(self.call_timeout, fut)
            .await
            .map_err(|_| AppError::CollaboratorTimeout("progress tracker"))?
    }
}

pub struct HttpSquadDirectory {
    client: reqwest::Client,
    base_url: String,
    call_timeout: Duration,
}

impl HttpSquadDirectory {
    pub fn new(cfg: &Config) -> Result<Self> {
        let call_timeout = Duration::from_millis(cfg.collaborator_timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(AppError::Http)?;
        Ok(Self {
            client,
            base_url: cfg.squad_api_url.clone(),
            call_timeout,
        })
    }
}

#[async_trait]
impl SquadDirectory for HttpSquadDirectory {
    async fn squad_of(&self, user_id: i64) -> Result<Option<SquadInfo>> {
        let url = format!("{}/users/{}/squad", self.base_url, user_id);
        let fut = async {
            let response = self.client.get(&url).send().await?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok::<_, AppError>(None);
            }
            let info: SquadInfo = response.error_for_status()?.json().await?;
            Ok(Some(info))
        };
        timeout(self.call_timeout, fut)
            .await
            .map_err(|_| AppError::CollaboratorTimeout("squad directory"))?
    }
}
