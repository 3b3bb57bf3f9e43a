use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::eligibility::EligibilityEngine;
use crate::error::AppError;
use crate::ledger::Ledger;
use crate::moderation::{DeleteOperation, ModerationEngine, PollUpdate};
use crate::store::{PollFilter, PollStore};
use crate::types::{
    EligibilitySnapshot, ModerationAction, NewPollRequest, ParticipationMode, PollOption,
    PollStatus, PredictionPoll, SquadMonthlyQuota,
};

#[derive(Clone)]
pub struct ApiState {
    pub cfg: Arc<Config>,
    pub store: Arc<PollStore>,
    pub eligibility: Arc<EligibilityEngine>,
    pub ledger: Arc<Ledger>,
    pub moderation: Arc<ModerationEngine>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/eligibility/:user_id", get(get_eligibility))
        .route("/squads/:squad_id/quota", get(get_squad_quota))
        .route("/polls", get(list_polls).post(create_poll))
        .route(
            "/polls/:id",
            get(get_poll).patch(admin_update_poll).delete(admin_delete_poll),
        )
        .route("/polls/:id/participate", post(participate))
        .route("/polls/:id/moderate", post(moderate_poll))
        .route("/polls/:id/report", post(report_poll))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct PollsQuery {
    pub squad_id: Option<i64>,
    pub status: Option<PollStatus>,
    pub include_hidden: Option<bool>,
}

#[derive(Deserialize)]
pub struct ParticipateRequest {
    pub user_id: i64,
    pub mode: ParticipationMode,
    pub option: PollOption,
    pub stake_amount: Option<f64>,
}

#[derive(Deserialize)]
pub struct ModerateRequest {
    pub moderator_id: i64,
    #[serde(flatten)]
    pub action: ModerationAction,
}

#[derive(Deserialize)]
pub struct ReportRequest {
    pub user_id: i64,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdatePollRequest {
    pub admin_id: i64,
    #[serde(flatten)]
    pub fields: PollUpdate,
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    pub admin_id: i64,
}

// ---------------------------------------------------------------------------
// Response payloads — mutations always carry `success` so clients branch on
// business outcomes without sniffing HTTP statuses.
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct CreatePollResponse {
    pub success: bool,
    pub poll_id: i64,
    pub next_status: PollStatus,
}

#[derive(Serialize)]
pub struct ParticipateResponse {
    pub success: bool,
    pub pool_a: f64,
    pub pool_b: f64,
    pub participant_count: i64,
}

#[derive(Serialize)]
pub struct ModerateResponse {
    pub success: bool,
    pub next_status: PollStatus,
    pub updated_fields: Vec<&'static str>,
}

#[derive(Serialize)]
pub struct ReportResponse {
    pub success: bool,
    pub report_count: i64,
    pub transitioned: bool,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub operation: DeleteOperation,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_eligibility(
    State(state): State<ApiState>,
    Path(user_id): Path<i64>,
) -> Json<EligibilitySnapshot> {
    Json(state.eligibility.evaluate(user_id).await)
}

async fn get_squad_quota(
    State(state): State<ApiState>,
    Path(squad_id): Path<i64>,
) -> Result<Json<SquadMonthlyQuota>, AppError> {
    Ok(Json(state.eligibility.squad_quota(squad_id).await?))
}

async fn list_polls(
    State(state): State<ApiState>,
    Query(params): Query<PollsQuery>,
) -> Result<Json<Vec<PredictionPoll>>, AppError> {
    let filter = PollFilter {
        squad_id: params.squad_id,
        status: params.status,
        include_hidden: params.include_hidden.unwrap_or(false),
    };
    Ok(Json(state.store.list(&filter).await?))
}

async fn get_poll(
    State(state): State<ApiState>,
    Path(poll_id): Path<i64>,
) -> Result<Json<PredictionPoll>, AppError> {
    Ok(Json(state.store.get(poll_id).await?))
}

/// Eligibility is re-evaluated server-side on every create; the payload
/// carries no trusted flags.
async fn create_poll(
    State(state): State<ApiState>,
    Json(req): Json<NewPollRequest>,
) -> Result<Json<CreatePollResponse>, AppError> {
    let snapshot = state.eligibility.evaluate(req.creator_id).await;
    let poll = state
        .store
        .create_poll(&req, &snapshot, state.cfg.moderation_required)
        .await?;
    Ok(Json(CreatePollResponse {
        success: true,
        poll_id: poll.id,
        next_status: poll.status,
    }))
}

async fn participate(
    State(state): State<ApiState>,
    Path(poll_id): Path<i64>,
    Json(req): Json<ParticipateRequest>,
) -> Result<Json<ParticipateResponse>, AppError> {
    let outcome = state
        .ledger
        .participate(poll_id, req.user_id, req.mode, req.option, req.stake_amount)
        .await?;
    Ok(Json(ParticipateResponse {
        success: true,
        pool_a: outcome.pool_a,
        pool_b: outcome.pool_b,
        participant_count: outcome.participant_count,
    }))
}

async fn moderate_poll(
    State(state): State<ApiState>,
    Path(poll_id): Path<i64>,
    Json(req): Json<ModerateRequest>,
) -> Result<Json<ModerateResponse>, AppError> {
    let outcome = state
        .moderation
        .moderate(poll_id, req.moderator_id, req.action)
        .await?;
    Ok(Json(ModerateResponse {
        success: true,
        next_status: outcome.next_status,
        updated_fields: outcome.updated_fields,
    }))
}

async fn report_poll(
    State(state): State<ApiState>,
    Path(poll_id): Path<i64>,
    Json(req): Json<ReportRequest>,
) -> Result<Json<ReportResponse>, AppError> {
    let outcome = state
        .moderation
        .report(poll_id, req.user_id, req.reason)
        .await?;
    Ok(Json(ReportResponse {
        success: true,
        report_count: outcome.report_count,
        transitioned: outcome.transitioned,
    }))
}

async fn admin_update_poll(
    State(state): State<ApiState>,
    Path(poll_id): Path<i64>,
    Json(req): Json<UpdatePollRequest>,
) -> Result<Json<ModerateResponse>, AppError> {
    let outcome = state
        .moderation
        .update_poll(poll_id, req.admin_id, &req.fields)
        .await?;
    Ok(Json(ModerateResponse {
        success: true,
        next_status: outcome.next_status,
        updated_fields: outcome.updated_fields,
    }))
}

async fn admin_delete_poll(
    State(state): State<ApiState>,
    Path(poll_id): Path<i64>,
    Query(params): Query<DeleteQuery>,
) -> Result<Json<DeleteResponse>, AppError> {
    let outcome = state
        .moderation
        .delete_poll(poll_id, params.admin_id)
        .await?;
    Ok(Json(DeleteResponse {
        success: true,
        operation: outcome.operation,
    }))
}
