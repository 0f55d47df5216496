use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use lifecycle::{BetEngine, ProofReceipt, ProposeParams, Resolution, Settlement};
use model::{Bet, BetId, EvidenceHandle, User};
use query::{BetDetail, BetView, PendingItem, Profile, QueryFacade};
use scoring::LeaderboardEntry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use verification::SuggestionBackend;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BetEngine>,
    pub query: QueryFacade,
    pub suggestions: Arc<dyn SuggestionBackend>,
}

impl AppState {
    pub fn new(engine: Arc<BetEngine>, suggestions: Arc<dyn SuggestionBackend>) -> Self {
        let query = QueryFacade::new(
            engine.store(),
            engine.ledger(),
            engine.inflight().clone(),
            engine.aggregator().clone(),
        );
        Self {
            engine,
            query,
            suggestions,
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ProposeRequest {
    pub initiator: String,
    #[serde(flatten)]
    pub params: ProposeParams,
}

#[derive(Debug, Deserialize)]
pub struct ParticipantRequest {
    pub user: String,
}

#[derive(Debug, Deserialize)]
pub struct ProofRequest {
    pub submitter: String,
    pub evidence_uri: String,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub resolver: String,
    pub resolution: Resolution,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct SuggestionRequest {
    #[serde(default)]
    pub preferences: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuggestionList {
    pub suggestions: Vec<String>,
}

async fn register_user(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let user = state.engine.register_user(&req.id, &req.display_name).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn deactivate_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.deactivate_user(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn profile(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Profile>> {
    Ok(Json(state.query.profile(&id).await?))
}

async fn user_bets(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<BetView>>> {
    Ok(Json(state.query.active_bets_for(&id).await?))
}

async fn user_pending(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<PendingItem>>> {
    Ok(Json(state.query.pending_verifications_for(&id).await?))
}

async fn propose(
    State(state): State<AppState>,
    Json(req): Json<ProposeRequest>,
) -> ApiResult<(StatusCode, Json<Bet>)> {
    let bet = state.engine.propose(&req.initiator, req.params).await?;
    Ok((StatusCode::CREATED, Json(bet)))
}

async fn bet_detail(
    State(state): State<AppState>,
    Path(id): Path<BetId>,
) -> ApiResult<Json<BetDetail>> {
    Ok(Json(state.query.bet_detail(&id).await?))
}

async fn accept(
    State(state): State<AppState>,
    Path(id): Path<BetId>,
    Json(req): Json<ParticipantRequest>,
) -> ApiResult<Json<Bet>> {
    Ok(Json(state.engine.accept(id, &req.user).await?))
}

async fn reject(
    State(state): State<AppState>,
    Path(id): Path<BetId>,
    Json(req): Json<ParticipantRequest>,
) -> ApiResult<Json<Bet>> {
    Ok(Json(state.engine.reject(id, &req.user).await?))
}

/// Dropping the request future (client gone) drops the in-flight entry too.
async fn submit_proof(
    State(state): State<AppState>,
    Path(id): Path<BetId>,
    Json(req): Json<ProofRequest>,
) -> ApiResult<Json<ProofReceipt>> {
    let evidence = EvidenceHandle {
        uri: req.evidence_uri,
        captured_at: req.captured_at.unwrap_or_else(|| state.engine.now()),
    };
    Ok(Json(
        state.engine.submit_proof(id, &req.submitter, evidence).await?,
    ))
}

async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<BetId>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<Json<Bet>> {
    Ok(Json(
        state
            .engine
            .resolve_dispute(id, &req.resolver, req.resolution)
            .await?,
    ))
}

async fn settle(State(state): State<AppState>, Path(id): Path<BetId>) -> ApiResult<Json<Settlement>> {
    Ok(Json(state.engine.settle(id).await?))
}

async fn cancel_verification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.engine.cancel_verification(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("no pending verification {id}"),
        ))
    }
}

async fn leaderboard(
    State(state): State<AppState>,
    Query(q): Query<LeaderboardQuery>,
) -> ApiResult<Json<Vec<LeaderboardEntry>>> {
    Ok(Json(state.query.leaderboard(q.limit).await?))
}

async fn suggest(
    State(state): State<AppState>,
    Json(req): Json<SuggestionRequest>,
) -> ApiResult<Json<SuggestionList>> {
    let response = state.suggestions.suggest(&req.preferences).await?;
    let suggestions = verification::suggestions(response)?;
    Ok(Json(SuggestionList { suggestions }))
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/v1/users", post(register_user))
        .route("/v1/users/:id", delete(deactivate_user))
        .route("/v1/users/:id/profile", get(profile))
        .route("/v1/users/:id/bets", get(user_bets))
        .route("/v1/users/:id/pending", get(user_pending))
        .route("/v1/bets", post(propose))
        .route("/v1/bets/:id", get(bet_detail))
        .route("/v1/bets/:id/accept", post(accept))
        .route("/v1/bets/:id/reject", post(reject))
        .route("/v1/bets/:id/proofs", post(submit_proof))
        .route("/v1/bets/:id/resolve", post(resolve))
        .route("/v1/bets/:id/settle", post(settle))
        .route("/v1/verifications/:id", delete(cancel_verification))
        .route("/v1/leaderboard", get(leaderboard))
        .route("/v1/suggestions", post(suggest))
        .with_state(state)
}
