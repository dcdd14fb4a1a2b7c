//! Request handlers.
//!
//! Each handler resolves identity where needed, calls one engine operation,
//! and shapes the result. No business rules live here.

use super::{
    errors::ApiError,
    middleware::{authenticated_user, RequestId},
    models::*,
};
use crate::{
    battles::{BattleService, BattleVerification, CreateBattleParams},
    cases::CaseCatalog,
    ledger::LedgerGateway,
    metrics::{EngineMetrics, MetricsSnapshot},
    pots::{CreatePotParams, PotService, PotVerification},
    types::{BattleOutcome, BattleStatus, PotOutcome, PotStatus},
};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state.
pub struct AppState {
    pub pots: Arc<PotService>,
    pub battles: Arc<BattleService>,
    pub ledger: Arc<dyn LedgerGateway>,
    pub catalog: Arc<CaseCatalog>,
    pub metrics: Arc<EngineMetrics>,
    pub version: String,
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
        version: state.version.clone(),
    })
}

/// GET /metrics - Prometheus text exposition.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics.to_prometheus_format()
}

/// GET /stats - the same counters as JSON.
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// GET /balance
pub async fn balance_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BalanceResponse>, ApiError> {
    let user_id = authenticated_user(&request_id, &headers)?;
    let balance = state
        .ledger
        .balance(&user_id)
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;

    Ok(Json(BalanceResponse { user_id, balance }))
}

#[derive(Debug, Deserialize)]
pub struct StatusFilter {
    #[serde(default)]
    pub status: Option<String>,
}

/// POST /pots
pub async fn create_pot_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreatePotRequest>,
) -> Result<Json<PotResponse>, ApiError> {
    authenticated_user(&request_id, &headers)?;

    let pot = state
        .pots
        .create_pot(CreatePotParams {
            entry_cost: request.entry_cost,
            max_tickets: request.max_tickets,
            max_per_user: request.max_per_user,
            expires_in_minutes: request.expires_in_minutes,
        })
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;

    Ok(Json(PotResponse::from(&pot)))
}

/// GET /pots?status={open|locked|settled|cancelled}
pub async fn list_pots_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Query(filter): Query<StatusFilter>,
) -> Result<Json<PotsResponse>, ApiError> {
    let status = filter
        .status
        .as_deref()
        .map(str::parse::<PotStatus>)
        .transpose()
        .map_err(|e| ApiError::bad_request(request_id.0.clone(), e))?;

    let pots = state
        .pots
        .list_pots(status)
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;

    let pots: Vec<PotResponse> = pots.iter().map(PotResponse::from).collect();
    let total = pots.len();
    Ok(Json(PotsResponse { pots, total }))
}

/// GET /pots/:id
pub async fn get_pot_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(pot_id): Path<Uuid>,
) -> Result<Json<PotDetailResponse>, ApiError> {
    let pot = state
        .pots
        .get_pot(pot_id)
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;
    let entries = state
        .pots
        .entries(pot_id)
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;

    Ok(Json(PotDetailResponse {
        pot: PotResponse::from(&pot),
        entries: entries.iter().map(EntryResponse::from).collect(),
    }))
}

/// POST /pots/:id/join
pub async fn join_pot_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(pot_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<JoinPotRequest>,
) -> Result<Json<EntryResponse>, ApiError> {
    let user_id = authenticated_user(&request_id, &headers)?;

    let entry = state
        .pots
        .join_pot(pot_id, &user_id, request.tickets)
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;

    Ok(Json(EntryResponse::from(&entry)))
}

/// POST /pots/:id/lock
pub async fn lock_pot_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(pot_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<PotResponse>, ApiError> {
    authenticated_user(&request_id, &headers)?;

    let pot = state
        .pots
        .lock_pot(pot_id)
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;

    Ok(Json(PotResponse::from(&pot)))
}

/// POST /pots/:id/settle
pub async fn settle_pot_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(pot_id): Path<Uuid>,
    headers: HeaderMap,
    request: Option<Json<SettlePotRequest>>,
) -> Result<Json<PotOutcome>, ApiError> {
    authenticated_user(&request_id, &headers)?;

    let reveal_seed = request.as_ref().and_then(|r| r.reveal_seed.clone());
    let outcome = state
        .pots
        .settle_pot(pot_id, reveal_seed.as_deref())
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;

    Ok(Json(outcome))
}

/// POST /pots/:id/cancel
pub async fn cancel_pot_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(pot_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<PotResponse>, ApiError> {
    authenticated_user(&request_id, &headers)?;

    let pot = state
        .pots
        .cancel_pot(pot_id)
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;

    Ok(Json(PotResponse::from(&pot)))
}

/// GET /pots/:id/verify
pub async fn verify_pot_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(pot_id): Path<Uuid>,
) -> Result<Json<PotVerification>, ApiError> {
    let verification = state
        .pots
        .verify_pot(pot_id)
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;

    Ok(Json(verification))
}

/// POST /battles
pub async fn create_battle_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateBattleRequest>,
) -> Result<Json<BattleResponse>, ApiError> {
    let user_id = authenticated_user(&request_id, &headers)?;

    let battle = state
        .battles
        .create_battle(
            &user_id,
            CreateBattleParams {
                case_ids: request.case_ids,
                max_participants: request.max_participants,
                client_seed: request.client_seed,
            },
        )
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;

    Ok(Json(BattleResponse::from(&battle)))
}

/// GET /battles?status={waiting|locking|active|completed|cancelled}
pub async fn list_battles_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Query(filter): Query<StatusFilter>,
) -> Result<Json<BattlesResponse>, ApiError> {
    let status = filter
        .status
        .as_deref()
        .map(str::parse::<BattleStatus>)
        .transpose()
        .map_err(|e| ApiError::bad_request(request_id.0.clone(), e))?;

    let battles = state
        .battles
        .list_battles(status)
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;

    let battles: Vec<BattleResponse> = battles.iter().map(BattleResponse::from).collect();
    let total = battles.len();
    Ok(Json(BattlesResponse { battles, total }))
}

/// GET /battles/:id
pub async fn get_battle_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(battle_id): Path<Uuid>,
) -> Result<Json<BattleDetailResponse>, ApiError> {
    let battle = state
        .battles
        .get_battle(battle_id)
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;
    let participants = state
        .battles
        .participants(battle_id)
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;
    let rounds = state
        .battles
        .rounds(battle_id)
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;

    Ok(Json(BattleDetailResponse {
        battle: BattleResponse::from(&battle),
        participants: participants.iter().map(ParticipantResponse::from).collect(),
        rounds: rounds.iter().map(RoundResponse::from).collect(),
    }))
}

/// POST /battles/:id/join
pub async fn join_battle_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(battle_id): Path<Uuid>,
    headers: HeaderMap,
    request: Option<Json<JoinBattleRequest>>,
) -> Result<Json<ParticipantResponse>, ApiError> {
    let user_id = authenticated_user(&request_id, &headers)?;

    let client_seed = request.and_then(|r| r.0.client_seed);
    let participant = state
        .battles
        .join_battle(battle_id, &user_id, client_seed)
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;

    Ok(Json(ParticipantResponse::from(&participant)))
}

/// POST /battles/:id/lock
pub async fn lock_battle_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(battle_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<BattleOutcome>, ApiError> {
    authenticated_user(&request_id, &headers)?;

    let outcome = state
        .battles
        .lock_battle(battle_id)
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;

    Ok(Json(outcome))
}

/// POST /battles/:id/cancel
pub async fn cancel_battle_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(battle_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<BattleResponse>, ApiError> {
    authenticated_user(&request_id, &headers)?;

    let battle = state
        .battles
        .cancel_battle(battle_id)
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;

    Ok(Json(BattleResponse::from(&battle)))
}

/// GET /battles/:id/verify
pub async fn verify_battle_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(battle_id): Path<Uuid>,
) -> Result<Json<BattleVerification>, ApiError> {
    let verification = state
        .battles
        .verify_battle(battle_id)
        .await
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;

    Ok(Json(verification))
}

/// GET /cases
pub async fn list_cases_handler(State(state): State<Arc<AppState>>) -> Json<CasesResponse> {
    let cases: Vec<CaseSummary> = state.catalog.all().into_iter().map(CaseSummary::from).collect();
    let total = cases.len();
    Json(CasesResponse { cases, total })
}

/// GET /cases/:id
pub async fn get_case_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(case_id): Path<String>,
) -> Result<Json<crate::cases::Case>, ApiError> {
    let case = state
        .catalog
        .get(&case_id)
        .map_err(|e| ApiError::engine(request_id.0.clone(), e))?;

    Ok(Json(case.clone()))
}
