//! JSON API exposed to the chat/UI layer.
//!
//! Thin translation layer: parse the request, call the engine, map the error
//! taxonomy onto status codes.  The one rule that matters here: a rejected
//! (too stale) read becomes an explicit 503 with a "no sufficiently fresh
//! data" body that the UI presents verbatim instead of inventing numbers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::db::models::{Bet, BetOutcome};
use crate::engine::{Engine, EngineError};
use crate::feed::{DataDomain, FeedError};
use crate::settlement::SettleError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

/// Build the Axum router for the core API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/data/:domain/:key", get(data_handler))
        .route("/api/discrepancies", get(discrepancies_handler))
        .route("/api/sharp-signals", get(sharp_signals_handler))
        .route("/api/bets", post(log_bet_handler).get(bets_handler))
        .route("/api/bets/settle", post(settle_bet_handler))
        .route("/api/bankroll", get(bankroll_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Request/response shapes ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SportQuery {
    sport: String,
    min_bookmakers: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: String,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LogBetRequest {
    user_id: String,
    amount: f64,
    odds: i32,
    description: String,
}

#[derive(Debug, Deserialize)]
struct SettleBetRequest {
    user_id: String,
    bet_ref: String,
    outcome: BetOutcome,
    actual_return: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    /// Present on ambiguous settlement so the caller can re-ask the user
    #[serde(skip_serializing_if = "Option::is_none")]
    candidates: Option<Vec<Bet>>,
}

struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            EngineError::Feed(FeedError::Rejected { domain, key, .. }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    error: format!(
                        "no sufficiently fresh {} data for '{}'; refusing to answer from stale data",
                        domain, key
                    ),
                    candidates: None,
                },
            ),
            EngineError::Feed(FeedError::NoProvider(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: self.0.to_string(),
                    candidates: None,
                },
            ),
            EngineError::Settle(err) => {
                let status = match err {
                    SettleError::NotFound { .. } => StatusCode::NOT_FOUND,
                    SettleError::AmbiguousMatch { .. } | SettleError::SettlementConflict { .. } => {
                        StatusCode::CONFLICT
                    }
                    SettleError::Validation(_) => StatusCode::BAD_REQUEST,
                    SettleError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let candidates = match err {
                    SettleError::AmbiguousMatch { candidates, .. } => Some(candidates.clone()),
                    _ => None,
                };
                (
                    status,
                    ErrorBody {
                        error: err.to_string(),
                        candidates,
                    },
                )
            }
            EngineError::Payload(_) | EngineError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: self.0.to_string(),
                    candidates: None,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /api/data/{domain}/{key}
async fn data_handler(
    State(state): State<AppState>,
    Path((domain, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(domain) = DataDomain::parse(&domain) else {
        return Err(ApiError(EngineError::Settle(SettleError::Validation(
            format!("unknown data domain '{}'", domain),
        ))));
    };
    let snapshot = state.engine.get_data(domain, &key).await?;
    Ok(Json(snapshot))
}

/// GET /api/discrepancies?sport=basketball_nba&min_bookmakers=2
async fn discrepancies_handler(
    State(state): State<AppState>,
    Query(query): Query<SportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state
        .engine
        .detect_discrepancies(&query.sport, query.min_bookmakers)
        .await?;
    Ok(Json(records))
}

/// GET /api/sharp-signals?sport=basketball_nba
async fn sharp_signals_handler(
    State(state): State<AppState>,
    Query(query): Query<SportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let signals = state.engine.detect_sharp_signals(&query.sport).await?;
    Ok(Json(signals))
}

/// POST /api/bets
async fn log_bet_handler(
    State(state): State<AppState>,
    Json(req): Json<LogBetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let bet = state
        .engine
        .log_bet(&req.user_id, req.amount, req.odds, &req.description)?;
    Ok((StatusCode::CREATED, Json(bet)))
}

/// GET /api/bets?user_id=u1&limit=50
async fn bets_handler(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let bets = state
        .engine
        .list_bets(&query.user_id, query.limit.unwrap_or(50))?;
    Ok(Json(bets))
}

/// POST /api/bets/settle
async fn settle_bet_handler(
    State(state): State<AppState>,
    Json(req): Json<SettleBetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.engine.settle_bet(
        &req.user_id,
        &req.bet_ref,
        req.outcome,
        req.actual_return,
    )?;
    Ok(Json(result))
}

/// GET /api/bankroll?user_id=u1
async fn bankroll_handler(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (summary, ledger) = state.engine.bankroll(&query.user_id)?;
    Ok(Json(serde_json::json!({
        "summary": summary,
        "ledger": ledger,
    })))
}
