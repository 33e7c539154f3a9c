//! HTTP layer over the settlement engine.
//!
//! Amounts cross the wire as integer ledger units. The engine sits behind one
//! `RwLock`: quotes share the read lock, every mutation takes the write lock,
//! which gives each market a single totally ordered writer.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::{debug, error};

use crate::error::MarketError;
use crate::market::{LedgerEntry, MarketId, MarketSnapshot, MarketSpec, Position, Side, TraderId};
use crate::settlement::{SettlementEngine, TradeReceipt};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RwLock<SettlementEngine>>,
    /// Liquidity used when a create request omits `liquidity_b`.
    pub default_liquidity: i128,
}

impl AppState {
    pub fn new(engine: SettlementEngine, default_liquidity: i128) -> Self {
        Self {
            engine: Arc::new(RwLock::new(engine)),
            default_liquidity,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateMarketRequest {
    pub outcome_count: usize,
    pub liquidity_b: Option<i64>,
    pub trading_cutoff: Option<DateTime<Utc>>,
    pub resolution_deadline: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuoteQuery {
    pub outcome: usize,
    pub amount: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuoteResponse {
    pub side: Side,
    pub outcome: usize,
    pub amount: i64,
    pub cash: i128,
}

/// `bound` is the max cost for buys and the min proceeds for sells.
#[derive(Debug, Serialize, Deserialize)]
pub struct TradeRequest {
    pub trader: u64,
    pub outcome: usize,
    pub amount: i64,
    pub bound: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub outcome: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RedeemRequest {
    pub trader: u64,
}

#[derive(Debug, Serialize)]
pub struct MarketView {
    #[serde(flatten)]
    pub market: MarketSnapshot,
    pub prices: Vec<i128>,
}

/// Maps engine errors onto HTTP responses.
pub struct ApiError(MarketError);

impl From<MarketError> for ApiError {
    fn from(err: MarketError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MarketError::MarketNotFound(_) | MarketError::PositionNotFound { .. } => StatusCode::NOT_FOUND,
            MarketError::InvalidParameter(_)
            | MarketError::OutcomeOutOfRange { .. }
            | MarketError::MalformedOracleData(_) => StatusCode::BAD_REQUEST,
            MarketError::UnresolvableEvent(_) => StatusCode::SERVICE_UNAVAILABLE,
            MarketError::ArithmeticOverflow(_) => {
                error!(error = %self.0, "arithmetic overflow in request");
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::CONFLICT,
        };
        debug!(code = self.0.code(), error = %self.0, "request rejected");
        (
            status,
            Json(json!({ "error": self.0.to_string(), "code": self.0.code() })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/markets", post(create_market))
        .route("/markets/:id", get(get_market))
        .route("/markets/:id/quote/:side", get(quote))
        .route("/markets/:id/buy", post(buy))
        .route("/markets/:id/sell", post(sell))
        .route("/markets/:id/lock", post(lock))
        .route("/markets/:id/resolve", post(resolve))
        .route("/markets/:id/void", post(void))
        .route("/markets/:id/redeem", post(redeem))
        .route("/markets/:id/positions/:trader", get(get_position))
        .route("/markets/:id/ledger", get(get_ledger))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "lmsr-markets",
        "math_version": crate::fixed::MATH_VERSION,
    }))
}

async fn create_market(
    State(state): State<AppState>,
    Json(req): Json<CreateMarketRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let liquidity = req
        .liquidity_b
        .map(i128::from)
        .unwrap_or(state.default_liquidity);
    let mut spec = MarketSpec::new(req.outcome_count, liquidity, req.resolution_deadline);
    spec.trading_cutoff = req.trading_cutoff;

    let id = state.engine.write().await.create_market(spec)?;
    Ok((StatusCode::CREATED, Json(json!({ "market_id": id.0 }))))
}

async fn get_market(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<MarketView> {
    let engine = state.engine.read().await;
    let id = MarketId(id);
    Ok(Json(MarketView {
        market: engine.snapshot(id)?,
        prices: engine.prices(id)?,
    }))
}

async fn quote(
    State(state): State<AppState>,
    Path((id, side)): Path<(u64, String)>,
    Query(q): Query<QuoteQuery>,
) -> ApiResult<QuoteResponse> {
    let side = Side::parse(&side)
        .ok_or_else(|| MarketError::InvalidParameter(format!("invalid side '{side}', expected 'buy' or 'sell'")))?;
    let engine = state.engine.read().await;
    let amount = i128::from(q.amount);
    let cash = match side {
        Side::Buy => engine.quote_buy(MarketId(id), q.outcome, amount)?,
        Side::Sell => engine.quote_sell(MarketId(id), q.outcome, amount)?,
    };
    Ok(Json(QuoteResponse { side, outcome: q.outcome, amount: q.amount, cash }))
}

async fn buy(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(req): Json<TradeRequest>,
) -> ApiResult<TradeReceipt> {
    let receipt = state.engine.write().await.execute_buy(
        MarketId(id),
        TraderId(req.trader),
        req.outcome,
        i128::from(req.amount),
        i128::from(req.bound),
    )?;
    Ok(Json(receipt))
}

async fn sell(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(req): Json<TradeRequest>,
) -> ApiResult<TradeReceipt> {
    let receipt = state.engine.write().await.execute_sell(
        MarketId(id),
        TraderId(req.trader),
        req.outcome,
        i128::from(req.amount),
        i128::from(req.bound),
    )?;
    Ok(Json(receipt))
}

async fn lock(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Value> {
    let status = state.engine.write().await.lock(MarketId(id))?;
    Ok(Json(json!({ "status": status })))
}

async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<Value> {
    let status = state.engine.write().await.resolve(MarketId(id), req.outcome)?;
    Ok(Json(json!({ "status": status })))
}

async fn void(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Value> {
    let status = state.engine.write().await.void(MarketId(id))?;
    Ok(Json(json!({ "status": status })))
}

async fn redeem(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(req): Json<RedeemRequest>,
) -> ApiResult<Value> {
    let payout = state
        .engine
        .write()
        .await
        .redeem(MarketId(id), TraderId(req.trader))?;
    Ok(Json(json!({ "payout": payout })))
}

async fn get_position(
    State(state): State<AppState>,
    Path((id, trader)): Path<(u64, u64)>,
) -> ApiResult<Position> {
    let engine = state.engine.read().await;
    let market = MarketId(id);
    engine.market(market)?;
    let trader = TraderId(trader);
    engine
        .position(market, trader)
        .cloned()
        .map(Json)
        .ok_or(ApiError(MarketError::PositionNotFound { market, trader }))
}

async fn get_ledger(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Vec<LedgerEntry>> {
    let engine = state.engine.read().await;
    Ok(Json(engine.ledger(MarketId(id))?.to_vec()))
}
