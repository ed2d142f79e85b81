//! Request handlers

use crate::api::AppState;
use crate::error::{Result, ServiceError};
use crate::explain::attribution::Attribution;
use crate::explain::narrative::{narrate_with_fallback, NarrativeRequest};
use crate::stats_cache::CachedStats;
use crate::stream::stats::LiveStatsSnapshot;
use crate::types::score::ScoreResult;
use crate::types::stream::StreamItem;
use crate::stream::engine::EngineStatus;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::request::Parts,
    response::sse::{Event, Sse},
    Json,
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::{debug, warn};

const MAX_PAGE_LIMIT: usize = 100;
const MAX_POLL_LIMIT: usize = 50;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    models_loaded: bool,
    data_loaded: bool,
    /// Feed position; `null` while the feed is disabled
    feed: Option<EngineStatus>,
    timestamp: i64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        models_loaded: state.models_loaded(),
        data_loaded: state.data_loaded(),
        feed: state.feed().ok().map(|feed| feed.engine().status()),
        timestamp: chrono::Utc::now().timestamp(),
    })
}

/// Numeric transaction id from the path; a malformed id is a JSON 400
pub struct TransactionId(pub i64);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for TransactionId {
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| ServiceError::invalid_request(e.body_text()))?;

        raw.parse()
            .map(TransactionId)
            .map_err(|_| ServiceError::invalid_request(format!("invalid transaction id: {}", raw)))
    }
}

/// Dataset statistics, computed on first call
pub async fn stats(State(state): State<AppState>) -> Result<Json<CachedStats>> {
    Ok(Json(state.cached_stats().await?))
}

/// Statistics of the current feed cycle
pub async fn live_stats(State(state): State<AppState>) -> Result<Json<LiveStatsSnapshot>> {
    Ok(Json(state.feed()?.engine().live_stats()))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_page_limit")]
    limit: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_limit() -> usize {
    20
}

#[derive(Serialize)]
pub struct ScoredTransaction {
    id: usize,
    time: f64,
    amount: f64,
    is_fraud: u8,
    #[serde(flatten)]
    score: ScoreResult,
}

#[derive(Serialize)]
pub struct TransactionPage {
    transactions: Vec<ScoredTransaction>,
    page: usize,
    limit: usize,
    total: usize,
}

/// Scored rows in dataset order
pub async fn transactions(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<TransactionPage>> {
    if query.page == 0 {
        return Err(ServiceError::invalid_request("page must be at least 1"));
    }
    if !(1..=MAX_PAGE_LIMIT).contains(&query.limit) {
        return Err(ServiceError::invalid_request(format!(
            "limit must be between 1 and {}",
            MAX_PAGE_LIMIT
        )));
    }

    let total = state.dataset()?.len();
    let offset = (query.page - 1).saturating_mul(query.limit);
    let transactions = state
        .score_page(offset, query.limit)
        .await?
        .into_iter()
        .map(|(id, record, score)| ScoredTransaction {
            id,
            time: record.time,
            amount: record.amount,
            is_fraud: record.label(),
            score,
        })
        .collect();

    Ok(Json(TransactionPage {
        transactions,
        page: query.page,
        limit: query.limit,
        total,
    }))
}

#[derive(Serialize)]
pub struct PredictionResponse {
    transaction_id: i64,
    amount: f64,
    #[serde(flatten)]
    score: ScoreResult,
}

/// Fused score for one dataset row
pub async fn predict(
    State(state): State<AppState>,
    TransactionId(id): TransactionId,
) -> Result<Json<PredictionResponse>> {
    let (record, score) = state.score_row(id).await?;

    Ok(Json(PredictionResponse {
        transaction_id: id,
        amount: record.amount,
        score,
    }))
}

#[derive(Serialize)]
pub struct ShapResponse {
    transaction_id: i64,
    base_value: f64,
    prediction: f64,
    shap_values: Vec<Attribution>,
}

/// Ranked feature attributions for one dataset row
pub async fn shap(
    State(state): State<AppState>,
    TransactionId(id): TransactionId,
) -> Result<Json<ShapResponse>> {
    let report = state.attributions(id).await?;

    Ok(Json(ShapResponse {
        transaction_id: id,
        base_value: report.base_value,
        prediction: report.prediction,
        shap_values: report.shap_values,
    }))
}

/// Narrative analysis streamed as server-sent events, ended by `[DONE]`
pub async fn explain(
    State(state): State<AppState>,
    TransactionId(id): TransactionId,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let (record, score) = state.score_row(id).await?;
    let report = state.attributions(id).await?;

    let transaction_id = usize::try_from(id)
        .map_err(|_| ServiceError::invalid_request("transaction id must be positive"))?;
    let request = NarrativeRequest::new(transaction_id, record.amount, score, &report);

    debug!(
        transaction_id = id,
        narrator = state.narrator().name(),
        "Streaming narrative"
    );

    let chunks = narrate_with_fallback(state.narrator(), request).map(|text| {
        let payload = serde_json::json!({ "text": text }).to_string();
        Ok(Event::default().data(payload))
    });
    let done = stream::once(async { Ok(Event::default().data("[DONE]")) });

    Ok(Sse::new(chunks.chain(done)))
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    /// Only items with a larger id; all buffered items when absent
    since_id: Option<u64>,
    #[serde(default = "default_poll_limit")]
    limit: usize,
}

fn default_poll_limit() -> usize {
    10
}

#[derive(Serialize)]
pub struct PollResponse {
    transactions: Vec<StreamItem>,
    latest_id: Option<u64>,
}

/// Pull fallback for the live feed. Each poll advances the feed by one step.
pub async fn poll_transactions(
    State(state): State<AppState>,
    Query(query): Query<PollQuery>,
) -> Result<Json<PollResponse>> {
    if !(1..=MAX_POLL_LIMIT).contains(&query.limit) {
        return Err(ServiceError::invalid_request(format!(
            "limit must be between 1 and {}",
            MAX_POLL_LIMIT
        )));
    }

    let feed = state.feed()?;
    if let Err(e) = feed.advance().await {
        warn!(error = %e, "Poll-triggered step failed");
        return Err(e);
    }

    let transactions = feed.engine().buffered(query.since_id, query.limit);
    let latest_id = transactions.last().map(|item| item.id).or(query.since_id);

    Ok(Json(PollResponse {
        transactions,
        latest_id,
    }))
}
