//! Read-only HTTP surface over processed news, plus status and on-demand
//! refresh.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::item::NewsItem;
use crate::pipeline::scheduler::{TriggerAck, TriggerSender};
use crate::pipeline::{Pipeline, PipelineStatus};
use crate::store::{NewsQuery, StoreError};

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<Pipeline>,
    pub trigger: TriggerSender,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/news/latest", get(latest))
        .route("/api/news/search", get(search))
        .route("/api/news/ticker/{symbol}", get(by_ticker))
        .route("/api/news/impact", get(by_impact))
        .route("/api/status", get(status))
        .route("/api/refresh", post(refresh))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

struct ApiError(StoreError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(target: "api", error = %self.0, "store query failed");
        let body = serde_json::json!({ "error": self.0.to_string() });
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct Paging {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ImpactParams {
    min: Option<u8>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct NewsPage {
    count: usize,
    items: Vec<NewsItem>,
}

fn clamp_limit(limit: Option<usize>) -> Option<usize> {
    Some(limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT))
}

async fn run_query(state: &ApiState, query: NewsQuery) -> Result<Json<NewsPage>, ApiError> {
    let items = state.pipeline.store().query(&query).await.map_err(ApiError)?;
    Ok(Json(NewsPage {
        count: items.len(),
        items,
    }))
}

async fn latest(State(state): State<ApiState>, Query(p): Query<Paging>) -> Result<Json<NewsPage>, ApiError> {
    let q = NewsQuery {
        limit: clamp_limit(p.limit),
        ..NewsQuery::default()
    };
    run_query(&state, q).await
}

async fn search(State(state): State<ApiState>, Query(p): Query<SearchParams>) -> Response {
    let keyword = p.q.trim();
    if keyword.is_empty() {
        let body = serde_json::json!({ "error": "query parameter 'q' is required" });
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    }
    let q = NewsQuery {
        keyword: Some(keyword.to_string()),
        limit: clamp_limit(p.limit),
        ..NewsQuery::default()
    };
    run_query(&state, q).await.into_response()
}

async fn by_ticker(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(p): Query<Paging>,
) -> Result<Json<NewsPage>, ApiError> {
    let q = NewsQuery {
        ticker: Some(symbol.trim().to_ascii_uppercase()),
        limit: clamp_limit(p.limit),
        ..NewsQuery::default()
    };
    run_query(&state, q).await
}

async fn by_impact(State(state): State<ApiState>, Query(p): Query<ImpactParams>) -> Result<Json<NewsPage>, ApiError> {
    let q = NewsQuery {
        min_impact: Some(p.min.unwrap_or(7).min(10)),
        limit: clamp_limit(p.limit),
        ..NewsQuery::default()
    };
    run_query(&state, q).await
}

#[derive(Serialize)]
struct StatusOut {
    #[serde(flatten)]
    status: PipelineStatus,
    stored_items: Option<usize>,
}

async fn status(State(state): State<ApiState>) -> Json<StatusOut> {
    let stored_items = state.pipeline.store().len().await.ok();
    Json(StatusOut {
        status: state.pipeline.status(),
        stored_items,
    })
}

async fn refresh(State(state): State<ApiState>) -> Response {
    match state.trigger.trigger_run() {
        TriggerAck::Queued => {
            (StatusCode::ACCEPTED, Json(serde_json::json!({ "trigger": "queued" }))).into_response()
        }
        TriggerAck::AlreadyPending => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "trigger": "already_pending" })),
        )
            .into_response(),
        TriggerAck::Closed => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "scheduler is not running" })),
        )
            .into_response(),
    }
}
