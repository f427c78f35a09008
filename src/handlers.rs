use crate::errors::AppError;
use crate::models::{Prospect, ProspectFilter, ProspectStatus, ScoreBand, StoreStats};
use crate::store::ProspectStore;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 1000;
const STATS_KEY: &str = "stats";

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Prospect Store (read access plus tail-state updates only).
    pub store: Arc<dyn ProspectStore>,
    /// Short-lived cache of the aggregate counters.
    pub stats_cache: Cache<&'static str, StoreStats>,
}

impl AppState {
    pub fn new(store: Arc<dyn ProspectStore>) -> Self {
        Self {
            store,
            stats_cache: Cache::builder()
                .time_to_live(Duration::from_secs(30))
                .max_capacity(1)
                .build(),
        }
    }
}

/// Raw query string of the listing endpoint; validated into a `ProspectFilter`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub min_score: Option<i32>,
    pub status: Option<String>,
    pub band: Option<String>,
    pub limit: Option<i64>,
}

impl ListQuery {
    pub fn into_filter(self) -> Result<ProspectFilter, AppError> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<ProspectStatus>)
            .transpose()
            .map_err(AppError::BadRequest)?;
        let band = self
            .band
            .as_deref()
            .map(str::parse::<ScoreBand>)
            .transpose()
            .map_err(AppError::BadRequest)?;
        if let Some(min) = self.min_score {
            if !(0..=100).contains(&min) {
                return Err(AppError::BadRequest("min_score must be between 0 and 100".into()));
            }
        }
        let limit = self.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        if limit < 1 {
            return Err(AppError::BadRequest("limit must be at least 1".into()));
        }

        Ok(ProspectFilter {
            min_score: self.min_score,
            status,
            band,
            limit: Some(limit.min(MAX_LIST_LIMIT)),
        })
    }
}

/// A prospect as served to collaborators, with its score band.
#[derive(Debug, Serialize)]
pub struct ProspectView {
    #[serde(flatten)]
    pub prospect: Prospect,
    pub band: ScoreBand,
}

impl From<Prospect> for ProspectView {
    fn from(prospect: Prospect) -> Self {
        let band = prospect.band();
        Self { prospect, band }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

/// Health check endpoint.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - HTTP 200 OK with health status JSON.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "prospect-agent",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// GET /api/v1/prospects
///
/// Filters: `min_score`, `status`, `band`, `limit`. Best score first.
pub async fn list_prospects(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<ProspectView>>, AppError> {
    tracing::debug!("GET /prospects - params: {:?}", params);
    let filter = params.into_filter()?;
    let prospects = state.store.list(&filter).await?;
    Ok(Json(prospects.into_iter().map(ProspectView::from).collect()))
}

/// GET /api/v1/prospects/:id
pub async fn get_prospect(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProspectView>, AppError> {
    let prospect = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Prospect {} not found", id)))?;
    Ok(Json(prospect.into()))
}

/// PATCH /api/v1/prospects/:id/status
///
/// Moves a prospect through the collaborator-owned tail states
/// (`contacted`, `responded`, `interested`, `not-interested`, `qualified`).
/// Nothing but the status column changes.
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusUpdate>,
) -> Result<Json<ProspectView>, AppError> {
    let status: ProspectStatus = payload.status.parse().map_err(AppError::BadRequest)?;
    if !status.is_tail() {
        return Err(AppError::BadRequest(format!(
            "status '{}' is managed by the pipeline",
            status
        )));
    }

    let prospect = state.store.update_status(id, status).await?;
    state.stats_cache.invalidate(STATS_KEY).await;
    Ok(Json(prospect.into()))
}

/// GET /api/v1/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<StoreStats>, AppError> {
    if let Some(cached) = state.stats_cache.get(STATS_KEY).await {
        return Ok(Json(cached));
    }
    let stats = state.store.stats().await?;
    state.stats_cache.insert(STATS_KEY, stats.clone()).await;
    Ok(Json(stats))
}
