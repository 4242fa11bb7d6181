use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::{HealthSnapshot, HealthState};
use crate::db::SnapshotRepository;
use crate::error::AppError;
use crate::state::{IdentifierAliases, SnapshotCache};
use crate::types::{DailySnapshot, MarketIndexSnapshot};

const DEFAULT_LIMIT: i64 = 30;
const MAX_LIMIT: i64 = 1_000;

#[derive(Clone)]
pub struct ApiState {
    pub repo: SnapshotRepository,
    pub cache: Arc<SnapshotCache>,
    pub health: Arc<HealthState>,
    pub aliases: Arc<IdentifierAliases>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/entities", get(get_entities))
        .route("/entities/:id/snapshots", get(get_entity_snapshots))
        .route("/index/latest", get(get_index_latest))
        .route("/index", get(get_index_history))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

impl LimitQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct EntityResponse {
    pub id: String,
    pub name: String,
    pub identifier_pattern: Option<String>,
    /// Legacy ids that resolve to this entity
    pub legacy_ids: Vec<String>,
    /// null until the entity has a snapshot
    pub latest: Option<DailySnapshot>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}

async fn get_entities(State(state): State<ApiState>) -> Result<Json<Vec<EntityResponse>>, AppError> {
    let entities = state.repo.list_entities().await?;

    let mut out = Vec::with_capacity(entities.len());
    for e in entities {
        let latest = state.repo.recent_snapshots(&e.id, 1).await?.pop();
        let legacy_ids = state.aliases.aliases_of(&e.id).to_vec();
        out.push(EntityResponse {
            legacy_ids,
            id: e.id,
            name: e.name,
            identifier_pattern: e.identifier_pattern,
            latest,
        });
    }

    Ok(Json(out))
}

/// Snapshot history, newest first. Legacy ids are accepted. Served from the
/// history cache when warm.
async fn get_entity_snapshots(
    State(state): State<ApiState>,
    Path(entity_id): Path<String>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<DailySnapshot>>, AppError> {
    let limit = params.limit();
    let entity_id = state.aliases.canonical(&entity_id).to_string();

    if let Some(cached) = state.cache.get(&entity_id) {
        let snapshots: Vec<DailySnapshot> = cached.iter().rev().take(limit as usize).cloned().collect();
        return Ok(Json(snapshots));
    }

    if state.repo.get_entity(&entity_id).await?.is_none() {
        return Err(AppError::NotFound(format!("entity {entity_id}")));
    }
    let snapshots = state.repo.recent_snapshots(&entity_id, limit).await?;
    Ok(Json(snapshots))
}

async fn get_index_latest(State(state): State<ApiState>) -> Result<Json<MarketIndexSnapshot>, AppError> {
    state
        .repo
        .latest_index()
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("market index".to_string()))
}

async fn get_index_history(
    State(state): State<ApiState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<MarketIndexSnapshot>>, AppError> {
    Ok(Json(state.repo.index_history(params.limit()).await?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
