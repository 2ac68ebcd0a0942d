use axum::{
    Extension,
    extract::State,
    http::{HeaderMap, header},
};
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path, Query};
use crate::keys::SolvedEntry;
use crate::middleware::AdminContext;
use crate::models::Period;

use super::clamp_limit;

#[derive(Debug, Serialize)]
pub struct PoolCount {
    pub period: Period,
    pub label: &'static str,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct PoolListing {
    pub period: Period,
    pub keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddKeysRequest {
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AddKeysResponse {
    pub added: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct RemoveKeyResponse {
    pub removed: bool,
}

#[derive(Debug, Deserialize)]
pub struct SolvedQuery {
    pub limit: Option<i64>,
}

pub(crate) fn parse_period(value: &str) -> Result<Period> {
    Period::parse(value).ok_or_else(|| AppError::BadRequest(format!("Unknown package '{}'", value)))
}

pub async fn pool_counts(State(state): State<AppState>) -> Result<Json<Vec<PoolCount>>> {
    let counts = Period::all()
        .map(|period| {
            Ok(PoolCount {
                period,
                label: period.display_label(),
                count: state.keys.count(period)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Json(counts))
}

pub async fn list_pool(
    State(state): State<AppState>,
    Path(period): Path<String>,
) -> Result<Json<PoolListing>> {
    let period = parse_period(&period)?;
    Ok(Json(PoolListing {
        period,
        keys: state.keys.list(period)?,
    }))
}

/// Accepts `{"keys": [...]}` or a plain-text body with one key per line.
pub async fn add_keys(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Path(period): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<AddKeysResponse>> {
    let period = parse_period(&period)?;

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    let keys: Vec<String> = if is_json {
        serde_json::from_str::<AddKeysRequest>(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?
            .keys
    } else {
        body.lines().map(str::to_string).collect()
    };

    let added = state.keys.add_keys(period, &keys)?;
    let total = state.keys.count(period)?;
    tracing::info!(admin = %admin.email, period = %period, added, total, "Keys added");

    if added > 0 {
        state.mirror_pool(period).await;
    }
    Ok(Json(AddKeysResponse { added, total }))
}

pub async fn remove_key(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Path((period, key)): Path<(String, String)>,
) -> Result<Json<RemoveKeyResponse>> {
    let period = parse_period(&period)?;
    if !state.keys.remove_key(period, &key)? {
        return Err(AppError::NotFound("Key not found in this pool".into()));
    }
    tracing::info!(admin = %admin.email, period = %period, "Key removed");
    state.mirror_pool(period).await;
    Ok(Json(RemoveKeyResponse { removed: true }))
}

pub async fn solved_keys(
    State(state): State<AppState>,
    Query(query): Query<SolvedQuery>,
) -> Result<Json<Vec<SolvedEntry>>> {
    let limit = usize::try_from(clamp_limit(query.limit)).unwrap_or(0);
    Ok(Json(state.keys.solved_entries(limit)?))
}
