use axum::{Extension, body::Bytes, extract::State};
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path, Query};
use crate::middleware::AdminContext;
use crate::models::{Delivery, Order, OrderFilter};

use super::clamp_limit;

#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersQuery {
    #[serde(default)]
    pub filter: OrderFilter,
    pub limit: Option<i64>,
    /// Look up the order a delivered key went to; `filter` and `limit` are ignored.
    pub key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListOrdersResponse {
    pub orders: Vec<Order>,
    pub total: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    pub older_than_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub deleted: usize,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub delivery: Option<Delivery>,
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ListOrdersResponse>> {
    let conn = state.db.get()?;
    if let Some(key) = query.key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        let orders: Vec<Order> = queries::get_order_by_key(&conn, key)?.into_iter().collect();
        let total = orders.len() as i64;
        return Ok(Json(ListOrdersResponse { orders, total }));
    }
    let orders = queries::list_orders(&conn, query.filter, clamp_limit(query.limit))?;
    let total = queries::count_orders(&conn, query.filter)?;
    Ok(Json(ListOrdersResponse { orders, total }))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<OrderDetail>> {
    let conn = state.db.get()?;
    let order = queries::get_order(&conn, &uid)?
        .ok_or_else(|| AppError::NotFound("Order not found".into()))?;
    let delivery = queries::get_delivery_for_order(&conn, &uid)?;
    Ok(Json(OrderDetail { order, delivery }))
}

/// Delete pending orders older than the given age (default: the janitor's).
pub async fn cleanup_orders(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    body: Bytes,
) -> Result<Json<CleanupResponse>> {
    // The body is optional; an empty one means the default age
    let input: CleanupRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CleanupRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?
    };
    let minutes = input
        .older_than_minutes
        .unwrap_or(state.config.stale_order_minutes);
    if minutes < 0 {
        return Err(AppError::BadRequest("older_than_minutes must not be negative".into()));
    }
    let conn = state.db.get()?;
    let deleted = queries::delete_stale_pending(&conn, minutes)?;
    tracing::info!(admin = %admin.email, deleted, minutes, "Stale orders cleaned up");
    Ok(Json(CleanupResponse { deleted }))
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<Delivery>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_deliveries(&conn, clamp_limit(query.limit))?))
}
