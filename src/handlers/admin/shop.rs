use axum::{Extension, extract::State};
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::middleware::AdminContext;
use crate::mirror::SyncedFile;
use crate::models::{OrderFilter, Period, PriceEntry, Settings, UpdatePrice};

use super::keys::parse_period;

#[derive(Debug, Serialize)]
pub struct PriceListing {
    pub period: Period,
    #[serde(flatten)]
    pub price: PriceEntry,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub status: &'static str,
    pub files: Vec<SyncedFile>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub orders: i64,
    pub paid_orders: i64,
    pub pending_orders: i64,
    pub revenue: i64,
    pub keys_in_stock: usize,
}

pub async fn list_prices(State(state): State<AppState>) -> Result<Json<Vec<PriceListing>>> {
    let prices = state
        .prices
        .all()?
        .into_iter()
        .map(|(period, price)| PriceListing { period, price })
        .collect();
    Ok(Json(prices))
}

pub async fn update_price(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Path(period): Path<String>,
    Json(input): Json<UpdatePrice>,
) -> Result<Json<PriceListing>> {
    let period = parse_period(&period)?;
    if input.amount <= 0 {
        return Err(AppError::BadRequest("Price must be positive".into()));
    }
    let price = state.prices.set(period, input)?;
    tracing::info!(admin = %admin.email, period = %period, amount = price.amount, "Price updated");
    Ok(Json(PriceListing { period, price }))
}

pub async fn get_settings(State(state): State<AppState>) -> Result<Json<Settings>> {
    Ok(Json(state.settings.get()?))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Json(input): Json<Settings>,
) -> Result<Json<Settings>> {
    if input.shop_name.trim().is_empty() {
        return Err(AppError::BadRequest("Shop name must not be empty".into()));
    }
    let settings = state.settings.set(input)?;
    tracing::info!(admin = %admin.email, maintenance = settings.maintenance, "Settings updated");
    Ok(Json(settings))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let keys_in_stock = Period::all()
        .map(|p| state.keys.count(p))
        .sum::<Result<usize>>()?;
    let conn = state.db.get()?;
    Ok(Json(StatsResponse {
        orders: queries::count_orders(&conn, OrderFilter::All)?,
        paid_orders: queries::count_orders(&conn, OrderFilter::Paid)?,
        pending_orders: queries::count_orders(&conn, OrderFilter::Pending)?,
        revenue: queries::total_revenue(&conn)?,
        keys_in_stock,
    }))
}

/// Send a message to every chat that has talked to the bot.
pub async fn broadcast(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Json(input): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>> {
    if input.message.trim().is_empty() {
        return Err(AppError::BadRequest("Message must not be empty".into()));
    }
    if !state.notifier.is_enabled() {
        return Err(AppError::BadRequest("Telegram bot is not configured".into()));
    }
    let (sent, failed) = crate::bot::broadcast(&state, &input.message).await?;
    tracing::info!(admin = %admin.email, sent, failed, "Broadcast sent");
    Ok(Json(BroadcastResponse { sent, failed }))
}

/// Replace local pool files with the mirror's copies.
pub async fn sync_from_mirror(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
) -> Result<Json<SyncResponse>> {
    let mirror = state
        .mirror
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("Remote mirror is not configured".into()))?;
    let files = mirror.pull_all(&state.keys).await?;
    tracing::info!(admin = %admin.email, files = files.len(), "Key pools pulled from mirror");
    Ok(Json(SyncResponse {
        status: "ok",
        files,
    }))
}
