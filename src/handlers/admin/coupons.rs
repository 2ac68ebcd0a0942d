use axum::{Extension, extract::State};
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::middleware::AdminContext;
use crate::models::{CouponView, CreateCoupon, CreatePromoCode, PromoCode, UpdateCoupon};

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: bool,
}

pub async fn list_coupons(State(state): State<AppState>) -> Result<Json<Vec<CouponView>>> {
    let coupons = state
        .coupons
        .list()?
        .iter()
        .map(|(code, coupon)| CouponView::new(code, coupon))
        .collect();
    Ok(Json(coupons))
}

pub async fn list_used_coupons(State(state): State<AppState>) -> Result<Json<Vec<CouponView>>> {
    let coupons = state
        .coupons
        .list_used()?
        .iter()
        .map(|(code, coupon)| CouponView::new(code, coupon))
        .collect();
    Ok(Json(coupons))
}

pub async fn get_coupon(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<CouponView>> {
    let code = code.trim().to_uppercase();
    let coupon = state
        .coupons
        .get(&code)?
        .ok_or_else(|| AppError::NotFound("Coupon not found".into()))?;
    Ok(Json(CouponView::new(&code, &coupon)))
}

pub async fn create_coupon(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Json(input): Json<CreateCoupon>,
) -> Result<Json<CouponView>> {
    let coupon = state.coupons.create(input)?;
    tracing::info!(admin = %admin.email, code = %coupon.code, discount = coupon.discount, "Coupon created");
    Ok(Json(coupon))
}

pub async fn update_coupon(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Path(code): Path<String>,
    Json(input): Json<UpdateCoupon>,
) -> Result<Json<CouponView>> {
    let code = code.trim().to_uppercase();
    let coupon = state
        .coupons
        .update(&code, input)?
        .ok_or_else(|| AppError::NotFound("Coupon not found".into()))?;
    tracing::info!(admin = %admin.email, code = %code, "Coupon updated");
    Ok(Json(coupon))
}

pub async fn delete_coupon(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Path(code): Path<String>,
) -> Result<Json<DeletedResponse>> {
    let code = code.trim().to_uppercase();
    if !state.coupons.delete(&code)? {
        return Err(AppError::NotFound("Coupon not found".into()));
    }
    tracing::info!(admin = %admin.email, code = %code, "Coupon deleted");
    Ok(Json(DeletedResponse { deleted: true }))
}

pub async fn list_promos(State(state): State<AppState>) -> Result<Json<Vec<PromoCode>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_promos(&conn)?))
}

pub async fn upsert_promo(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Json(input): Json<CreatePromoCode>,
) -> Result<Json<PromoCode>> {
    input.validate().map_err(AppError::BadRequest)?;
    let conn = state.db.get()?;
    let promo = queries::upsert_promo(&conn, &input)?;
    tracing::info!(admin = %admin.email, code = %promo.code, "Promo code saved");
    Ok(Json(promo))
}

pub async fn delete_promo(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Path(code): Path<String>,
) -> Result<Json<DeletedResponse>> {
    let conn = state.db.get()?;
    if !queries::delete_promo(&conn, code.trim())? {
        return Err(AppError::NotFound("Promo code not found".into()));
    }
    tracing::info!(admin = %admin.email, code = %code, "Promo code deleted");
    Ok(Json(DeletedResponse { deleted: true }))
}
