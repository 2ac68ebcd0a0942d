use axum::extract::State;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{CouponView, Period};
use crate::stores::CouponCheck;

#[derive(Debug, Deserialize)]
pub struct CheckCouponRequest {
    #[serde(default)]
    pub coupon_code: String,
    #[serde(default = "default_period")]
    pub period: String,
}

fn default_period() -> String {
    Period::ThirtyDays.code().to_string()
}

#[derive(Debug, Serialize)]
pub struct CheckCouponResponse {
    pub status: &'static str,
    pub coupon: CouponView,
}

pub async fn check_coupon(
    State(state): State<AppState>,
    Json(request): Json<CheckCouponRequest>,
) -> Result<Json<CheckCouponResponse>> {
    let code = request.coupon_code.trim().to_uppercase();
    if code.is_empty() {
        return Err(AppError::BadRequest("Please enter a coupon code".into()));
    }
    let period = Period::parse(&request.period)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown package '{}'", request.period)))?;

    let reason = match state.coupons.validate(&code, period)? {
        CouponCheck::Valid(coupon) => {
            return Ok(Json(CheckCouponResponse {
                status: "ok",
                coupon: CouponView::new(&code, &coupon),
            }));
        }
        CouponCheck::Invalid(reason) => reason,
    };

    // Codes from the legacy promo table are honoured at payment time too
    let conn = state.db.get()?;
    match queries::get_valid_promo(&conn, &code, Utc::now().timestamp())? {
        Some(promo) => Ok(Json(CheckCouponResponse {
            status: "ok",
            coupon: CouponView {
                code: promo.code,
                discount: promo.discount,
                uses_left: promo.uses_left,
                unlimited: false,
                expires_at: promo.expires_at.and_then(|ts| {
                    chrono::DateTime::from_timestamp(ts, 0)
                        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                }),
                types: Vec::new(),
            },
        })),
        None => Err(AppError::BadRequest(reason)),
    }
}
