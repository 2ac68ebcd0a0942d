mod coupon;
mod payment;
mod storefront;

pub use coupon::*;
pub use payment::*;
pub use storefront::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;
use crate::extractors::Json;
use crate::middleware::payment_rate_limit;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/", get(storefront))
        .route("/api/order", get(new_order_json))
        .route("/order/{uid}", get(order_status))
        .route("/check_coupon", post(check_coupon))
        .merge(
            Router::new()
                .route("/check_mb_payment", post(check_payment))
                .layer(middleware::from_fn_with_state(state, payment_rate_limit)),
        )
}
