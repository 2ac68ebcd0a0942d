mod coupons;
mod keys;
mod login;
mod orders;
mod shop;

pub use coupons::*;
pub use keys::*;
pub use login::*;
pub use orders::*;
pub use shop::*;

use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};

use crate::db::AppState;
use crate::middleware::admin_auth;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

pub(crate) fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

pub fn router(state: AppState) -> Router<AppState> {
    let login_routes = Router::new()
        .route("/admin/login/request-code", post(request_code))
        .route("/admin/login/verify", post(verify_code))
        .route("/admin/login/password", post(password_login))
        .route("/admin/logout", post(logout));

    let protected = Router::new()
        .route("/admin/me", get(me))
        .route("/admin/stats", get(stats))
        // Orders
        .route("/admin/orders", get(list_orders))
        .route("/admin/orders/cleanup", post(cleanup_orders))
        .route("/admin/orders/{uid}", get(get_order))
        .route("/admin/deliveries", get(list_deliveries))
        // Key pools
        .route("/admin/keys", get(pool_counts))
        .route("/admin/keys/solved", get(solved_keys))
        .route("/admin/keys/{period}", get(list_pool).post(add_keys))
        .route("/admin/keys/{period}/{key}", delete(remove_key))
        // Discounts
        .route("/admin/coupons", get(list_coupons).post(create_coupon))
        .route("/admin/coupons/used", get(list_used_coupons))
        .route(
            "/admin/coupons/{code}",
            get(get_coupon).put(update_coupon).delete(delete_coupon),
        )
        .route("/admin/promos", get(list_promos).post(upsert_promo))
        .route("/admin/promos/{code}", delete(delete_promo))
        // Shop
        .route("/admin/prices", get(list_prices))
        .route("/admin/prices/{period}", put(update_price))
        .route("/admin/settings", get(get_settings).put(update_settings))
        .route("/admin/broadcast", post(broadcast))
        .route("/admin/sync", post(sync_from_mirror))
        .layer(middleware::from_fn_with_state(state, admin_auth));

    Router::new().merge(login_routes).merge(protected)
}
