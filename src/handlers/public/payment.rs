use axum::extract::State;

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::fulfillment::{FulfillmentRequest, FulfillmentResponse, fulfill};

pub async fn check_payment(
    State(state): State<AppState>,
    Json(request): Json<FulfillmentRequest>,
) -> Result<Json<FulfillmentResponse>> {
    tracing::info!(uid = %request.uid, period = %request.period, "Payment check requested");
    Ok(Json(fulfill(&state, request).await?))
}
