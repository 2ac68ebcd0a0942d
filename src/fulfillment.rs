//! Payment check and key delivery for one order.
//!
//! INITIATED -> MATCHED -> PRICED -> KEY_DRAWN -> EMAIL_SENT -> FINALIZED.
//! Every step before the email can fail without changing any state. Once the
//! provider has accepted the email the buyer has the key, so the finalizing
//! writes are best-effort: failures are logged and never reported back.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::{CreateDelivery, Order, Period};
use crate::stores::CouponCheck;
use crate::util::escape_html;

#[derive(Debug, Clone, Deserialize)]
pub struct FulfillmentRequest {
    pub uid: String,
    pub email: String,
    pub period: String,
    /// Amount the buyer says they transferred
    pub amount: i64,
    #[serde(default)]
    pub promo_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FulfillmentData {
    pub key: Option<String>,
    pub period: String,
    pub original_amount: i64,
    pub discount_percent: i64,
    pub final_amount: i64,
    pub promo_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FulfillmentResponse {
    pub status: &'static str,
    pub message: String,
    pub data: FulfillmentData,
}

/// Where a discount came from, so the right store is redeemed afterwards.
#[derive(Debug, Clone, PartialEq)]
enum Discount {
    None,
    Coupon { code: String, percent: i64 },
    Promo { code: String, percent: i64 },
}

impl Discount {
    fn percent(&self) -> i64 {
        match self {
            Discount::None => 0,
            Discount::Coupon { percent, .. } | Discount::Promo { percent, .. } => *percent,
        }
    }

    fn code(&self) -> Option<&str> {
        match self {
            Discount::None => None,
            Discount::Coupon { code, .. } | Discount::Promo { code, .. } => Some(code),
        }
    }
}

/// `round(amount * (100 - discount) / 100)`, halves rounded away from zero.
pub fn discounted_amount(amount: i64, discount_percent: i64) -> i64 {
    let scaled = amount * (100 - discount_percent);
    (scaled + 50).div_euclid(100)
}

/// Orders with a payment check in progress. A second check for the same order
/// is refused until the first finishes.
#[derive(Default)]
pub struct InFlightOrders {
    uids: Mutex<HashSet<String>>,
}

pub struct InFlightGuard<'a> {
    orders: &'a InFlightOrders,
    uid: String,
}

impl InFlightOrders {
    pub fn begin(&self, uid: &str) -> Option<InFlightGuard<'_>> {
        let mut uids = self
            .uids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        uids.insert(uid.to_string()).then(|| InFlightGuard {
            orders: self,
            uid: uid.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.orders
            .uids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.uid);
    }
}

struct ValidatedRequest {
    uid: String,
    email: String,
    period: Period,
    amount: i64,
    promo_code: Option<String>,
}

fn validate(request: FulfillmentRequest) -> Result<ValidatedRequest> {
    let uid = request.uid.trim().to_string();
    let email = request.email.trim().to_string();
    if uid.is_empty() || email.is_empty() {
        return Err(AppError::BadRequest("Missing order id or email".into()));
    }
    if !email.contains('@') {
        return Err(AppError::BadRequest("Invalid email address".into()));
    }
    let period = Period::parse(&request.period)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown package '{}'", request.period)))?;
    if request.amount <= 0 {
        return Err(AppError::BadRequest("Amount must be positive".into()));
    }
    let promo_code = request
        .promo_code
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty());
    Ok(ValidatedRequest {
        uid,
        email,
        period,
        amount: request.amount,
        promo_code,
    })
}

fn already_paid(state: &AppState, order: &Order, period: Period) -> Result<FulfillmentResponse> {
    let conn = state.db.get()?;
    let data = match queries::get_delivery_for_order(&conn, &order.uid)? {
        Some(delivery) => FulfillmentData {
            key: Some(delivery.key),
            period: delivery.period,
            original_amount: delivery.original_amount,
            discount_percent: delivery.discount_percent,
            final_amount: delivery.final_amount,
            promo_code: delivery.promo_code,
        },
        None => FulfillmentData {
            key: order.key.clone(),
            period: period.duration_text(),
            original_amount: 0,
            discount_percent: 0,
            final_amount: 0,
            promo_code: order.promo_code.clone(),
        },
    };
    Ok(FulfillmentResponse {
        status: "ok",
        message: "Order already paid".into(),
        data,
    })
}

/// Coupon store first, then the legacy promo table. A code valid in neither
/// fails the request.
fn resolve_discount(state: &AppState, code: Option<&str>, period: Period) -> Result<Discount> {
    let Some(code) = code else {
        return Ok(Discount::None);
    };

    match state.coupons.validate(code, period)? {
        CouponCheck::Valid(coupon) => {
            return Ok(Discount::Coupon {
                code: code.to_string(),
                percent: coupon.discount,
            });
        }
        CouponCheck::Invalid(reason) => {
            tracing::debug!(code = %code, reason = %reason, "Coupon rejected, trying legacy promo");
        }
    }

    let conn = state.db.get()?;
    match queries::get_valid_promo(&conn, code, Utc::now().timestamp())? {
        Some(promo) => Ok(Discount::Promo {
            code: promo.code,
            percent: promo.discount,
        }),
        None => Err(AppError::BadRequest("Invalid or expired discount code".into())),
    }
}

/// Run the payment check for an order and deliver a key if the transfer is found.
pub async fn fulfill(state: &AppState, request: FulfillmentRequest) -> Result<FulfillmentResponse> {
    let request = validate(request)?;

    if state.settings.get()?.maintenance {
        return Err(AppError::BadRequest(
            "The shop is under maintenance. Please try again later.".into(),
        ));
    }

    let Some(_in_flight) = state.fulfillments.begin(&request.uid) else {
        return Err(AppError::PaymentPending(
            "This order is already being checked. Please wait a moment.".into(),
        ));
    };

    let order = {
        let conn = state.db.get()?;
        queries::get_order(&conn, &request.uid)?
    }
    .ok_or_else(|| AppError::NotFound("Order not found".into()))?;

    if order.paid {
        return already_paid(state, &order, request.period);
    }

    // INITIATED -> MATCHED
    let pending = || {
        AppError::PaymentPending(format!(
            "Transaction with code '{}' not found yet. Wait 20-30s and press the button again.",
            order.verification_code
        ))
    };
    let transaction = state
        .bank
        .find_matching_transaction(&order.verification_code, request.amount)
        .await?
        .ok_or_else(pending)?;
    let fingerprint = transaction.fingerprint();
    {
        let conn = state.db.get()?;
        if queries::is_transaction_consumed(&conn, &fingerprint, &order.uid)? {
            tracing::warn!(
                uid = %order.uid,
                fingerprint = %fingerprint,
                "Matched transaction already paid for another order"
            );
            return Err(pending());
        }
    }
    tracing::info!(uid = %order.uid, amount = request.amount, "Payment matched");

    // MATCHED -> PRICED
    let discount = resolve_discount(state, request.promo_code.as_deref(), request.period)?;
    let final_amount = discounted_amount(request.amount, discount.percent());

    // PRICED -> KEY_DRAWN
    let reservation = state.keys.reserve(request.period)?.ok_or_else(|| {
        AppError::OutOfStock(format!(
            "The {} package is out of stock. Please contact support.",
            request.period.display_label()
        ))
    })?;
    let key = reservation.key().to_string();

    // KEY_DRAWN -> EMAIL_SENT. On failure the key stays in the pool.
    state
        .email
        .send_key_delivery(&request.email, &key, &order.uid, request.period)
        .await?;

    // EMAIL_SENT -> FINALIZED
    let delivery = CreateDelivery {
        uid: order.uid.clone(),
        email: request.email.clone(),
        key: key.clone(),
        period: request.period.duration_text(),
        original_amount: request.amount,
        discount_percent: discount.percent(),
        final_amount,
        promo_code: discount.code().map(str::to_string),
        tx_fingerprint: Some(fingerprint),
    };
    finalize(state, &delivery, request.period, &discount).await;
    drop(reservation);

    Ok(FulfillmentResponse {
        status: "ok",
        message: format!(
            "Key {} ({}) was sent to {}.",
            key,
            request.period.duration_text(),
            request.email
        ),
        data: FulfillmentData {
            key: Some(key),
            period: delivery.period,
            original_amount: delivery.original_amount,
            discount_percent: delivery.discount_percent,
            final_amount,
            promo_code: delivery.promo_code,
        },
    })
}

/// Post-delivery bookkeeping. Each step is attempted regardless of the others.
async fn finalize(state: &AppState, delivery: &CreateDelivery, period: Period, discount: &Discount) {
    let uid = delivery.uid.as_str();

    match state.db.get() {
        Ok(conn) => {
            if let Err(e) = queries::attach_fulfillment(
                &conn,
                uid,
                &delivery.email,
                &delivery.key,
                delivery.promo_code.as_deref(),
            ) {
                tracing::error!(uid = %uid, error = %e, "Failed to attach key to order");
            }
            match queries::mark_paid(&conn, uid) {
                Ok(_) => tracing::info!(uid = %uid, "Order marked paid"),
                Err(e) => tracing::error!(uid = %uid, error = %e, "Failed to mark order paid"),
            }
        }
        Err(e) => tracing::error!(uid = %uid, error = %e, "No database connection to finalize order"),
    }

    if !state.keys.retire(&delivery.key, Some(&delivery.email)) {
        tracing::error!(uid = %uid, key = %delivery.key, "Key delivered but not retired");
    }

    let redeemed = match discount {
        Discount::None => Ok(true),
        Discount::Coupon { code, .. } => state.coupons.redeem(code),
        Discount::Promo { code, .. } => state
            .db
            .get()
            .map_err(AppError::from)
            .and_then(|conn| queries::decrement_promo(&conn, code)),
    };
    if let Err(e) = redeemed {
        tracing::error!(uid = %uid, code = ?discount.code(), error = %e, "Failed to redeem discount code");
    }

    let recorded = state
        .db
        .get()
        .map_err(AppError::from)
        .and_then(|conn| queries::record_delivery(&conn, delivery));
    if let Err(e) = recorded {
        tracing::error!(uid = %uid, error = %e, "Failed to record delivery");
    }

    let message = format!(
        "<b>New order!</b>\nUID: {}\nEmail: {}\nKey: <code>{}</code>\nPackage: {}\nCode: {}\nDiscount: {}%\nAmount: {}\nTime: {}",
        escape_html(uid),
        escape_html(&delivery.email),
        escape_html(&delivery.key),
        period.display_label(),
        escape_html(delivery.promo_code.as_deref().unwrap_or("none")),
        delivery.discount_percent,
        delivery.final_amount,
        Utc::now()
            .with_timezone(&state.config.shop_offset())
            .format("%d/%m/%Y %H:%M:%S"),
    );
    state.notifier.notify_admins(&message).await;

    state.mirror_pool(period).await;
}
