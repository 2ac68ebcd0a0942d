use axum::extract::State;
use axum::response::Html;
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::util::{escape_html, generate_uid, generate_verification_code};

const UID_ATTEMPTS: usize = 5;

#[derive(Debug, Serialize)]
pub struct DurationOption {
    pub value: String,
    pub label: String,
    pub amount: i64,
    pub currency: String,
    pub key_count: usize,
}

#[derive(Debug, Serialize)]
pub struct NewOrderResponse {
    pub uid: String,
    pub code: String,
    pub shop_name: String,
    pub support_link: Option<String>,
    pub durations: Vec<DurationOption>,
}

#[derive(Debug, Serialize)]
pub struct OrderStatusResponse {
    pub uid: String,
    pub paid: bool,
}

/// Create a pending order under a fresh uid.
fn create_order(state: &AppState) -> Result<(String, String)> {
    let conn = state.db.get()?;
    let code = generate_verification_code();
    for _ in 0..UID_ATTEMPTS {
        let uid = generate_uid();
        if queries::create_order(&conn, &uid, &code)? {
            tracing::debug!(uid = %uid, "Order created");
            return Ok((uid, code));
        }
    }
    Err(AppError::Internal("Could not allocate an order id".into()))
}

fn new_order(state: &AppState) -> Result<NewOrderResponse> {
    let (uid, code) = create_order(state)?;
    let settings = state.settings.get()?;
    let durations = state
        .prices
        .all()?
        .into_iter()
        .map(|(period, price)| {
            Ok(DurationOption {
                value: period.code().to_string(),
                label: price.label,
                amount: price.amount,
                currency: price.currency,
                key_count: state.keys.count(period)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(NewOrderResponse {
        uid,
        code,
        shop_name: settings.shop_name,
        support_link: settings.support_link,
        durations,
    })
}

pub async fn new_order_json(State(state): State<AppState>) -> Result<Json<NewOrderResponse>> {
    Ok(Json(new_order(&state)?))
}

pub async fn order_status(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<OrderStatusResponse>> {
    let conn = state.db.get()?;
    let order = queries::get_order(&conn, &uid)?
        .ok_or_else(|| AppError::NotFound("Order not found".into()))?;
    Ok(Json(OrderStatusResponse {
        uid: order.uid,
        paid: order.paid,
    }))
}

pub async fn storefront(State(state): State<AppState>) -> Result<Html<String>> {
    let order = new_order(&state)?;

    let options: String = order
        .durations
        .iter()
        .map(|d| {
            format!(
                r#"<label class="option"><input type="radio" name="period" value="{value}" data-amount="{amount}"{disabled}> {label}: {amount} {currency} <small>({count} left)</small></label>"#,
                value = escape_html(&d.value),
                amount = d.amount,
                disabled = if d.key_count == 0 { " disabled" } else { "" },
                label = escape_html(&d.label),
                currency = escape_html(&d.currency),
                count = d.key_count,
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let support = order
        .support_link
        .as_deref()
        .map(|link| format!(r#"<p><a href="{0}">Support</a></p>"#, escape_html(link)))
        .unwrap_or_default();

    Ok(Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><meta name="viewport" content="width=device-width, initial-scale=1"><title>{shop}</title></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 560px; margin: 0 auto; padding: 20px;">
<h1>{shop}</h1>
<p>Order <strong id="uid">{uid}</strong></p>
<p>Put this code in your transfer memo: <code style="font-size: 20px;" id="code">{code}</code></p>
<form id="buy">
{options}
<p><input type="email" name="email" placeholder="Email for your key" required></p>
<p><input type="text" name="promo_code" placeholder="Discount code (optional)"></p>
<p><button type="submit">I have paid, send my key</button></p>
</form>
<p id="result"></p>
{support}
<script>
document.getElementById("buy").addEventListener("submit", async (e) => {{
  e.preventDefault();
  const form = new FormData(e.target);
  const choice = document.querySelector('input[name="period"]:checked');
  if (!choice) {{ return; }}
  const res = await fetch("/check_mb_payment", {{
    method: "POST",
    headers: {{ "Content-Type": "application/json" }},
    body: JSON.stringify({{
      uid: "{uid}",
      email: form.get("email"),
      period: choice.value,
      amount: Number(choice.dataset.amount),
      promo_code: form.get("promo_code") || null
    }})
  }});
  const body = await res.json();
  document.getElementById("result").textContent = body.message;
}});
</script>
</body>
</html>"#,
        shop = escape_html(&order.shop_name),
        uid = escape_html(&order.uid),
        code = escape_html(&order.code),
        options = options,
        support = support,
    )))
}
