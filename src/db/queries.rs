use chrono::Utc;
use rusqlite::{Connection, params, types::Value};

use crate::error::Result;
use crate::models::*;

use super::from_row::{
    ADMIN_SESSION_COLS, BOT_CHAT_COLS, DELIVERY_COLS, ORDER_COLS, PROMO_COLS, query_all,
    query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single query.
struct UpdateBuilder {
    table: &'static str,
    key_column: &'static str,
    key: String,
    fields: Vec<(&'static str, Value)>,
}

impl UpdateBuilder {
    fn new(table: &'static str, key_column: &'static str, key: &str) -> Self {
        Self {
            table,
            key_column,
            key: key.to_string(),
            fields: Vec::new(),
        }
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    /// Set a column to an explicit value (including NULL).
    fn set_nullable<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.fields.push((column, v.into())),
            None => self.fields.push((column, Value::Null)),
        }
        self
    }

    fn execute(self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.key.into());
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            self.table,
            sets.join(", "),
            self.key_column
        );
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

// ============ Orders ============

/// Create a pending order. Idempotent: a uid collision leaves the existing row untouched.
/// Returns whether a new row was inserted.
pub fn create_order(conn: &Connection, uid: &str, verification_code: &str) -> Result<bool> {
    create_order_at(conn, uid, verification_code, now())
}

pub fn create_order_at(
    conn: &Connection,
    uid: &str,
    verification_code: &str,
    created_at: i64,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO orders (uid, verification_code, paid, created_at)
         VALUES (?1, ?2, 0, ?3)",
        params![uid, verification_code, created_at],
    )?;
    Ok(inserted > 0)
}

pub fn get_order(conn: &Connection, uid: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE uid = ?1", ORDER_COLS),
        params![uid],
    )
}

/// Record who received which key. Only called once the delivery email was accepted.
pub fn attach_fulfillment(
    conn: &Connection,
    uid: &str,
    email: &str,
    key: &str,
    promo_code: Option<&str>,
) -> Result<bool> {
    UpdateBuilder::new("orders", "uid", uid)
        .set("email", email.to_string())
        .set("key", key.to_string())
        .set_nullable("promo_code", promo_code.map(str::to_string))
        .execute(conn)
}

pub fn mark_paid(conn: &Connection, uid: &str) -> Result<bool> {
    let updated = conn.execute("UPDATE orders SET paid = 1 WHERE uid = ?1", params![uid])?;
    Ok(updated > 0)
}

fn order_filter_clause(filter: OrderFilter) -> &'static str {
    match filter {
        OrderFilter::All => "",
        OrderFilter::Paid => "WHERE paid = 1",
        OrderFilter::Pending => "WHERE paid = 0",
    }
}

/// Most recent orders first.
pub fn list_orders(conn: &Connection, filter: OrderFilter, limit: i64) -> Result<Vec<Order>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM orders {} ORDER BY created_at DESC, id DESC LIMIT ?1",
            ORDER_COLS,
            order_filter_clause(filter)
        ),
        params![limit],
    )
}

pub fn count_orders(conn: &Connection, filter: OrderFilter) -> Result<i64> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM orders {}", order_filter_clause(filter)),
        [],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

pub fn get_order_by_key(conn: &Connection, key: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE key = ?1", ORDER_COLS),
        params![key],
    )
}

/// Delete unpaid orders older than the given age. Paid orders are never touched.
pub fn delete_stale_pending(conn: &Connection, older_than_minutes: i64) -> Result<usize> {
    delete_stale_pending_at(conn, older_than_minutes, now())
}

pub fn delete_stale_pending_at(
    conn: &Connection,
    older_than_minutes: i64,
    now: i64,
) -> Result<usize> {
    let cutoff = now - older_than_minutes * 60;
    let deleted = conn.execute(
        "DELETE FROM orders WHERE paid = 0 AND created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

// ============ Deliveries ============

pub fn record_delivery(conn: &Connection, input: &CreateDelivery) -> Result<Delivery> {
    let delivered_at = now();
    conn.execute(
        "INSERT INTO deliveries (uid, email, key, period, original_amount, discount_percent,
                                 final_amount, promo_code, tx_fingerprint, delivered_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            &input.uid,
            &input.email,
            &input.key,
            &input.period,
            input.original_amount,
            input.discount_percent,
            input.final_amount,
            &input.promo_code,
            &input.tx_fingerprint,
            delivered_at
        ],
    )?;

    Ok(Delivery {
        id: conn.last_insert_rowid(),
        uid: input.uid.clone(),
        email: input.email.clone(),
        key: input.key.clone(),
        period: input.period.clone(),
        original_amount: input.original_amount,
        discount_percent: input.discount_percent,
        final_amount: input.final_amount,
        promo_code: input.promo_code.clone(),
        tx_fingerprint: input.tx_fingerprint.clone(),
        delivered_at,
    })
}

pub fn list_deliveries(conn: &Connection, limit: i64) -> Result<Vec<Delivery>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM deliveries ORDER BY delivered_at DESC, id DESC LIMIT ?1",
            DELIVERY_COLS
        ),
        params![limit],
    )
}

/// Latest delivery recorded for an order.
pub fn get_delivery_for_order(conn: &Connection, uid: &str) -> Result<Option<Delivery>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM deliveries WHERE uid = ?1 ORDER BY id DESC LIMIT 1",
            DELIVERY_COLS
        ),
        params![uid],
    )
}

pub fn count_deliveries_for_order(conn: &Connection, uid: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM deliveries WHERE uid = ?1",
        params![uid],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

/// Whether a bank transaction already paid for an order other than `uid`.
pub fn is_transaction_consumed(conn: &Connection, fingerprint: &str, uid: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM deliveries WHERE tx_fingerprint = ?1 AND uid != ?2",
        params![fingerprint, uid],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Total revenue (final amounts) over all deliveries.
pub fn total_revenue(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COALESCE(SUM(final_amount), 0) FROM deliveries",
        [],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

// ============ Legacy promo codes ============

pub fn get_promo(conn: &Connection, code: &str) -> Result<Option<PromoCode>> {
    query_one(
        conn,
        &format!("SELECT {} FROM promo_codes WHERE code = ?1", PROMO_COLS),
        params![code.trim().to_uppercase()],
    )
}

/// A promo code that exists, has not expired and has uses left.
pub fn get_valid_promo(conn: &Connection, code: &str, now: i64) -> Result<Option<PromoCode>> {
    Ok(get_promo(conn, code)?.filter(|promo| {
        promo.uses_left > 0 && promo.expires_at.is_none_or(|expires| now <= expires)
    }))
}

pub fn decrement_promo(conn: &Connection, code: &str) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE promo_codes SET uses_left = uses_left - 1 WHERE code = ?1 AND uses_left > 0",
        params![code.trim().to_uppercase()],
    )?;
    Ok(updated > 0)
}

/// Create or replace a promo code.
pub fn upsert_promo(conn: &Connection, input: &CreatePromoCode) -> Result<PromoCode> {
    let code = input.code.trim().to_uppercase();
    conn.execute(
        "INSERT INTO promo_codes (code, discount, uses_left, expires_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(code) DO UPDATE SET
            discount = excluded.discount,
            uses_left = excluded.uses_left,
            expires_at = excluded.expires_at",
        params![&code, input.discount, input.uses_left, input.expires_at],
    )?;
    Ok(PromoCode {
        code,
        discount: input.discount,
        uses_left: input.uses_left,
        expires_at: input.expires_at,
    })
}

pub fn list_promos(conn: &Connection) -> Result<Vec<PromoCode>> {
    query_all(
        conn,
        &format!("SELECT {} FROM promo_codes ORDER BY code", PROMO_COLS),
        [],
    )
}

pub fn delete_promo(conn: &Connection, code: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM promo_codes WHERE code = ?1",
        params![code.trim().to_uppercase()],
    )?;
    Ok(deleted > 0)
}

// ============ Admin sessions ============

pub fn create_admin_session(
    conn: &Connection,
    token_hash: &str,
    email: &str,
    expires_at: i64,
) -> Result<AdminSession> {
    let created_at = now();
    conn.execute(
        "INSERT OR REPLACE INTO admin_sessions (token_hash, email, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![token_hash, email, expires_at, created_at],
    )?;
    Ok(AdminSession {
        token_hash: token_hash.to_string(),
        email: email.to_string(),
        expires_at,
        created_at,
    })
}

/// A session that has not expired yet.
pub fn get_admin_session(conn: &Connection, token_hash: &str, now: i64) -> Result<Option<AdminSession>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM admin_sessions WHERE token_hash = ?1 AND expires_at > ?2",
            ADMIN_SESSION_COLS
        ),
        params![token_hash, now],
    )
}

pub fn delete_admin_session(conn: &Connection, token_hash: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM admin_sessions WHERE token_hash = ?1",
        params![token_hash],
    )?;
    Ok(deleted > 0)
}

pub fn delete_expired_admin_sessions(conn: &Connection, now: i64) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM admin_sessions WHERE expires_at <= ?1",
        params![now],
    )?;
    Ok(deleted)
}

// ============ Bot chats ============

pub fn upsert_bot_chat(conn: &Connection, chat_id: i64, username: Option<&str>) -> Result<()> {
    conn.execute(
        "INSERT INTO bot_chats (chat_id, username, first_seen_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(chat_id) DO UPDATE SET username = COALESCE(excluded.username, bot_chats.username)",
        params![chat_id, username, now()],
    )?;
    Ok(())
}

pub fn list_bot_chats(conn: &Connection) -> Result<Vec<BotChat>> {
    query_all(
        conn,
        &format!("SELECT {} FROM bot_chats ORDER BY first_seen_at", BOT_CHAT_COLS),
        [],
    )
}
