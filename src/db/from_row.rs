//! Row mapping for the SQLite tables.
//!
//! Each model has a column-list constant that matches its `FromRow` impl, so a
//! query is always `SELECT {COLS} FROM ...` and the index order cannot drift.

use rusqlite::{Connection, OptionalExtension, Params, Row};

use crate::error::Result;
use crate::models::{AdminSession, BotChat, Delivery, Order, PromoCode};

pub const ORDER_COLS: &str = "uid, email, key, verification_code, promo_code, paid, created_at";

pub const DELIVERY_COLS: &str = "id, uid, email, key, period, original_amount, discount_percent, final_amount, promo_code, tx_fingerprint, delivered_at";

pub const PROMO_COLS: &str = "code, discount, uses_left, expires_at";

pub const ADMIN_SESSION_COLS: &str = "token_hash, email, expires_at, created_at";

pub const BOT_CHAT_COLS: &str = "chat_id, username, first_seen_at";

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            uid: row.get(0)?,
            email: row.get(1)?,
            key: row.get(2)?,
            verification_code: row.get(3)?,
            promo_code: row.get(4)?,
            paid: row.get::<_, i64>(5)? != 0,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for Delivery {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Delivery {
            id: row.get(0)?,
            uid: row.get(1)?,
            email: row.get(2)?,
            key: row.get(3)?,
            period: row.get(4)?,
            original_amount: row.get(5)?,
            discount_percent: row.get(6)?,
            final_amount: row.get(7)?,
            promo_code: row.get(8)?,
            tx_fingerprint: row.get(9)?,
            delivered_at: row.get(10)?,
        })
    }
}

impl FromRow for PromoCode {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PromoCode {
            code: row.get(0)?,
            discount: row.get(1)?,
            uses_left: row.get(2)?,
            expires_at: row.get(3)?,
        })
    }
}

impl FromRow for AdminSession {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(AdminSession {
            token_hash: row.get(0)?,
            email: row.get(1)?,
            expires_at: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

impl FromRow for BotChat {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(BotChat {
            chat_id: row.get(0)?,
            username: row.get(1)?,
            first_seen_at: row.get(2)?,
        })
    }
}

pub fn query_one<T: FromRow>(conn: &Connection, sql: &str, params: impl Params) -> Result<Option<T>> {
    Ok(conn.query_row(sql, params, T::from_row).optional()?)
}

pub fn query_all<T: FromRow>(conn: &Connection, sql: &str, params: impl Params) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
