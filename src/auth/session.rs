use chrono::Utc;
use rand::RngCore;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::db::queries;
use crate::error::Result;
use crate::models::AdminSession;

pub const SESSION_COOKIE: &str = "keyshop_admin";
pub const SESSION_TTL_SECS: i64 = 24 * 60 * 60;
pub const REMEMBER_ME_TTL_SECS: i64 = 60 * 24 * 60 * 60;

/// Identity recorded for sessions opened with the shared dashboard password.
pub const SHARED_PASSWORD_IDENTITY: &str = "shared-password";

pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub fn session_ttl(remember_me: bool) -> i64 {
    if remember_me {
        REMEMBER_ME_TTL_SECS
    } else {
        SESSION_TTL_SECS
    }
}

/// Open a session. Returns the raw token (given to the browser once) and the
/// stored session.
pub fn create_session(
    conn: &Connection,
    email: &str,
    remember_me: bool,
) -> Result<(String, AdminSession)> {
    let token = generate_token();
    let expires_at = Utc::now().timestamp() + session_ttl(remember_me);
    let session = queries::create_admin_session(conn, &hash_token(&token), email, expires_at)?;
    Ok((token, session))
}

pub fn resolve_session(conn: &Connection, token: &str) -> Result<Option<AdminSession>> {
    queries::get_admin_session(conn, &hash_token(token), Utc::now().timestamp())
}

pub fn revoke_session(conn: &Connection, token: &str) -> Result<bool> {
    queries::delete_admin_session(conn, &hash_token(token))
}

/// Constant-time comparison against the configured shared password.
pub fn check_shared_password(configured: Option<&str>, given: &str) -> bool {
    match configured {
        Some(expected) if !expected.is_empty() => {
            bool::from(expected.as_bytes().ct_eq(given.as_bytes()))
        }
        _ => false,
    }
}

pub fn session_cookie(token: &str, max_age_secs: i64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, token, max_age_secs
    )
}

pub fn clear_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}
