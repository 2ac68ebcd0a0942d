//! Shared utility functions for the shop.

use axum::http::HeaderMap;
use axum_extra::headers::{Cookie, HeaderMapExt};
use rand::Rng;

use crate::auth::SESSION_COOKIE;

const UID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
/// No O/0 or I/1, so codes survive being retyped into a bank memo.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const UID_LENGTH: usize = 6;
pub const VERIFICATION_CODE_LENGTH: usize = 5;

fn random_string(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

pub fn generate_uid() -> String {
    random_string(UID_ALPHABET, UID_LENGTH)
}

pub fn generate_verification_code() -> String {
    random_string(CODE_ALPHABET, VERIFICATION_CODE_LENGTH)
}

/// Extract client IP address and user-agent from request headers.
///
/// Tries `x-forwarded-for` first (for proxied requests), then `x-real-ip`.
/// Only the first hop of `x-forwarded-for` is kept.
pub fn extract_request_info(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    (ip, user_agent)
}

/// Extract a Bearer token from the Authorization header.
///
/// Returns the token string without the "Bearer " prefix, or None if
/// the header is missing, malformed, or empty after the prefix.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// Dashboard session token: the session cookie, else a Bearer token.
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Cookie>()
        .and_then(|cookie| cookie.get(SESSION_COOKIE).map(str::to_string))
        .filter(|token| !token.is_empty())
        .or_else(|| extract_bearer_token(headers).map(str::to_string))
}

/// Escape text for HTML pages, emails and Telegram's HTML parse mode.
pub fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Mask an email for logs and bot messages: `jo***@example.com`.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let visible: String = local.chars().take(2).collect();
            format!("{}***@{}", visible, domain)
        }
        None => "***".to_string(),
    }
}
