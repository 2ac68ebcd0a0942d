use std::net::SocketAddr;
use std::num::NonZeroU32;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::util::extract_request_info;

/// Per-client limit on payment checks, each of which hits the bank endpoint.
pub struct PaymentRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl PaymentRateLimiter {
    pub fn per_minute(checks: u32) -> Self {
        let checks = NonZeroU32::new(checks).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::keyed(Quota::per_minute(checks)),
        }
    }

    pub fn check(&self, client: &str) -> bool {
        self.limiter.check_key(&client.to_string()).is_ok()
    }

    /// Forget clients whose quota has fully replenished.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }
}

/// Peer address of the connection. Forwarding headers count only when
/// `trust_proxy` is set, since any client can send them.
fn client_key(request: &Request, trust_proxy: bool) -> String {
    let forwarded = if trust_proxy {
        extract_request_info(request.headers()).0
    } else {
        None
    };
    forwarded
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn payment_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let client = client_key(&request, state.config.trust_proxy);
    if !state.payment_limiter.check(&client) {
        tracing::warn!(client = %client, "Payment check rate limit exceeded");
        return Err(AppError::TooManyRequests(
            "Too many payment checks. Please wait a minute and try again.".into(),
        ));
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_is_per_client() {
        let limiter = PaymentRateLimiter::per_minute(2);
        assert!(limiter.check("1.1.1.1"));
        assert!(limiter.check("1.1.1.1"));
        assert!(!limiter.check("1.1.1.1"));
        assert!(limiter.check("2.2.2.2"));
    }

    fn request_from(peer: &str, forwarded: &str) -> Request {
        let mut request = axum::http::Request::builder()
            .uri("/check_mb_payment")
            .header("x-forwarded-for", forwarded)
            .body(axum::body::Body::empty())
            .unwrap();
        let addr: SocketAddr = format!("{}:40000", peer).parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[test]
    fn test_client_key_ignores_forwarded_for_by_default() {
        let request = request_from("198.51.100.4", "10.0.0.1");
        assert_eq!(client_key(&request, false), "198.51.100.4");
        assert_eq!(client_key(&request, true), "10.0.0.1");
    }

    #[test]
    fn test_zero_means_one() {
        let limiter = PaymentRateLimiter::per_minute(0);
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
    }
}
