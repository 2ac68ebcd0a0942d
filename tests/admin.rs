//! Admin login, the session gate and the /admin/* management API.

use axum::{body::Body, http::{Request, StatusCode}};
use serde_json::json;
use tower::ServiceExt;

use keyshop::auth::SESSION_COOKIE;

mod common;
use common::*;

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

#[tokio::test]
async fn test_admin_routes_require_a_session() {
    let (state, _dir) = create_test_app_state();

    let request = Request::builder()
        .uri("/admin/orders")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");

    let (status, _) = send(&state, authed_request("GET", "/admin/orders", "not-a-token", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_request_code_only_for_allow_listed_emails() {
    let (state, _dir) = create_test_app_state();

    let (status, _) = send(
        &state,
        json_request("POST", "/admin/login/request-code", json!({"email": "eve@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &state,
        json_request("POST", "/admin/login/request-code", json!({"email": "Admin@Example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
}

#[tokio::test]
async fn test_sixth_code_request_in_an_hour_is_rejected() {
    let (state, _dir) = create_test_app_state();
    let request = || {
        json_request(
            "POST",
            "/admin/login/request-code",
            json!({"email": "admin@example.com"}),
        )
    };

    for _ in 0..5 {
        let (status, _) = send(&state, request()).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = send(&state, request()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .starts_with("Too many login codes requested. Try again in")
    );
}

#[tokio::test]
async fn test_verify_code_opens_a_cookie_session() {
    let (state, _dir) = create_test_app_state();
    let code = state.otp.issue("admin@example.com");
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let (status, body) = send(
        &state,
        json_request(
            "POST",
            "/admin/login/verify",
            json!({"email": "admin@example.com", "code": wrong}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Wrong code, 4 attempts left");

    let response = app(state.clone())
        .oneshot(json_request(
            "POST",
            "/admin/login/verify",
            json!({"email": "admin@example.com", "code": code, "remember_me": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with(&format!("{}=", SESSION_COOKIE)));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains(&format!("Max-Age={}", 60 * 24 * 60 * 60)));

    let session = cookie.split(';').next().unwrap().to_string();
    let request = Request::builder()
        .uri("/admin/me")
        .header("cookie", session)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "admin@example.com");
    assert_eq!(body["shared_password"], false);

    // Codes are single use
    let (status, _) = send(
        &state,
        json_request(
            "POST",
            "/admin/login/verify",
            json!({"email": "admin@example.com", "code": code}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_shared_password_login_and_logout() {
    let (state, _dir) = create_test_app_state();

    let (status, _) = send(
        &state,
        json_request("POST", "/admin/login/password", json!({"password": "wrong"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &state,
        json_request("POST", "/admin/login/password", json!({"password": "hunter2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "shared-password");
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = send(&state, authed_request("GET", "/admin/me", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["shared_password"], true);

    let (status, _) = send(&state, authed_request("POST", "/admin/logout", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&state, authed_request("GET", "/admin/me", &token, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_password_login_disabled_without_password() {
    let (state, _dir) = create_test_app_state_with(|config| config.admin_password = None);

    let (status, _) = send(
        &state,
        json_request("POST", "/admin/login/password", json!({"password": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_removed_admin_loses_access() {
    let (state, _dir) = create_test_app_state();
    let mut settings = state.settings.get().unwrap();
    settings.admin_emails = vec!["temp@example.com".into()];
    state.settings.set(settings.clone()).unwrap();

    let token = {
        let conn = state.db.get().unwrap();
        keyshop::auth::create_session(&conn, "temp@example.com", false)
            .unwrap()
            .0
    };
    let (status, _) = send(&state, authed_request("GET", "/admin/me", &token, None)).await;
    assert_eq!(status, StatusCode::OK);

    settings.admin_emails.clear();
    state.settings.set(settings).unwrap();
    let (status, _) = send(&state, authed_request("GET", "/admin/me", &token, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_key_management() {
    let (state, _dir) = create_test_app_state();
    let token = admin_token(&state);

    // Plain-text upload, one key per line
    let request = Request::builder()
        .method("POST")
        .uri("/admin/keys/7d")
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "text/plain")
        .body(Body::from("K-1\nK-2\n\nK-1\n"))
        .unwrap();
    let (status, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], 2);
    assert_eq!(body["total"], 2);

    let (_, body) = send(
        &state,
        authed_request("POST", "/admin/keys/7d", &token, Some(json!({"keys": ["K-2", "K-3"]}))),
    )
    .await;
    assert_eq!(body["added"], 1);
    assert_eq!(body["total"], 3);

    let (status, body) = send(&state, authed_request("GET", "/admin/keys", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    let week = body
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["period"] == "7d")
        .unwrap();
    assert_eq!(week["count"], 3);
    assert_eq!(week["label"], "1 Week");

    let (status, _) = send(&state, authed_request("DELETE", "/admin/keys/7d/K-2", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&state, authed_request("DELETE", "/admin/keys/7d/K-2", &token, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&state, authed_request("GET", "/admin/keys/7d", &token, None)).await;
    assert_eq!(body["keys"], json!(["K-1", "K-3"]));

    state.keys.retire("K-1", Some("buyer@example.com"));
    let (status, body) = send(&state, authed_request("GET", "/admin/keys/solved?limit=5", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["key"], "K-1");
    assert_eq!(body[0]["email"], "buyer@example.com");

    let (status, body) = send(&state, authed_request("GET", "/admin/keys/2d", &token, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Unknown package '2d'");
}

#[tokio::test]
async fn test_coupon_and_promo_crud() {
    let (state, _dir) = create_test_app_state();
    let token = admin_token(&state);

    let (status, body) = send(
        &state,
        authed_request(
            "POST",
            "/admin/coupons",
            &token,
            Some(json!({"code": "spring", "discount": 15, "uses_left": 3, "types": ["30d"]})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["code"], "SPRING");

    let (status, body) = send(
        &state,
        authed_request("POST", "/admin/coupons", &token, Some(json!({"code": "BAD", "discount": 0}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Discount must be between 1 and 100 percent");

    let (status, body) = send(
        &state,
        authed_request("PUT", "/admin/coupons/spring", &token, Some(json!({"discount": 20}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["discount"], 20);

    let (_, body) = send(&state, authed_request("GET", "/admin/coupons", &token, None)).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = send(&state, authed_request("DELETE", "/admin/coupons/SPRING", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&state, authed_request("GET", "/admin/coupons/SPRING", &token, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &state,
        authed_request(
            "POST",
            "/admin/promos",
            &token,
            Some(json!({"code": "old", "discount": 5, "uses_left": 10})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "OLD");
    let (status, _) = send(&state, authed_request("DELETE", "/admin/promos/old", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_orders_listing_and_cleanup() {
    let (state, _dir) = create_test_app_state();
    let token = admin_token(&state);
    {
        let conn = state.db.get().unwrap();
        let old = chrono::Utc::now().timestamp() - 3 * 3600;
        queries::create_order_at(&conn, "OLD001", "AAAAA", old).unwrap();
        queries::create_order(&conn, "NEW001", "BBBBB").unwrap();
        queries::create_order_at(&conn, "PAID01", "CCCCC", old).unwrap();
        queries::mark_paid(&conn, "PAID01").unwrap();
    }

    let (status, body) = send(&state, authed_request("GET", "/admin/orders?filter=pending", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);

    let (status, body) = send(
        &state,
        authed_request("POST", "/admin/orders/cleanup", &token, Some(json!({"older_than_minutes": 60}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 1);

    let (_, body) = send(&state, authed_request("GET", "/admin/orders", &token, None)).await;
    let uids: Vec<&str> = body["orders"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["uid"].as_str().unwrap())
        .collect();
    assert_eq!(uids, vec!["NEW001", "PAID01"]);
}

#[tokio::test]
async fn test_orders_lookup_by_delivered_key() {
    let (state, _dir) = create_test_app_state();
    let token = admin_token(&state);
    {
        let conn = state.db.get().unwrap();
        queries::create_order(&conn, "PAID01", "CCCCC").unwrap();
        queries::attach_fulfillment(&conn, "PAID01", "buyer@example.com", "KEY-777", None).unwrap();
        queries::mark_paid(&conn, "PAID01").unwrap();
        queries::create_order(&conn, "NEW001", "BBBBB").unwrap();
    }

    let (status, body) = send(&state, authed_request("GET", "/admin/orders?key=KEY-777", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["orders"][0]["uid"], "PAID01");
    assert_eq!(body["orders"][0]["email"], "buyer@example.com");

    let (_, body) = send(&state, authed_request("GET", "/admin/orders?key=UNKNOWN", &token, None)).await;
    assert_eq!(body["total"], 0);
    assert!(body["orders"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_prices_and_settings() {
    let (state, _dir) = create_test_app_state();
    let token = admin_token(&state);

    let (status, body) = send(
        &state,
        authed_request("PUT", "/admin/prices/30d", &token, Some(json!({"amount": 199000}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["amount"], 199000);
    assert_eq!(state.prices.get(Period::ThirtyDays).unwrap().amount, 199000);

    let (status, _) = send(
        &state,
        authed_request("PUT", "/admin/prices/30d", &token, Some(json!({"amount": 0}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, mut settings) = send(&state, authed_request("GET", "/admin/settings", &token, None)).await;
    settings["shop_name"] = json!("Night Owl Keys");
    settings["maintenance"] = json!(true);
    let (status, body) = send(&state, authed_request("PUT", "/admin/settings", &token, Some(settings))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["shop_name"], "Night Owl Keys");
    assert!(state.settings.get().unwrap().maintenance);
}

#[tokio::test]
async fn test_broadcast_counts_failures() {
    let (telegram_url, log) = spawn_telegram().await;
    let (state, _dir) = create_test_app_state_with(|config| {
        config.telegram_bot_token = Some("123:abc".into());
        config.telegram_api_url = telegram_url;
    });
    {
        let conn = state.db.get().unwrap();
        queries::upsert_bot_chat(&conn, 42, Some("alice")).unwrap();
        // The fake API refuses negative chat ids
        queries::upsert_bot_chat(&conn, -7, None).unwrap();
    }
    let token = admin_token(&state);

    let (status, body) = send(
        &state,
        authed_request("POST", "/admin/broadcast", &token, Some(json!({"message": "Sale today"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["sent"], 1);
    assert_eq!(body["failed"], 1);
    assert_eq!(log.messages(), vec![(42, "Sale today".to_string())]);
}

#[tokio::test]
async fn test_sync_without_mirror_is_rejected() {
    let (state, _dir) = create_test_app_state();
    let token = admin_token(&state);

    let (status, body) = send(&state, authed_request("POST", "/admin/sync", &token, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Remote mirror is not configured");
}
