//! Shared test harness: temp-dir backed state and fake upstream services.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{Duration, FixedOffset, Utc};
use serde_json::{Value, json};
use tempfile::TempDir;

pub use keyshop::config::{Config, MirrorConfig};
pub use keyshop::db::{AppState, create_pool, init_db, queries};
pub use keyshop::models::Period;

pub fn shop_offset() -> FixedOffset {
    FixedOffset::east_opt(7 * 3600).unwrap()
}

pub fn test_config(dir: &Path) -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        database_path: dir.join("orders.db").to_string_lossy().into_owned(),
        data_dir: dir.join("data"),
        dev_mode: true,
        bank_api_url: None,
        bank_timeout_secs: 5,
        shop_utc_offset_hours: 7,
        sendgrid_api_key: None,
        sendgrid_api_url: "http://127.0.0.1:9".into(),
        from_email: "shop@example.com".into(),
        email_template_path: None,
        delivery_link: "https://example.com/guide".into(),
        telegram_bot_token: None,
        telegram_api_url: "http://127.0.0.1:9".into(),
        telegram_admin_chat_id: Some(1000),
        admin_emails: vec!["admin@example.com".into()],
        admin_password: Some("hunter2".into()),
        mirror: None,
        stale_order_minutes: 60,
        janitor_interval_secs: 600,
        http_timeout_secs: 5,
        payment_checks_per_minute: 100,
        trust_proxy: false,
    }
}

/// Fresh state over a temp dir. Keep the `TempDir` alive for the test.
pub fn create_test_app_state() -> (AppState, TempDir) {
    create_test_app_state_with(|_| {})
}

pub fn create_test_app_state_with(configure: impl FnOnce(&mut Config)) -> (AppState, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    configure(&mut config);

    let pool = create_pool(&config.database_path).unwrap();
    init_db(&pool.get().unwrap()).unwrap();
    let state = AppState::new(config, pool).unwrap();
    (state, dir)
}

pub fn app(state: AppState) -> Router {
    keyshop::handlers::app(state)
}

/// Serve `router` on an ephemeral port and return its base URL.
pub async fn spawn_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn authed_request(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", token));
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// A pending order with a known verification code.
pub fn create_test_order(state: &AppState, uid: &str, code: &str) {
    let conn = state.db.get().unwrap();
    assert!(queries::create_order(&conn, uid, code).unwrap());
}

/// Session token for an allow-listed admin.
pub fn admin_token(state: &AppState) -> String {
    let conn = state.db.get().unwrap();
    let (token, _) = keyshop::auth::create_session(&conn, "admin@example.com", false).unwrap();
    token
}

// ============ Fake bank statement ============

/// An inbound transfer `minutes_ago` minutes before now, in shop time.
pub fn bank_tx(code: &str, amount: i64, minutes_ago: i64) -> Value {
    let at = Utc::now().with_timezone(&shop_offset()) - Duration::minutes(minutes_ago);
    json!({
        "type": "IN",
        "amount": amount.to_string(),
        "description": format!("MBVCB.123 {} CHUYEN TIEN", code),
        "transactionDate": at.format("%d/%m/%Y %H:%M:%S").to_string(),
    })
}

pub fn fake_bank(transactions: Vec<Value>) -> Router {
    let body = json!({ "transactions": transactions });
    Router::new().route("/statement", get(move || async move { axum::Json(body) }))
}

pub async fn spawn_bank(transactions: Vec<Value>) -> String {
    format!("{}/statement", spawn_upstream(fake_bank(transactions)).await)
}

// ============ Fake email provider ============

#[derive(Clone, Default)]
pub struct Mailbox {
    pub sent: Arc<Mutex<Vec<Value>>>,
    pub fail: Arc<Mutex<bool>>,
}

impl Mailbox {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m["personalizations"][0]["to"][0]["email"].as_str().unwrap().to_string())
            .collect()
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

async fn sendgrid_send(State(mailbox): State<Mailbox>, axum::Json(body): axum::Json<Value>) -> Response {
    if *mailbox.fail.lock().unwrap() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "mail server down").into_response();
    }
    mailbox.sent.lock().unwrap().push(body);
    StatusCode::ACCEPTED.into_response()
}

pub async fn spawn_sendgrid() -> (String, Mailbox) {
    let mailbox = Mailbox::default();
    let router = Router::new()
        .route("/v3/mail/send", post(sendgrid_send))
        .with_state(mailbox.clone());
    (spawn_upstream(router).await, mailbox)
}

// ============ Fake Telegram ============

#[derive(Clone, Default)]
pub struct TelegramLog {
    pub messages: Arc<Mutex<Vec<(i64, String)>>>,
}

impl TelegramLog {
    pub fn messages(&self) -> Vec<(i64, String)> {
        self.messages.lock().unwrap().clone()
    }
}

async fn telegram_send(State(log): State<TelegramLog>, axum::Json(body): axum::Json<Value>) -> axum::Json<Value> {
    let chat_id = body["chat_id"].as_i64().unwrap_or_default();
    if chat_id < 0 {
        return axum::Json(json!({"ok": false, "description": "Forbidden: bot was blocked by the user"}));
    }
    let text = body["text"].as_str().unwrap_or_default().to_string();
    log.messages.lock().unwrap().push((chat_id, text));
    axum::Json(json!({"ok": true, "result": {"message_id": 1}}))
}

pub async fn spawn_telegram() -> (String, TelegramLog) {
    let log = TelegramLog::default();
    let router = Router::new()
        .route("/{bot}/sendMessage", post(telegram_send))
        .with_state(log.clone());
    (spawn_upstream(router).await, log)
}

// ============ Fake GitHub contents API ============

#[derive(Clone, Default)]
pub struct FakeRepo {
    pub files: Arc<Mutex<HashMap<String, String>>>,
}

impl FakeRepo {
    pub fn put(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }
}

async fn contents_get(
    State(repo): State<FakeRepo>,
    axum::extract::Path((_owner, _repo, path)): axum::extract::Path<(String, String, String)>,
) -> Response {
    match repo.get(&path) {
        Some(content) => {
            // GitHub wraps base64 at 60 columns
            let encoded = STANDARD.encode(content.as_bytes());
            let wrapped: Vec<String> = encoded
                .as_bytes()
                .chunks(60)
                .map(|c| String::from_utf8_lossy(c).into_owned())
                .collect();
            axum::Json(json!({"sha": format!("sha-{}", content.len()), "content": wrapped.join("\n")}))
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, axum::Json(json!({"message": "Not Found"}))).into_response(),
    }
}

async fn contents_put(
    State(repo): State<FakeRepo>,
    axum::extract::Path((_owner, _repo, path)): axum::extract::Path<(String, String, String)>,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    if repo.get(&path).is_some() && body.get("sha").is_none() {
        return (StatusCode::CONFLICT, "sha required").into_response();
    }
    let bytes = STANDARD.decode(body["content"].as_str().unwrap()).unwrap();
    repo.put(&path, &String::from_utf8(bytes).unwrap());
    (StatusCode::OK, axum::Json(json!({"content": {"path": path}}))).into_response()
}

pub async fn spawn_github() -> (MirrorConfig, FakeRepo) {
    let repo = FakeRepo::default();
    let router = Router::new()
        .route(
            "/repos/{owner}/{repo}/contents/{*path}",
            get(contents_get).put(contents_put),
        )
        .with_state(repo.clone());
    let api_url = spawn_upstream(router).await;
    let config = MirrorConfig {
        token: "test-token".into(),
        owner: "shop".into(),
        repo: "keys".into(),
        branch: None,
        api_url,
    };
    (config, repo)
}
