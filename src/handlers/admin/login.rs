use axum::{
    Extension,
    extract::State,
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::auth::{
    OTP_TTL_SECS, OtpVerdict, SHARED_PASSWORD_IDENTITY, check_shared_password, clear_session_cookie,
    cooldown_message, create_session, revoke_session, session_cookie,
};
use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::middleware::AdminContext;
use crate::util::{extract_session_token, mask_email};

#[derive(Debug, Deserialize)]
pub struct RequestCodeRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyCodeRequest {
    pub email: String,
    pub code: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Deserialize)]
pub struct PasswordLoginRequest {
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub status: &'static str,
    pub email: String,
    pub expires_at: i64,
    /// For API clients that send a Bearer token instead of the cookie
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub email: String,
    pub expires_at: i64,
    pub shared_password: bool,
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::BadRequest("A valid email address is required".into()));
    }
    Ok(email)
}

fn ensure_admin(state: &AppState, email: &str) -> Result<()> {
    if state
        .settings
        .is_admin_email(&state.config.admin_emails, email)?
    {
        Ok(())
    } else {
        tracing::warn!(email = %mask_email(email), "Login attempt for non-admin email");
        Err(AppError::Forbidden("This email is not allowed to sign in".into()))
    }
}

fn start_session(state: &AppState, email: &str, remember_me: bool) -> Result<Response> {
    let (token, session) = {
        let conn = state.db.get()?;
        create_session(&conn, email, remember_me)?
    };
    let max_age = session.expires_at - session.created_at;
    let body = LoginResponse {
        status: "ok",
        email: session.email,
        expires_at: session.expires_at,
        token: token.clone(),
    };
    Ok((
        [(header::SET_COOKIE, session_cookie(&token, max_age))],
        Json(body),
    )
        .into_response())
}

/// Email a one-time login code to an allow-listed operator.
pub async fn request_code(
    State(state): State<AppState>,
    Json(input): Json<RequestCodeRequest>,
) -> Result<Json<MessageResponse>> {
    let email = normalize_email(&input.email)?;
    ensure_admin(&state, &email)?;

    state
        .otp_limiter
        .check_and_record(&email)
        .map_err(|wait| AppError::TooManyRequests(cooldown_message(wait)))?;

    let code = state.otp.issue(&email);
    state
        .email
        .send_login_code(&email, &code, OTP_TTL_SECS / 60)
        .await?;

    tracing::info!(email = %mask_email(&email), "Login code sent");
    Ok(Json(MessageResponse {
        status: "ok",
        message: format!("A login code was sent to {}", email),
    }))
}

pub async fn verify_code(
    State(state): State<AppState>,
    Json(input): Json<VerifyCodeRequest>,
) -> Result<Response> {
    let email = normalize_email(&input.email)?;

    match state.otp.verify(&email, input.code.trim()) {
        OtpVerdict::Valid => {}
        OtpVerdict::Invalid { attempts_left } => {
            return Err(AppError::Unauthorized(format!(
                "Wrong code, {} attempts left",
                attempts_left
            )));
        }
        OtpVerdict::Expired => {
            return Err(AppError::Unauthorized(
                "Code expired, request a new one".into(),
            ));
        }
        OtpVerdict::TooManyAttempts => {
            return Err(AppError::Unauthorized(
                "Too many wrong attempts, request a new code".into(),
            ));
        }
        OtpVerdict::Missing => {
            return Err(AppError::Unauthorized(
                "No pending code for this email, request one first".into(),
            ));
        }
    }

    // The allow-list may have changed since the code was sent
    ensure_admin(&state, &email)?;

    tracing::info!(email = %mask_email(&email), remember_me = input.remember_me, "Admin logged in");
    start_session(&state, &email, input.remember_me)
}

pub async fn password_login(
    State(state): State<AppState>,
    Json(input): Json<PasswordLoginRequest>,
) -> Result<Response> {
    if state.config.admin_password.is_none() {
        return Err(AppError::Forbidden("Password login is disabled".into()));
    }
    if !check_shared_password(state.config.admin_password.as_deref(), &input.password) {
        tracing::warn!("Failed shared-password login");
        return Err(AppError::Unauthorized("Wrong password".into()));
    }

    tracing::info!("Admin logged in with shared password");
    start_session(&state, SHARED_PASSWORD_IDENTITY, input.remember_me)
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    if let Some(token) = extract_session_token(&headers) {
        let conn = state.db.get()?;
        revoke_session(&conn, &token)?;
    }
    Ok((
        [(header::SET_COOKIE, clear_session_cookie())],
        Json(MessageResponse {
            status: "ok",
            message: "Logged out".into(),
        }),
    )
        .into_response())
}

pub async fn me(Extension(admin): Extension<AdminContext>) -> Json<MeResponse> {
    Json(MeResponse {
        shared_password: admin.is_shared_password(),
        email: admin.email,
        expires_at: admin.session_expires_at,
    })
}
