use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::auth::{SHARED_PASSWORD_IDENTITY, resolve_session};
use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::util::extract_session_token;

/// The operator behind an authenticated dashboard request.
#[derive(Debug, Clone)]
pub struct AdminContext {
    pub email: String,
    pub session_expires_at: i64,
}

impl AdminContext {
    pub fn is_shared_password(&self) -> bool {
        self.email == SHARED_PASSWORD_IDENTITY
    }
}

/// Authenticate a dashboard session from the session cookie or a Bearer token.
fn authenticate_admin(state: &AppState, request: &Request) -> Result<AdminContext> {
    let token = extract_session_token(request.headers())
        .ok_or_else(|| AppError::Unauthorized("Login required".into()))?;

    let conn = state.db.get()?;
    let session = resolve_session(&conn, &token)?
        .ok_or_else(|| AppError::Unauthorized("Session expired, please log in again".into()))?;

    // An operator removed from the allow-list loses access immediately
    if session.email != SHARED_PASSWORD_IDENTITY
        && !state
            .settings
            .is_admin_email(&state.config.admin_emails, &session.email)?
    {
        return Err(AppError::Forbidden("This account is no longer an admin".into()));
    }

    Ok(AdminContext {
        email: session.email,
        session_expires_at: session.expires_at,
    })
}

pub async fn admin_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let admin = authenticate_admin(&state, &request)?;
    request.extensions_mut().insert(admin);
    Ok(next.run(request).await)
}
