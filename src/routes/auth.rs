use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::{IdentityProvider, Session};
use crate::config::AuthConfig;
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, MaybeUser};
use crate::state::AppState;

// -- Forms --

#[derive(Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    #[serde(default, alias = "fullName")]
    pub full_name: String,
}

#[derive(Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

// -- Cookie helpers --

fn session_cookie(auth: &AuthConfig, token: &str) -> String {
    let max_age_secs = auth.session_hours * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        auth.cookie_name, token, max_age_secs
    )
}

fn clear_session_cookie(auth: &AuthConfig) -> String {
    format!(
        "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0",
        auth.cookie_name
    )
}

fn session_response(auth: &AuthConfig, status: StatusCode, session: Session) -> Response {
    let cookie = session_cookie(auth, &session.token);
    (status, [(header::SET_COOKIE, cookie)], Json(session)).into_response()
}

// -- Handlers --

/// POST /api/auth/signup
pub async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> AppResult<Response> {
    let session = state
        .identity
        .sign_up(&req.email, &req.password, &req.full_name)
        .await?;
    Ok(session_response(&state.config.auth, StatusCode::CREATED, session))
}

/// POST /api/auth/signin
pub async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> AppResult<Response> {
    let session = state.identity.sign_in(&req.email, &req.password).await?;
    Ok(session_response(&state.config.auth, StatusCode::OK, session))
}

/// POST /api/auth/signout
///
/// Always clears the cookie, even when there was no session to end.
pub async fn sign_out(State(state): State<AppState>, MaybeUser(user): MaybeUser) -> AppResult<Response> {
    if let Some(user) = user {
        state.identity.sign_out(&user.token).await?;
    }
    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_session_cookie(&state.config.auth))],
    )
        .into_response())
}

/// GET /api/auth/me
pub async fn me(State(state): State<AppState>, user: CurrentUser) -> AppResult<Response> {
    let session = state
        .identity
        .current(&user.token)
        .await?
        .ok_or(AppError::Unauthorized)?;
    Ok(Json(session).into_response())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/signup", post(sign_up))
        .route("/api/auth/signin", post(sign_in))
        .route("/api/auth/signout", post(sign_out))
        .route("/api/auth/me", get(me))
}
