use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use crate::contact::{ContactRequest, MailError};
use crate::state::AppState;

fn reply(status: StatusCode, error: Option<String>) -> Response {
    let body = match error {
        None => json!({ "ok": true }),
        Some(error) => json!({ "ok": false, "error": error }),
    };
    (status, Json(body)).into_response()
}

/// POST /api/contact
///
/// Relays a contact submission to the configured mail integration. Replies
/// with this endpoint's own `{ok, error}` body rather than `AppError`.
pub async fn submit(
    State(state): State<AppState>,
    body: Result<Json<ContactRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::debug!("Unreadable contact body: {}", rejection);
            ContactRequest::default()
        }
    };

    let message = match request.into_message() {
        Ok(message) => message,
        Err(missing) => return reply(StatusCode::BAD_REQUEST, Some(missing.to_string())),
    };

    let Some(mailer) = state.mailer.as_ref() else {
        tracing::error!("Contact form submitted but no mail integration is configured");
        return reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            Some(MailError::NotConfigured.to_string()),
        );
    };

    match mailer.send_contact(&message).await {
        Ok(()) => reply(StatusCode::OK, None),
        Err(e) => {
            tracing::error!("Contact relay failed: {}", e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, Some(e.to_string()))
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/contact", post(submit))
}
