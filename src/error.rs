use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::auth::AuthError;
use crate::issues::domain::ValidationErrors;
use crate::issues::gateway::GatewayError;
use crate::uploads::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Unauthorized")]
    Unauthorized,

    /// A failed sign-in; the message is shown as is.
    #[error("{0}")]
    AuthFailed(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation failed")]
    Validation(ValidationErrors),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(_) => AppError::NotFound,
            GatewayError::Validation(msg) => AppError::BadRequest(msg),
            GatewayError::Sql(e) => AppError::Database(e),
            GatewayError::Pool(e) => AppError::Pool(e),
            GatewayError::Transport(msg) => AppError::Internal(msg),
            GatewayError::Conflict(msg) => AppError::Conflict(msg),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials | AuthError::SessionExpired => {
                AppError::AuthFailed(err.to_string())
            }
            AuthError::SignUpRejected => AppError::Conflict(err.to_string()),
            AuthError::Validation(errors) => AppError::Validation(errors),
            AuthError::Sql(e) => AppError::Database(e),
            AuthError::Pool(e) => AppError::Pool(e),
            AuthError::Hash(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TooLarge { .. } | StoreError::InvalidName(_) => {
                AppError::BadRequest(err.to_string())
            }
            StoreError::NotFound => AppError::NotFound,
            StoreError::Io(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::AuthFailed(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                "You need admin privileges to access this page.".to_string(),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Validation(errors) => {
                let body = serde_json::json!({
                    "error": "Validation failed",
                    "fields": errors,
                });
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn response_status(err: AppError) -> StatusCode {
        let response = err.into_response();
        response.status()
    }

    #[test]
    fn not_found_returns_404() {
        assert_eq!(response_status(AppError::NotFound), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unauthorized_returns_401() {
        assert_eq!(
            response_status(AppError::Unauthorized),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn forbidden_returns_403() {
        assert_eq!(response_status(AppError::Forbidden), StatusCode::FORBIDDEN);
    }

    #[test]
    fn validation_returns_400() {
        let mut errors = ValidationErrors::default();
        errors.add("title", "Title is required");
        assert_eq!(
            response_status(AppError::Validation(errors)),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn gateway_not_found_maps_to_404() {
        let err: AppError = GatewayError::NotFound("issue-1".into()).into();
        assert_eq!(response_status(err), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_credentials_map_to_401() {
        let err: AppError = AuthError::InvalidCredentials.into();
        assert_eq!(response_status(err), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn internal_returns_500() {
        assert_eq!(
            response_status(AppError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
