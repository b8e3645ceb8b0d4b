use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;

/// Headroom over the file size limit for multipart framing.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::BadRequest("File too large".into())
    } else {
        AppError::BadRequest(e.body_text())
    }
}

/// POST /api/uploads
///
/// Takes the multipart field `file` and returns `{name, url}`.
pub async fn upload(
    State(state): State<AppState>,
    user: CurrentUser,
    mut multipart: Multipart,
) -> AppResult<Response> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let original_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(multipart_error)?;
        let stored = state.store.put(&original_name, &bytes).await?;
        tracing::info!("{} uploaded {}", user.id, stored.name);
        return Ok((StatusCode::CREATED, Json(stored)).into_response());
    }

    Err(AppError::BadRequest("Missing file field".into()))
}

/// GET /uploads/{name}
pub async fn serve(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Response> {
    let bytes = state.store.get(&name).await?;
    let mime = mime_guess::from_path(&name).first_or_octet_stream();
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.as_ref().to_string()),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable".to_string()),
        ],
        bytes,
    )
        .into_response())
}

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/api/uploads",
            post(upload).layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD)),
        )
        .route("/uploads/{name}", get(serve))
}
