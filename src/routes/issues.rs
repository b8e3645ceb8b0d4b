use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::error::{AppError, AppResult};
use crate::extractors::{AdminUser, CurrentUser, MaybeUser};
use crate::geocode::resolve_address;
use crate::issues::domain::{
    validate_comment, Category, Issue, IssueId, IssuePatch, IssueReport, IssueStatus,
    ParseEnumError, ValidationErrors,
};
use crate::issues::export::issues_to_csv;
use crate::issues::filter::{normalize_search, Predicate};
use crate::issues::invalidation::Notification;
use crate::issues::gateway::page_offset;
use crate::issues::IssueGateway;
use crate::state::AppState;

const EXPORT_BATCH: usize = 500;

// --- Query and body types ---

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub category: Option<String>,
    pub q: Option<String>,
    pub page: Option<usize>,
    #[serde(default)]
    pub mine: bool,
}

#[derive(Serialize)]
pub struct ListResponse {
    pub issues: Vec<Issue>,
    pub page: usize,
    pub has_more: bool,
    /// Ids on this page the caller has upvoted; empty when signed out.
    pub upvoted: Vec<IssueId>,
}

#[derive(Deserialize)]
pub struct StatusChange {
    pub status: String,
}

#[derive(Deserialize)]
pub struct BulkResolve {
    #[serde(default)]
    pub ids: Vec<IssueId>,
}

#[derive(Deserialize)]
pub struct NewComment {
    #[serde(default)]
    pub content: String,
}

/// Empty or "all" means no filter.
fn parse_filter<T: std::str::FromStr>(
    raw: Option<&str>,
    field: &str,
) -> Result<Option<T>, AppError>
where
    T::Err: std::fmt::Display,
{
    match raw.map(str::trim) {
        None | Some("") | Some("all") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|e: T::Err| AppError::Validation(ValidationErrors::single(field, e.to_string()))),
    }
}

impl ListQuery {
    fn predicate(&self, user: Option<&CurrentUser>) -> AppResult<Predicate> {
        let owner = if self.mine {
            Some(user.ok_or(AppError::Unauthorized)?.user_id())
        } else {
            None
        };
        Ok(Predicate {
            status: parse_filter::<IssueStatus>(self.status.as_deref(), "status")?,
            category: parse_filter::<Category>(self.category.as_deref(), "category")?,
            search: self.q.as_deref().and_then(normalize_search),
            owner,
        })
    }
}

// --- Handlers ---

/// GET /api/issues
pub async fn list(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ListResponse>> {
    let predicate = query.predicate(user.as_ref())?;
    let page = query.page.unwrap_or(0);
    let page_size = state.config.list.page_size;
    if page_offset(page, page_size).is_none() {
        return Err(AppError::Validation(ValidationErrors::single(
            "page",
            "Page is out of range",
        )));
    }

    let issues = state.issues.fetch_page(&predicate, page, page_size).await?;
    let upvoted = match user {
        Some(ref user) if !issues.is_empty() => {
            let ids: Vec<IssueId> = issues.iter().map(|i| i.id.clone()).collect();
            let set = state.issues.upvoted_among(&user.user_id(), &ids).await?;
            ids.into_iter().filter(|id| set.contains(id)).collect()
        }
        _ => Vec::new(),
    };

    Ok(Json(ListResponse {
        has_more: issues.len() == page_size,
        issues,
        page,
        upvoted,
    }))
}

/// POST /api/issues
///
/// An empty address is filled by reverse geocoding the reported point.
pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(report): Json<IssueReport>,
) -> AppResult<Response> {
    let mut new_issue = report.validate().map_err(AppError::Validation)?;
    if new_issue.address.is_empty() {
        new_issue.address = resolve_address(
            state.geocoder.as_deref(),
            new_issue.latitude,
            new_issue.longitude,
        )
        .await;
    }

    let issue = state.issues.create(&user.user_id(), new_issue).await?;
    tracing::info!("Issue {} reported by {}", issue.id, user.id);
    Ok((StatusCode::CREATED, Json(issue)).into_response())
}

/// GET /api/issues/{id}
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Issue>> {
    Ok(Json(state.issues.get(&IssueId::new(id)).await?))
}

/// GET /api/issues/{id}/comments
pub async fn comments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let id = IssueId::new(id);
    // Distinguish "no comments" from "no such issue"
    state.issues.get(&id).await?;
    Ok(Json(state.issues.comments(&id).await?).into_response())
}

/// POST /api/issues/{id}/comments
pub async fn add_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<NewComment>,
) -> AppResult<Response> {
    let content = validate_comment(&body.content).map_err(AppError::Validation)?;
    let comment = state
        .issues
        .add_comment(&IssueId::new(id), &user.user_id(), &content)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)).into_response())
}

/// POST /api/issues/{id}/upvote
pub async fn upvote(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let upvote = state
        .issues
        .toggle_upvote(&IssueId::new(id), &user.user_id())
        .await?;
    Ok(Json(upvote).into_response())
}

/// PATCH /api/issues/{id}/status
pub async fn set_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Json(body): Json<StatusChange>,
) -> AppResult<Json<Issue>> {
    let id = IssueId::new(id);
    let target: IssueStatus = body
        .status
        .parse()
        .map_err(|e: ParseEnumError| AppError::BadRequest(e.to_string()))?;

    let current = state.issues.get(&id).await?;
    let issue = state.issues.transition(&id, current.status, target).await?;
    tracing::info!("{} moved issue {} to {}", admin.id, issue.id, issue.status);
    Ok(Json(issue))
}

/// POST /api/issues/bulk-resolve
pub async fn bulk_resolve(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(body): Json<BulkResolve>,
) -> AppResult<Json<Vec<Issue>>> {
    if body.ids.is_empty() {
        return Err(AppError::Validation(ValidationErrors::single(
            "ids",
            "No issues selected",
        )));
    }
    let updated = state
        .issues
        .bulk_mutate(&body.ids, &IssuePatch::status(IssueStatus::Resolved))
        .await?;
    tracing::info!("{} resolved {} issue(s)", admin.id, updated.len());
    Ok(Json(updated))
}

/// GET /api/issues/export.csv
///
/// Exports every issue matching the same filters as the list endpoint.
pub async fn export_csv(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Response> {
    let predicate = query.predicate(Some(&admin))?;

    let mut all = Vec::new();
    for page in 0.. {
        let batch = state
            .issues
            .fetch_page(&predicate, page, EXPORT_BATCH)
            .await?;
        let done = batch.len() < EXPORT_BATCH;
        all.extend(batch);
        if done {
            break;
        }
    }

    let csv = issues_to_csv(&all).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"civicpulse-issues.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}

fn sse_event(notification: Notification) -> Event {
    match notification {
        Notification::Change(change) => Event::default()
            .event("change")
            .json_data(&change)
            .unwrap_or_else(|e| {
                tracing::warn!("Dropping unserializable change event: {}", e);
                Event::default().event("resync").data("{}")
            }),
        Notification::Missed(n) => {
            tracing::warn!("Change feed subscriber lagged by {} event(s)", n);
            Event::default()
                .event("resync")
                .data(format!("{{\"missed\":{}}}", n))
        }
    }
}

/// GET /api/issues/events
///
/// Server-sent change feed. A subscriber that falls behind gets a single
/// `resync` event and should refetch its list.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let changes = state.issues.subscribe();
    let stream = stream::unfold(changes, |mut changes| async move {
        changes.next().await.map(|n| (n, changes))
    })
    .map(|n| Ok(sse_event(n)));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/issues", get(list).post(create))
        .route("/api/issues/events", get(events))
        .route("/api/issues/export.csv", get(export_csv))
        .route("/api/issues/bulk-resolve", post(bulk_resolve))
        .route("/api/issues/{id}", get(show))
        .route("/api/issues/{id}/comments", get(comments).post(add_comment))
        .route("/api/issues/{id}/upvote", post(upvote))
        .route("/api/issues/{id}/status", patch(set_status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_query_treats_all_as_unfiltered() {
        let query = ListQuery {
            status: Some("all".into()),
            category: Some("".into()),
            q: Some("  pothole ".into()),
            ..ListQuery::default()
        };
        let predicate = query.predicate(None).unwrap();
        assert_eq!(predicate.status, None);
        assert_eq!(predicate.category, None);
        assert_eq!(predicate.search.as_deref(), Some("pothole"));
    }

    #[test]
    fn mine_requires_a_user() {
        let query = ListQuery {
            mine: true,
            ..ListQuery::default()
        };
        assert!(matches!(query.predicate(None), Err(AppError::Unauthorized)));
    }

    #[test]
    fn unknown_status_is_a_validation_error() {
        let query = ListQuery {
            status: Some("closed".into()),
            ..ListQuery::default()
        };
        assert!(matches!(query.predicate(None), Err(AppError::Validation(_))));
    }
}
