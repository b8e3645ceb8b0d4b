// Remote collection gateway - isolates every issue-store side effect
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::issues::domain::*;
use crate::issues::filter::Predicate;
use crate::issues::invalidation::{ChangeEvent, ChangeKind, ChangeStream};
use crate::state::DbPool;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{0}")]
    Transport(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Database error: {0}")]
    Pool(#[from] r2d2::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpvoteState {
    pub upvoted: bool,
    pub upvotes_count: u32,
}

/// Everything the list controller and the HTTP layer need from the issue store.
/// Implementations never retry internally.
#[async_trait]
pub trait IssueGateway: Send + Sync {
    /// One page of issues matching `predicate`, newest first (ties by id, descending).
    async fn fetch_page(
        &self,
        predicate: &Predicate,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Issue>, GatewayError>;

    async fn get(&self, id: &IssueId) -> Result<Issue, GatewayError>;

    /// Apply a moderation patch to one issue. Only `status` is writable.
    async fn mutate(&self, id: &IssueId, patch: &IssuePatch) -> Result<Issue, GatewayError>;

    /// Apply a moderation patch to every listed issue, all or nothing.
    async fn bulk_mutate(
        &self,
        ids: &[IssueId],
        patch: &IssuePatch,
    ) -> Result<Vec<Issue>, GatewayError>;

    async fn toggle_upvote(&self, id: &IssueId, user: &UserId)
        -> Result<UpvoteState, GatewayError>;

    /// The subset of `ids` the user has upvoted.
    async fn upvoted_among(
        &self,
        user: &UserId,
        ids: &[IssueId],
    ) -> Result<HashSet<IssueId>, GatewayError>;

    async fn add_comment(
        &self,
        id: &IssueId,
        user: &UserId,
        content: &str,
    ) -> Result<Comment, GatewayError>;

    /// Comments on an issue, oldest first.
    async fn comments(&self, id: &IssueId) -> Result<Vec<Comment>, GatewayError>;

    async fn create(&self, user: &UserId, issue: NewIssue) -> Result<Issue, GatewayError>;

    fn subscribe(&self) -> ChangeStream;
}

/// SQLite implementation. Every successful write is published on the
/// change channel with the written row as payload.
pub struct SqliteIssueGateway {
    pool: DbPool,
    changes: broadcast::Sender<ChangeEvent>,
}

const ISSUE_COLUMNS: &str = "i.id, i.title, i.description, i.category, i.status, \
     i.latitude, i.longitude, i.address, i.image_url, i.upvotes_count, \
     i.comments_count, i.created_at, i.user_id, p.full_name";

impl SqliteIssueGateway {
    pub fn new(pool: DbPool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { pool, changes }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Move an issue from `from` to `to`, failing with `Conflict` when the
    /// stored status is no longer `from`.
    pub async fn transition(
        &self,
        id: &IssueId,
        from: IssueStatus,
        to: IssueStatus,
    ) -> Result<Issue, GatewayError> {
        from.transition(to)
            .map_err(|e| GatewayError::Validation(e.to_string()))?;
        let conn = self.pool.get()?;

        let rows = conn.execute(
            "UPDATE issues SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![to.as_str(), id.as_str(), from.as_str()],
        )?;
        if rows == 0 {
            let current = load_issue(&conn, id)?;
            return Err(GatewayError::Conflict(format!(
                "Issue is now {}, not {}",
                current.status, from
            )));
        }

        let issue = load_issue(&conn, id)?;
        self.publish(ChangeKind::Update, &issue);
        Ok(issue)
    }

    fn publish(&self, kind: ChangeKind, row: &Issue) {
        // No subscribers is fine
        let _ = self.changes.send(ChangeEvent::with_row(kind, row.clone()));
    }
}

pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = ParseEnumError>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: IssueId(row.get(0)?),
        title: row.get(1)?,
        description: row.get(2)?,
        category: parse_column(row, 3)?,
        status: parse_column(row, 4)?,
        latitude: row.get(5)?,
        longitude: row.get(6)?,
        address: row.get(7)?,
        image_url: row.get(8)?,
        upvotes_count: row.get(9)?,
        comments_count: row.get(10)?,
        created_at: parse_timestamp(row, 11)?,
        user_id: UserId(row.get(12)?),
        reporter_name: row.get(13)?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        issue_id: IssueId(row.get(1)?),
        user_id: UserId(row.get(2)?),
        content: row.get(3)?,
        created_at: parse_timestamp(row, 4)?,
        author_name: row.get(5)?,
    })
}

fn load_issue(conn: &Connection, id: &IssueId) -> Result<Issue, GatewayError> {
    conn.query_row(
        &format!(
            "SELECT {ISSUE_COLUMNS} FROM issues i \
             LEFT JOIN profiles p ON p.user_id = i.user_id \
             WHERE i.id = ?1"
        ),
        params![id.as_str()],
        issue_from_row,
    )
    .optional()?
    .ok_or_else(|| GatewayError::NotFound(id.to_string()))
}

/// LIKE pattern for a substring search; `\` is the escape character.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn writable_status(patch: &IssuePatch) -> Result<IssueStatus, GatewayError> {
    if patch.upvotes_count.is_some() || patch.comments_count.is_some() {
        return Err(GatewayError::Validation(
            "Counters are derived and cannot be written".into(),
        ));
    }
    patch
        .status
        .ok_or_else(|| GatewayError::Validation("Nothing to update".into()))
}

/// Row offset of a zero-based page, or None when it does not fit a SQL integer.
pub fn page_offset(page: usize, page_size: usize) -> Option<i64> {
    page.checked_mul(page_size)
        .and_then(|offset| i64::try_from(offset).ok())
}

#[async_trait]
impl IssueGateway for SqliteIssueGateway {
    async fn fetch_page(
        &self,
        predicate: &Predicate,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Issue>, GatewayError> {
        let offset = page_offset(page, page_size)
            .ok_or_else(|| GatewayError::Validation(format!("Page {page} is out of range")))?;
        let limit = i64::try_from(page_size)
            .map_err(|_| GatewayError::Validation("Page size is out of range".into()))?;
        let conn = self.pool.get()?;

        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues i \
             LEFT JOIN profiles p ON p.user_id = i.user_id \
             WHERE (?1 IS NULL OR i.status = ?1) \
               AND (?2 IS NULL OR i.category = ?2) \
               AND (?3 IS NULL OR i.user_id = ?3) \
               AND (?4 IS NULL \
                    OR i.title LIKE ?4 ESCAPE '\\' \
                    OR i.description LIKE ?4 ESCAPE '\\' \
                    OR i.address LIKE ?4 ESCAPE '\\') \
             ORDER BY i.created_at DESC, i.id DESC \
             LIMIT ?5 OFFSET ?6"
        );

        let mut stmt = conn.prepare(&sql)?;
        let issues = stmt
            .query_map(
                params![
                    predicate.status.map(|s| s.as_str()),
                    predicate.category.map(|c| c.as_str()),
                    predicate.owner.as_ref().map(UserId::as_str),
                    predicate.search.as_deref().map(like_pattern),
                    limit,
                    offset,
                ],
                issue_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(issues)
    }

    async fn get(&self, id: &IssueId) -> Result<Issue, GatewayError> {
        let conn = self.pool.get()?;
        load_issue(&conn, id)
    }

    async fn mutate(&self, id: &IssueId, patch: &IssuePatch) -> Result<Issue, GatewayError> {
        let status = writable_status(patch)?;
        let conn = self.pool.get()?;

        let rows = conn.execute(
            "UPDATE issues SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.as_str()],
        )?;
        if rows == 0 {
            return Err(GatewayError::NotFound(id.to_string()));
        }

        let issue = load_issue(&conn, id)?;
        self.publish(ChangeKind::Update, &issue);
        Ok(issue)
    }

    async fn bulk_mutate(
        &self,
        ids: &[IssueId],
        patch: &IssuePatch,
    ) -> Result<Vec<Issue>, GatewayError> {
        let status = writable_status(patch)?;

        let mut unique: Vec<&IssueId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let placeholders = (0..unique.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE issues SET status = ?1 WHERE id IN ({placeholders})");
        let values = std::iter::once(status.as_str()).chain(unique.iter().map(|id| id.as_str()));
        let rows = tx.execute(&sql, params_from_iter(values))?;

        if rows != unique.len() {
            // Dropping the transaction rolls it back
            let missing = unique
                .iter()
                .find(|id| load_issue(&tx, id).is_err())
                .map(|id| id.to_string())
                .unwrap_or_default();
            return Err(GatewayError::NotFound(missing));
        }

        let updated = unique
            .iter()
            .map(|id| load_issue(&tx, id))
            .collect::<Result<Vec<_>, _>>()?;
        tx.commit()?;

        for issue in &updated {
            self.publish(ChangeKind::Update, issue);
        }
        Ok(updated)
    }

    async fn toggle_upvote(
        &self,
        id: &IssueId,
        user: &UserId,
    ) -> Result<UpvoteState, GatewayError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let removed = tx.execute(
            "DELETE FROM upvotes WHERE user_id = ?1 AND issue_id = ?2",
            params![user.as_str(), id.as_str()],
        )?;

        let upvoted = if removed > 0 {
            tx.execute(
                "UPDATE issues SET upvotes_count = MAX(upvotes_count - 1, 0) WHERE id = ?1",
                params![id.as_str()],
            )?;
            false
        } else {
            let rows = tx.execute(
                "UPDATE issues SET upvotes_count = upvotes_count + 1 WHERE id = ?1",
                params![id.as_str()],
            )?;
            if rows == 0 {
                return Err(GatewayError::NotFound(id.to_string()));
            }
            tx.execute(
                "INSERT INTO upvotes (id, user_id, issue_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    uuid::Uuid::now_v7().to_string(),
                    user.as_str(),
                    id.as_str(),
                    timestamp(Utc::now()),
                ],
            )?;
            true
        };

        let issue = load_issue(&tx, id)?;
        tx.commit()?;

        self.publish(ChangeKind::Update, &issue);
        Ok(UpvoteState {
            upvoted,
            upvotes_count: issue.upvotes_count,
        })
    }

    async fn upvoted_among(
        &self,
        user: &UserId,
        ids: &[IssueId],
    ) -> Result<HashSet<IssueId>, GatewayError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let conn = self.pool.get()?;

        let placeholders = (0..ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT issue_id FROM upvotes WHERE user_id = ?1 AND issue_id IN ({placeholders})"
        );
        let values = std::iter::once(user.as_str()).chain(ids.iter().map(IssueId::as_str));

        let mut stmt = conn.prepare(&sql)?;
        let upvoted = stmt
            .query_map(params_from_iter(values), |row| row.get::<_, String>(0))?
            .map(|r| r.map(IssueId))
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(upvoted)
    }

    async fn add_comment(
        &self,
        id: &IssueId,
        user: &UserId,
        content: &str,
    ) -> Result<Comment, GatewayError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let rows = tx.execute(
            "UPDATE issues SET comments_count = comments_count + 1 WHERE id = ?1",
            params![id.as_str()],
        )?;
        if rows == 0 {
            return Err(GatewayError::NotFound(id.to_string()));
        }

        let comment_id = uuid::Uuid::now_v7().to_string();
        tx.execute(
            "INSERT INTO comments (id, user_id, issue_id, content, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                comment_id,
                user.as_str(),
                id.as_str(),
                content,
                timestamp(Utc::now())
            ],
        )?;

        let comment = tx.query_row(
            "SELECT c.id, c.issue_id, c.user_id, c.content, c.created_at, p.full_name \
             FROM comments c LEFT JOIN profiles p ON p.user_id = c.user_id \
             WHERE c.id = ?1",
            params![comment_id],
            comment_from_row,
        )?;
        let issue = load_issue(&tx, id)?;
        tx.commit()?;

        self.publish(ChangeKind::Update, &issue);
        Ok(comment)
    }

    async fn comments(&self, id: &IssueId) -> Result<Vec<Comment>, GatewayError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.issue_id, c.user_id, c.content, c.created_at, p.full_name \
             FROM comments c LEFT JOIN profiles p ON p.user_id = c.user_id \
             WHERE c.issue_id = ?1 \
             ORDER BY c.created_at ASC, c.rowid ASC",
        )?;
        let comments = stmt
            .query_map(params![id.as_str()], comment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    async fn create(&self, user: &UserId, issue: NewIssue) -> Result<Issue, GatewayError> {
        let conn = self.pool.get()?;
        let id = IssueId::generate();

        conn.execute(
            "INSERT INTO issues (id, user_id, title, description, category, status, \
                                 latitude, longitude, address, image_url, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id.as_str(),
                user.as_str(),
                issue.title,
                issue.description,
                issue.category.as_str(),
                IssueStatus::Pending.as_str(),
                issue.latitude,
                issue.longitude,
                issue.address,
                issue.image_url,
                timestamp(Utc::now()),
            ],
        )?;

        let created = load_issue(&conn, &id)?;
        tracing::info!("Issue {} reported by {}", created.id, user);
        self.publish(ChangeKind::Insert, &created);
        Ok(created)
    }

    fn subscribe(&self) -> ChangeStream {
        ChangeStream::new(self.changes.subscribe())
    }
}
