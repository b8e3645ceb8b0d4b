//! The list controller behind the issue feed, the per-user dashboard and the
//! admin panel.
//!
//! It owns the local issue sequence for one (predicate, page window) and is
//! the only writer of it. Fetches are last-request-wins: every fetch gets a
//! sequence number and a completion whose number is no longer the latest is
//! dropped. Mutations are applied optimistically and either confirmed or
//! rolled back when the gateway answers.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::auth::SessionContext;
use crate::config::ListConfig;
use crate::issues::domain::*;
use crate::issues::export::{issues_to_csv, ExportError};
use crate::issues::filter::{FilterState, Predicate};
use crate::issues::gateway::{GatewayError, IssueGateway, UpvoteState};
use crate::issues::invalidation::{ChangeStream, Decision, InvalidationListener, Notification};
use crate::issues::optimistic::{MutationId, OptimisticEngine};

/// Which issues a list may show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    /// Every issue; anyone may look.
    Public,
    /// Only the signed-in user's own reports.
    Own,
    /// Every issue, for moderators.
    All,
}

/// Which mutations a list offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permissions {
    None,
    /// Upvote and comment.
    Participate,
    /// Participation plus status changes and bulk actions.
    Moderate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListSpec {
    pub scope: ListScope,
    pub permissions: Permissions,
    pub category_filter: bool,
}

impl ListSpec {
    pub fn feed() -> Self {
        Self {
            scope: ListScope::Public,
            permissions: Permissions::Participate,
            category_filter: true,
        }
    }

    pub fn dashboard() -> Self {
        Self {
            scope: ListScope::Own,
            permissions: Permissions::Participate,
            category_filter: false,
        }
    }

    pub fn admin() -> Self {
        Self {
            scope: ListScope::All,
            permissions: Permissions::Moderate,
            category_filter: false,
        }
    }

    /// Read-only listing.
    pub fn browse() -> Self {
        Self {
            scope: ListScope::Public,
            permissions: Permissions::None,
            category_filter: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Please sign in to {action}")]
    SignInRequired { action: &'static str },

    #[error("You need admin privileges to access this page.")]
    AccessDenied,

    #[error("{0}")]
    Validation(ValidationErrors),

    #[error("Issue not found: {0}")]
    NotFound(IssueId),

    #[error(transparent)]
    Remote(#[from] GatewayError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A dismissible message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Replace,
    Append,
}

/// An issued fetch. Completing a ticket that is no longer the latest is a no-op.
#[derive(Debug, Clone)]
pub struct FetchTicket {
    seq: u64,
    predicate: Predicate,
    page: usize,
    prior_page: usize,
    mode: FetchMode,
}

impl FetchTicket {
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn page(&self) -> usize {
        self.page
    }
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub issues: Vec<Issue>,
    pub upvoted: HashSet<IssueId>,
}

/// An optimistic mutation awaiting the gateway's answer.
#[derive(Debug, Clone)]
pub struct MutationTicket {
    id: MutationId,
    ids: Vec<IssueId>,
    failure_title: &'static str,
}

impl MutationTicket {
    pub fn ids(&self) -> &[IssueId] {
        &self.ids
    }
}

fn user_message(err: &GatewayError) -> String {
    match err {
        GatewayError::Transport(msg)
        | GatewayError::Validation(msg)
        | GatewayError::Conflict(msg) => msg.clone(),
        GatewayError::NotFound(_) => "This issue no longer exists.".to_string(),
        GatewayError::Sql(_) | GatewayError::Pool(_) => {
            "Something went wrong. Please try again.".to_string()
        }
    }
}

pub struct ListController {
    gateway: Arc<dyn IssueGateway>,
    session: SessionContext,
    spec: ListSpec,
    filter: FilterState,
    issues: Vec<Issue>,
    optimistic: OptimisticEngine,
    listener: InvalidationListener,
    changes: Option<ChangeStream>,
    latest_fetch: u64,
    load_state: LoadState,
    has_more: bool,
    page_size: usize,
    upvoted: HashSet<IssueId>,
    selection: BTreeSet<IssueId>,
    notices: Vec<Notice>,
}

impl ListController {
    /// Build a controller for `spec`. Own-scope lists need a signed-in user;
    /// moderation lists need an admin.
    pub fn new(
        gateway: Arc<dyn IssueGateway>,
        session: SessionContext,
        spec: ListSpec,
        config: &ListConfig,
    ) -> Result<Self, ControllerError> {
        let owner = match spec.scope {
            ListScope::Own => Some(session.user_id().ok_or(ControllerError::SignInRequired {
                action: "view your dashboard",
            })?),
            ListScope::Public | ListScope::All => None,
        };

        if spec.permissions == Permissions::Moderate || spec.scope == ListScope::All {
            if !session.is_signed_in() {
                return Err(ControllerError::SignInRequired {
                    action: "open the admin panel",
                });
            }
            if !session.is_admin() {
                tracing::warn!("Non-admin user denied moderation list");
                return Err(ControllerError::AccessDenied);
            }
        }

        let changes = Some(gateway.subscribe());
        Ok(Self {
            gateway,
            session,
            spec,
            filter: FilterState::new(owner, Duration::from_millis(config.search_debounce_ms)),
            issues: Vec::new(),
            optimistic: OptimisticEngine::new(),
            listener: InvalidationListener::new(),
            changes,
            latest_fetch: 0,
            load_state: LoadState::Idle,
            has_more: false,
            page_size: config.page_size.max(1),
            upvoted: HashSet::new(),
            selection: BTreeSet::new(),
            notices: Vec::new(),
        })
    }

    // -- Accessors --

    pub fn spec(&self) -> ListSpec {
        self.spec
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn issue(&self, id: &IssueId) -> Option<&Issue> {
        self.issues.iter().find(|i| &i.id == id)
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn page(&self) -> usize {
        self.filter.page()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    pub fn stats(&self) -> IssueStats {
        IssueStats::tally(&self.issues)
    }

    pub fn has_upvoted(&self, id: &IssueId) -> bool {
        self.upvoted.contains(id)
    }

    /// True while the displayed values of `id` are unconfirmed.
    pub fn is_optimistic(&self, id: &IssueId) -> bool {
        self.optimistic.is_pending(id)
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn notify(&mut self, level: NoticeLevel, title: impl Into<String>, message: impl Into<String>) {
        self.notices.push(Notice {
            level,
            title: title.into(),
            message: message.into(),
        });
    }

    fn contains(&self, id: &IssueId) -> bool {
        self.issues.iter().any(|i| &i.id == id)
    }

    // -- Fetching --

    /// Issue a fetch of the current predicate and page. `prior_page` is
    /// restored if the fetch fails.
    pub fn begin_fetch(&mut self, mode: FetchMode, prior_page: usize) -> FetchTicket {
        self.latest_fetch += 1;
        self.load_state = LoadState::Loading;
        FetchTicket {
            seq: self.latest_fetch,
            predicate: self.filter.predicate(),
            page: self.filter.page(),
            prior_page,
            mode,
        }
    }

    /// Run the remote side of a fetch.
    pub async fn load(&self, ticket: &FetchTicket) -> Result<Page, GatewayError> {
        let issues = self
            .gateway
            .fetch_page(&ticket.predicate, ticket.page, self.page_size)
            .await?;

        let upvoted = match self.session.user_id() {
            Some(user) if self.spec.permissions >= Permissions::Participate => {
                let ids: Vec<IssueId> = issues.iter().map(|i| i.id.clone()).collect();
                self.gateway.upvoted_among(&user, &ids).await?
            }
            _ => HashSet::new(),
        };

        Ok(Page { issues, upvoted })
    }

    /// Apply a fetch result. Returns Ok(false) when the ticket was superseded.
    pub fn complete_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<Page, GatewayError>,
    ) -> Result<bool, ControllerError> {
        if ticket.seq != self.latest_fetch {
            tracing::debug!(
                "Discarding stale fetch {} (latest is {})",
                ticket.seq,
                self.latest_fetch
            );
            return Ok(false);
        }

        match result {
            Ok(page) => {
                self.has_more = page.issues.len() == self.page_size;
                self.optimistic.reconcile(&page.issues);
                match ticket.mode {
                    FetchMode::Replace => {
                        self.issues = page.issues;
                        self.upvoted = page.upvoted;
                        let issues = &self.issues;
                        self.selection
                            .retain(|id| issues.iter().any(|i| &i.id == id));
                    }
                    FetchMode::Append => {
                        for issue in page.issues {
                            if !self.contains(&issue.id) {
                                self.issues.push(issue);
                            }
                        }
                        self.upvoted.extend(page.upvoted);
                    }
                }
                self.load_state = LoadState::Ready;
                Ok(true)
            }
            Err(err) => {
                tracing::warn!("Issue fetch failed: {}", err);
                let message = user_message(&err);
                self.filter.set_page(ticket.prior_page);
                self.load_state = LoadState::Failed(message.clone());
                self.notify(NoticeLevel::Error, "Unable to load issues", message);
                Err(ControllerError::Remote(err))
            }
        }
    }

    async fn fetch(&mut self, mode: FetchMode, prior_page: usize) -> Result<bool, ControllerError> {
        let ticket = self.begin_fetch(mode, prior_page);
        let result = self.load(&ticket).await;
        self.complete_fetch(ticket, result)
    }

    /// Reload page 0 of the current predicate, replacing the sequence.
    pub async fn refresh(&mut self) -> Result<bool, ControllerError> {
        let prior = self.filter.page();
        self.filter.reset_page();
        self.fetch(FetchMode::Replace, prior).await
    }

    pub async fn set_status_filter(
        &mut self,
        status: Option<IssueStatus>,
    ) -> Result<bool, ControllerError> {
        if !self.filter.set_status(status) {
            return Ok(false);
        }
        self.fetch(FetchMode::Replace, 0).await
    }

    pub async fn set_category_filter(
        &mut self,
        category: Option<Category>,
    ) -> Result<bool, ControllerError> {
        if !self.spec.category_filter {
            tracing::debug!("Category filter is not offered on this list");
            return Ok(false);
        }
        if !self.filter.set_category(category) {
            return Ok(false);
        }
        self.fetch(FetchMode::Replace, 0).await
    }

    /// Record a keystroke in the search box. Nothing is fetched until the
    /// input settles.
    pub fn search_input(&mut self, raw: impl Into<String>) {
        self.filter.input_search(raw, Instant::now());
    }

    /// Promote settled search input; refetches only if the effective term changed.
    pub async fn settle_search(&mut self) -> Result<bool, ControllerError> {
        if !self.filter.settle_search(Instant::now()) {
            return Ok(false);
        }
        self.fetch(FetchMode::Replace, 0).await
    }

    /// Sleep out the debounce window, then settle.
    pub async fn wait_for_search(&mut self) -> Result<bool, ControllerError> {
        let Some(deadline) = self.filter.search_deadline() else {
            return Ok(false);
        };
        tokio::time::sleep_until(deadline).await;
        self.settle_search().await
    }

    /// Append the next page (feed and dashboard).
    pub async fn load_more(&mut self) -> Result<bool, ControllerError> {
        if !self.has_more {
            return Ok(false);
        }
        let prior = self.filter.page();
        self.filter.next_page();
        self.fetch(FetchMode::Append, prior).await
    }

    /// Replace the sequence with the next page (admin panel).
    pub async fn next_page(&mut self) -> Result<bool, ControllerError> {
        if !self.has_more {
            return Ok(false);
        }
        let prior = self.filter.page();
        self.filter.next_page();
        self.fetch(FetchMode::Replace, prior).await
    }

    pub async fn previous_page(&mut self) -> Result<bool, ControllerError> {
        let prior = self.filter.page();
        if !self.filter.previous_page() {
            return Ok(false);
        }
        self.fetch(FetchMode::Replace, prior).await
    }

    // -- Mutations --

    fn require_session(&mut self, action: &'static str) -> Result<UserId, ControllerError> {
        match self.session.user_id() {
            Some(user) => Ok(user),
            None => {
                self.notify(
                    NoticeLevel::Warning,
                    "Sign in required",
                    format!("Please sign in to {}.", action),
                );
                Err(ControllerError::SignInRequired { action })
            }
        }
    }

    fn require(&mut self, needed: Permissions) -> Result<(), ControllerError> {
        if self.spec.permissions < needed {
            return Err(ControllerError::AccessDenied);
        }
        if needed == Permissions::Moderate && !self.session.is_admin() {
            self.notify(
                NoticeLevel::Error,
                "Access Denied",
                "You need admin privileges to access this page.",
            );
            return Err(ControllerError::AccessDenied);
        }
        Ok(())
    }

    /// Apply `patch` optimistically to `ids`.
    pub fn begin_mutation(
        &mut self,
        ids: Vec<IssueId>,
        patch: IssuePatch,
        failure_title: &'static str,
    ) -> MutationTicket {
        let id = self.optimistic.apply(&mut self.issues, &ids, patch);
        MutationTicket {
            id,
            ids,
            failure_title,
        }
    }

    /// Confirm or roll back a mutation with the gateway's answer.
    pub fn complete_mutation<T>(
        &mut self,
        ticket: MutationTicket,
        result: Result<T, GatewayError>,
    ) -> Result<T, ControllerError> {
        match result {
            Ok(value) => {
                self.optimistic.confirm(ticket.id, &ticket.ids);
                Ok(value)
            }
            Err(err) => {
                let restored = self
                    .optimistic
                    .rollback(&mut self.issues, ticket.id, &ticket.ids);
                tracing::warn!(
                    "Mutation {} failed, rolled back {} issue(s): {}",
                    ticket.id,
                    restored.len(),
                    err
                );
                self.notify(NoticeLevel::Error, ticket.failure_title, user_message(&err));
                Err(ControllerError::Remote(err))
            }
        }
    }

    /// Move an issue along a moderation edge. Returns Ok(false) for edges the
    /// state machine does not allow, including self transitions.
    pub async fn set_status(
        &mut self,
        id: &IssueId,
        target: IssueStatus,
    ) -> Result<bool, ControllerError> {
        self.require(Permissions::Moderate)?;
        let current = self
            .issue(id)
            .map(|i| i.status)
            .ok_or_else(|| ControllerError::NotFound(id.clone()))?;

        if let Err(e) = current.transition(target) {
            tracing::debug!("Ignoring status change for {}: {}", id, e);
            return Ok(false);
        }

        let patch = IssuePatch::status(target);
        let ticket = self.begin_mutation(vec![id.clone()], patch, "Status update failed");
        let result = self.gateway.mutate(id, &patch).await;
        self.complete_mutation(ticket, result)?;
        Ok(true)
    }

    pub async fn apply_action(
        &mut self,
        id: &IssueId,
        action: ModerationAction,
    ) -> Result<bool, ControllerError> {
        self.set_status(id, action.target()).await
    }

    /// Resolve every selected issue as one batch; all succeed or all roll back.
    pub async fn bulk_resolve(&mut self) -> Result<usize, ControllerError> {
        self.require(Permissions::Moderate)?;

        let ids: Vec<IssueId> = self.selection.iter().cloned().collect();
        if ids.is_empty() {
            self.notify(
                NoticeLevel::Warning,
                "No issues selected",
                "Select at least one issue to resolve.",
            );
            return Err(ControllerError::Validation(ValidationErrors::single(
                "selection",
                "No issues selected",
            )));
        }

        let patch = IssuePatch::status(IssueStatus::Resolved);
        let ticket = self.begin_mutation(ids.clone(), patch, "Bulk update failed");
        let result = self.gateway.bulk_mutate(&ids, &patch).await;
        self.complete_mutation(ticket, result)?;

        self.selection.clear();
        self.notify(
            NoticeLevel::Success,
            "Bulk update complete",
            format!("{} issue(s) marked as resolved.", ids.len()),
        );
        Ok(ids.len())
    }

    /// Toggle the signed-in user's upvote. Anonymous users get a sign-in
    /// prompt and nothing is sent.
    pub async fn toggle_upvote(&mut self, id: &IssueId) -> Result<UpvoteState, ControllerError> {
        let user = self.require_session("upvote issues")?;
        self.require(Permissions::Participate)?;
        let count = self
            .issue(id)
            .map(|i| i.upvotes_count)
            .ok_or_else(|| ControllerError::NotFound(id.clone()))?;

        let was_upvoted = self.upvoted.contains(id);
        let optimistic_count = if was_upvoted {
            count.saturating_sub(1)
        } else {
            count + 1
        };
        self.set_upvoted(id, !was_upvoted);

        let ticket = self.begin_mutation(
            vec![id.clone()],
            IssuePatch::upvotes(optimistic_count),
            "Could not update upvote",
        );
        let result = self.gateway.toggle_upvote(id, &user).await;
        match self.complete_mutation(ticket, result) {
            Ok(state) => {
                // The server count also reflects other users' votes
                self.set_upvoted(id, state.upvoted);
                if let Some(issue) = self.issues.iter_mut().find(|i| &i.id == id) {
                    issue.upvotes_count = state.upvotes_count;
                }
                Ok(state)
            }
            Err(e) => {
                self.set_upvoted(id, was_upvoted);
                Err(e)
            }
        }
    }

    fn set_upvoted(&mut self, id: &IssueId, upvoted: bool) {
        if upvoted {
            self.upvoted.insert(id.clone());
        } else {
            self.upvoted.remove(id);
        }
    }

    /// Post a comment. Empty content is rejected before anything is sent.
    pub async fn add_comment(
        &mut self,
        id: &IssueId,
        content: &str,
    ) -> Result<Comment, ControllerError> {
        let user = self.require_session("comment")?;
        self.require(Permissions::Participate)?;
        let content = validate_comment(content).map_err(ControllerError::Validation)?;
        let count = self
            .issue(id)
            .map(|i| i.comments_count)
            .ok_or_else(|| ControllerError::NotFound(id.clone()))?;

        let ticket = self.begin_mutation(
            vec![id.clone()],
            IssuePatch::comments(count + 1),
            "Could not post comment",
        );
        let result = self.gateway.add_comment(id, &user, &content).await;
        self.complete_mutation(ticket, result)
    }

    // -- Selection --

    /// Returns the new selection state of `id`; ids not on the page are ignored.
    pub fn toggle_selected(&mut self, id: &IssueId) -> bool {
        if !self.contains(id) {
            return false;
        }
        if self.selection.remove(id) {
            false
        } else {
            self.selection.insert(id.clone());
            true
        }
    }

    pub fn select_all_visible(&mut self) {
        self.selection = self.issues.iter().map(|i| i.id.clone()).collect();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn selection(&self) -> &BTreeSet<IssueId> {
        &self.selection
    }

    // -- Invalidation --

    /// Feed one push notification to the listener.
    pub fn observe(&mut self, notification: &Notification) -> Decision {
        let predicate = self.filter.predicate();
        let issues = &self.issues;
        self.listener
            .observe(notification, &predicate, |id| issues.iter().any(|i| &i.id == id))
    }

    /// Drain queued notifications without waiting. Returns how many were read.
    pub fn pump_changes(&mut self) -> usize {
        let mut drained = Vec::new();
        if let Some(stream) = self.changes.as_mut() {
            while let Some(notification) = stream.try_next() {
                drained.push(notification);
            }
        }
        for notification in &drained {
            self.observe(notification);
        }
        drained.len()
    }

    /// Drain queued notifications and run at most one refetch of page 0 for
    /// all of them.
    pub async fn sync_changes(&mut self) -> Result<bool, ControllerError> {
        self.pump_changes();
        if !self.listener.take_pending() {
            return Ok(false);
        }
        self.refresh().await
    }

    /// Wait for the next push notification, then sync. Returns Ok(false)
    /// once the change feed has closed.
    pub async fn wait_for_change(&mut self) -> Result<bool, ControllerError> {
        let notification = match self.changes.as_mut() {
            Some(stream) => stream.next().await,
            None => None,
        };
        let Some(notification) = notification else {
            self.changes = None;
            return Ok(false);
        };
        self.observe(&notification);
        self.sync_changes().await?;
        Ok(true)
    }

    pub fn listener(&self) -> &InvalidationListener {
        &self.listener
    }

    // -- Export --

    pub fn export_csv(&mut self) -> Result<String, ControllerError> {
        self.require(Permissions::Moderate)?;
        Ok(issues_to_csv(&self.issues)?)
    }
}
