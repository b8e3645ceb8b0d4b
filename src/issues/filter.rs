//! Filter, search and pagination state for an issue list.
//!
//! Free-text search is debounced: keystrokes only record the raw term, and
//! the term becomes effective once no further input arrives for the debounce
//! window. Any change to the effective predicate sends the list back to page 0.

use std::time::Duration;
use tokio::time::Instant;

use crate::issues::domain::{Category, Issue, IssueStatus, UserId};

/// The set of issues a list view shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    pub status: Option<IssueStatus>,
    pub category: Option<Category>,
    /// Effective search term; never empty when present.
    pub search: Option<String>,
    pub owner: Option<UserId>,
}

impl Predicate {
    /// Local evaluation of the predicate, used to decide whether a pushed
    /// row can affect the current list.
    pub fn matches(&self, issue: &Issue) -> bool {
        if self.status.is_some_and(|s| s != issue.status) {
            return false;
        }
        if self.category.is_some_and(|c| c != issue.category) {
            return false;
        }
        if let Some(ref owner) = self.owner {
            if owner != &issue.user_id {
                return false;
            }
        }
        match self.search {
            Some(ref term) => {
                let term = term.to_lowercase();
                [&issue.title, &issue.description, &issue.address]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&term))
            }
            None => true,
        }
    }
}

/// Normalize raw search input into an effective term.
pub fn normalize_search(raw: &str) -> Option<String> {
    let cleaned = raw.trim().replace('%', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Trailing-edge debouncer for search input.
#[derive(Debug, Clone)]
pub struct SearchDebouncer {
    delay: Duration,
    pending: Option<(String, Instant)>,
}

impl SearchDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Record new input; restarts the quiet period.
    pub fn input(&mut self, value: impl Into<String>, now: Instant) {
        self.pending = Some((value.into(), now + self.delay));
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, at)| *at)
    }

    /// Returns the settled value once the quiet period has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        match self.pending {
            Some((_, deadline)) if now >= deadline => self.pending.take().map(|(value, _)| value),
            _ => None,
        }
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

#[derive(Debug, Clone)]
pub struct FilterState {
    status: Option<IssueStatus>,
    category: Option<Category>,
    raw_search: String,
    search: Option<String>,
    owner: Option<UserId>,
    page: usize,
    debouncer: SearchDebouncer,
}

impl FilterState {
    pub fn new(owner: Option<UserId>, debounce: Duration) -> Self {
        Self {
            status: None,
            category: None,
            raw_search: String::new(),
            search: None,
            owner,
            page: 0,
            debouncer: SearchDebouncer::new(debounce),
        }
    }

    pub fn predicate(&self) -> Predicate {
        Predicate {
            status: self.status,
            category: self.category,
            search: self.search.clone(),
            owner: self.owner.clone(),
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn raw_search(&self) -> &str {
        &self.raw_search
    }

    pub fn status(&self) -> Option<IssueStatus> {
        self.status
    }

    pub fn category(&self) -> Option<Category> {
        self.category
    }

    /// Returns true when the predicate changed (and the page was reset).
    pub fn set_status(&mut self, status: Option<IssueStatus>) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.page = 0;
        true
    }

    pub fn set_category(&mut self, category: Option<Category>) -> bool {
        if self.category == category {
            return false;
        }
        self.category = category;
        self.page = 0;
        true
    }

    pub fn input_search(&mut self, raw: impl Into<String>, now: Instant) {
        let raw = raw.into();
        self.debouncer.input(raw.clone(), now);
        self.raw_search = raw;
    }

    pub fn search_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// Promote settled input to the effective search term.
    /// Returns true only when the effective term actually changed.
    pub fn settle_search(&mut self, now: Instant) -> bool {
        let Some(raw) = self.debouncer.poll(now) else {
            return false;
        };
        let term = normalize_search(&raw);
        if term == self.search {
            return false;
        }
        self.search = term;
        self.page = 0;
        true
    }

    pub fn next_page(&mut self) {
        self.page += 1;
    }

    pub fn previous_page(&mut self) -> bool {
        if self.page == 0 {
            return false;
        }
        self.page -= 1;
        true
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = page;
    }

    pub fn reset_page(&mut self) {
        self.page = 0;
    }
}
