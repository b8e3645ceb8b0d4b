//! Push-based invalidation of issue lists.
//!
//! Stores publish a `ChangeEvent` per written row on a broadcast channel.
//! Consumers read it through `ChangeStream`, which turns receiver lag into
//! an explicit `Notification::Missed` instead of silently skipping events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::issues::domain::{Issue, IssueId};
use crate::issues::filter::Predicate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity_id: IssueId,
    pub kind: ChangeKind,
    /// The row after the change (before it, for deletes), when the
    /// publisher has it.
    pub payload: Option<Issue>,
}

impl ChangeEvent {
    pub fn with_row(kind: ChangeKind, row: Issue) -> Self {
        Self {
            entity_id: row.id.clone(),
            kind,
            payload: Some(row),
        }
    }

    pub fn bare(kind: ChangeKind, entity_id: IssueId) -> Self {
        Self {
            entity_id,
            kind,
            payload: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Change(ChangeEvent),
    /// The subscriber fell behind and this many events were dropped.
    Missed(u64),
}

/// Subscription handle over a store's change channel.
#[derive(Debug)]
pub struct ChangeStream {
    rx: broadcast::Receiver<ChangeEvent>,
}

impl ChangeStream {
    pub fn new(rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next notification. Returns None once the publisher is gone.
    pub async fn next(&mut self) -> Option<Notification> {
        match self.rx.recv().await {
            Ok(event) => Some(Notification::Change(event)),
            Err(RecvError::Lagged(n)) => Some(Notification::Missed(n)),
            Err(RecvError::Closed) => None,
        }
    }

    /// Non-blocking variant; None when nothing is queued.
    pub fn try_next(&mut self) -> Option<Notification> {
        match self.rx.try_recv() {
            Ok(event) => Some(Notification::Change(event)),
            Err(TryRecvError::Lagged(n)) => Some(Notification::Missed(n)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Refetch,
    Ignore,
}

/// Decides which notifications invalidate the current list and coalesces
/// them into at most one pending refetch.
#[derive(Debug, Default)]
pub struct InvalidationListener {
    pending: bool,
    received: u64,
    coalesced: u64,
}

impl InvalidationListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// `displayed` is whether the changed row is currently in the local list;
    /// such a row may have just left the predicate and still needs refreshing.
    pub fn decide(event: &ChangeEvent, predicate: &Predicate, displayed: bool) -> Decision {
        match event.payload {
            None => Decision::Refetch,
            Some(ref row) if displayed || predicate.matches(row) => Decision::Refetch,
            Some(_) => Decision::Ignore,
        }
    }

    pub fn observe(
        &mut self,
        notification: &Notification,
        predicate: &Predicate,
        displayed: impl Fn(&IssueId) -> bool,
    ) -> Decision {
        self.received += 1;
        let decision = match notification {
            Notification::Missed(n) => {
                tracing::warn!("Change stream lagged, {} events dropped", n);
                Decision::Refetch
            }
            Notification::Change(event) => {
                Self::decide(event, predicate, displayed(&event.entity_id))
            }
        };

        if decision == Decision::Refetch {
            if self.pending {
                self.coalesced += 1;
            }
            self.pending = true;
        }
        decision
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Consume the pending refetch request, if any.
    pub fn take_pending(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Refetch requests merged into an already pending one.
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }
}
