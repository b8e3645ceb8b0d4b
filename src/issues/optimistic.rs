//! Optimistic mutation bookkeeping.
//!
//! Each issue id has at most one rollback record. The record holds the
//! last server-confirmed values of the mutable fields plus every mutation
//! still in flight for that id. Confirming a mutation folds its patch into
//! the baseline; rolling back restores the baseline and drops the record,
//! so a rollback never lands on an intermediate optimistic value.

use std::collections::HashMap;

use crate::issues::domain::{Issue, IssueId, IssuePatch};

pub type MutationId = u64;

#[derive(Debug, Clone)]
struct Pending {
    baseline: IssuePatch,
    outstanding: Vec<(MutationId, IssuePatch)>,
}

impl Pending {
    fn combined(&self) -> IssuePatch {
        self.outstanding
            .iter()
            .fold(IssuePatch::default(), |acc, (_, patch)| acc.merge(*patch))
    }

    fn position(&self, mutation: MutationId) -> Option<usize> {
        self.outstanding.iter().position(|(id, _)| *id == mutation)
    }
}

fn baseline_of(issue: &Issue) -> IssuePatch {
    IssuePatch {
        status: Some(issue.status),
        upvotes_count: Some(issue.upvotes_count),
        comments_count: Some(issue.comments_count),
    }
}

/// Restrict `values` to the fields `touched` sets.
fn restrict(values: IssuePatch, touched: IssuePatch) -> IssuePatch {
    IssuePatch {
        status: touched.status.and(values.status),
        upvotes_count: touched.upvotes_count.and(values.upvotes_count),
        comments_count: touched.comments_count.and(values.comments_count),
    }
}

#[derive(Debug, Default)]
pub struct OptimisticEngine {
    records: HashMap<IssueId, Pending>,
    next_id: MutationId,
}

impl OptimisticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `patch` locally to every listed id present in `issues`.
    /// Ids not present locally are skipped.
    pub fn apply(&mut self, issues: &mut [Issue], ids: &[IssueId], patch: IssuePatch) -> MutationId {
        self.next_id += 1;
        let mutation = self.next_id;

        for issue in issues.iter_mut().filter(|i| ids.contains(&i.id)) {
            let record = self
                .records
                .entry(issue.id.clone())
                .or_insert_with(|| Pending {
                    baseline: baseline_of(issue),
                    outstanding: Vec::new(),
                });
            record.outstanding.push((mutation, patch));
            issue.apply(&patch);
        }

        mutation
    }

    /// The remote accepted `mutation`; its values become the confirmed baseline.
    pub fn confirm(&mut self, mutation: MutationId, ids: &[IssueId]) {
        for id in ids {
            let Some(record) = self.records.get_mut(id) else {
                continue;
            };
            let Some(pos) = record.position(mutation) else {
                continue;
            };
            let (_, patch) = record.outstanding.remove(pos);
            record.baseline = record.baseline.merge(patch);
            if record.outstanding.is_empty() {
                self.records.remove(id);
            }
        }
    }

    /// The remote rejected `mutation`; restore the last confirmed values.
    /// Returns the ids whose local values were restored.
    pub fn rollback(
        &mut self,
        issues: &mut [Issue],
        mutation: MutationId,
        ids: &[IssueId],
    ) -> Vec<IssueId> {
        let mut restored = Vec::new();
        for id in ids {
            let owns_mutation = self
                .records
                .get(id)
                .is_some_and(|record| record.position(mutation).is_some());
            if !owns_mutation {
                continue;
            }
            let Some(record) = self.records.remove(id) else {
                continue;
            };
            let restore = restrict(record.baseline, record.combined());
            if let Some(issue) = issues.iter_mut().find(|i| &i.id == id) {
                issue.apply(&restore);
                restored.push(id.clone());
            }
        }
        restored
    }

    /// Reconcile freshly fetched rows with in-flight records. A record
    /// survives only while the server row already shows its optimistic
    /// values; otherwise the server value stands and the record is dropped.
    pub fn reconcile(&mut self, fresh: &[Issue]) {
        self.records.retain(|id, record| match fresh.iter().find(|i| &i.id == id) {
            Some(row) => row.reflects(&record.combined()),
            None => true,
        });
    }

    pub fn is_pending(&self, id: &IssueId) -> bool {
        self.records.contains_key(id)
    }

    /// Last confirmed values of the fields with mutations in flight.
    pub fn baseline(&self, id: &IssueId) -> Option<IssuePatch> {
        self.records
            .get(id)
            .map(|record| restrict(record.baseline, record.combined()))
    }

    pub fn pending_count(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issues::domain::fixtures;
    use crate::issues::domain::IssueStatus::*;

    fn ids(list: &[&str]) -> Vec<IssueId> {
        list.iter().map(|s| IssueId::new(*s)).collect()
    }

    #[test]
    fn test_confirm_keeps_sent_value() {
        let mut issues = vec![fixtures::issue("a", Pending)];
        let mut engine = OptimisticEngine::new();

        let m = engine.apply(&mut issues, &ids(&["a"]), IssuePatch::status(InProgress));
        assert_eq!(issues[0].status, InProgress);
        assert!(engine.is_pending(&IssueId::new("a")));

        engine.confirm(m, &ids(&["a"]));
        assert_eq!(issues[0].status, InProgress);
        assert!(!engine.is_pending(&IssueId::new("a")));
    }

    #[test]
    fn test_rollback_restores_pre_mutation_value() {
        let mut issues = vec![fixtures::issue("a", Resolved)];
        let mut engine = OptimisticEngine::new();

        let m = engine.apply(&mut issues, &ids(&["a"]), IssuePatch::status(Pending));
        let restored = engine.rollback(&mut issues, m, &ids(&["a"]));
        assert_eq!(restored, ids(&["a"]));
        assert_eq!(issues[0].status, Resolved);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn test_second_mutation_rolls_back_to_original_not_intermediate() {
        let mut issues = vec![fixtures::issue("a", Pending)];
        let mut engine = OptimisticEngine::new();

        let _first = engine.apply(&mut issues, &ids(&["a"]), IssuePatch::status(InProgress));
        let second = engine.apply(&mut issues, &ids(&["a"]), IssuePatch::status(Resolved));
        assert_eq!(issues[0].status, Resolved);

        engine.rollback(&mut issues, second, &ids(&["a"]));
        assert_eq!(issues[0].status, Pending);
    }

    #[test]
    fn test_rollback_after_earlier_confirm_lands_on_confirmed_value() {
        let mut issues = vec![fixtures::issue("a", Pending)];
        let mut engine = OptimisticEngine::new();

        let first = engine.apply(&mut issues, &ids(&["a"]), IssuePatch::status(InProgress));
        let second = engine.apply(&mut issues, &ids(&["a"]), IssuePatch::status(Resolved));
        engine.confirm(first, &ids(&["a"]));
        engine.rollback(&mut issues, second, &ids(&["a"]));

        assert_eq!(issues[0].status, InProgress);
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let mut issues = vec![fixtures::issue("a", Pending)];
        let mut engine = OptimisticEngine::new();

        let first = engine.apply(&mut issues, &ids(&["a"]), IssuePatch::status(InProgress));
        engine.rollback(&mut issues, first, &ids(&["a"]));

        let second = engine.apply(&mut issues, &ids(&["a"]), IssuePatch::status(Resolved));
        // a late answer for the first mutation must not touch the second's record
        engine.confirm(first, &ids(&["a"]));
        assert!(engine.is_pending(&IssueId::new("a")));

        engine.rollback(&mut issues, second, &ids(&["a"]));
        assert_eq!(issues[0].status, Pending);
    }

    #[test]
    fn test_batch_rolls_back_every_member() {
        let mut issues = vec![
            fixtures::issue("a", Pending),
            fixtures::issue("b", InProgress),
            fixtures::issue("c", Resolved),
        ];
        let mut engine = OptimisticEngine::new();
        let batch = ids(&["a", "b", "c"]);

        let m = engine.apply(&mut issues, &batch, IssuePatch::status(Resolved));
        assert!(issues.iter().all(|i| i.status == Resolved));

        engine.rollback(&mut issues, m, &batch);
        let statuses: Vec<_> = issues.iter().map(|i| i.status).collect();
        assert_eq!(statuses, vec![Pending, InProgress, Resolved]);
    }

    #[test]
    fn test_rollback_only_touches_patched_fields() {
        let mut issues = vec![fixtures::issue("a", Pending)];
        let mut engine = OptimisticEngine::new();

        let m = engine.apply(&mut issues, &ids(&["a"]), IssuePatch::upvotes(1));
        // a concurrent refresh of another field
        issues[0].comments_count = 4;
        engine.rollback(&mut issues, m, &ids(&["a"]));

        assert_eq!(issues[0].upvotes_count, 0);
        assert_eq!(issues[0].comments_count, 4);
    }

    #[test]
    fn test_reconcile_drops_records_the_server_contradicts() {
        let mut issues = vec![fixtures::issue("a", Pending), fixtures::issue("b", Pending)];
        let mut engine = OptimisticEngine::new();
        engine.apply(&mut issues, &ids(&["a", "b"]), IssuePatch::status(Resolved));

        let fresh = vec![fixtures::issue("a", Resolved), fixtures::issue("b", Pending)];
        engine.reconcile(&fresh);

        assert!(engine.is_pending(&IssueId::new("a")));
        assert!(!engine.is_pending(&IssueId::new("b")));
    }

    #[test]
    fn test_reconcile_keeps_records_for_rows_off_page() {
        let mut issues = vec![fixtures::issue("a", Pending)];
        let mut engine = OptimisticEngine::new();
        engine.apply(&mut issues, &ids(&["a"]), IssuePatch::status(InProgress));

        engine.reconcile(&[]);
        assert_eq!(
            engine.baseline(&IssueId::new("a")),
            Some(IssuePatch::status(Pending))
        );
    }
}
