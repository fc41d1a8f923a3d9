//! Domain model: repositories, the per-branch sync cursor, and the
//! single in-flight sync attempt a tuple may have open at a time.

use crate::error::{Error, Result};

/// A repository known to the engine, identified by `(org, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Repo {
    /// Surrogate id assigned by the store.
    pub id: i64,
    /// Organization or user login that owns the repo.
    pub org: String,
    /// Repository name.
    pub name: String,
}

/// The unit of sync state: one fork branch mapped from one upstream branch
/// of one upstream repo into one fork repo.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tuple {
    /// Fork-side repo id.
    pub fork_repo_id: i64,
    /// Upstream-side repo id.
    pub upstream_repo_id: i64,
    /// Branch on the fork this tuple keeps in sync.
    pub fork_branch: String,
    /// Branch on the upstream repo whose merged PRs feed this tuple.
    pub upstream_branch: String,
}

impl Tuple {
    /// Build a tuple for contexts that only know the `BranchCursor`/
    /// `PendingPr` key (e.g. the Reactor, which learns `fork_repo_id`,
    /// `upstream_repo_id`, and `fork_branch` from a loaded `PendingPr` row
    /// but never the upstream branch name it was opened against).
    #[must_use]
    pub fn branch_only(fork_repo_id: i64, upstream_repo_id: i64, fork_branch: String) -> Self {
        Self {
            fork_repo_id,
            upstream_repo_id,
            fork_branch,
            upstream_branch: String::new(),
        }
    }
}

/// Whether a `PendingPr`'s attempt succeeded in opening a PR, or failed and
/// is waiting on a human to close the tracking issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    /// A fork-side PR is open and being driven toward merge.
    Created,
    /// The attempt failed; a tracking issue is open and syncing is paused
    /// for this tuple until it's closed.
    Blocked,
}

/// A single in-flight sync attempt for one [`Tuple`]. At most one exists
/// per tuple at any time (enforced by the store's unique index, mirrored
/// here by every constructor validating before returning).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPr {
    /// Fork-side repo id (first half of the tuple this row belongs to).
    pub fork_repo_id: i64,
    /// Upstream-side repo id (second half of the tuple).
    pub upstream_repo_id: i64,
    /// Fork branch (third element of the tuple).
    pub fork_branch: String,
    /// Upstream PR ids this attempt propagates, strictly ascending.
    pub upstream_pr_ids: Vec<u64>,
    /// Authors aligned with `upstream_pr_ids`; `"not-applicable"` for rows
    /// persisted before this field existed.
    pub upstream_authors: Vec<String>,
    /// Created or Blocked.
    pub action: PendingAction,
    /// Fork-side PR id. Required when `action == Created`.
    pub pr_id: Option<u64>,
    /// Fork-side tracking issue id. Required when `action == Blocked`.
    pub github_issue: Option<u64>,
}

/// Sentinel author recorded for legacy rows migrated before
/// `upstream_authors` existed.
pub const NOT_APPLICABLE_AUTHOR: &str = "not-applicable";

impl PendingPr {
    fn validate_ids(upstream_pr_ids: &[u64], upstream_authors: &[String]) -> Result<()> {
        if upstream_pr_ids.is_empty() {
            return Err(Error::InvalidPendingPr("upstream_pr_ids must be non-empty".into()));
        }
        if upstream_pr_ids.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::InvalidPendingPr(
                "upstream_pr_ids must be strictly ascending".into(),
            ));
        }
        if upstream_authors.len() != upstream_pr_ids.len() {
            return Err(Error::InvalidPendingPr(
                "upstream_authors must align 1:1 with upstream_pr_ids".into(),
            ));
        }
        Ok(())
    }

    /// Build a `Created` row: a fork-side PR is open for `pr_id`.
    ///
    /// # Errors
    /// Returns an error if `upstream_pr_ids` is empty or not strictly ascending,
    /// or if `upstream_authors` doesn't align with it.
    pub fn created(
        tuple: &Tuple,
        upstream_pr_ids: Vec<u64>,
        upstream_authors: Vec<String>,
        pr_id: u64,
    ) -> Result<Self> {
        Self::validate_ids(&upstream_pr_ids, &upstream_authors)?;
        Ok(Self {
            fork_repo_id: tuple.fork_repo_id,
            upstream_repo_id: tuple.upstream_repo_id,
            fork_branch: tuple.fork_branch.clone(),
            upstream_pr_ids,
            upstream_authors,
            action: PendingAction::Created,
            pr_id: Some(pr_id),
            github_issue: None,
        })
    }

    /// Build a `Blocked` row: a tracking issue is open and syncing is paused.
    ///
    /// `pr_id` is `Some` when a fork-side PR had already been opened before
    /// the failure that blocked it (e.g. CI failure on a `Created` PR);
    /// `None` when the attempt never got that far (e.g. cherry-pick conflict).
    ///
    /// # Errors
    /// Returns an error if `upstream_pr_ids` is empty or not strictly ascending,
    /// or if `upstream_authors` doesn't align with it.
    pub fn blocked(
        tuple: &Tuple,
        upstream_pr_ids: Vec<u64>,
        upstream_authors: Vec<String>,
        pr_id: Option<u64>,
        github_issue: u64,
    ) -> Result<Self> {
        Self::validate_ids(&upstream_pr_ids, &upstream_authors)?;
        Ok(Self {
            fork_repo_id: tuple.fork_repo_id,
            upstream_repo_id: tuple.upstream_repo_id,
            fork_branch: tuple.fork_branch.clone(),
            upstream_pr_ids,
            upstream_authors,
            action: PendingAction::Blocked,
            pr_id,
            github_issue: Some(github_issue),
        })
    }

    /// The tuple this row belongs to. `upstream_branch` isn't stored on the
    /// row itself (it's implied by the store's lookup key), so callers that
    /// need it pass it through separately.
    #[must_use]
    pub fn tuple_key(&self) -> (i64, i64, &str) {
        (self.fork_repo_id, self.upstream_repo_id, self.fork_branch.as_str())
    }

    /// The highest upstream PR id this attempt covers.
    ///
    /// # Panics
    /// Never: `upstream_pr_ids` is guaranteed non-empty by every constructor.
    #[must_use]
    pub fn last_upstream_pr_id(&self) -> u64 {
        *self.upstream_pr_ids.last().unwrap_or(&0)
    }

    /// Whether this attempt covers exactly the given ascending id set.
    #[must_use]
    pub fn covers_exactly(&self, ids: &[u64]) -> bool {
        self.upstream_pr_ids == ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple() -> Tuple {
        Tuple {
            fork_repo_id: 1,
            upstream_repo_id: 2,
            fork_branch: "release-1.0".into(),
            upstream_branch: "main".into(),
        }
    }

    #[test]
    fn created_requires_ascending_ids() {
        let err = PendingPr::created(&tuple(), vec![5, 3], vec!["a".into(), "b".into()], 99)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPendingPr(_)));
    }

    #[test]
    fn created_requires_non_empty_ids() {
        let err = PendingPr::created(&tuple(), vec![], vec![], 99).unwrap_err();
        assert!(matches!(err, Error::InvalidPendingPr(_)));
    }

    #[test]
    fn created_requires_aligned_authors() {
        let err = PendingPr::created(&tuple(), vec![1, 2], vec!["only-one".into()], 99)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPendingPr(_)));
    }

    #[test]
    fn blocked_allows_missing_pr_id() {
        let pending = PendingPr::blocked(&tuple(), vec![1], vec![NOT_APPLICABLE_AUTHOR.into()], None, 50)
            .unwrap();
        assert_eq!(pending.pr_id, None);
        assert_eq!(pending.github_issue, Some(50));
        assert_eq!(pending.action, PendingAction::Blocked);
    }

    #[test]
    fn last_upstream_pr_id_is_the_max() {
        let pending = PendingPr::created(&tuple(), vec![3, 7, 12], vec!["a".into(), "b".into(), "c".into()], 1)
            .unwrap();
        assert_eq!(pending.last_upstream_pr_id(), 12);
    }

    #[test]
    fn covers_exactly_compares_full_id_list() {
        let pending = PendingPr::created(&tuple(), vec![3, 7], vec!["a".into(), "b".into()], 1).unwrap();
        assert!(pending.covers_exactly(&[3, 7]));
        assert!(!pending.covers_exactly(&[3, 7, 9]));
    }
}
