//! The `Store` trait: durable state shared by the Syncer and the Reactor.
//!
//! Mirrors the `StateStore`/`GitOps`/`HostClient` shape this workspace uses
//! everywhere else — a narrow trait the engine is generic over, with one
//! concrete implementation (`mirror_store::SqliteStore`) and mock
//! implementations in the engine's own tests.

use crate::domain::{PendingPr, Repo};
use crate::error::Result;

/// Durable, single-writer state: the repo identity table, the per-tuple
/// `BranchCursor`, and the at-most-one `PendingPr` per tuple.
///
/// Every method is `async` (return-position `impl Future`, matching
/// [`mirror_host::HostClient`]) so a real implementation can hop to a
/// blocking thread pool for the actual SQLite call without forcing every
/// caller through `#[async_trait]`'s allocation.
#[allow(clippy::missing_errors_doc)]
pub trait Store: Send + Sync {
    /// Look up `(org, name)`, inserting a new row if it doesn't exist yet.
    /// Never deletes a repo.
    fn get_or_create_repo(
        &self,
        org: &str,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Repo>> + Send;

    /// Look up a repo by its surrogate id (the reverse of
    /// `get_or_create_repo`), for rendering org/name back into human-facing
    /// text when a caller only has the id (e.g. the Reactor reading
    /// `PendingPr::upstream_repo_id`).
    fn get_repo(&self, id: i64) -> impl std::future::Future<Output = Result<Option<Repo>>> + Send;

    /// The tuple's `BranchCursor`, if one has been recorded.
    fn get_last_handled_pr(
        &self,
        fork_repo_id: i64,
        upstream_repo_id: i64,
        fork_branch: &str,
    ) -> impl std::future::Future<Output = Result<Option<u64>>> + Send;

    /// Upsert the tuple's `BranchCursor`. Implementations must reject (or
    /// simply ignore) a value lower than the one already stored — the
    /// cursor is monotonically non-decreasing by contract (§5).
    fn set_last_handled_pr(
        &self,
        fork_repo_id: i64,
        upstream_repo_id: i64,
        fork_branch: &str,
        id: u64,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// The tuple's in-flight `PendingPr`, if one exists.
    fn get_pending_pr(
        &self,
        fork_repo_id: i64,
        upstream_repo_id: i64,
        fork_branch: &str,
    ) -> impl std::future::Future<Output = Result<Option<PendingPr>>> + Send;

    /// Look up a `PendingPr` by its tracking issue, scoped to the fork repo
    /// the issue was opened on.
    fn get_pending_pr_by_issue(
        &self,
        fork_repo_id: i64,
        github_issue: u64,
    ) -> impl std::future::Future<Output = Result<Option<PendingPr>>> + Send;

    /// Look up a `PendingPr` by its fork-side PR number, scoped to the fork
    /// repo the PR was opened on.
    fn get_pending_pr_by_pr_id(
        &self,
        fork_repo_id: i64,
        pr_id: u64,
    ) -> impl std::future::Future<Output = Result<Option<PendingPr>>> + Send;

    /// Upsert the `PendingPr` for its tuple (`fork_repo_id`,
    /// `upstream_repo_id`, `fork_branch`). Replaces any row already there.
    fn set_pending_pr(
        &self,
        pending: &PendingPr,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Remove the tuple's `PendingPr`, if any. A no-op if none exists.
    fn delete_pending_pr(
        &self,
        fork_repo_id: i64,
        upstream_repo_id: i64,
        fork_branch: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}
