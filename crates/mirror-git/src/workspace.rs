//! Transient checkout that applies upstream commits onto a fork branch.

use std::path::Path;
use std::process::Command;

use git2::{BranchType, Repository};
use tempfile::TempDir;
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};

/// A single upstream pull request's commits to replay, identified by the
/// merge commit that landed them and how many commits that merge introduced.
#[derive(Debug, Clone)]
pub struct PatchSpec {
    /// SHA of the upstream merge commit.
    pub head_sha: String,
    /// Number of commits introduced by that merge (the cherry-pick range is
    /// `head_sha~commit_count..head_sha`).
    pub commit_count: u32,
}

/// Everything [`GitWorkspace::apply_patches`] needs to reproduce a set of
/// upstream commits on a fork branch and push the result.
#[derive(Debug, Clone)]
pub struct ApplyPatchesRequest {
    /// Authenticated clone URL of the fork repository (token embedded as the URL user).
    pub fork_remote_url: String,
    /// Authenticated clone URL of the upstream repository.
    pub upstream_remote_url: String,
    /// Fork branch the new working branch is created from (`origin/<source_branch>`).
    pub source_branch: String,
    /// Name of the new branch to create on the fork and push.
    pub working_branch: String,
    /// Upstream commits to cherry-pick onto the working branch, in order.
    pub patches: Vec<PatchSpec>,
}

/// Abstraction over "checkout the fork, cherry-pick upstream's commits onto
/// a new branch, push it" — the only git-shaped capability the sync engine
/// needs.
///
/// Kept as a trait (rather than a bare struct) for the same reason
/// `GitOps` was in the original git crate: dependency injection lets the
/// engine's tests script outcomes without a network or a real checkout.
#[allow(clippy::missing_errors_doc)]
pub trait GitWorkspace: Send + Sync {
    /// Clone the fork, branch from `source_branch`, cherry-pick every patch
    /// in order, and push the result. The workspace is torn down before this
    /// returns, success or failure.
    fn apply_patches(&self, request: &ApplyPatchesRequest) -> Result<()>;
}

/// Concrete [`GitWorkspace`] backed by `git2` for simple repository
/// operations and a shelled `git` subprocess for clone, fetch, cherry-pick,
/// and push — operations that are either awkward to express correctly
/// through `git2`'s porcelain-free API or that need the exact conflict and
/// auth semantics the real `git` binary provides.
#[derive(Debug, Default)]
pub struct GitCliWorkspace;

impl GitCliWorkspace {
    /// Create a new workspace driver. Holds no state between calls; every
    /// [`GitWorkspace::apply_patches`] call gets its own scoped checkout.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn run(dir: &Path, args: &[&str]) -> Result<std::process::Output> {
        debug!(?args, dir = %dir.display(), "running git");
        Ok(Command::new("git").args(args).current_dir(dir).output()?)
    }

    fn run_ok(dir: &Path, args: &[&str], map_err: impl Fn(String) -> Error) -> Result<()> {
        let output = Self::run(dir, args)?;
        if output.status.success() {
            return Ok(());
        }
        Err(map_err(String::from_utf8_lossy(&output.stderr).into_owned()))
    }
}

impl GitWorkspace for GitCliWorkspace {
    #[instrument(skip(self, request), fields(working_branch = %request.working_branch))]
    fn apply_patches(&self, request: &ApplyPatchesRequest) -> Result<()> {
        if request.patches.is_empty() {
            return Err(Error::NoPatches);
        }

        let parent = TempDir::new()?;
        let dir = parent.path().join("checkout");

        // Cloning and branch creation are simple enough to go through git2
        // directly, with its auth-free embedded-URL handling for the
        // installation-token clone URL; everything after that (remote
        // management, cherry-pick, push) needs either an auth flow or
        // conflict/porcelain semantics git2 doesn't model cleanly, so those
        // stay shelled out to the real `git` binary.
        let repo = Repository::clone(&request.fork_remote_url, &dir).map_err(|e| Error::CloneFailed(e.message().to_string()))?;
        let dir = dir.as_path();

        let source_ref = format!("origin/{}", request.source_branch);
        let source_commit = repo
            .find_branch(&source_ref, BranchType::Remote)
            .map_err(|_| Error::RefNotFound(source_ref.clone()))?
            .get()
            .peel_to_commit()
            .map_err(|_| Error::RefNotFound(source_ref))?;
        let branch = repo
            .branch(&request.working_branch, &source_commit, false)
            .map_err(|e| Error::BranchCreateFailed(request.working_branch.clone(), e.message().to_string()))?;
        repo.set_head(branch.get().name().ok_or_else(|| Error::BranchCreateFailed(request.working_branch.clone(), "branch ref has no name".into()))?)?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
        drop(repo);

        Self::run_ok(
            dir,
            &["remote", "add", "upstream", &request.upstream_remote_url],
            |e| Error::RemoteAddFailed("upstream".into(), e),
        )?;

        Self::run_ok(dir, &["fetch", "--prune", "upstream"], Error::FetchFailed)?;

        for patch in &request.patches {
            let range = format!("{}~{}..{}", patch.head_sha, patch.commit_count, patch.head_sha);
            let output = Self::run(
                dir,
                &[
                    "cherry-pick",
                    "-x",
                    "--allow-empty",
                    "--keep-redundant-commits",
                    &range,
                ],
            )?;

            if output.status.success() {
                continue;
            }

            let conflicts = Self::run(dir, &["diff", "--name-only", "--diff-filter=U"])
                .ok()
                .filter(|o| o.status.success())
                .map(|o| {
                    String::from_utf8_lossy(&o.stdout)
                        .lines()
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            let _ = Self::run(dir, &["cherry-pick", "--abort"]);

            if conflicts.is_empty() {
                return Err(Error::CherryPickFailed(
                    String::from_utf8_lossy(&output.stderr).into_owned(),
                ));
            }
            return Err(Error::CherryPickConflict(conflicts));
        }

        Self::run_ok(
            dir,
            &[
                "push",
                "origin",
                &format!("HEAD:refs/heads/{}", request.working_branch),
            ],
            Error::PushFailed,
        )?;

        info!(patches = request.patches.len(), "applied and pushed patches");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_patches_is_rejected_before_touching_disk() {
        let workspace = GitCliWorkspace::new();
        let request = ApplyPatchesRequest {
            fork_remote_url: "https://example.invalid/fork.git".into(),
            upstream_remote_url: "https://example.invalid/upstream.git".into(),
            source_branch: "release-1.0".into(),
            working_branch: "release-1.0-1700000000000".into(),
            patches: vec![],
        };

        let err = workspace.apply_patches(&request).unwrap_err();
        assert!(matches!(err, Error::NoPatches));
    }

    #[test]
    fn cherry_pick_range_is_head_tilde_count() {
        let patch = PatchSpec {
            head_sha: "abc123".into(),
            commit_count: 3,
        };
        let range = format!("{}~{}..{}", patch.head_sha, patch.commit_count, patch.head_sha);
        assert_eq!(range, "abc123~3..abc123");
    }
}
