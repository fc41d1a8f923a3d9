//! Narrowly-typed DTOs for the host API.
//!
//! Each type carries only the fields the sync engine actually reads. Unknown
//! fields in the wire response are silently ignored by `serde`'s default
//! behavior — there is no `deny_unknown_fields` here, deliberately: the host
//! API is free to add fields without breaking this client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A GitHub App installation.
#[derive(Debug, Clone, Deserialize)]
pub struct Installation {
    /// Installation id, used to mint installation access tokens.
    pub id: u64,
    /// Account (org or user) the app is installed on.
    pub account: InstallationAccount,
}

/// The account an installation is attached to.
#[derive(Debug, Clone, Deserialize)]
pub struct InstallationAccount {
    /// Login of the account.
    pub login: String,
}

/// A repository reference, as returned by the repo-listing endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoRef {
    /// Owner login (org or user).
    pub owner: String,
    /// Repository name.
    pub name: String,
}

/// State of a pull request as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    /// Open and unmerged.
    Open,
    /// Closed without merging.
    Closed,
    /// Merged.
    Merged,
}

/// A pull request, trimmed to the fields the sync engine reads.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    /// PR number.
    pub number: u64,
    /// PR title.
    pub title: String,
    /// PR body (used to append "Closes #N" on failure).
    pub body: Option<String>,
    /// Current state.
    pub state: PullRequestState,
    /// Base branch name this PR targets.
    pub base_ref: String,
    /// Head commit SHA.
    pub head_sha: String,
    /// Merge commit SHA, present once merged.
    pub merge_commit_sha: Option<String>,
    /// Number of commits contained in the PR.
    pub commits: u32,
    /// When the PR was merged, if it was.
    pub merged_at: Option<DateTime<Utc>>,
    /// Web URL, used only for human-readable messages.
    pub html_url: String,
}

/// Request body to open a new pull request.
#[derive(Debug, Serialize)]
pub struct CreatePullRequest<'a> {
    /// Title.
    pub title: &'a str,
    /// Body.
    pub body: &'a str,
    /// Head branch (the branch carrying the cherry-picks).
    pub head: &'a str,
    /// Base branch.
    pub base: &'a str,
}

/// Request body to update an existing pull request.
#[derive(Debug, Default, Serialize)]
pub struct UpdatePullRequest<'a> {
    /// New state (`"open"` or `"closed"`), if changing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<&'a str>,
    /// New body, if changing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<&'a str>,
}

/// Conclusion of a completed check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    /// Passed.
    Success,
    /// Explicitly allowed to fail or not meaningful.
    Neutral,
    /// Intentionally not run.
    Skipped,
    /// Failed.
    Failure,
    /// Errored before completing.
    TimedOut,
    /// Cancelled mid-run.
    Cancelled,
    /// An action is required from a human (treated as not-success).
    ActionRequired,
    /// Superseded by a newer run.
    Stale,
}

impl CheckConclusion {
    /// Whether this conclusion counts as a passing result.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::Neutral | Self::Skipped)
    }
}

/// A single check-run against a commit.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckRun {
    /// Name of the check (matched against required-check names).
    pub name: String,
    /// Conclusion, present once the run has completed.
    pub conclusion: Option<CheckConclusion>,
    /// When this run started. A re-run of the same named check starts a new
    /// run, so this is what lets a caller tell which of several same-named
    /// runs is the latest.
    pub started_at: DateTime<Utc>,
}

/// State of a legacy commit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitStatusState {
    /// Still running.
    Pending,
    /// Passed.
    Success,
    /// Informational only.
    Error,
    /// Failed.
    Failure,
}

impl CommitStatusState {
    /// Whether this state counts as a passing result.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// A single legacy commit status.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitStatus {
    /// Status context (matched against required-check names).
    pub context: String,
    /// Current state.
    pub state: CommitStatusState,
    /// When this status was created, used to pick the latest among several
    /// statuses posted under the same context.
    pub created_at: DateTime<Utc>,
}

/// Branch protection rule, trimmed to the required-check names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BranchProtection {
    /// Names of checks/statuses required to pass before merge.
    pub required_checks: Vec<String>,
}

/// Result of merging a pull request.
#[derive(Debug, Clone, Deserialize)]
pub struct MergeResult {
    /// Whether the merge succeeded.
    pub merged: bool,
    /// SHA of the resulting merge commit.
    pub sha: Option<String>,
    /// Human-readable message from the host (used in error messages on failure).
    pub message: String,
}

/// A created issue, as returned by the issue-creation endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    /// Issue number, the `github_issue` stored on a `PendingPR`.
    pub number: u64,
}
