//! # mirror-host
//!
//! Code-hosting API client for Magic Mirror: GitHub App authentication,
//! pull requests, issues, check-runs, commit statuses, and branch
//! protection, trimmed to exactly the operations the sync engine needs.
//!
//! # Security
//!
//! Both the app JWT's signing key and minted installation tokens are held
//! as `secrecy::SecretString`/`EncodingKey`, so a stray `{:?}` never leaks a
//! credential into logs.

mod auth;
mod client;
mod error;
mod types;

pub use auth::AppAuth;
pub use client::{GitHubHostClient, HostClient};
pub use error::{Error, Result};
pub use secrecy::SecretString;
pub use types::{
    BranchProtection, CheckConclusion, CheckRun, CommitStatus, CommitStatusState,
    CreatePullRequest, Installation, Issue, MergeResult, PullRequest, PullRequestState, RepoRef,
    UpdatePullRequest,
};
