//! Error types for mirror-git.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a [`crate::GitWorkspace`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A patch application was requested with no patches.
    #[error("apply_patches called with an empty patch list")]
    NoPatches,

    /// Cloning the fork repository failed.
    #[error("clone failed: {0}")]
    CloneFailed(String),

    /// Reference not found (e.g. `origin/<source_branch>` missing after clone).
    #[error("reference not found: {0}")]
    RefNotFound(String),

    /// Branch creation failed.
    #[error("failed to create branch {0}: {1}")]
    BranchCreateFailed(String, String),

    /// Adding the upstream remote failed.
    #[error("failed to add remote {0}: {1}")]
    RemoteAddFailed(String, String),

    /// Fetch failed.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// Cherry-pick produced a conflict; listed files have conflict markers.
    #[error("cherry-pick conflict in: {0:?}")]
    CherryPickConflict(Vec<String>),

    /// Cherry-pick failed for a reason other than a content conflict.
    #[error("cherry-pick failed: {0}")]
    CherryPickFailed(String),

    /// Push to the fork remote failed.
    #[error("push failed: {0}")]
    PushFailed(String),

    /// Invalid remote URL.
    #[error("invalid remote URL: {0}")]
    InvalidRemoteUrl(String),

    /// Underlying git2 error.
    #[error("git error: {0}")]
    Git2(#[from] git2::Error),

    /// Underlying IO error (spawning `git`, temp directory setup).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
