//! Error types for mirror-core.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the sync engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration failed validation; the message names the offending path.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A `PendingPr` would have violated one of its invariants.
    #[error("invalid pending PR: {0}")]
    InvalidPendingPr(String),

    /// The durable store reported a failure. Carries only a message: the
    /// store's own error type lives in a crate that depends on this one, so
    /// it can't be named here without a dependency cycle.
    #[error("store error: {0}")]
    Store(String),

    /// The workspace (clone/cherry-pick/push) failed.
    #[error("workspace error: {0}")]
    Workspace(#[from] mirror_git::Error),

    /// The host API call failed.
    #[error("host error: {0}")]
    Host(#[from] mirror_host::Error),

    /// IO error (reading the config file, the app's private key).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The host reported a merged pull request with no merge commit SHA —
    /// should be impossible for a PR in the `Merged` state, but the host's
    /// response is only weakly typed and this is the one invariant we can't
    /// express in [`mirror_host::types::PullRequest`] itself.
    #[error("upstream PR #{0} is merged but has no merge commit sha")]
    MissingMergeCommit(u64),
}
