//! Error types for mirror-host.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the code-hosting platform.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// App authentication failed (bad private key, clock skew, revoked app).
    #[error("app authentication failed: {0}")]
    AuthenticationFailed(String),

    /// API rate limit exceeded.
    #[error("API rate limit exceeded - wait and try again")]
    RateLimited,

    /// Repository not found or the installation has no access.
    #[error("repository not found or no access: {0}")]
    RepoNotFound(String),

    /// Pull request not found.
    #[error("pull request not found: #{0}")]
    PrNotFound(u64),

    /// API error with status code, after ruling out auth/rate-limit.
    #[error("host API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    /// Network error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("failed to parse host response: {0}")]
    Parse(#[from] serde_json::Error),

    /// JWT construction failed (invalid PEM, encoding error).
    #[error("failed to sign app JWT: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// IO error (reading the app's private key file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
