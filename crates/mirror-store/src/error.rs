//! Error types for mirror-store.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing the embedded database.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying SQLite call failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The blocking task running the query panicked or was cancelled.
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A stored row violated an invariant the schema can't express (a
    /// `pending_prs` row with an action string other than `created`/`blocked`,
    /// a malformed comma-separated id list).
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    /// Schema migration failed partway through.
    #[error("migration failed: {0}")]
    Migration(String),
}

impl From<Error> for mirror_core::Error {
    fn from(e: Error) -> Self {
        Self::Store(e.to_string())
    }
}
