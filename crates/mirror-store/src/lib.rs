//! # mirror-store
//!
//! Embedded SQLite-backed implementation of [`mirror_core::Store`]. The
//! Syncer and the Reactor run as separate processes against the same
//! database file, so the connection is opened in WAL mode with a generous
//! busy timeout rather than relying on either process to hold a lock for
//! long — SQLite's own locking handles the cross-process coordination.

mod error;
mod migrations;

pub use error::{Error, Result};

use std::path::Path;
use std::sync::{Arc, Mutex};

use mirror_core::{PendingAction, PendingPr, Repo};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::instrument;

/// Busy timeout applied to every connection, so a writer blocked behind the
/// other process's transaction waits instead of failing immediately with
/// `SQLITE_BUSY`.
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// A [`mirror_core::Store`] backed by a single SQLite database file.
///
/// Cheap to clone: the connection lives behind an `Arc<Mutex<_>>`, and every
/// call hops to a blocking task via [`tokio::task::spawn_blocking`] so the
/// async caller never blocks on the mutex or on SQLite I/O directly.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if necessary) the database at `path`, applying
    /// pragmas and running any pending migrations.
    ///
    /// # Errors
    /// Returns an error if the file can't be opened or a migration fails.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_millis(u64::from(BUSY_TIMEOUT_MS)))?;
        migrations::migrate(&mut conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Open an in-memory database, for tests.
    ///
    /// # Errors
    /// Returns an error if a migration fails.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrations::migrate(&mut conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Run `f` against the connection on a blocking thread.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            f(&conn)
        })
        .await?
    }
}

fn ids_to_string(ids: &[u64]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

fn ids_from_string(s: &str) -> Result<Vec<u64>> {
    s.split(',')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().map_err(|_| Error::CorruptRow(format!("bad id in list: {s:?}"))))
        .collect()
}

fn authors_from_string(s: &str) -> Vec<String> {
    s.split(',').filter(|part| !part.is_empty()).map(ToString::to_string).collect()
}

fn action_to_str(action: PendingAction) -> &'static str {
    match action {
        PendingAction::Created => "created",
        PendingAction::Blocked => "blocked",
    }
}

fn action_from_str(s: &str) -> Result<PendingAction> {
    match s {
        "created" => Ok(PendingAction::Created),
        "blocked" => Ok(PendingAction::Blocked),
        other => Err(Error::CorruptRow(format!("unknown pending_prs.action: {other:?}"))),
    }
}

struct PendingRow {
    fork_repo_id: i64,
    upstream_repo_id: i64,
    fork_branch: String,
    upstream_pr_ids: String,
    upstream_authors: String,
    action: String,
    pr_id: Option<i64>,
    github_issue: Option<i64>,
}

impl PendingRow {
    fn into_domain(self) -> Result<PendingPr> {
        Ok(PendingPr {
            fork_repo_id: self.fork_repo_id,
            upstream_repo_id: self.upstream_repo_id,
            fork_branch: self.fork_branch,
            upstream_pr_ids: ids_from_string(&self.upstream_pr_ids)?,
            upstream_authors: authors_from_string(&self.upstream_authors),
            action: action_from_str(&self.action)?,
            #[allow(clippy::cast_sign_loss)]
            pr_id: self.pr_id.map(|id| id as u64),
            #[allow(clippy::cast_sign_loss)]
            github_issue: self.github_issue.map(|id| id as u64),
        })
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            fork_repo_id: row.get("fork_repo_id")?,
            upstream_repo_id: row.get("upstream_repo_id")?,
            fork_branch: row.get("fork_branch")?,
            upstream_pr_ids: row.get("upstream_pr_ids")?,
            upstream_authors: row.get::<_, Option<String>>("upstream_authors")?.unwrap_or_default(),
            action: row.get("action")?,
            pr_id: row.get("pr_id")?,
            github_issue: row.get("github_issue")?,
        })
    }
}

const PENDING_COLUMNS: &str =
    "fork_repo_id, upstream_repo_id, fork_branch, upstream_pr_ids, upstream_authors, action, pr_id, github_issue";

impl mirror_core::Store for SqliteStore {
    async fn get_or_create_repo(&self, org: &str, name: &str) -> mirror_core::Result<Repo> {
        let org = org.to_string();
        let name = name.to_string();
        Ok(self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO repos (org, name) VALUES (?1, ?2) ON CONFLICT(org, name) DO NOTHING",
                    params![org, name],
                )?;
                let id: i64 = conn.query_row(
                    "SELECT id FROM repos WHERE org = ?1 AND name = ?2",
                    params![org, name],
                    |row| row.get(0),
                )?;
                Ok(Repo { id, org, name })
            })
            .await?)
    }

    async fn get_repo(&self, id: i64) -> mirror_core::Result<Option<Repo>> {
        Ok(self
            .with_conn(move |conn| {
                conn.query_row("SELECT org, name FROM repos WHERE id = ?1", params![id], |row| {
                    Ok(Repo { id, org: row.get(0)?, name: row.get(1)? })
                })
                .optional()
                .map_err(Error::from)
            })
            .await?)
    }

    async fn get_last_handled_pr(
        &self,
        fork_repo_id: i64,
        upstream_repo_id: i64,
        fork_branch: &str,
    ) -> mirror_core::Result<Option<u64>> {
        let fork_branch = fork_branch.to_string();
        Ok(self
            .with_conn(move |conn| {
                let value: Option<i64> = conn
                    .query_row(
                        "SELECT last_handled_pr FROM branch_cursors
                         WHERE fork_repo_id = ?1 AND upstream_repo_id = ?2 AND fork_branch = ?3",
                        params![fork_repo_id, upstream_repo_id, fork_branch],
                        |row| row.get(0),
                    )
                    .optional()?;
                #[allow(clippy::cast_sign_loss)]
                Ok(value.map(|v| v as u64))
            })
            .await?)
    }

    async fn set_last_handled_pr(
        &self,
        fork_repo_id: i64,
        upstream_repo_id: i64,
        fork_branch: &str,
        id: u64,
    ) -> mirror_core::Result<()> {
        let fork_branch = fork_branch.to_string();
        #[allow(clippy::cast_possible_wrap)]
        let id = id as i64;
        Ok(self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO branch_cursors (fork_repo_id, upstream_repo_id, fork_branch, last_handled_pr)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(fork_repo_id, upstream_repo_id, fork_branch)
                     DO UPDATE SET last_handled_pr = MAX(last_handled_pr, excluded.last_handled_pr)",
                    params![fork_repo_id, upstream_repo_id, fork_branch, id],
                )?;
                Ok(())
            })
            .await?)
    }

    async fn get_pending_pr(
        &self,
        fork_repo_id: i64,
        upstream_repo_id: i64,
        fork_branch: &str,
    ) -> mirror_core::Result<Option<PendingPr>> {
        let fork_branch = fork_branch.to_string();
        let row = self
            .with_conn(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {PENDING_COLUMNS} FROM pending_prs
                         WHERE fork_repo_id = ?1 AND upstream_repo_id = ?2 AND fork_branch = ?3"
                    ),
                    params![fork_repo_id, upstream_repo_id, fork_branch],
                    PendingRow::from_row,
                )
                .optional()
                .map_err(Error::from)
            })
            .await?;
        Ok(row.map(PendingRow::into_domain).transpose()?)
    }

    async fn get_pending_pr_by_issue(
        &self,
        fork_repo_id: i64,
        github_issue: u64,
    ) -> mirror_core::Result<Option<PendingPr>> {
        #[allow(clippy::cast_possible_wrap)]
        let github_issue = github_issue as i64;
        let row = self
            .with_conn(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {PENDING_COLUMNS} FROM pending_prs WHERE fork_repo_id = ?1 AND github_issue = ?2"
                    ),
                    params![fork_repo_id, github_issue],
                    PendingRow::from_row,
                )
                .optional()
                .map_err(Error::from)
            })
            .await?;
        Ok(row.map(PendingRow::into_domain).transpose()?)
    }

    async fn get_pending_pr_by_pr_id(&self, fork_repo_id: i64, pr_id: u64) -> mirror_core::Result<Option<PendingPr>> {
        #[allow(clippy::cast_possible_wrap)]
        let pr_id = pr_id as i64;
        let row = self
            .with_conn(move |conn| {
                conn.query_row(
                    &format!("SELECT {PENDING_COLUMNS} FROM pending_prs WHERE fork_repo_id = ?1 AND pr_id = ?2"),
                    params![fork_repo_id, pr_id],
                    PendingRow::from_row,
                )
                .optional()
                .map_err(Error::from)
            })
            .await?;
        Ok(row.map(PendingRow::into_domain).transpose()?)
    }

    async fn set_pending_pr(&self, pending: &PendingPr) -> mirror_core::Result<()> {
        let fork_repo_id = pending.fork_repo_id;
        let upstream_repo_id = pending.upstream_repo_id;
        let fork_branch = pending.fork_branch.clone();
        let upstream_pr_ids = ids_to_string(&pending.upstream_pr_ids);
        let upstream_authors = pending.upstream_authors.join(",");
        let action = action_to_str(pending.action);
        #[allow(clippy::cast_possible_wrap)]
        let pr_id = pending.pr_id.map(|id| id as i64);
        #[allow(clippy::cast_possible_wrap)]
        let github_issue = pending.github_issue.map(|id| id as i64);

        Ok(self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO pending_prs
                        (fork_repo_id, upstream_repo_id, fork_branch, upstream_pr_ids, upstream_authors, action, pr_id, github_issue)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(fork_repo_id, upstream_repo_id, fork_branch) DO UPDATE SET
                        upstream_pr_ids = excluded.upstream_pr_ids,
                        upstream_authors = excluded.upstream_authors,
                        action = excluded.action,
                        pr_id = excluded.pr_id,
                        github_issue = excluded.github_issue",
                    params![fork_repo_id, upstream_repo_id, fork_branch, upstream_pr_ids, upstream_authors, action, pr_id, github_issue],
                )?;
                Ok(())
            })
            .await?)
    }

    async fn delete_pending_pr(
        &self,
        fork_repo_id: i64,
        upstream_repo_id: i64,
        fork_branch: &str,
    ) -> mirror_core::Result<()> {
        let fork_branch = fork_branch.to_string();
        Ok(self
            .with_conn(move |conn| {
                conn.execute(
                    "DELETE FROM pending_prs WHERE fork_repo_id = ?1 AND upstream_repo_id = ?2 AND fork_branch = ?3",
                    params![fork_repo_id, upstream_repo_id, fork_branch],
                )?;
                Ok(())
            })
            .await?)
    }
}
