//! Schema migrations, tracked by a single `meta.schema_version` row.
//!
//! Each migration is idempotent against a fresh database (migration 1
//! creates every table `if not exists`) and additive against an existing
//! one (migration 2 only adds a column and backfills it).

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Current schema version. Bump and add a migration function below when the
/// schema changes; never edit a migration that's already shipped.
const CURRENT_VERSION: i64 = 2;

/// Bring `conn`'s schema up to [`CURRENT_VERSION`], running whichever
/// migrations haven't applied yet inside one transaction.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS meta (schema_version INTEGER NOT NULL)")?;

    let version: Option<i64> = conn
        .query_row("SELECT schema_version FROM meta LIMIT 1", [], |row| row.get(0))
        .ok();
    let mut version = version.unwrap_or(0);

    if version >= CURRENT_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    if version < 1 {
        migrate_v1(&tx)?;
        version = 1;
    }
    if version < 2 {
        migrate_v2(&tx)?;
        version = 2;
    }
    tx.execute("DELETE FROM meta", [])?;
    tx.execute("INSERT INTO meta (schema_version) VALUES (?1)", [version])?;
    tx.commit()?;

    info!(version, "database schema up to date");
    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS repos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org TEXT NOT NULL,
            name TEXT NOT NULL,
            UNIQUE(org, name)
        );

        CREATE TABLE IF NOT EXISTS branch_cursors (
            fork_repo_id INTEGER NOT NULL,
            upstream_repo_id INTEGER NOT NULL,
            fork_branch TEXT NOT NULL,
            last_handled_pr INTEGER NOT NULL,
            PRIMARY KEY (fork_repo_id, upstream_repo_id, fork_branch)
        );

        CREATE TABLE IF NOT EXISTS pending_prs (
            fork_repo_id INTEGER NOT NULL,
            upstream_repo_id INTEGER NOT NULL,
            fork_branch TEXT NOT NULL,
            upstream_pr_ids TEXT NOT NULL,
            action TEXT NOT NULL,
            pr_id INTEGER,
            github_issue INTEGER,
            PRIMARY KEY (fork_repo_id, upstream_repo_id, fork_branch)
        );

        CREATE UNIQUE INDEX IF NOT EXISTS pending_prs_by_issue
            ON pending_prs (fork_repo_id, github_issue)
            WHERE github_issue IS NOT NULL;

        CREATE UNIQUE INDEX IF NOT EXISTS pending_prs_by_pr_id
            ON pending_prs (fork_repo_id, pr_id)
            WHERE pr_id IS NOT NULL;
        ",
    )?;
    Ok(())
}

/// Adds `upstream_authors`, backfilling existing rows with the
/// `not-applicable` sentinel since the PRs they cover were synced before
/// author tracking existed and there's no way to recover them after the fact.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch("ALTER TABLE pending_prs ADD COLUMN upstream_authors TEXT")?;

    let mut stmt = conn.prepare("SELECT rowid, upstream_pr_ids FROM pending_prs WHERE upstream_authors IS NULL")?;
    let rows: Vec<(i64, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;
    drop(stmt);

    for (rowid, ids) in rows {
        let count = ids.split(',').filter(|s| !s.is_empty()).count();
        let authors = vec![mirror_core::NOT_APPLICABLE_AUTHOR; count].join(",");
        conn.execute(
            "UPDATE pending_prs SET upstream_authors = ?1 WHERE rowid = ?2",
            rusqlite::params![authors, rowid],
        )?;
    }

    Ok(())
}
