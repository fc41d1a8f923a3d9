//! Operations shared between the Syncer and the Reactor: closing a
//! superseded fork PR, checking whether a PR's required checks are all
//! green, and the rebase-merge helper both state machines invoke on the
//! "all required checks passed" transition.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mirror_host::{HostClient, PullRequestState, UpdatePullRequest};
use tracing::warn;

use crate::domain::{PendingPr, Tuple};
use crate::error::Result;
use crate::store::Store;
use crate::templates;

/// §4.1.1 `closePR`: supersede a fork-side PR that's about to be replaced.
/// Returns `false` if the PR was already closed (the caller must then
/// leave the `PendingPr` row alone — the Reactor owns reconciliation).
///
/// # Errors
/// Returns an error if the host rejects the comment or the state update for
/// any reason other than the PR already being closed.
pub async fn close_pr<H: HostClient>(host: &H, org: &str, repo: &str, pr_id: u64) -> Result<bool> {
    let pr = host.get_pr(org, repo, pr_id).await?;
    if pr.state != PullRequestState::Open {
        return Ok(false);
    }
    host.create_comment(org, repo, pr_id, &templates::supersede_comment()).await?;
    host.update_pr(
        org,
        repo,
        pr_id,
        UpdatePullRequest { state: Some("closed"), body: None },
    )
    .await?;
    Ok(true)
}

/// Outcome of [`attempt_merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merge succeeded; the PR is now closed on the host.
    Merged,
    /// The merge was rejected (or errored); a tracking issue now owns this
    /// tuple and the `PendingPr` row was transitioned to `Blocked`.
    Blocked,
}

/// Merge helper (§4.2 "Merge helper"): rebase-merge a `Created` PR with its
/// current head SHA as the expected SHA. On rejection or error, creates a
/// tracking issue with reason `"the merge could not complete"` and
/// transitions the tuple's `PendingPr` to `Blocked`.
///
/// # Errors
/// Returns an error only if the store write recording the `Blocked`
/// transition itself fails (a merge rejection by the host is not an
/// error — it is reported as `Ok(MergeOutcome::Blocked)`).
pub async fn attempt_merge<S: Store, H: HostClient>(
    store: &S,
    host: &H,
    fork_org: &str,
    upstream_org: &str,
    repo: &str,
    pending: &PendingPr,
) -> Result<MergeOutcome> {
    let Some(pr_id) = pending.pr_id else {
        // `Created` guarantees `pr_id.is_some()`; nothing to merge otherwise.
        return Ok(MergeOutcome::Blocked);
    };

    let head_sha = match host.get_pr(fork_org, repo, pr_id).await {
        Ok(pr) => pr.head_sha,
        Err(e) => {
            block(store, host, fork_org, upstream_org, repo, pending, pr_id, &e.to_string()).await?;
            return Ok(MergeOutcome::Blocked);
        }
    };

    match host.merge_pr(fork_org, repo, pr_id, &head_sha).await {
        Ok(result) if result.merged => Ok(MergeOutcome::Merged),
        Ok(result) => {
            block(store, host, fork_org, upstream_org, repo, pending, pr_id, &result.message).await?;
            Ok(MergeOutcome::Blocked)
        }
        Err(e) => {
            block(store, host, fork_org, upstream_org, repo, pending, pr_id, &e.to_string()).await?;
            Ok(MergeOutcome::Blocked)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn block<S: Store, H: HostClient>(
    store: &S,
    host: &H,
    fork_org: &str,
    upstream_org: &str,
    repo: &str,
    pending: &PendingPr,
    pr_id: u64,
    reason_detail: &str,
) -> Result<()> {
    let details = templates::IssueBodyDetails {
        pr_id: Some(pr_id),
        error_transcript: Some(reason_detail),
        reproduce_commands: None,
    };
    let body = templates::issue_body(
        "the merge could not complete",
        upstream_org,
        repo,
        &pending.upstream_pr_ids,
        fork_org,
        &pending.fork_branch,
        &details,
    );
    let issue = host
        .create_issue(fork_org, repo, &templates::issue_title(&pending.upstream_pr_ids), &body)
        .await?;

    let tuple = Tuple::branch_only(pending.fork_repo_id, pending.upstream_repo_id, pending.fork_branch.clone());
    let blocked = PendingPr::blocked(
        &tuple,
        pending.upstream_pr_ids.clone(),
        pending.upstream_authors.clone(),
        Some(pr_id),
        issue.number,
    )?;
    store.set_pending_pr(&blocked).await?;
    Ok(())
}

/// Records `success` for `name` under `at`, keeping whichever of the old and
/// new entries is more recent — ties favor the newer call, i.e. the one
/// later in iteration order.
fn record_latest(latest: &mut HashMap<String, (bool, DateTime<Utc>)>, name: String, success: bool, at: DateTime<Utc>) {
    latest
        .entry(name)
        .and_modify(|(current_success, current_at)| {
            if at >= *current_at {
                *current_success = success;
                *current_at = at;
            }
        })
        .or_insert((success, at));
}

/// §4.2 step 5: verify every required check reports success on `sha`,
/// paging through check-runs first, then falling back to legacy commit
/// statuses for names check-runs didn't cover. Returns `false` (not an
/// error) both when a required check is still pending and when one has
/// failed — either way the caller just waits for the next signal.
///
/// # Errors
/// Returns an error if a host call itself fails (network, rate limit).
pub async fn required_checks_all_green<H: HostClient>(
    host: &H,
    owner: &str,
    repo: &str,
    sha: &str,
    required: &[String],
) -> Result<bool> {
    // Keyed by check name / status context, tracking whichever run or status
    // has the most recent timestamp seen so far — a re-run doesn't replace a
    // newer conclusion just because it happened to page in after it.
    let mut latest: HashMap<String, (bool, DateTime<Utc>)> = HashMap::new();

    let mut page = 1;
    loop {
        let batch = host.list_check_runs(owner, repo, sha, page).await?;
        let len = batch.len();
        for run in batch {
            if let Some(conclusion) = run.conclusion {
                record_latest(&mut latest, run.name, conclusion.is_success(), run.started_at);
            }
        }
        if len < 100 {
            break;
        }
        page += 1;
        if page > 50 {
            warn!(owner, repo, sha, "check-run pagination exceeded 50 pages, giving up");
            break;
        }
    }

    let mut page = 1;
    loop {
        let batch = host.list_commit_statuses(owner, repo, sha, page).await?;
        let len = batch.len();
        for status in batch {
            record_latest(&mut latest, status.context, status.state.is_success(), status.created_at);
        }
        if len < 100 {
            break;
        }
        page += 1;
        if page > 50 {
            warn!(owner, repo, sha, "commit status pagination exceeded 50 pages, giving up");
            break;
        }
    }

    for name in required {
        match latest.get(name) {
            Some((true, _)) => {}
            Some((false, _)) | None => return Ok(false),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn merge_outcome_is_copy_and_eq() {
        assert_eq!(MergeOutcome::Merged, MergeOutcome::Merged);
        assert_ne!(MergeOutcome::Merged, MergeOutcome::Blocked);
    }

    #[test]
    fn record_latest_keeps_the_most_recent_conclusion() {
        let earlier = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();

        let mut latest = HashMap::new();
        record_latest(&mut latest, "ci".into(), false, earlier);
        record_latest(&mut latest, "ci".into(), true, later);
        assert_eq!(latest.get("ci"), Some(&(true, later)));

        // A stale re-delivery of the older failing run must not clobber the
        // newer passing one.
        record_latest(&mut latest, "ci".into(), false, earlier);
        assert_eq!(latest.get("ci"), Some(&(true, later)));
    }
}
