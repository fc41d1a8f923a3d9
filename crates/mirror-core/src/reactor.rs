//! The Reactor: reacts to webhook-delivered events between Syncer ticks —
//! a tracking issue closing, a CI signal arriving, or a fork-side sync PR
//! closing outside the engine's own control (§4.2).

use mirror_host::{HostClient, UpdatePullRequest};
use tracing::{info, instrument, warn};

use crate::domain::{PendingAction, PendingPr, Tuple};
use crate::error::Result;
use crate::ops::{self, MergeOutcome};
use crate::store::Store;
use crate::templates;

/// §4.2 "issue closed": a human closing a tracking issue is the only way
/// to clear a `Blocked` tuple. Closes the attempt's fork PR if one is still
/// open (step 2), advances the cursor past every upstream PR the blocked
/// attempt covered (step 3), and deletes the `PendingPr` row (step 4) so the
/// next Syncer tick starts the tuple fresh from there.
///
/// Returns `false` if `issue_number` wasn't a tracking issue for this fork
/// repo, or belonged to a tuple that wasn't `Blocked` (stale delivery,
/// double delivery, or an unrelated issue) — not an error, just a no-op.
///
/// # Errors
/// Returns an error if a host or store call fails.
#[instrument(skip(store, host))]
pub async fn handle_issue_closed<S: Store, H: HostClient>(
    store: &S,
    host: &H,
    fork_org: &str,
    repo: &str,
    fork_repo_id: i64,
    issue_number: u64,
) -> Result<bool> {
    let Some(pending) = store.get_pending_pr_by_issue(fork_repo_id, issue_number).await? else {
        return Ok(false);
    };
    if pending.action != PendingAction::Blocked {
        return Ok(false);
    }

    if let Some(pr_id) = pending.pr_id {
        match host.get_pr(fork_org, repo, pr_id).await {
            Ok(pr) if pr.state == mirror_host::PullRequestState::Open => {
                host.update_pr(fork_org, repo, pr_id, UpdatePullRequest { state: Some("closed"), body: None })
                    .await?;
            }
            Ok(_) => {}
            Err(e) => warn!(pr = pr_id, error = %e, "failed to look up fork PR while unblocking tuple"),
        }
    }

    finish_merge(store, &pending).await?;
    info!(issue_number, fork_branch = pending.fork_branch, "tracking issue closed, tuple unblocked");
    Ok(true)
}

/// §4.2 "CI signal": a check-run/check-suite/status event completed for
/// `sha`, reporting `success` for `check_name`. Both wire shapes (a "check"
/// with `conclusion`, a "status" with `state`) funnel into this one handler
/// once the caller has reduced them to `(check_name, success)`.
///
/// If `success` is `false` and `check_name` is one of the branch's required
/// checks, this blocks the tuple immediately (step 4) rather than waiting
/// for other required checks to report — a single red required check is
/// fatal regardless of the others. If `success` is `true`, every other
/// required check must also already be green before the merge is attempted
/// (step 5); otherwise this is a no-op and a later signal will retrigger.
///
/// No-ops (not an error) when the SHA isn't a tracked sync PR's head, the
/// attempt is already `Blocked`, or `check_name` isn't among the branch's
/// required checks.
///
/// # Errors
/// Returns an error if a host or store call fails.
#[instrument(skip(store, host), fields(%sha, %check_name, success))]
pub async fn handle_ci_signal<S: Store, H: HostClient>(
    store: &S,
    host: &H,
    fork_org: &str,
    repo: &str,
    fork_repo_id: i64,
    sha: &str,
    check_name: &str,
    success: bool,
) -> Result<()> {
    let prs = host.list_prs_by_head_sha(fork_org, repo, sha).await?;
    let Some(pr) = prs.into_iter().find(|pr| pr.state == mirror_host::PullRequestState::Open) else {
        return Ok(());
    };

    let Some(pending) = store.get_pending_pr_by_pr_id(fork_repo_id, pr.number).await? else {
        return Ok(());
    };
    if pending.action != PendingAction::Created {
        // Blocked already owns this tuple's resolution; unrelated.
        return Ok(());
    }

    // Step 3: resolve required checks and ignore signals for names the
    // branch doesn't actually require.
    let protection = host.get_branch_protection(fork_org, repo, &pending.fork_branch).await?;
    if !protection.required_checks.iter().any(|name| name == check_name) {
        return Ok(());
    }

    if !success {
        block_on_ci_failure(store, host, fork_org, repo, &pending, pr.number, &pr.body).await?;
        return Ok(());
    }

    // Step 5: this signal is green, but every other required check must be
    // too before we merge.
    if !ops::required_checks_all_green(host, fork_org, repo, sha, &protection.required_checks).await? {
        return Ok(());
    }

    let upstream_org = resolve_org(store, pending.upstream_repo_id).await?;
    match ops::attempt_merge(store, host, fork_org, &upstream_org, repo, &pending).await? {
        MergeOutcome::Merged => {
            finish_merge(store, &pending).await?;
            info!(pr = pr.number, "merged sync PR after required checks went green");
        }
        MergeOutcome::Blocked => {
            warn!(pr = pr.number, "merge rejected after required checks went green, tuple blocked");
        }
    }
    Ok(())
}

/// §4.2 step 4: create the tracking issue, transition the tuple to
/// `Blocked`, and append `Closes #<issue>` to the sync PR's body so closing
/// the issue is discoverable from the PR (a failure to update the body is
/// logged, not fatal — the tuple is blocked either way).
async fn block_on_ci_failure<S: Store, H: HostClient>(
    store: &S,
    host: &H,
    fork_org: &str,
    repo: &str,
    pending: &PendingPr,
    pr_number: u64,
    pr_body: &Option<String>,
) -> Result<()> {
    let upstream_org = resolve_org(store, pending.upstream_repo_id).await?;
    let details = templates::IssueBodyDetails { pr_id: Some(pr_number), ..Default::default() };
    let body = templates::issue_body(
        "the PR CI failed",
        &upstream_org,
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
        Some(pr_number),
        issue.number,
    )?;
    store.set_pending_pr(&blocked).await?;
    warn!(pr = pr_number, issue = issue.number, "required check failed, tuple blocked");

    let new_body = format!("{}{}", pr_body.clone().unwrap_or_default(), templates::closes_issue_suffix(issue.number));
    if let Err(e) = host
        .update_pr(fork_org, repo, pr_number, UpdatePullRequest { state: None, body: Some(&new_body) })
        .await
    {
        warn!(pr = pr_number, error = %e, "failed to append Closes #N to sync PR body");
    }
    Ok(())
}

/// §4.2 "pull request closed": the fork-side sync PR closed. Per spec this
/// is a pure reconciliation step — it does not distinguish a merge carried
/// out by [`ops::attempt_merge`] from any other way the PR reached a closed
/// state, since a `Created` attempt with no tracking issue only ever gets
/// here after the merge helper already succeeded (`handle_ci_signal`) or
/// after the Syncer's own supersede path yielded to this exact handler
/// (§4.1 step 6). Step 2's "ignore if `github_issue` is non-null" is
/// already implied by filtering to `action=Created` (the invariant in §3
/// guarantees `Created ⇒ github_issue` is null at this point), kept here
/// explicitly so the no-op is visible rather than relying on the caller
/// never passing a `Blocked` row.
///
/// No-ops if `pr_number` isn't tracked as a `Created` attempt, or if that
/// attempt has already picked up a tracking issue.
///
/// # Errors
/// Returns an error if a store call fails.
#[instrument(skip(store))]
pub async fn handle_pr_closed<S: Store>(store: &S, fork_repo_id: i64, pr_number: u64) -> Result<()> {
    let Some(pending) = store.get_pending_pr_by_pr_id(fork_repo_id, pr_number).await? else {
        return Ok(());
    };
    if pending.action != PendingAction::Created || pending.github_issue.is_some() {
        return Ok(());
    }

    finish_merge(store, &pending).await?;
    info!(pr = pr_number, "sync PR closed, tuple advanced");
    Ok(())
}

/// Advance the tuple's cursor past everything this attempt covered, and
/// clear the `PendingPr` row — the common tail of every successful-merge
/// path above.
async fn finish_merge<S: Store>(store: &S, pending: &PendingPr) -> Result<()> {
    store
        .set_last_handled_pr(
            pending.fork_repo_id,
            pending.upstream_repo_id,
            &pending.fork_branch,
            pending.last_upstream_pr_id(),
        )
        .await?;
    store
        .delete_pending_pr(pending.fork_repo_id, pending.upstream_repo_id, &pending.fork_branch)
        .await?;
    Ok(())
}

/// Resolve a repo id back to its org login for message templates, falling
/// back to a placeholder if the row somehow isn't found (it always should
/// be — every tuple's repos are created via `get_or_create_repo` before
/// any `PendingPr` referencing them exists).
async fn resolve_org<S: Store>(store: &S, repo_id: i64) -> Result<String> {
    Ok(store
        .get_repo(repo_id)
        .await?
        .map_or_else(|| "unknown".to_string(), |repo| repo.org))
}
