//! The Syncer: discovers newly merged upstream PRs and drives each
//! tuple's state machine one step per tick (§4.1).

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use mirror_git::{ApplyPatchesRequest, GitWorkspace, PatchSpec};
use mirror_host::{CreatePullRequest, HostClient, PullRequest};
use tracing::{info, instrument, warn};

use crate::domain::{PendingAction, PendingPr, Tuple, NOT_APPLICABLE_AUTHOR};
use crate::error::{Error, Result};
use crate::ops::{self, MergeOutcome};
use crate::store::Store;
use crate::templates;

/// One `(fork_org, upstream_org, repo, fork_branch, upstream_branch)`
/// tuple, resolved from config against the host's installation/org repo
/// listings, plus the labels configured for sync PRs it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchTarget {
    /// Org/user the fork lives under (a GitHub App installation target).
    pub fork_org: String,
    /// Org/user the upstream repo lives under.
    pub upstream_org: String,
    /// Repository name, identical on both sides.
    pub repo: String,
    /// Branch on the fork this tuple keeps in sync.
    pub fork_branch: String,
    /// Branch on the upstream repo whose merged PRs feed this tuple.
    pub upstream_branch: String,
    /// Labels applied to every sync PR this tuple opens.
    pub pr_labels: Vec<String>,
}

/// §4.1 tuple enumeration: cross product of installed fork-orgs × configured
/// upstream-orgs × repo names present on both sides × `branchMappings`
/// entries. `clients` must contain one authenticated [`HostClient`] per
/// configured fork org (keyed by its login), since each fork org is a
/// distinct GitHub App installation.
pub async fn enumerate_branch_targets<H: HostClient>(
    config: &crate::config::Config,
    clients: &HashMap<String, H>,
) -> Vec<BranchTarget> {
    let mut targets = Vec::new();

    for (fork_org, upstreams) in &config.upstream_mappings {
        let Some(client) = clients.get(fork_org) else {
            warn!(fork_org, "no authenticated client for this fork org, skipping");
            continue;
        };

        let fork_repos: HashSet<String> = match client.list_repos_for_installation(0).await {
            Ok(repos) => repos.into_iter().map(|r| r.name).collect(),
            Err(e) => {
                warn!(fork_org, error = %e, "failed to list installation repos, skipping fork org");
                continue;
            }
        };

        for (upstream_org, mapping) in upstreams {
            let upstream_repos = match list_upstream_repos(client, upstream_org).await {
                Ok(repos) => repos,
                Err(e) => {
                    warn!(fork_org, upstream_org, error = %e, "failed to list upstream repos, skipping");
                    continue;
                }
            };

            for repo in fork_repos.intersection(&upstream_repos) {
                for (upstream_branch, fork_branch) in &mapping.branch_mappings {
                    targets.push(BranchTarget {
                        fork_org: fork_org.clone(),
                        upstream_org: upstream_org.clone(),
                        repo: repo.clone(),
                        fork_branch: fork_branch.clone(),
                        upstream_branch: upstream_branch.clone(),
                        pr_labels: mapping.pr_labels.clone(),
                    });
                }
            }
        }
    }

    targets
}

/// List an org's public repos, falling back to the user-repos listing when
/// the org lookup reports "not found" (the upstream may be a user account
/// rather than an organization).
async fn list_upstream_repos<H: HostClient>(client: &H, upstream_org: &str) -> Result<HashSet<String>> {
    match client.list_org_repos(upstream_org).await {
        Ok(repos) => Ok(repos.into_iter().map(|r| r.name).collect()),
        Err(mirror_host::Error::ApiError { status: 404, .. }) => {
            let repos = client.list_user_repos(upstream_org).await?;
            Ok(repos.into_iter().map(|r| r.name).collect())
        }
        Err(e) => Err(e.into()),
    }
}

/// Outcome of one [`run_once`] tick, for logging/testing — errors are
/// swallowed per-tuple (§4.1 "accumulate but do not propagate"), so this is
/// the only signal a caller gets.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    /// Tuples enumerated this tick.
    pub tuples: usize,
    /// Tuples whose `handle_branch` call returned an error.
    pub failed: usize,
}

/// §4.1 `RunOnce`: enumerate tuples and drive each one step. One tuple's
/// failure never stops the others; the tick loop (outside this crate)
/// sleeps `max(0, interval - elapsed)` and calls this again.
pub async fn run_once<S: Store, H: HostClient, W: GitWorkspace>(
    store: &S,
    clients: &HashMap<String, H>,
    workspace: &W,
    config: &crate::config::Config,
) -> RunSummary {
    let targets = enumerate_branch_targets(config, clients).await;
    let mut summary = RunSummary { tuples: targets.len(), failed: 0 };

    for target in &targets {
        let Some(client) = clients.get(&target.fork_org) else {
            // Already logged during enumeration; nothing new to say here.
            summary.failed += 1;
            continue;
        };
        if let Err(e) = handle_branch(store, client, workspace, target).await {
            warn!(
                fork_org = target.fork_org,
                upstream_org = target.upstream_org,
                repo = target.repo,
                fork_branch = target.fork_branch,
                error = %e,
                "tuple sync failed, will retry next tick"
            );
            summary.failed += 1;
        }
    }

    summary
}

/// §4.1 `handleBranch`: drive one tuple's state machine exactly one step.
///
/// # Errors
/// Returns an error for any failure that should abort this tuple for the
/// current tick (transient host errors, store failures, cherry-pick
/// failures that couldn't even be recorded as `Blocked`). The caller
/// (`run_once`) logs and retries next tick; no state is left partially
/// written on an error path — every mutating step either completes with
/// its store write or returns before making one.
#[instrument(skip(store, host, workspace), fields(fork_org = %target.fork_org, repo = %target.repo, fork_branch = %target.fork_branch))]
pub async fn handle_branch<S: Store, H: HostClient, W: GitWorkspace>(
    store: &S,
    host: &H,
    workspace: &W,
    target: &BranchTarget,
) -> Result<()> {
    let fork_repo = store.get_or_create_repo(&target.fork_org, &target.repo).await?;
    let upstream_repo = store.get_or_create_repo(&target.upstream_org, &target.repo).await?;

    // Step 1: a blocked tuple waits for a human to close its tracking issue.
    let existing = store
        .get_pending_pr(fork_repo.id, upstream_repo.id, &target.fork_branch)
        .await?;
    if matches!(existing.as_ref(), Some(p) if p.action == PendingAction::Blocked) {
        return Ok(());
    }

    // Step 2: bootstrap the cursor on first sight of this tuple.
    let cursor = store
        .get_last_handled_pr(fork_repo.id, upstream_repo.id, &target.fork_branch)
        .await?;
    let cursor = match cursor {
        Some(c) => c,
        None => {
            let latest = latest_merged_pr_id(host, &target.upstream_org, &target.repo).await?;
            store
                .set_last_handled_pr(fork_repo.id, upstream_repo.id, &target.fork_branch, latest)
                .await?;
            return Ok(());
        }
    };

    // Step 3: merged PRs beyond the cursor, restored to ascending id order.
    let candidate_ids = merged_pr_ids_since(host, &target.upstream_org, &target.repo, cursor).await?;
    if candidate_ids.is_empty() {
        return Ok(());
    }

    // Step 4: fetch each candidate and group by base branch.
    let mut by_base_branch: HashMap<String, Vec<PullRequest>> = HashMap::new();
    for id in candidate_ids {
        let pr = host.get_pr(&target.upstream_org, &target.repo, id).await?;
        by_base_branch.entry(pr.base_ref.clone()).or_default().push(pr);
    }
    let Some(candidates) = by_base_branch.remove(&target.upstream_branch) else {
        return Ok(());
    };

    let pr_ids: Vec<u64> = candidates.iter().map(|pr| pr.number).collect();
    let authors: Vec<String> = candidates.iter().map(|_| NOT_APPLICABLE_AUTHOR.to_string()).collect();

    // Step 5: an in-flight PR already covers exactly this set.
    if let Some(pending) = &existing {
        if pending.action == PendingAction::Created && pending.covers_exactly(&pr_ids) {
            return Ok(());
        }
    }

    // Step 6: supersede whatever's in flight, or yield to the Reactor if
    // the fork already closed it first.
    let mut replaces = None;
    if let Some(pending) = &existing {
        let Some(pr_id) = pending.pr_id else {
            // `Created` always has a pr_id; nothing else reaches step 6.
            return Ok(());
        };
        let closed_by_us = ops::close_pr(host, &target.fork_org, &target.repo, pr_id).await?;
        if !closed_by_us {
            // Already closed — the Reactor's pull-request-closed handler
            // owns terminal advancement now. Touch nothing.
            return Ok(());
        }
        store
            .delete_pending_pr(fork_repo.id, upstream_repo.id, &target.fork_branch)
            .await?;
        replaces = Some(pr_id);
    }

    // Step 7: patch locations for the cherry-pick.
    let mut patches = Vec::with_capacity(candidates.len());
    for pr in &candidates {
        let Some(merge_commit_sha) = pr.merge_commit_sha.clone() else {
            return Err(Error::MissingMergeCommit(pr.number));
        };
        patches.push(PatchSpec { head_sha: merge_commit_sha, commit_count: pr.commits });
    }

    // Step 8: apply the cherry-picks on a fresh working branch.
    let working_branch = format!("{}-{}", target.upstream_branch, unix_millis());
    let fork_remote_url = host.clone_url(&target.fork_org, &target.repo).await?;
    let upstream_remote_url = host.clone_url(&target.upstream_org, &target.repo).await?;
    let apply_result = workspace.apply_patches(&ApplyPatchesRequest {
        fork_remote_url,
        upstream_remote_url,
        source_branch: target.fork_branch.clone(),
        working_branch: working_branch.clone(),
        patches,
    });

    if let Err(e) = apply_result {
        let details = templates::IssueBodyDetails {
            pr_id: None,
            error_transcript: Some(&e.to_string()),
            reproduce_commands: None,
        };
        let body = templates::issue_body(
            "one or more patches couldn't cleanly apply",
            &target.upstream_org,
            &target.repo,
            &pr_ids,
            &target.fork_org,
            &target.fork_branch,
            &details,
        );
        let issue = host
            .create_issue(&target.fork_org, &target.repo, &templates::issue_title(&pr_ids), &body)
            .await?;
        let tuple = Tuple {
            fork_repo_id: fork_repo.id,
            upstream_repo_id: upstream_repo.id,
            fork_branch: target.fork_branch.clone(),
            upstream_branch: target.upstream_branch.clone(),
        };
        let blocked = PendingPr::blocked(&tuple, pr_ids.clone(), authors.clone(), None, issue.number)?;
        store.set_pending_pr(&blocked).await?;
        return Ok(());
    }

    // Step 9: open the fork-side sync PR.
    let title = templates::sync_pr_title(&target.upstream_org, &target.repo, &pr_ids);
    let body = templates::sync_pr_body(&target.upstream_org, &target.repo, &pr_ids, replaces);
    let pr = host
        .create_pr(
            &target.fork_org,
            &target.repo,
            CreatePullRequest {
                title: &title,
                body: &body,
                head: &working_branch,
                base: &target.fork_branch,
            },
        )
        .await?;
    if !target.pr_labels.is_empty() {
        host.add_labels(&target.fork_org, &target.repo, pr.number, &target.pr_labels).await?;
    }

    // Step 10: persist the new attempt.
    let tuple = Tuple {
        fork_repo_id: fork_repo.id,
        upstream_repo_id: upstream_repo.id,
        fork_branch: target.fork_branch.clone(),
        upstream_branch: target.upstream_branch.clone(),
    };
    let pending = PendingPr::created(&tuple, pr_ids.clone(), authors, pr.number)?;
    store.set_pending_pr(&pending).await?;

    // Step 11: no required checks means nothing will ever call the Reactor
    // for this PR — finish the transition right here.
    let protection = host.get_branch_protection(&target.fork_org, &target.repo, &target.fork_branch).await?;
    if protection.required_checks.is_empty() {
        match ops::attempt_merge(store, host, &target.fork_org, &target.upstream_org, &target.repo, &pending).await? {
            MergeOutcome::Merged => {
                let last = pending.last_upstream_pr_id();
                store
                    .set_last_handled_pr(fork_repo.id, upstream_repo.id, &target.fork_branch, last)
                    .await?;
                store
                    .delete_pending_pr(fork_repo.id, upstream_repo.id, &target.fork_branch)
                    .await?;
                info!(pr = pr.number, last_handled = last, "merged sync PR with no required checks");
            }
            MergeOutcome::Blocked => {
                warn!(pr = pr.number, "merge of check-free sync PR failed, tuple blocked");
            }
        }
    }

    Ok(())
}

/// Most recent merged PR on any branch, used to bootstrap a cursor without
/// replaying history (§4.1 step 2). `0` if the upstream has no merged PRs.
async fn latest_merged_pr_id<H: HostClient>(host: &H, org: &str, repo: &str) -> Result<u64> {
    let page = host.search_merged_prs(org, repo, 1).await?;
    Ok(page.first().map_or(0, |pr| pr.number))
}

/// Merged PR ids strictly greater than `cursor`, in ascending order. The
/// host returns pages most-recently-merged first; we walk forward until we
/// see an id at or below the cursor, then reverse.
async fn merged_pr_ids_since<H: HostClient>(host: &H, org: &str, repo: &str, cursor: u64) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    let mut page = 1;
    'pages: loop {
        let batch = host.search_merged_prs(org, repo, page).await?;
        if batch.is_empty() {
            break;
        }
        let len = batch.len();
        for pr in batch {
            if pr.number <= cursor {
                break 'pages;
            }
            ids.push(pr.number);
        }
        if len < 100 {
            break;
        }
        page += 1;
        if page > 50 {
            warn!(org, repo, cursor, "merged-PR pagination exceeded 50 pages, giving up for this tick");
            break;
        }
    }
    ids.reverse();
    Ok(ids)
}

fn unix_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_git::ApplyPatchesRequest as Request;
    use mirror_host::{
        BranchProtection, CheckRun, CommitStatus, CreatePullRequest as CreatePr, Error as HostError, Installation,
        Issue, MergeResult, PullRequestState, RepoRef, UpdatePullRequest,
    };
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn unix_millis_is_monotonic_enough_to_be_nonzero() {
        assert!(unix_millis() > 0);
    }

    #[derive(Default)]
    struct MockStore {
        repos: Mutex<HashMap<(String, String), i64>>,
        repo_names: Mutex<HashMap<i64, crate::domain::Repo>>,
        next_id: Mutex<i64>,
        cursors: Mutex<HashMap<(i64, i64, String), u64>>,
        pending: Mutex<HashMap<(i64, i64, String), PendingPr>>,
    }

    impl Store for MockStore {
        async fn get_or_create_repo(&self, org: &str, name: &str) -> Result<crate::domain::Repo> {
            let key = (org.to_string(), name.to_string());
            if let Some(id) = self.repos.lock().unwrap().get(&key) {
                return Ok(self.repo_names.lock().unwrap()[id].clone());
            }
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            let repo = crate::domain::Repo { id: *next_id, org: org.to_string(), name: name.to_string() };
            self.repos.lock().unwrap().insert(key, repo.id);
            self.repo_names.lock().unwrap().insert(repo.id, repo.clone());
            Ok(repo)
        }

        async fn get_repo(&self, id: i64) -> Result<Option<crate::domain::Repo>> {
            Ok(self.repo_names.lock().unwrap().get(&id).cloned())
        }

        async fn get_last_handled_pr(&self, fork: i64, upstream: i64, branch: &str) -> Result<Option<u64>> {
            Ok(self.cursors.lock().unwrap().get(&(fork, upstream, branch.to_string())).copied())
        }

        async fn set_last_handled_pr(&self, fork: i64, upstream: i64, branch: &str, id: u64) -> Result<()> {
            self.cursors.lock().unwrap().insert((fork, upstream, branch.to_string()), id);
            Ok(())
        }

        async fn get_pending_pr(&self, fork: i64, upstream: i64, branch: &str) -> Result<Option<PendingPr>> {
            Ok(self.pending.lock().unwrap().get(&(fork, upstream, branch.to_string())).cloned())
        }

        async fn get_pending_pr_by_issue(&self, fork_repo_id: i64, github_issue: u64) -> Result<Option<PendingPr>> {
            Ok(self
                .pending
                .lock()
                .unwrap()
                .values()
                .find(|p| p.fork_repo_id == fork_repo_id && p.github_issue == Some(github_issue))
                .cloned())
        }

        async fn get_pending_pr_by_pr_id(&self, fork_repo_id: i64, pr_id: u64) -> Result<Option<PendingPr>> {
            Ok(self
                .pending
                .lock()
                .unwrap()
                .values()
                .find(|p| p.fork_repo_id == fork_repo_id && p.pr_id == Some(pr_id))
                .cloned())
        }

        async fn set_pending_pr(&self, pending: &PendingPr) -> Result<()> {
            self.pending.lock().unwrap().insert(
                (pending.fork_repo_id, pending.upstream_repo_id, pending.fork_branch.clone()),
                pending.clone(),
            );
            Ok(())
        }

        async fn delete_pending_pr(&self, fork: i64, upstream: i64, branch: &str) -> Result<()> {
            self.pending.lock().unwrap().remove(&(fork, upstream, branch.to_string()));
            Ok(())
        }
    }

    #[derive(Clone)]
    struct FakePr {
        number: u64,
        base_ref: String,
        state: PullRequestState,
        merge_commit_sha: Option<String>,
    }

    #[derive(Default)]
    struct MockHost {
        merged: Mutex<Vec<FakePr>>,
        forks: Mutex<HashMap<u64, FakePr>>,
        next_pr_number: Mutex<u64>,
        next_issue_number: Mutex<u64>,
        required_checks: Vec<String>,
        merge_should_succeed: bool,
        issues_created: Mutex<u32>,
    }

    impl MockHost {
        fn with_merged(prs: Vec<FakePr>) -> Self {
            Self { merged: Mutex::new(prs), next_pr_number: Mutex::new(100), next_issue_number: Mutex::new(900), ..Default::default() }
        }

        fn to_pull_request(pr: &FakePr) -> mirror_host::PullRequest {
            mirror_host::PullRequest {
                number: pr.number,
                title: String::new(),
                body: None,
                state: pr.state,
                base_ref: pr.base_ref.clone(),
                head_sha: format!("sha-{}", pr.number),
                merge_commit_sha: pr.merge_commit_sha.clone(),
                commits: 1,
                merged_at: None,
                html_url: String::new(),
            }
        }
    }

    impl HostClient for MockHost {
        async fn list_installations(&self) -> std::result::Result<Vec<Installation>, HostError> {
            Ok(vec![])
        }
        async fn list_repos_for_installation(&self, _id: u64) -> std::result::Result<Vec<RepoRef>, HostError> {
            Ok(vec![])
        }
        async fn list_org_repos(&self, _org: &str) -> std::result::Result<Vec<RepoRef>, HostError> {
            Ok(vec![])
        }
        async fn list_user_repos(&self, _user: &str) -> std::result::Result<Vec<RepoRef>, HostError> {
            Ok(vec![])
        }
        async fn search_merged_prs(&self, _o: &str, _r: &str, page: u32) -> std::result::Result<Vec<mirror_host::PullRequest>, HostError> {
            if page > 1 {
                return Ok(vec![]);
            }
            let mut prs: Vec<_> = self.merged.lock().unwrap().iter().map(Self::to_pull_request).collect();
            prs.sort_by(|a, b| b.number.cmp(&a.number));
            Ok(prs)
        }
        async fn get_pr(&self, _o: &str, _r: &str, number: u64) -> std::result::Result<mirror_host::PullRequest, HostError> {
            if let Some(pr) = self.forks.lock().unwrap().get(&number) {
                return Ok(Self::to_pull_request(pr));
            }
            if let Some(pr) = self.merged.lock().unwrap().iter().find(|p| p.number == number) {
                return Ok(Self::to_pull_request(pr));
            }
            Err(HostError::PrNotFound(number))
        }
        async fn list_prs_by_head_sha(&self, _o: &str, _r: &str, _sha: &str) -> std::result::Result<Vec<mirror_host::PullRequest>, HostError> {
            Ok(vec![])
        }
        async fn list_check_runs(&self, _o: &str, _r: &str, _sha: &str, _page: u32) -> std::result::Result<Vec<CheckRun>, HostError> {
            Ok(vec![])
        }
        async fn list_commit_statuses(&self, _o: &str, _r: &str, _sha: &str, _page: u32) -> std::result::Result<Vec<CommitStatus>, HostError> {
            Ok(vec![])
        }
        async fn get_branch_protection(&self, _o: &str, _r: &str, _b: &str) -> std::result::Result<BranchProtection, HostError> {
            Ok(BranchProtection { required_checks: self.required_checks.clone() })
        }
        async fn create_issue(&self, _o: &str, _r: &str, _title: &str, _body: &str) -> std::result::Result<Issue, HostError> {
            let mut n = self.next_issue_number.lock().unwrap();
            let number = *n;
            *n += 1;
            *self.issues_created.lock().unwrap() += 1;
            Ok(Issue { number })
        }
        async fn create_pr(&self, _o: &str, _r: &str, _req: CreatePr<'_>) -> std::result::Result<mirror_host::PullRequest, HostError> {
            let mut n = self.next_pr_number.lock().unwrap();
            let number = *n;
            *n += 1;
            let pr = FakePr { number, base_ref: "release".into(), state: PullRequestState::Open, merge_commit_sha: None };
            self.forks.lock().unwrap().insert(number, pr.clone());
            Ok(Self::to_pull_request(&pr))
        }
        async fn update_pr(&self, _o: &str, _r: &str, number: u64, update: UpdatePullRequest<'_>) -> std::result::Result<mirror_host::PullRequest, HostError> {
            let mut forks = self.forks.lock().unwrap();
            if let Some(pr) = forks.get_mut(&number) {
                if update.state == Some("closed") {
                    pr.state = PullRequestState::Closed;
                }
                return Ok(Self::to_pull_request(pr));
            }
            Err(HostError::PrNotFound(number))
        }
        async fn add_labels(&self, _o: &str, _r: &str, _n: u64, _l: &[String]) -> std::result::Result<(), HostError> {
            Ok(())
        }
        async fn create_comment(&self, _o: &str, _r: &str, _n: u64, _b: &str) -> std::result::Result<(), HostError> {
            Ok(())
        }
        async fn merge_pr(&self, _o: &str, _r: &str, number: u64, _sha: &str) -> std::result::Result<MergeResult, HostError> {
            if self.merge_should_succeed {
                if let Some(pr) = self.forks.lock().unwrap().get_mut(&number) {
                    pr.state = PullRequestState::Merged;
                }
                return Ok(MergeResult { merged: true, sha: Some("merged-sha".into()), message: "merged".into() });
            }
            Ok(MergeResult { merged: false, sha: None, message: "rejected".into() })
        }
        async fn clone_url(&self, owner: &str, repo: &str) -> std::result::Result<String, HostError> {
            Ok(format!("https://example.invalid/{owner}/{repo}.git"))
        }
    }

    #[derive(Default)]
    struct MockWorkspace {
        should_fail: bool,
        last_request: Mutex<Option<Request>>,
    }

    impl GitWorkspace for MockWorkspace {
        fn apply_patches(&self, request: &Request) -> mirror_git::Result<()> {
            *self.last_request.lock().unwrap() = Some(request.clone());
            if self.should_fail {
                return Err(mirror_git::Error::CherryPickFailed("conflict".into()));
            }
            Ok(())
        }
    }

    fn target() -> BranchTarget {
        BranchTarget {
            fork_org: "fork-org".into(),
            upstream_org: "up-org".into(),
            repo: "widgets".into(),
            fork_branch: "release".into(),
            upstream_branch: "main".into(),
            pr_labels: vec![],
        }
    }

    #[tokio::test]
    async fn first_tick_bootstraps_cursor_without_creating_anything() {
        let store = MockStore::default();
        let host = MockHost::with_merged(vec![FakePr {
            number: 10,
            base_ref: "main".into(),
            state: PullRequestState::Merged,
            merge_commit_sha: Some("c10".into()),
        }]);
        let workspace = MockWorkspace::default();

        handle_branch(&store, &host, &workspace, &target()).await.unwrap();

        let fork = store.get_or_create_repo("fork-org", "widgets").await.unwrap();
        let upstream = store.get_or_create_repo("up-org", "widgets").await.unwrap();
        assert_eq!(store.get_last_handled_pr(fork.id, upstream.id, "release").await.unwrap(), Some(10));
        assert!(store.get_pending_pr(fork.id, upstream.id, "release").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn happy_path_with_no_required_checks_merges_immediately() {
        let store = MockStore::default();
        let fork = store.get_or_create_repo("fork-org", "widgets").await.unwrap();
        let upstream = store.get_or_create_repo("up-org", "widgets").await.unwrap();
        store.set_last_handled_pr(fork.id, upstream.id, "release", 10).await.unwrap();

        let host = MockHost {
            merge_should_succeed: true,
            ..MockHost::with_merged(vec![FakePr {
                number: 11,
                base_ref: "main".into(),
                state: PullRequestState::Merged,
                merge_commit_sha: Some("c11".into()),
            }])
        };
        let workspace = MockWorkspace::default();

        handle_branch(&store, &host, &workspace, &target()).await.unwrap();

        assert_eq!(store.get_last_handled_pr(fork.id, upstream.id, "release").await.unwrap(), Some(11));
        assert!(store.get_pending_pr(fork.id, upstream.id, "release").await.unwrap().is_none());
        assert!(workspace.last_request.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn supersede_in_flight_closes_old_pr_and_opens_a_new_one() {
        let store = MockStore::default();
        let fork = store.get_or_create_repo("fork-org", "widgets").await.unwrap();
        let upstream = store.get_or_create_repo("up-org", "widgets").await.unwrap();
        store.set_last_handled_pr(fork.id, upstream.id, "release", 10).await.unwrap();

        let host = MockHost::with_merged(vec![
            FakePr { number: 11, base_ref: "main".into(), state: PullRequestState::Merged, merge_commit_sha: Some("c11".into()) },
            FakePr { number: 12, base_ref: "main".into(), state: PullRequestState::Merged, merge_commit_sha: Some("c12".into()) },
        ]);
        // Pretend PR #100 is already open, tracking just #11.
        host.forks.lock().unwrap().insert(
            100,
            FakePr { number: 100, base_ref: "release".into(), state: PullRequestState::Open, merge_commit_sha: None },
        );
        *host.next_pr_number.lock().unwrap() = 101;
        let tuple = Tuple { fork_repo_id: fork.id, upstream_repo_id: upstream.id, fork_branch: "release".into(), upstream_branch: "main".into() };
        let pending = PendingPr::created(&tuple, vec![11], vec![NOT_APPLICABLE_AUTHOR.into()], 100).unwrap();
        store.set_pending_pr(&pending).await.unwrap();

        let workspace = MockWorkspace::default();
        handle_branch(&store, &host, &workspace, &target()).await.unwrap();

        // The old PR was closed...
        let old = host.get_pr("fork-org", "widgets", 100).await.unwrap();
        assert_eq!(old.state, PullRequestState::Closed);
        // ...and a new attempt now covers both PRs.
        let new_pending = store.get_pending_pr(fork.id, upstream.id, "release").await.unwrap().unwrap();
        assert_eq!(new_pending.upstream_pr_ids, vec![11, 12]);
        assert_ne!(new_pending.pr_id, Some(100));
    }

    #[tokio::test]
    async fn already_closed_pr_yields_to_the_reactor() {
        let store = MockStore::default();
        let fork = store.get_or_create_repo("fork-org", "widgets").await.unwrap();
        let upstream = store.get_or_create_repo("up-org", "widgets").await.unwrap();
        store.set_last_handled_pr(fork.id, upstream.id, "release", 10).await.unwrap();

        let host = MockHost::with_merged(vec![FakePr {
            number: 11,
            base_ref: "main".into(),
            state: PullRequestState::Merged,
            merge_commit_sha: Some("c11".into()),
        }]);
        // PR #100 is already closed (a human closed it, or a race with the Reactor).
        host.forks.lock().unwrap().insert(
            100,
            FakePr { number: 100, base_ref: "release".into(), state: PullRequestState::Closed, merge_commit_sha: None },
        );
        let tuple = Tuple { fork_repo_id: fork.id, upstream_repo_id: upstream.id, fork_branch: "release".into(), upstream_branch: "main".into() };
        let pending = PendingPr::created(&tuple, vec![9], vec![NOT_APPLICABLE_AUTHOR.into()], 100).unwrap();
        store.set_pending_pr(&pending).await.unwrap();

        let workspace = MockWorkspace::default();
        handle_branch(&store, &host, &workspace, &target()).await.unwrap();

        // Nothing changed: the Reactor's pull-request-closed handler owns this now.
        let still_pending = store.get_pending_pr(fork.id, upstream.id, "release").await.unwrap().unwrap();
        assert_eq!(still_pending.pr_id, Some(100));
        assert!(workspace.last_request.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn blocked_tuple_is_left_alone_until_unblocked() {
        let store = MockStore::default();
        let fork = store.get_or_create_repo("fork-org", "widgets").await.unwrap();
        let upstream = store.get_or_create_repo("up-org", "widgets").await.unwrap();
        store.set_last_handled_pr(fork.id, upstream.id, "release", 10).await.unwrap();
        let tuple = Tuple { fork_repo_id: fork.id, upstream_repo_id: upstream.id, fork_branch: "release".into(), upstream_branch: "main".into() };
        let blocked = PendingPr::blocked(&tuple, vec![9], vec![NOT_APPLICABLE_AUTHOR.into()], None, 55).unwrap();
        store.set_pending_pr(&blocked).await.unwrap();

        let host = MockHost::with_merged(vec![FakePr {
            number: 11,
            base_ref: "main".into(),
            state: PullRequestState::Merged,
            merge_commit_sha: Some("c11".into()),
        }]);
        let workspace = MockWorkspace::default();

        handle_branch(&store, &host, &workspace, &target()).await.unwrap();

        // Cursor untouched, pending row untouched.
        assert_eq!(store.get_last_handled_pr(fork.id, upstream.id, "release").await.unwrap(), Some(10));
        let still = store.get_pending_pr(fork.id, upstream.id, "release").await.unwrap().unwrap();
        assert_eq!(still.action, PendingAction::Blocked);
    }

    #[tokio::test]
    async fn cherry_pick_conflict_opens_tracking_issue_and_blocks() {
        let store = MockStore::default();
        let fork = store.get_or_create_repo("fork-org", "widgets").await.unwrap();
        let upstream = store.get_or_create_repo("up-org", "widgets").await.unwrap();
        store.set_last_handled_pr(fork.id, upstream.id, "release", 10).await.unwrap();

        let host = MockHost::with_merged(vec![FakePr {
            number: 11,
            base_ref: "main".into(),
            state: PullRequestState::Merged,
            merge_commit_sha: Some("c11".into()),
        }]);
        let workspace = MockWorkspace { should_fail: true, ..Default::default() };

        handle_branch(&store, &host, &workspace, &target()).await.unwrap();

        let pending = store.get_pending_pr(fork.id, upstream.id, "release").await.unwrap().unwrap();
        assert_eq!(pending.action, PendingAction::Blocked);
        assert_eq!(pending.pr_id, None);
        assert_eq!(*host.issues_created.lock().unwrap(), 1);
    }
}
