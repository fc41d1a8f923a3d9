//! Human-visible message templates.
//!
//! Every tracking issue, sync PR, and comment the engine posts is built
//! here so the text is byte-identical regardless of which call site (the
//! Syncer or one of the Reactor's event handlers) produces it.

/// GIF accompanying a failed sync, linked at the bottom of every tracking
/// issue body.
const SAD_YODA_GIF: &str = "https://media.giphy.com/media/xTiTnxpQ3ghPiB2Hp6/giphy.gif";

/// Image accompanying the comment posted on a superseded sync PR.
const MIRROR_IMAGE: &str = "https://media.giphy.com/media/3o7TKSjRrfIPjeiVyM/giphy.gif";

fn id_list(ids: &[u64]) -> String {
    ids.iter().map(|id| format!("#{id}")).collect::<Vec<_>>().join(", ")
}

/// `😿 Failed to sync the upstream PRs: #<id1>, #<id2>, …`
#[must_use]
pub fn issue_title(upstream_pr_ids: &[u64]) -> String {
    format!("😿 Failed to sync the upstream PRs: {}", id_list(upstream_pr_ids))
}

/// Details about the failure to embed in a tracking issue body, beyond the
/// id list and the paused-branch notice every body carries.
#[derive(Debug, Clone, Default)]
pub struct IssueBodyDetails<'a> {
    /// The fork-side sync PR this failure is attached to, if one was opened
    /// before the failure occurred (absent for cherry-pick conflicts).
    pub pr_id: Option<u64>,
    /// Raw error output from the failing operation (cherry-pick conflict
    /// markers, the host's merge-rejection message), if one is available.
    pub error_transcript: Option<&'a str>,
    /// Shell commands a human could run locally to reproduce the failure
    /// (only meaningful for cherry-pick conflicts).
    pub reproduce_commands: Option<&'a [String]>,
}

/// The tracking issue body: reason, affected PRs, the paused-branch notice,
/// and whatever failure detail is available.
#[must_use]
pub fn issue_body(
    reason: &str,
    upstream_org: &str,
    repo: &str,
    upstream_pr_ids: &[u64],
    fork_org: &str,
    fork_branch: &str,
    details: &IssueBodyDetails<'_>,
) -> String {
    let mut body = format!(
        "🪞 Magic Mirror 🪞 failed to sync the following upstream pull-requests because {reason}:\n\n"
    );
    for id in upstream_pr_ids {
        body.push_str(&format!("* {upstream_org}/{repo}#{id}\n"));
    }
    body.push_str(&format!(
        "\nSyncing is paused for `{fork_branch}` on `{fork_org}/{repo}` until this issue is closed.\n"
    ));
    if let Some(pr_id) = details.pr_id {
        body.push_str(&format!(
            "\nThe pull-request (#{pr_id}) can be reviewed for more information.\n"
        ));
    }
    if let Some(transcript) = details.error_transcript {
        body.push_str(&format!("\n```\n{transcript}\n```\n"));
    }
    if let Some(commands) = details.reproduce_commands {
        if !commands.is_empty() {
            body.push_str("\nTo reproduce locally:\n\n```sh\n");
            for command in commands {
                body.push_str(command);
                body.push('\n');
            }
            body.push_str("```\n");
        }
    }
    body.push_str(&format!("\n![sad yoda]({SAD_YODA_GIF})\n"));
    body
}

/// `🤖 Sync from <upstream_org>/<repo>: #<id1>, #<id2>, …`
#[must_use]
pub fn sync_pr_title(upstream_org: &str, repo: &str, upstream_pr_ids: &[u64]) -> String {
    format!("🤖 Sync from {upstream_org}/{repo}: {}", id_list(upstream_pr_ids))
}

/// Sync PR body: one bullet per upstream PR, plus a `This replaces #<prev>`
/// line when this PR supersedes a closed one.
#[must_use]
pub fn sync_pr_body(upstream_org: &str, repo: &str, upstream_pr_ids: &[u64], replaces: Option<u64>) -> String {
    let mut body = String::new();
    for id in upstream_pr_ids {
        body.push_str(&format!("* {upstream_org}/{repo}#{id}\n"));
    }
    if let Some(prev) = replaces {
        body.push_str(&format!("\nThis replaces #{prev}\n"));
    }
    body
}

/// Comment posted on a sync PR before it's closed because a newer one
/// supersedes it.
#[must_use]
pub fn supersede_comment() -> String {
    format!("Superseded by a newer sync PR covering additional upstream commits.\n\n![mirror]({MIRROR_IMAGE})")
}

/// Appended to a sync PR's body once its tracking issue is created, so
/// closing the issue (via GitHub's `Closes #N` convention, if the host
/// supports it) is at least discoverable from the PR itself.
#[must_use]
pub fn closes_issue_suffix(github_issue: u64) -> String {
    format!("\n\nCloses #{github_issue}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_title_lists_ids_in_order() {
        assert_eq!(issue_title(&[42, 43]), "😿 Failed to sync the upstream PRs: #42, #43");
    }

    #[test]
    fn sync_pr_title_names_upstream_and_repo() {
        assert_eq!(
            sync_pr_title("acme", "widgets", &[7]),
            "🤖 Sync from acme/widgets: #7"
        );
    }

    #[test]
    fn sync_pr_body_notes_replacement() {
        let body = sync_pr_body("acme", "widgets", &[46, 47], Some(100));
        assert!(body.contains("* acme/widgets#46"));
        assert!(body.contains("* acme/widgets#47"));
        assert!(body.contains("This replaces #100"));
    }

    #[test]
    fn sync_pr_body_omits_replacement_line_when_absent() {
        let body = sync_pr_body("acme", "widgets", &[46], None);
        assert!(!body.contains("This replaces"));
    }

    #[test]
    fn issue_body_includes_pr_reference_when_present() {
        let details = IssueBodyDetails {
            pr_id: Some(99),
            ..Default::default()
        };
        let body = issue_body("the PR CI failed", "acme", "widgets", &[45], "acme-fork", "release-2.5", &details);
        assert!(body.contains("The pull-request (#99) can be reviewed"));
        assert!(body.contains("* acme/widgets#45"));
        assert!(body.contains("release-2.5"));
        assert!(body.contains(SAD_YODA_GIF));
    }

    #[test]
    fn issue_body_omits_pr_reference_when_absent() {
        let details = IssueBodyDetails::default();
        let body = issue_body(
            "one or more patches couldn't cleanly apply",
            "acme",
            "widgets",
            &[44],
            "acme-fork",
            "release-2.5",
            &details,
        );
        assert!(!body.contains("can be reviewed"));
    }
}
