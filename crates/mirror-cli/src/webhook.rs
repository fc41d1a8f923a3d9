//! Webhook payload shapes and `X-Hub-Signature-256` verification.
//!
//! Deliberately narrow: each struct carries only the fields the matching
//! [`mirror_core::reactor`] handler reads, the same trimming principle
//! `mirror_host::types` uses for host API responses.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verify `signature_header` (the raw `X-Hub-Signature-256` header value,
/// `"sha256=<hex>"`) against `body` using `secret`, in constant time.
#[must_use]
pub fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Some(hex_digest) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    computed.ct_eq(&expected).into()
}

#[derive(Debug, Deserialize)]
pub struct Repository {
    pub name: String,
    pub owner: Account,
}

#[derive(Debug, Deserialize)]
pub struct Account {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct IssuesEvent {
    pub action: String,
    pub issue: IssueRef,
    pub repository: Repository,
}

#[derive(Debug, Deserialize)]
pub struct IssueRef {
    pub number: u64,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub number: u64,
    pub repository: Repository,
}

#[derive(Debug, Deserialize)]
pub struct CheckRunEvent {
    pub action: String,
    pub check_run: CheckRunRef,
    pub repository: Repository,
}

#[derive(Debug, Deserialize)]
pub struct CheckRunRef {
    pub name: String,
    pub head_sha: String,
    /// Present once `action == "completed"`; absent while queued/in-progress.
    pub conclusion: Option<mirror_host::CheckConclusion>,
}

#[derive(Debug, Deserialize)]
pub struct StatusEvent {
    pub context: String,
    pub sha: String,
    pub state: mirror_host::CommitStatusState,
    pub repository: Repository,
}
