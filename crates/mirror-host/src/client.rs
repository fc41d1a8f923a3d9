//! Concrete [`HostClient`] backed by the GitHub REST API.

use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::AppAuth;
use crate::error::{Error, Result};
use crate::types::{
    BranchProtection, CheckRun, CommitStatus, CreatePullRequest, Installation, Issue,
    MergeResult, PullRequest, RepoRef, UpdatePullRequest,
};

/// Everything the sync engine needs from the code-hosting platform.
///
/// Uses return-position `impl Future` rather than `#[async_trait]` so the
/// trait stays object-safe-free and allocation-free for the one
/// implementation that matters; mirrors how a GitHub API abstraction in
/// this ecosystem is usually shaped when it needs to be both async and
/// mockable.
#[allow(clippy::missing_errors_doc)]
pub trait HostClient: Send + Sync {
    /// List installations of the app across all accounts.
    fn list_installations(&self) -> impl std::future::Future<Output = Result<Vec<Installation>>> + Send;

    /// List repositories accessible to an installation.
    fn list_repos_for_installation(
        &self,
        installation_id: u64,
    ) -> impl std::future::Future<Output = Result<Vec<RepoRef>>> + Send;

    /// List an organization's public repositories.
    fn list_org_repos(&self, org: &str) -> impl std::future::Future<Output = Result<Vec<RepoRef>>> + Send;

    /// List a user's public repositories (fallback when `org` isn't an org).
    fn list_user_repos(&self, user: &str) -> impl std::future::Future<Output = Result<Vec<RepoRef>>> + Send;

    /// Search merged pull requests for a repo, most-recently-merged first, one page at a time.
    fn search_merged_prs(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
    ) -> impl std::future::Future<Output = Result<Vec<PullRequest>>> + Send;

    /// Fetch a single pull request.
    fn get_pr(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> impl std::future::Future<Output = Result<PullRequest>> + Send;

    /// List pull requests whose head matches a commit SHA.
    fn list_prs_by_head_sha(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> impl std::future::Future<Output = Result<Vec<PullRequest>>> + Send;

    /// List check-runs for a commit, one page at a time.
    fn list_check_runs(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        page: u32,
    ) -> impl std::future::Future<Output = Result<Vec<CheckRun>>> + Send;

    /// List legacy commit statuses for a commit, one page at a time.
    fn list_commit_statuses(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        page: u32,
    ) -> impl std::future::Future<Output = Result<Vec<CommitStatus>>> + Send;

    /// Fetch the branch protection rule's required check names.
    fn get_branch_protection(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> impl std::future::Future<Output = Result<BranchProtection>> + Send;

    /// Create an issue.
    fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
    ) -> impl std::future::Future<Output = Result<Issue>> + Send;

    /// Open a new pull request.
    fn create_pr(
        &self,
        owner: &str,
        repo: &str,
        request: CreatePullRequest<'_>,
    ) -> impl std::future::Future<Output = Result<PullRequest>> + Send;

    /// Update an existing pull request.
    fn update_pr(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        update: UpdatePullRequest<'_>,
    ) -> impl std::future::Future<Output = Result<PullRequest>> + Send;

    /// Apply labels to a pull request.
    fn add_labels(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        labels: &[String],
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Comment on an issue or pull request.
    fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Rebase-merge a pull request, aborting if `expected_head_sha` no longer matches.
    fn merge_pr(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        expected_head_sha: &str,
    ) -> impl std::future::Future<Output = Result<MergeResult>> + Send;

    /// An authenticated clone URL for `owner/repo`, carrying a short-lived
    /// installation token embedded as the URL's user (§4.4). Not part of
    /// spec.md's `HostClient` capability list itself, but the one piece of
    /// plumbing `mirror-git::GitWorkspace` needs from it and that the
    /// engine has no other way to obtain, since the token is minted and
    /// cached entirely inside this client.
    fn clone_url(
        &self,
        owner: &str,
        repo: &str,
    ) -> impl std::future::Future<Output = Result<String>> + Send;
}

#[derive(Serialize)]
struct MergeBody<'a> {
    merge_method: &'a str,
    sha: &'a str,
}

/// GitHub App-authenticated REST client. One instance per installation
/// (installation tokens are per-installation, and each tuple's fork repo
/// belongs to exactly one installation).
pub struct GitHubHostClient {
    client: Client,
    base_url: String,
    auth: AppAuth,
    installation_id: u64,
}

impl GitHubHostClient {
    /// Default GitHub REST API base URL.
    pub const DEFAULT_API_URL: &'static str = "https://api.github.com";

    /// Build a client scoped to one installation.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client fails to construct.
    pub fn new(auth: AppAuth, installation_id: u64) -> Result<Self> {
        Self::with_base_url(auth, installation_id, Self::DEFAULT_API_URL)
    }

    /// Build a client against a custom base URL (GitHub Enterprise, or a test server).
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client fails to construct.
    pub fn with_base_url(auth: AppAuth, installation_id: u64, base_url: impl Into<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("magic-mirror"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));

        let client = Client::builder().default_headers(headers).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            auth,
            installation_id,
        })
    }

    /// The app JWT is used only to mint installation tokens; every other
    /// call authenticates as the installation.
    async fn installation_token(&self) -> Result<SecretString> {
        if let Some(token) = self.auth.cached_installation_token(self.installation_id).await {
            return Ok(token);
        }

        #[derive(serde::Deserialize)]
        struct AccessTokenResponse {
            token: String,
            expires_at: chrono::DateTime<chrono::Utc>,
        }

        let jwt = self.auth.app_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.base_url, self.installation_id
        );
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {jwt}"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::AuthenticationFailed(format!(
                "installation token exchange returned {}",
                response.status()
            )));
        }

        let body: AccessTokenResponse = response.json().await?;
        let token = SecretString::from(body.token);
        self.auth
            .cache_installation_token(self.installation_id, token.clone(), body.expires_at.timestamp() as u64)
            .await;
        Ok(token)
    }

    async fn auth_header(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.installation_token().await?.expose_secret()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, self.auth_header().await?)
            .send()
            .await?;
        self.handle_response(response).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.auth_header().await?)
            .json(body)
            .send()
            .await?;
        self.handle_response(response).await
    }

    async fn patch<T: DeserializeOwned, B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .patch(&url)
            .header(AUTHORIZATION, self.auth_header().await?)
            .json(body)
            .send()
            .await?;
        self.handle_response(response).await
    }

    async fn put<T: DeserializeOwned, B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .put(&url)
            .header(AUTHORIZATION, self.auth_header().await?)
            .json(body)
            .send()
            .await?;
        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        Err(Self::map_error(status, response).await)
    }

    async fn map_error(status: reqwest::StatusCode, response: reqwest::Response) -> Error {
        let status_code = status.as_u16();
        if status_code == 401 {
            return Error::AuthenticationFailed("token rejected by host".into());
        }
        if status_code == 403
            && response
                .headers()
                .get("x-ratelimit-remaining")
                .is_some_and(|v| v == "0")
        {
            return Error::RateLimited;
        }
        let message = response.text().await.unwrap_or_default();
        Error::ApiError { status: status_code, message }
    }
}

impl HostClient for GitHubHostClient {
    async fn list_installations(&self) -> Result<Vec<Installation>> {
        self.get("/app/installations").await
    }

    async fn list_repos_for_installation(&self, installation_id: u64) -> Result<Vec<RepoRef>> {
        #[derive(serde::Deserialize)]
        struct Page {
            repositories: Vec<ApiRepo>,
        }
        let _ = installation_id; // token already scopes the call to this installation
        let page: Page = self.get("/installation/repositories?per_page=100").await?;
        Ok(page.repositories.into_iter().map(ApiRepo::into_repo_ref).collect())
    }

    async fn list_org_repos(&self, org: &str) -> Result<Vec<RepoRef>> {
        let path = format!("/orgs/{org}/repos?per_page=100");
        let repos: Vec<ApiRepo> = self.get(&path).await?;
        Ok(repos.into_iter().map(ApiRepo::into_repo_ref).collect())
    }

    async fn list_user_repos(&self, user: &str) -> Result<Vec<RepoRef>> {
        let path = format!("/users/{user}/repos?per_page=100");
        let repos: Vec<ApiRepo> = self.get(&path).await?;
        Ok(repos.into_iter().map(ApiRepo::into_repo_ref).collect())
    }

    async fn search_merged_prs(&self, owner: &str, repo: &str, page: u32) -> Result<Vec<PullRequest>> {
        #[derive(serde::Deserialize)]
        struct SearchResponse {
            items: Vec<ApiPullRequest>,
        }
        let query = format!("repo:{owner}/{repo}+is:pr+is:merged");
        let path = format!(
            "/search/issues?q={query}&sort=created&order=desc&per_page=100&page={page}"
        );
        let response: SearchResponse = self.get(&path).await?;
        Ok(response.items.into_iter().map(ApiPullRequest::into_pull_request).collect())
    }

    async fn get_pr(&self, owner: &str, repo: &str, number: u64) -> Result<PullRequest> {
        let path = format!("/repos/{owner}/{repo}/pulls/{number}");
        let pr: ApiPullRequest = self.get(&path).await?;
        Ok(pr.into_pull_request())
    }

    async fn list_prs_by_head_sha(&self, owner: &str, repo: &str, sha: &str) -> Result<Vec<PullRequest>> {
        let path = format!("/repos/{owner}/{repo}/commits/{sha}/pulls");
        let prs: Vec<ApiPullRequest> = self.get(&path).await?;
        Ok(prs.into_iter().map(ApiPullRequest::into_pull_request).collect())
    }

    async fn list_check_runs(&self, owner: &str, repo: &str, sha: &str, page: u32) -> Result<Vec<CheckRun>> {
        #[derive(serde::Deserialize)]
        struct CheckRunsResponse {
            check_runs: Vec<CheckRun>,
        }
        let path = format!("/repos/{owner}/{repo}/commits/{sha}/check-runs?per_page=100&page={page}");
        let response: CheckRunsResponse = self.get(&path).await?;
        Ok(response.check_runs)
    }

    async fn list_commit_statuses(&self, owner: &str, repo: &str, sha: &str, page: u32) -> Result<Vec<CommitStatus>> {
        let path = format!("/repos/{owner}/{repo}/commits/{sha}/statuses?per_page=100&page={page}");
        self.get(&path).await
    }

    async fn get_branch_protection(&self, owner: &str, repo: &str, branch: &str) -> Result<BranchProtection> {
        #[derive(serde::Deserialize, Default)]
        struct RequiredStatusChecks {
            #[serde(default)]
            contexts: Vec<String>,
        }
        #[derive(serde::Deserialize, Default)]
        struct Protection {
            #[serde(default)]
            required_status_checks: Option<RequiredStatusChecks>,
        }
        let path = format!("/repos/{owner}/{repo}/branches/{branch}/protection");
        match self.get::<Protection>(&path).await {
            Ok(protection) => Ok(BranchProtection {
                required_checks: protection.required_status_checks.unwrap_or_default().contexts,
            }),
            // An unprotected branch reports 404; treat that as "no required checks".
            Err(Error::ApiError { status: 404, .. }) => Ok(BranchProtection::default()),
            Err(e) => Err(e),
        }
    }

    async fn create_issue(&self, owner: &str, repo: &str, title: &str, body: &str) -> Result<Issue> {
        #[derive(Serialize)]
        struct Body<'a> {
            title: &'a str,
            body: &'a str,
        }
        let path = format!("/repos/{owner}/{repo}/issues");
        self.post(&path, &Body { title, body }).await
    }

    async fn create_pr(&self, owner: &str, repo: &str, request: CreatePullRequest<'_>) -> Result<PullRequest> {
        let path = format!("/repos/{owner}/{repo}/pulls");
        let pr: ApiPullRequest = self.post(&path, &request).await?;
        Ok(pr.into_pull_request())
    }

    async fn update_pr(&self, owner: &str, repo: &str, number: u64, update: UpdatePullRequest<'_>) -> Result<PullRequest> {
        let path = format!("/repos/{owner}/{repo}/pulls/{number}");
        let pr: ApiPullRequest = self.patch(&path, &update).await?;
        Ok(pr.into_pull_request())
    }

    async fn add_labels(&self, owner: &str, repo: &str, number: u64, labels: &[String]) -> Result<()> {
        #[derive(Serialize)]
        struct Body<'a> {
            labels: &'a [String],
        }
        let path = format!("/repos/{owner}/{repo}/issues/{number}/labels");
        let _: serde_json::Value = self.post(&path, &Body { labels }).await?;
        Ok(())
    }

    async fn create_comment(&self, owner: &str, repo: &str, issue_number: u64, body: &str) -> Result<()> {
        #[derive(Serialize)]
        struct Body<'a> {
            body: &'a str,
        }
        let path = format!("/repos/{owner}/{repo}/issues/{issue_number}/comments");
        let _: serde_json::Value = self.post(&path, &Body { body }).await?;
        Ok(())
    }

    async fn merge_pr(&self, owner: &str, repo: &str, number: u64, expected_head_sha: &str) -> Result<MergeResult> {
        let path = format!("/repos/{owner}/{repo}/pulls/{number}/merge");
        self.put(&path, &MergeBody { merge_method: "rebase", sha: expected_head_sha }).await
    }

    async fn clone_url(&self, owner: &str, repo: &str) -> Result<String> {
        let token = self.installation_token().await?;
        Ok(format!("https://x-access-token:{}@github.com/{owner}/{repo}.git", token.expose_secret()))
    }
}

/// Internal REST representation of a pull request.
#[derive(serde::Deserialize)]
struct ApiPullRequest {
    number: u64,
    #[serde(default)]
    title: String,
    body: Option<String>,
    state: String,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    merged_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    base: Option<ApiRef>,
    #[serde(default)]
    head: Option<ApiRef>,
    #[serde(default)]
    merge_commit_sha: Option<String>,
    #[serde(default)]
    commits: u32,
    #[serde(default)]
    html_url: String,
}

#[derive(serde::Deserialize)]
struct ApiRef {
    #[serde(rename = "ref")]
    ref_name: String,
    sha: String,
}

impl ApiPullRequest {
    fn into_pull_request(self) -> PullRequest {
        use crate::types::PullRequestState;
        let state = if self.merged || self.merge_commit_sha.is_some() {
            PullRequestState::Merged
        } else if self.state == "open" {
            PullRequestState::Open
        } else {
            PullRequestState::Closed
        };

        PullRequest {
            number: self.number,
            title: self.title,
            body: self.body,
            state,
            base_ref: self.base.map(|b| b.ref_name).unwrap_or_default(),
            head_sha: self.head.map(|h| h.sha).unwrap_or_default(),
            merge_commit_sha: self.merge_commit_sha,
            commits: self.commits,
            merged_at: self.merged_at,
            html_url: self.html_url,
        }
    }
}

#[derive(serde::Deserialize)]
struct ApiRepo {
    name: String,
    #[serde(default)]
    owner: Option<ApiOwner>,
}

#[derive(serde::Deserialize)]
struct ApiOwner {
    login: String,
}

impl ApiRepo {
    fn into_repo_ref(self) -> RepoRef {
        RepoRef {
            owner: self.owner.map(|o| o.login).unwrap_or_default(),
            name: self.name,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::PullRequestState;
    use secrecy::SecretString;
    use std::time::{SystemTime, UNIX_EPOCH};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_KEY: &str = include_str!("../testdata/test_rsa_key.pem");

    /// Build a client against the mock server with a pre-cached installation
    /// token, so tests exercise the target endpoint without also mocking
    /// the token-exchange round trip.
    async fn test_client(base_url: &str) -> GitHubHostClient {
        let auth = AppAuth::new(1, TEST_KEY.as_bytes()).unwrap();
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        auth.cache_installation_token(42, SecretString::from("test-token"), now + 3600)
            .await;
        GitHubHostClient::with_base_url(auth, 42, base_url).unwrap()
    }

    fn pr_json(number: u64, state: &str, merged: bool) -> serde_json::Value {
        serde_json::json!({
            "number": number,
            "title": format!("PR #{number}"),
            "body": "test body",
            "state": state,
            "merged": merged,
            "merge_commit_sha": if merged { Some("deadbeef") } else { None },
            "commits": 2,
            "merged_at": if merged { Some("2026-01-01T00:00:00Z") } else { None },
            "html_url": format!("https://example.invalid/pull/{number}"),
            "head": { "ref": "feature-branch", "sha": "abc123" },
            "base": { "ref": "main", "sha": "main-sha" },
        })
    }

    #[tokio::test]
    async fn get_pr_open_maps_state_correctly() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls/7"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pr_json(7, "open", false)))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri()).await;
        let pr = client.get_pr("acme", "widgets", 7).await.unwrap();

        assert_eq!(pr.number, 7);
        assert_eq!(pr.state, PullRequestState::Open);
        assert_eq!(pr.base_ref, "main");
        assert_eq!(pr.head_sha, "abc123");
    }

    #[tokio::test]
    async fn get_pr_merged_is_merged_even_if_state_says_closed() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls/9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pr_json(9, "closed", true)))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri()).await;
        let pr = client.get_pr("acme", "widgets", 9).await.unwrap();

        assert_eq!(pr.state, PullRequestState::Merged);
        assert_eq!(pr.merge_commit_sha.as_deref(), Some("deadbeef"));
    }

    #[tokio::test]
    async fn rate_limited_403_maps_to_rate_limited_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls/1"))
            .respond_with(
                ResponseTemplate::new(403).insert_header("x-ratelimit-remaining", "0"),
            )
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri()).await;
        let err = client.get_pr("acme", "widgets", 1).await.unwrap_err();

        assert!(matches!(err, Error::RateLimited));
    }

    #[tokio::test]
    async fn unprotected_branch_404_is_no_required_checks() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/branches/main/protection"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({"message": "Branch not protected"})))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri()).await;
        let protection = client.get_branch_protection("acme", "widgets", "main").await.unwrap();

        assert!(protection.required_checks.is_empty());
    }

    #[tokio::test]
    async fn merge_pr_sends_rebase_method_and_expected_sha() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/repos/acme/widgets/pulls/3/merge"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "merged": true,
                "sha": "f00d",
                "message": "merged",
            })))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri()).await;
        let result = client.merge_pr("acme", "widgets", 3, "abc123").await.unwrap();

        assert!(result.merged);
        assert_eq!(result.sha.as_deref(), Some("f00d"));
    }
}
