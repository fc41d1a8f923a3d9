//! Discover the GitHub App's installations and build one [`GitHubHostClient`]
//! per fork org named in the config.
//!
//! [`mirror_host::HostClient::list_installations`] authenticates with an
//! installation token, but `/app/installations` only accepts the app-level
//! JWT — and there's no installation id to scope a token to until this call
//! returns one. So discovery happens here, once at startup, as a raw
//! `reqwest` call signed with [`AppAuth::app_jwt`], rather than through the
//! `HostClient` trait.

use std::collections::HashMap;
use std::fs;

use mirror_core::{Config, Result};
use mirror_host::{AppAuth, GitHubHostClient, Installation};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use tracing::{info, warn};

/// Build an [`AppAuth`] from `config`'s app id and private key file.
///
/// # Errors
/// Returns an error if the private key can't be read or isn't a valid PEM key.
pub fn load_app_auth(config: &Config) -> Result<AppAuth> {
    let pem = fs::read(&config.private_key_path)?;
    Ok(AppAuth::new(config.app_id, &pem)?)
}

/// List every account (org or user) the app is installed on.
///
/// # Errors
/// Returns an error if the app JWT can't be signed or the request fails.
async fn list_installations(auth: &AppAuth) -> Result<Vec<Installation>> {
    let jwt = auth.app_jwt()?;
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/app/installations", GitHubHostClient::DEFAULT_API_URL))
        .header(AUTHORIZATION, format!("Bearer {jwt}"))
        .header(ACCEPT, "application/vnd.github+json")
        .header(USER_AGENT, "magic-mirror")
        .send()
        .await
        .map_err(mirror_host::Error::from)?;

    if !response.status().is_success() {
        return Err(mirror_host::Error::ApiError {
            status: response.status().as_u16(),
            message: response.text().await.unwrap_or_default(),
        }
        .into());
    }

    response.json().await.map_err(|e| mirror_host::Error::from(e).into())
}

/// Discover installations and build one [`GitHubHostClient`] per fork org
/// named in `config.upstream_mappings`, keyed by that org's login.
///
/// Orgs named in the config with no matching installation are logged and
/// skipped — `Syncer::run_once` already tolerates a missing client for a
/// fork org by skipping its tuples.
///
/// # Errors
/// Returns an error if installation discovery itself fails (the app's
/// credentials are bad, or GitHub is unreachable). A configured org simply
/// not being installed is not an error.
pub async fn build_clients(config: &Config, auth: &AppAuth) -> Result<HashMap<String, GitHubHostClient>> {
    let installations = list_installations(auth).await?;
    let mut by_login: HashMap<String, u64> = HashMap::new();
    for installation in installations {
        by_login.insert(installation.account.login, installation.id);
    }

    let mut clients = HashMap::new();
    for fork_org in config.upstream_mappings.keys() {
        let Some(&installation_id) = by_login.get(fork_org) else {
            warn!(fork_org, "app is not installed on this org, tuples under it will be skipped");
            continue;
        };
        let client = GitHubHostClient::new(auth.clone(), installation_id)?;
        info!(fork_org, installation_id, "authenticated client ready");
        clients.insert(fork_org.clone(), client);
    }
    Ok(clients)
}
