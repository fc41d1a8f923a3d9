//! GitHub App authentication: sign a short-lived app JWT, then exchange it
//! (per installation) for an installation access token.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::Result;

/// App-level identity: an app id and its RSA private key.
#[derive(Clone)]
pub struct AppAuth {
    app_id: u64,
    key: Arc<EncodingKey>,
    /// Cached installation tokens, keyed by installation id, alongside the
    /// unix timestamp they expire at.
    cache: Arc<RwLock<std::collections::HashMap<u64, (SecretString, u64)>>>,
}

#[derive(Serialize)]
struct Claims {
    iat: u64,
    exp: u64,
    iss: u64,
}

impl AppAuth {
    /// Build an `AppAuth` from an app id and a PEM-encoded RSA private key.
    ///
    /// # Errors
    /// Returns an error if `private_key_pem` is not a valid PKCS#1/PKCS#8 PEM key.
    pub fn new(app_id: u64, private_key_pem: &[u8]) -> Result<Self> {
        let key = EncodingKey::from_rsa_pem(private_key_pem)?;
        Ok(Self {
            app_id,
            key: Arc::new(key),
            cache: Arc::new(RwLock::new(std::collections::HashMap::new())),
        })
    }

    /// Sign a fresh app-level JWT, valid for 9 minutes (GitHub allows up to 10).
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub fn app_jwt(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let claims = Claims {
            iat: now.saturating_sub(60),
            exp: now + 9 * 60,
            iss: self.app_id,
        };

        Ok(encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &self.key,
        )?)
    }

    /// Return a cached, still-valid installation token, if one exists.
    pub(crate) async fn cached_installation_token(
        &self,
        installation_id: u64,
    ) -> Option<SecretString> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let cache = self.cache.read().await;
        cache.get(&installation_id).and_then(|(token, expires_at)| {
            // Refresh a minute early so a near-expiry token never gets used mid-request.
            (*expires_at > now + 60).then(|| token.clone())
        })
    }

    /// Store a freshly minted installation token with its expiry (unix seconds).
    pub(crate) async fn cache_installation_token(
        &self,
        installation_id: u64,
        token: SecretString,
        expires_at_unix: u64,
    ) {
        self.cache
            .write()
            .await
            .insert(installation_id, (token, expires_at_unix));
    }
}

impl std::fmt::Debug for AppAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppAuth").field("app_id", &self.app_id).finish_non_exhaustive()
    }
}
