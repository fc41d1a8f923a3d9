//! JSON configuration loading and validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Mapping from an upstream branch to the fork branch it feeds, plus the
/// labels to apply to the cherry-pick PRs this mapping produces.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpstreamMapping {
    /// `upstream_branch -> fork_branch`.
    pub branch_mappings: BTreeMap<String, String>,
    /// Labels applied to every sync PR this mapping opens, if any.
    #[serde(default)]
    pub pr_labels: Vec<String>,
}

/// Magic Mirror's configuration, loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// GitHub App id.
    pub app_id: u64,

    /// Path to the app's PEM-encoded private key.
    #[serde(default = "default_private_key_path")]
    pub private_key_path: PathBuf,

    /// Path to the embedded SQLite database.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// `tracing` log level (`debug`, `info`, `error`, ...).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Polling period for the Syncer, in seconds.
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u64,

    /// Shared secret used to verify inbound webhook signatures.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// `fork_org -> upstream_org -> mapping`.
    pub upstream_mappings: BTreeMap<String, BTreeMap<String, UpstreamMapping>>,
}

fn default_private_key_path() -> PathBuf {
    if Path::new("./auth.key").exists() {
        PathBuf::from("./auth.key")
    } else {
        PathBuf::from("/etc/magic-mirror/auth.key")
    }
}

fn default_db_path() -> PathBuf {
    if Path::new("./magic-mirror.db").exists() {
        PathBuf::from("./magic-mirror.db")
    } else {
        PathBuf::from("/etc/magic-mirror/magic-mirror.db")
    }
}

fn default_log_level() -> String {
    "info".into()
}

const fn default_sync_interval() -> u64 {
    30
}

impl Config {
    /// Locate and load the config file: `./config.json`, else
    /// `/etc/magic-mirror/config.json`.
    ///
    /// # Errors
    /// Returns an error if neither path exists, the file can't be read or
    /// parsed, or validation fails.
    pub fn load_default() -> Result<Self> {
        let candidate = Path::new("./config.json");
        let path = if candidate.exists() {
            candidate.to_path_buf()
        } else {
            PathBuf::from("/etc/magic-mirror/config.json")
        };
        Self::load(path)
    }

    /// Load and validate a config file at an explicit path.
    ///
    /// # Errors
    /// Returns an error if the file can't be read or parsed, or validation fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, failing fast with a message naming the
    /// offending path.
    ///
    /// # Errors
    /// Returns an error describing the first invalid field found.
    pub fn validate(&self) -> Result<()> {
        if self.app_id == 0 {
            return Err(Error::Config("app_id must be non-zero".into()));
        }

        if self.private_key_path.as_os_str().is_empty() {
            return Err(Error::Config("private_key_path must not be empty".into()));
        }
        if !self.private_key_path.is_file() {
            return Err(Error::Config(format!(
                "private_key_path {} does not exist",
                self.private_key_path.display()
            )));
        }

        if let Some(secret) = &self.webhook_secret {
            if secret.is_empty() {
                return Err(Error::Config("webhook_secret must not be empty when set".into()));
            }
        }

        if self.upstream_mappings.is_empty() {
            return Err(Error::Config("upstream_mappings must not be empty".into()));
        }

        for (fork_org, upstreams) in &self.upstream_mappings {
            if fork_org.is_empty() {
                return Err(Error::Config("upstream_mappings has an empty fork_org key".into()));
            }
            for (upstream_org, mapping) in upstreams {
                if upstream_org.is_empty() {
                    return Err(Error::Config(format!(
                        "upstream_mappings.{fork_org} has an empty upstream_org key"
                    )));
                }
                if mapping.branch_mappings.is_empty() {
                    return Err(Error::Config(format!(
                        "upstream_mappings.{fork_org}.{upstream_org}.branch_mappings must not be empty"
                    )));
                }

                let mut seen_fork_branches = std::collections::HashSet::new();
                for (upstream_branch, fork_branch) in &mapping.branch_mappings {
                    if upstream_branch.is_empty() || fork_branch.is_empty() {
                        return Err(Error::Config(format!(
                            "upstream_mappings.{fork_org}.{upstream_org}.branch_mappings has an empty branch name"
                        )));
                    }
                    if !seen_fork_branches.insert(fork_branch.as_str()) {
                        return Err(Error::Config(format!(
                            "upstream_mappings.{fork_org}.{upstream_org}.branch_mappings maps two upstream branches onto fork branch '{fork_branch}'"
                        )));
                    }
                }

                for label in &mapping.pr_labels {
                    if label.is_empty() {
                        return Err(Error::Config(format!(
                            "upstream_mappings.{fork_org}.{upstream_org}.pr_labels contains an empty label"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}
