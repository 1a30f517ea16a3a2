//! Environment-file configuration
//!
//! The services share a `key=value` file (comments with `#`). Every key can
//! be overridden by a process environment variable of the same name.

use crate::{AppDescriptor, Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default interval between subscriber polls
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

const KEY_APP_SETUP_DIR: &str = "AppSetupDirPath";
const KEY_TXNS_DB: &str = "TxnsDbPath";
const KEY_PUBLIC_KEY: &str = "NullifierPublicKeyPath";
const KEY_POLL_INTERVAL: &str = "PollIntervalSecs";

/// Service configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    /// Directory containing `App.json`
    pub app_setup_dir: PathBuf,
    /// SQLite ledger path
    pub txns_db_path: PathBuf,
    /// Raw 32-byte nullifier public key file (optional for read-only tools)
    pub nullifier_public_key_path: Option<PathBuf>,
    /// Interval between polls when caught up
    pub poll_interval: Duration,
}

impl VaultConfig {
    /// Load from an env file, applying process environment overrides
    pub fn from_env_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let iter = dotenvy::from_path_iter(path).map_err(|e| {
            Error::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;

        let mut values = HashMap::new();
        for item in iter {
            match item {
                Ok((key, value)) => {
                    values.insert(key, value);
                }
                Err(e) => {
                    tracing::warn!("Skipping malformed line in {}: {}", path.display(), e);
                }
            }
        }

        Self::from_map(values, |key| std::env::var(key).ok())
    }

    /// Build from parsed values; `env` supplies overrides
    pub fn from_map<F>(mut values: HashMap<String, String>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in [KEY_APP_SETUP_DIR, KEY_TXNS_DB, KEY_PUBLIC_KEY, KEY_POLL_INTERVAL] {
            if let Some(value) = env(key) {
                values.insert(key.to_string(), value);
            }
        }

        let required = |key: &str| -> Result<String> {
            values
                .get(key)
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .ok_or_else(|| Error::InvalidConfig(format!("missing {}", key)))
        };

        let app_setup_dir = PathBuf::from(required(KEY_APP_SETUP_DIR)?);
        let txns_db_path = PathBuf::from(required(KEY_TXNS_DB)?);
        let nullifier_public_key_path = values
            .get(KEY_PUBLIC_KEY)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let poll_interval_secs = match values.get(KEY_POLL_INTERVAL) {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                Error::InvalidConfig(format!("{} must be an integer, got {:?}", KEY_POLL_INTERVAL, raw))
            })?,
            None => DEFAULT_POLL_INTERVAL_SECS,
        };

        Ok(Self {
            app_setup_dir,
            txns_db_path,
            nullifier_public_key_path,
            poll_interval: Duration::from_secs(poll_interval_secs),
        })
    }

    /// Load the application descriptor referenced by this configuration
    pub fn app_descriptor(&self) -> Result<AppDescriptor> {
        AppDescriptor::load_from_dir(&self.app_setup_dir)
    }
}
