//! On-chain application descriptor

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the descriptor inside the app setup directory
pub const APP_FILE_NAME: &str = "App.json";

/// Identity of the deployed application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDescriptor {
    /// Application id
    pub id: u64,
    /// Round in which the application was created
    #[serde(rename = "creationBlock")]
    pub creation_block: u64,
}

impl AppDescriptor {
    /// Create a descriptor
    pub const fn new(id: u64, creation_block: u64) -> Self {
        Self { id, creation_block }
    }

    /// Load `App.json`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
            .map_err(|e| Error::InvalidAppDescriptor(format!("{}: {}", path.display(), e)))
    }

    /// Load `App.json` from the app setup directory
    pub fn load_from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::load(dir.as_ref().join(APP_FILE_NAME))
    }

    /// Parse descriptor JSON
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::InvalidAppDescriptor(e.to_string()))
    }
}
