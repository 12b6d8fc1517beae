//! Credential source and persisted session layout.
//!
//! The data directory holds `accounts.json` (the operator-managed credential
//! list) and `sessions/<label>.json`, one opaque blob per identity, written
//! after every successful login so restarts can skip re-authentication.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::SessionBlob;

/// One entry from `accounts.json`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

/// Read the credential list from `<data_dir>/accounts.json`.
pub fn load_credentials(data_dir: &Path) -> Result<Vec<Credential>> {
    let path = data_dir.join("accounts.json");
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read accounts file: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse accounts file: {}", path.display()))
}

/// Stores one session blob per identity label under `<data_dir>/sessions/`.
#[derive(Clone, Debug)]
pub struct SessionStore {
    sessions_dir: PathBuf,
}

impl SessionStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: data_dir.into().join("sessions"),
        }
    }

    fn blob_path(&self, label: &str) -> PathBuf {
        self.sessions_dir.join(format!("{label}.json"))
    }

    /// Load the persisted session for `label`, if one exists.
    pub fn load(&self, label: &str) -> Result<Option<SessionBlob>> {
        let path = self.blob_path(label);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read session blob: {}", path.display()))?;
        let blob = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse session blob: {}", path.display()))?;
        Ok(Some(SessionBlob(blob)))
    }

    /// Persist `blob` for `label`, creating the sessions directory on demand.
    pub fn save(&self, label: &str, blob: &SessionBlob) -> Result<()> {
        fs::create_dir_all(&self.sessions_dir).with_context(|| {
            format!(
                "failed to create sessions directory: {}",
                self.sessions_dir.display()
            )
        })?;
        let path = self.blob_path(label);
        let raw = serde_json::to_string(&blob.0).context("failed to serialize session blob")?;
        fs::write(&path, raw)
            .with_context(|| format!("failed to write session blob: {}", path.display()))?;
        tracing::debug!(label, path = %path.display(), "session.saved");
        Ok(())
    }
}
