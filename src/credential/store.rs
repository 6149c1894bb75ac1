// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic on-disk credential persistence.
//!
//! Grounded on `crates/mux/src/credential/persist.rs`'s load/save pair and
//! its write-temp-then-rename discipline, extended with file-mode
//! enforcement and a near-expiry predicate.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CredentialError;

/// Margin inside which a record is treated as "near expiry".
pub const NEAR_EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Persisted credential record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub device_name: String,
    pub user: String,
}

impl CredentialRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_near_expiry_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
        self.expires_at <= now + margin
    }
}

/// Resolve the default credential file path: `<user-config>/.chief/credentials.yaml`.
///
/// Grounded on `crates/mux/src/credential/mod.rs::state_dir()`'s
/// `$HOME`-based resolution; chief-agent's config directory has no
/// `XDG_STATE_HOME` override, pinning the literal `.chief` directory
/// under the user's home instead.
pub fn default_credential_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_owned());
    PathBuf::from(home).join(".chief").join("credentials.yaml")
}

/// Atomic, file-backed credential store.
///
/// `Load`/`Save`/`Delete` operate on a single record at `path`. Every
/// caller in the process is expected to share one `CredentialStore`
/// (constructed once at startup) so the refresh mutex in
/// [`crate::credential::refresh::RefreshCoordinator`] actually serializes
/// all refreshes.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn at_default_path() -> Self {
        Self::new(default_credential_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current record, or `NotLoggedIn` if the file is absent.
    pub fn load(&self) -> Result<CredentialRecord, CredentialError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CredentialError::NotLoggedIn)
            }
            Err(e) => return Err(CredentialError::Io(e)),
        };
        let record: CredentialRecord = serde_yaml::from_str(&contents)?;
        Ok(record)
    }

    /// Atomically replace the on-disk record: write to a sibling temp file
    /// with mode 0600, then rename over the target. The directory is
    /// created (mode 0755) if absent.
    pub fn save(&self, record: &CredentialRecord) -> Result<(), CredentialError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))?;

        let yaml = serde_yaml::to_string(record)?;
        let tmp_path = dir.join(format!(
            "credentials-{}.yaml",
            uuid::Uuid::new_v4().simple()
        ));

        {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode_or_default()
                .open(&tmp_path)?;
            file.write_all(yaml.as_bytes())?;
            file.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Idempotent delete: succeeds even if the file does not exist.
    pub fn delete(&self) -> Result<(), CredentialError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CredentialError::Io(e)),
        }
    }

    pub fn is_expired(&self, record: &CredentialRecord) -> bool {
        record.is_expired_at(Utc::now())
    }

    pub fn is_near_expiry(&self, record: &CredentialRecord, margin: Duration) -> bool {
        record.is_near_expiry_at(Utc::now(), margin)
    }
}

/// Small extension so the temp-file `OpenOptions` reads naturally with the
/// Unix mode bits applied before the first write (avoids a world-readable
/// window between `create` and `set_permissions`).
trait OpenOptionsExt {
    fn mode_or_default(self) -> Self;
}

impl OpenOptionsExt for std::fs::OpenOptions {
    fn mode_or_default(mut self) -> Self {
        std::os::unix::fs::OpenOptionsExt::mode(&mut self, 0o600);
        self
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
