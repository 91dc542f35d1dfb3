//! Credential record persistence
//!
//! The gateway holds exactly one delegated credential, stored as a JSON
//! file at a configured path. All writes use atomic temp-file + rename so
//! a crash mid-write can never leave a partial record for a concurrent
//! reader. A tokio Mutex serializes writers; reads clone the in-memory
//! state and never block on a write in progress.
//!
//! A missing file is the distinct "unauthenticated" state, not an error.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// The persisted OAuth credential.
///
/// `expiry` is an absolute unix timestamp in milliseconds, computed at
/// storage time from the token endpoint's `expires_in` seconds delta.
/// An absent expiry means the token is treated as valid for the lifetime
/// of the process. An absent refresh token means expiry is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expiry: Option<u64>,
    pub scopes: Vec<String>,
    pub token_type: String,
}

impl CredentialRecord {
    /// Whether the access token is expired (or expires within `skew_millis`).
    ///
    /// No expiry on record means never-expiring for this process.
    pub fn is_expired(&self, now_millis: u64, skew_millis: u64) -> bool {
        match self.expiry {
            Some(expiry) => expiry <= now_millis + skew_millis,
            None => false,
        }
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Thread-safe single-record credential file manager.
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<Option<CredentialRecord>>,
}

impl CredentialStore {
    /// Open the store at the given file path.
    ///
    /// A missing file is a cold start: the store opens empty and the
    /// gateway reports unauthenticated until a handshake completes.
    /// An existing but unparseable file is an error — silently discarding
    /// a corrupt credential would hide a real problem.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let record: CredentialRecord = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), "loaded stored credential");
            Some(record)
        } else {
            info!(path = %path.display(), "no credential file, starting unauthenticated");
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Get a clone of the stored credential, if any.
    pub async fn load(&self) -> Option<CredentialRecord> {
        let state = self.state.lock().await;
        state.clone()
    }

    /// Replace the stored credential and persist to disk.
    ///
    /// Called after a completed handshake and after every successful
    /// refresh. The in-memory state is only updated once the disk write
    /// succeeds.
    pub async fn save(&self, record: CredentialRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        write_atomic(&self.path, &record).await?;
        *state = Some(record);
        debug!(path = %self.path.display(), "credential saved");
        Ok(())
    }
}

/// Write the credential to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. File permissions are set to 0600 since the file contains
/// live OAuth tokens.
async fn write_atomic(path: &Path, record: &CredentialRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| Error::CredentialParse(format!("serializing credential: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credential.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    Ok(())
}
