//! Local staging of incoming payloads
//!
//! Every accepted payload is written to a uniquely named file in the
//! staging directory before any upload is attempted. Names combine a
//! second-resolution timestamp with a random UUID suffix, so concurrent
//! requests can never overwrite each other's files.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::error::IngestError;

/// A payload staged on disk, owned by one ingestion request.
#[derive(Debug)]
pub struct StagedFile {
    pub path: PathBuf,
    pub filename: String,
}

/// Whether a payload carries nothing worth uploading.
///
/// JSON null, `{}`, `[]`, and `""` all count as empty; `false` and `0`
/// are values a caller deliberately sent.
pub fn is_empty_payload(payload: &serde_json::Value) -> bool {
    match payload {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        serde_json::Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// The staging directory for transient payload files.
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Create the staging directory if it does not exist yet.
    pub async fn ensure(&self) -> Result<(), IngestError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| IngestError::Storage(format!("creating staging dir: {e}")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a payload to a fresh, collision-free staging file.
    pub async fn stage(&self, payload: &serde_json::Value) -> Result<StagedFile, IngestError> {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let filename = format!("payload_{secs}_{}.json", uuid::Uuid::new_v4().as_simple());
        let path = self.dir.join(&filename);

        let bytes = serde_json::to_vec(payload)
            .map_err(|e| IngestError::Storage(format!("serializing payload: {e}")))?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| IngestError::Storage(format!("writing staging file: {e}")))?;

        debug!(path = %path.display(), bytes = bytes.len(), "payload staged");
        Ok(StagedFile { path, filename })
    }

    /// Remove a staged file. Best effort: the file is transient, so a
    /// failed cleanup is logged rather than failing the request.
    pub async fn discard(&self, staged: &StagedFile) {
        if let Err(e) = tokio::fs::remove_file(&staged.path).await {
            warn!(path = %staged.path.display(), error = %e, "failed to remove staging file");
        }
    }
}
