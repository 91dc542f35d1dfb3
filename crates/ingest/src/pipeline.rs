//! The ingestion pipeline
//!
//! One explicit path for every payload: validate → stage → authorize →
//! upload → clean up. Auth failures abort before any upload attempt and
//! remove the staged file (nothing was tried, nothing to diagnose).
//! Failed uploads keep the staged file for inspection and retry; the
//! remote store's copy is the durable record, so a successful upload
//! deletes the local one.

use std::sync::Arc;

use tracing::{info, warn};

use drive_auth::{AuthzError, CredentialManager};

use crate::drive::DriveClient;
use crate::error::IngestError;
use crate::staging::{StagingArea, is_empty_payload};

/// What the caller gets back after a successful ingestion.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub file_id: String,
    pub filename: String,
    pub web_view_link: Option<String>,
}

/// End-to-end handling of one JSON payload.
pub struct IngestPipeline {
    staging: StagingArea,
    drive: DriveClient,
    manager: Arc<CredentialManager>,
}

impl IngestPipeline {
    pub fn new(staging: StagingArea, drive: DriveClient, manager: Arc<CredentialManager>) -> Self {
        Self {
            staging,
            drive,
            manager,
        }
    }

    /// Ingest one payload: stage it locally, then upload it to the
    /// remote store with a client from the lifecycle manager.
    pub async fn ingest(&self, payload: serde_json::Value) -> Result<IngestOutcome, IngestError> {
        if is_empty_payload(&payload) {
            metrics::counter!("uploads_total", "outcome" => "empty_payload").increment(1);
            return Err(IngestError::EmptyPayload);
        }

        let staged = self.staging.stage(&payload).await?;

        let auth = match self.manager.authorized_client().await {
            Ok(client) => client,
            Err(e) => {
                // No upload was attempted; the staged copy has no
                // diagnostic value, so it is removed here explicitly.
                self.staging.discard(&staged).await;
                metrics::counter!("uploads_total", "outcome" => "unauthorized").increment(1);
                return Err(match e {
                    AuthzError::Unauthenticated | AuthzError::ReauthorizationRequired => {
                        IngestError::AuthorizationRequired
                    }
                    AuthzError::RefreshFailed(msg) => IngestError::RefreshFailed(msg),
                });
            }
        };

        let content = tokio::fs::read(&staged.path)
            .await
            .map_err(|e| IngestError::Storage(format!("reading staging file: {e}")))?;

        match self.drive.upload_json(&auth, &staged.filename, &content).await {
            Ok(uploaded) => {
                self.staging.discard(&staged).await;
                metrics::counter!("uploads_total", "outcome" => "ok").increment(1);
                info!(file_id = %uploaded.id, filename = %staged.filename, "payload uploaded");
                Ok(IngestOutcome {
                    file_id: uploaded.id,
                    filename: staged.filename,
                    web_view_link: uploaded.web_view_link,
                })
            }
            Err(e) => {
                // Staged file retained for retry/inspection
                warn!(path = %staged.path.display(), error = %e, "upload failed, staging file retained");
                metrics::counter!("uploads_total", "outcome" => "failed").increment(1);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use drive_auth::{ApplicationSecrets, CredentialRecord, CredentialStore, now_millis};
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    async fn start_upload_server(
        status: StatusCode,
        body: serde_json::Value,
    ) -> (String, Arc<AtomicU64>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicU64::new(0));
        let hits_clone = hits.clone();

        tokio::spawn(async move {
            let app = axum::Router::new().fallback(move || {
                let hits = hits_clone.clone();
                let body = body.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (status, axum::Json(body))
                }
            });
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/upload"), hits)
    }

    fn secrets() -> Arc<ApplicationSecrets> {
        Arc::new(
            ApplicationSecrets::from_json(
                r#"{"web":{"client_id":"cid","client_secret":"cs","token_uri":"http://127.0.0.1:1/token"}}"#,
            )
            .unwrap(),
        )
    }

    fn valid_record() -> CredentialRecord {
        CredentialRecord {
            access_token: "AT1".into(),
            refresh_token: Some("RT1".into()),
            expiry: Some(now_millis() + 3_600_000),
            scopes: vec![],
            token_type: "Bearer".into(),
        }
    }

    /// Pipeline with its own temp staging dir and credential store.
    async fn pipeline_with(
        dir: &tempfile::TempDir,
        upload_url: &str,
        record: Option<CredentialRecord>,
    ) -> IngestPipeline {
        let store = CredentialStore::open(dir.path().join("credential.json"))
            .await
            .unwrap();
        if let Some(r) = record {
            store.save(r).await.unwrap();
        }
        let manager = Arc::new(CredentialManager::new(
            Arc::new(store),
            secrets(),
            reqwest::Client::new(),
        ));
        let staging = StagingArea::new(dir.path().join("staging"));
        staging.ensure().await.unwrap();
        IngestPipeline::new(
            staging,
            DriveClient::new(upload_url.into(), "folder-1".into()),
            manager,
        )
    }

    async fn staging_files(dir: &tempfile::TempDir) -> Vec<String> {
        let mut names = vec![];
        let mut entries = tokio::fs::read_dir(dir.path().join("staging")).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names
    }

    #[tokio::test]
    async fn empty_payload_rejected_before_any_file_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(&dir, "http://127.0.0.1:1", Some(valid_record())).await;

        for payload in [json!(null), json!({}), json!([]), json!("")] {
            let result = pipeline.ingest(payload).await;
            assert!(matches!(result, Err(IngestError::EmptyPayload)));
        }
        assert!(staging_files(&dir).await.is_empty(), "nothing staged");
    }

    #[tokio::test]
    async fn no_credential_aborts_without_upload_and_leaves_no_staging_file() {
        let (url, hits) = start_upload_server(StatusCode::OK, json!({})).await;
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(&dir, &url, None).await;

        let result = pipeline.ingest(json!({"a": 1})).await;
        assert!(matches!(result, Err(IngestError::AuthorizationRequired)));
        assert_eq!(hits.load(Ordering::SeqCst), 0, "upload never attempted");
        assert!(staging_files(&dir).await.is_empty());
    }

    #[tokio::test]
    async fn successful_upload_returns_id_and_removes_staging_file() {
        let (url, hits) = start_upload_server(
            StatusCode::OK,
            json!({"id": "f1", "name": "n", "webViewLink": "https://drive/view/f1"}),
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(&dir, &url, Some(valid_record())).await;

        let outcome = pipeline.ingest(json!({"a": 1})).await.unwrap();
        assert_eq!(outcome.file_id, "f1");
        assert!(outcome.filename.starts_with("payload_"));
        assert_eq!(outcome.web_view_link.as_deref(), Some("https://drive/view/f1"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(staging_files(&dir).await.is_empty(), "staging file cleaned up");
    }

    #[tokio::test]
    async fn failed_upload_retains_the_staging_file() {
        let (url, _hits) =
            start_upload_server(StatusCode::BAD_GATEWAY, json!({"error": "down"})).await;
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(&dir, &url, Some(valid_record())).await;

        let result = pipeline.ingest(json!({"a": 1})).await;
        assert!(matches!(result, Err(IngestError::UploadFailed(_))));

        let files = staging_files(&dir).await;
        assert_eq!(files.len(), 1, "payload retained for retry/inspection");
        assert!(files[0].starts_with("payload_"));
    }

    #[tokio::test]
    async fn expired_terminal_credential_maps_to_authorization_required() {
        let (url, hits) = start_upload_server(StatusCode::OK, json!({})).await;
        let dir = tempfile::tempdir().unwrap();
        let record = CredentialRecord {
            access_token: "AT1".into(),
            refresh_token: None,
            expiry: Some(now_millis() - 1_000),
            scopes: vec![],
            token_type: "Bearer".into(),
        };
        let pipeline = pipeline_with(&dir, &url, Some(record)).await;

        let result = pipeline.ingest(json!({"a": 1})).await;
        assert!(matches!(result, Err(IngestError::AuthorizationRequired)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(staging_files(&dir).await.is_empty());
    }

    #[tokio::test]
    async fn refresh_outage_maps_to_refresh_failed_and_cleans_up() {
        // Token endpoint unreachable (port 1), credential expired but refreshable
        let (url, hits) = start_upload_server(StatusCode::OK, json!({})).await;
        let dir = tempfile::tempdir().unwrap();
        let record = CredentialRecord {
            access_token: "AT1".into(),
            refresh_token: Some("RT1".into()),
            expiry: Some(now_millis() - 1_000),
            scopes: vec![],
            token_type: "Bearer".into(),
        };
        let pipeline = pipeline_with(&dir, &url, Some(record)).await;

        let result = pipeline.ingest(json!({"a": 1})).await;
        assert!(matches!(result, Err(IngestError::RefreshFailed(_))));
        assert_eq!(hits.load(Ordering::SeqCst), 0, "no upload after auth failure");
        assert!(staging_files(&dir).await.is_empty());
    }
}
