//! Remote object-store upload client
//!
//! Uploads staged payloads to a Drive-style files endpoint using a
//! multipart/related request: one part for the file metadata (name,
//! parent folder, MIME type), one for the content. The store assigns the
//! durable id; we ask it to echo back id, name, and webViewLink.

use serde::Deserialize;
use tracing::{debug, warn};

use drive_auth::AuthorizedClient;

use crate::error::IngestError;

/// Default Google Drive v3 upload endpoint.
pub const DEFAULT_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";

/// The remote store's view of an uploaded file.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "webViewLink")]
    pub web_view_link: Option<String>,
}

/// Client for the remote store's upload API.
#[derive(Debug, Clone)]
pub struct DriveClient {
    upload_url: String,
    folder_id: String,
}

impl DriveClient {
    pub fn new(upload_url: String, folder_id: String) -> Self {
        Self {
            upload_url,
            folder_id,
        }
    }

    /// Upload a JSON document into the configured folder.
    ///
    /// A 401 from the store means the bearer token it was handed is no
    /// longer valid — surfaced as `AuthorizationRequired` so the caller
    /// sends the user back to consent instead of blindly retrying.
    pub async fn upload_json(
        &self,
        auth: &AuthorizedClient,
        filename: &str,
        content: &[u8],
    ) -> Result<UploadedFile, IngestError> {
        let boundary = format!("ingest_{}", uuid::Uuid::new_v4().as_simple());
        let metadata = serde_json::json!({
            "name": filename,
            "parents": [self.folder_id],
            "mimeType": "application/json",
        });

        let mut body = Vec::with_capacity(content.len() + 512);
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Type: application/json\r\n\r\n").as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let url = format!(
            "{}?uploadType=multipart&fields=id,name,webViewLink",
            self.upload_url
        );

        let response = auth
            .http
            .post(&url)
            .bearer_auth(&auth.access_token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| IngestError::UploadFailed(format!("upload request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 401 {
            warn!("remote store rejected the bearer token");
            return Err(IngestError::AuthorizationRequired);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(IngestError::UploadFailed(format!(
                "remote store returned {status}: {body}"
            )));
        }

        let uploaded = response
            .json::<UploadedFile>()
            .await
            .map_err(|e| IngestError::UploadFailed(format!("invalid upload response: {e}")))?;

        debug!(file_id = %uploaded.id, "upload accepted by remote store");
        Ok(uploaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn auth_client() -> AuthorizedClient {
        AuthorizedClient {
            http: reqwest::Client::new(),
            access_token: "AT1".into(),
        }
    }

    /// Mock store that records the authorization header and content type
    /// of the last request.
    async fn start_upload_server(
        status: StatusCode,
        body: serde_json::Value,
    ) -> (String, Arc<AtomicU64>, Arc<std::sync::Mutex<Vec<String>>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicU64::new(0));
        let seen_headers = Arc::new(std::sync::Mutex::new(Vec::new()));
        let hits_clone = hits.clone();
        let headers_clone = seen_headers.clone();

        tokio::spawn(async move {
            let app = axum::Router::new().fallback(
                move |request: axum::http::Request<axum::body::Body>| {
                    let hits = hits_clone.clone();
                    let seen = headers_clone.clone();
                    let body = body.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        let mut captured = seen.lock().unwrap();
                        for name in ["authorization", "content-type"] {
                            if let Some(v) = request.headers().get(name) {
                                captured.push(format!("{name}: {}", v.to_str().unwrap_or("")));
                            }
                        }
                        (status, axum::Json(body))
                    }
                },
            );
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/upload"), hits, seen_headers)
    }

    #[tokio::test]
    async fn upload_sends_bearer_token_and_multipart_related() {
        let (url, hits, headers) = start_upload_server(
            StatusCode::OK,
            serde_json::json!({"id": "f1", "name": "payload.json", "webViewLink": "https://drive/view/f1"}),
        )
        .await;
        let client = DriveClient::new(url, "folder-1".into());

        let uploaded = client
            .upload_json(&auth_client(), "payload.json", br#"{"a":1}"#)
            .await
            .unwrap();

        assert_eq!(uploaded.id, "f1");
        assert_eq!(uploaded.web_view_link.as_deref(), Some("https://drive/view/f1"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let captured = headers.lock().unwrap();
        assert!(captured.iter().any(|h| h == "authorization: Bearer AT1"));
        assert!(
            captured
                .iter()
                .any(|h| h.starts_with("content-type: multipart/related; boundary="))
        );
    }

    #[tokio::test]
    async fn response_without_web_view_link_is_accepted() {
        let (url, _hits, _headers) = start_upload_server(
            StatusCode::OK,
            serde_json::json!({"id": "f2", "name": "payload.json"}),
        )
        .await;
        let client = DriveClient::new(url, "folder-1".into());

        let uploaded = client
            .upload_json(&auth_client(), "payload.json", b"{}")
            .await
            .unwrap();
        assert!(uploaded.web_view_link.is_none());
    }

    #[tokio::test]
    async fn store_401_maps_to_authorization_required() {
        let (url, _hits, _headers) = start_upload_server(
            StatusCode::UNAUTHORIZED,
            serde_json::json!({"error": "invalid token"}),
        )
        .await;
        let client = DriveClient::new(url, "folder-1".into());

        let result = client
            .upload_json(&auth_client(), "payload.json", b"{}")
            .await;
        assert!(matches!(result, Err(IngestError::AuthorizationRequired)));
    }

    #[tokio::test]
    async fn store_5xx_maps_to_upload_failed_with_body() {
        let (url, _hits, _headers) = start_upload_server(
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({"error": "backend down"}),
        )
        .await;
        let client = DriveClient::new(url, "folder-1".into());

        let result = client
            .upload_json(&auth_client(), "payload.json", b"{}")
            .await;
        match result {
            Err(IngestError::UploadFailed(msg)) => {
                assert!(msg.contains("503"), "status preserved for diagnosis: {msg}");
            }
            other => panic!("expected UploadFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_store_maps_to_upload_failed() {
        let client = DriveClient::new("http://127.0.0.1:1/upload".into(), "folder-1".into());
        let result = client
            .upload_json(&auth_client(), "payload.json", b"{}")
            .await;
        assert!(matches!(result, Err(IngestError::UploadFailed(_))));
    }
}
