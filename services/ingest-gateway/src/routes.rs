//! HTTP handlers
//!
//! Every failure returns `{status:"error", error:"<discriminator>",
//! message:"..."}` so callers branch on the discriminator, never on
//! message text. Authentication absence is data (`/check-auth` is always
//! 200), not an HTTP error.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tracing::{info, warn};

use drive_auth::{CredentialManager, CredentialStatus, HandshakeError, HandshakeHandler};
use ingest::{IngestError, IngestPipeline};

use crate::metrics;

/// Shared application state accessible from all handlers.
///
/// Built once at startup and passed explicitly — no hidden globals, no
/// per-request reconstruction.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CredentialManager>,
    pub handshake: Arc<HandshakeHandler>,
    pub pipeline: Arc<IngestPipeline>,
    pub external_base_url: Option<String>,
    pub force_https: bool,
    pub prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/authorize", get(authorize_handler))
        .route("/oauth2callback", get(oauth2_callback_handler))
        .route("/upload-json", post(upload_json_handler))
        .route("/check-auth", get(check_auth_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Structured error body with a stable discriminator.
fn json_error(status: StatusCode, discriminator: &str, message: String) -> Response {
    (
        status,
        axum::Json(serde_json::json!({
            "status": "error",
            "error": discriminator,
            "message": message,
        })),
    )
        .into_response()
}

/// Derive the callback redirect URI for this request.
///
/// The same derivation runs for `/authorize` and `/oauth2callback`, so
/// the two legs of the handshake always agree. Configured base URL wins;
/// otherwise the scheme comes from `x-forwarded-proto` (or the
/// force_https override) and the host from the Host header.
fn callback_redirect_uri(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(base) = &state.external_base_url {
        return format!("{}/oauth2callback", base.trim_end_matches('/'));
    }

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = if state.force_https {
        "https"
    } else {
        headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("http")
    };
    format!("{scheme}://{host}/oauth2callback")
}

/// GET /authorize — 302 to the authorization server's consent URL.
async fn authorize_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let redirect_uri = callback_redirect_uri(&state, &headers);
    let consent_url = state.handshake.begin(redirect_uri).await;
    info!("redirecting to consent URL");
    (
        StatusCode::FOUND,
        [(header::LOCATION, consent_url)],
    )
        .into_response()
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// GET /oauth2callback — complete the handshake and persist the credential.
async fn oauth2_callback_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    if let Some(err) = params.error {
        warn!(error = %err, "consent denied by user or authorization server");
        return json_error(
            StatusCode::BAD_REQUEST,
            "consent_denied",
            format!("authorization server returned: {err}"),
        );
    }

    // A callback with no state is rejected before anything is consumed
    // or any network call is made
    let Some(presented_state) = params.state else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "missing_state",
            "callback carried no state parameter".into(),
        );
    };
    let Some(code) = params.code else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "exchange_failed",
            "callback carried no authorization code".into(),
        );
    };

    let redirect_uri = callback_redirect_uri(&state, &headers);
    let record = match state
        .handshake
        .complete(&code, &presented_state, &redirect_uri)
        .await
    {
        Ok(record) => record,
        Err(e) => {
            let discriminator = match &e {
                HandshakeError::MissingState => "missing_state",
                HandshakeError::StateMismatch => "state_mismatch",
                HandshakeError::RedirectMismatch { .. } => "redirect_mismatch",
                HandshakeError::Exchange(_) => "exchange_failed",
            };
            warn!(error = %e, "handshake completion failed");
            return json_error(StatusCode::BAD_REQUEST, discriminator, e.to_string());
        }
    };

    if let Err(e) = state.manager.install(record).await {
        return json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            format!("persisting credential: {e}"),
        );
    }

    (
        StatusCode::OK,
        axum::Json(serde_json::json!({
            "status": "success",
            "message": "authorization complete; credential stored",
        })),
    )
        .into_response()
}

/// POST /upload-json — stage and upload one JSON payload.
async fn upload_json_handler(
    State(state): State<AppState>,
    payload: Result<axum::Json<serde_json::Value>, JsonRejection>,
) -> Response {
    let started = Instant::now();

    let response = match payload {
        Err(rejection) => json_error(
            StatusCode::BAD_REQUEST,
            "invalid_json",
            format!("request body is not valid JSON: {rejection}"),
        ),
        Ok(axum::Json(value)) => match state.pipeline.ingest(value).await {
            Ok(outcome) => (
                StatusCode::OK,
                axum::Json(serde_json::json!({
                    "status": "success",
                    "uploaded_file_id": outcome.file_id,
                    "filename": outcome.filename,
                    "web_view_link": outcome.web_view_link,
                })),
            )
                .into_response(),
            Err(e) => {
                let (status, discriminator) = match &e {
                    IngestError::EmptyPayload => (StatusCode::BAD_REQUEST, "empty_payload"),
                    IngestError::AuthorizationRequired => {
                        (StatusCode::UNAUTHORIZED, "authorization_required")
                    }
                    IngestError::RefreshFailed(_) => (StatusCode::BAD_GATEWAY, "refresh_failed"),
                    IngestError::UploadFailed(_) => (StatusCode::BAD_GATEWAY, "upload_failed"),
                    IngestError::Storage(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
                    }
                };
                json_error(status, discriminator, e.to_string())
            }
        },
    };

    metrics::record_request(
        "/upload-json",
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// GET /check-auth — always 200; absence of authentication is data.
async fn check_auth_handler(State(state): State<AppState>) -> Response {
    let status = state.manager.status().await;
    let message = match status {
        CredentialStatus::Unauthenticated => "not authenticated; visit /authorize",
        CredentialStatus::Authenticated => "authenticated",
        CredentialStatus::ExpiredRefreshable => {
            "access token expired; will refresh on next upload"
        }
        CredentialStatus::ExpiredTerminal => "authorization expired; visit /authorize",
    };
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({
            "authenticated": status.is_usable(),
            "message": message,
        })),
    )
        .into_response()
}

/// GET /health — liveness only, no dependency checks.
async fn health_handler() -> Response {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({
            "status": "healthy",
            "timestamp": timestamp,
        })),
    )
        .into_response()
}

/// GET /metrics — Prometheus text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
        .into_response()
}
