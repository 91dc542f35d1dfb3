//! Credential lifecycle manager
//!
//! The single place that decides whether the stored credential is usable.
//! State is evaluated lazily on every `authorized_client()` call:
//!
//! - no record → Unauthenticated
//! - unexpired access token → return a client
//! - expired, refresh token present → refresh, persist, return a client
//! - expired, no refresh token (or refresh rejected) → ReauthorizationRequired
//! - refresh hit a transient failure → RefreshFailed
//!
//! The whole check-expiry → refresh → persist sequence runs inside one
//! Mutex so concurrent requests observing an expired token cannot race
//! the token endpoint or the credential file.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credentials::{CredentialRecord, CredentialStore, now_millis};
use crate::error::{Error, Result};
use crate::secrets::ApplicationSecrets;
use crate::token::refresh_access_token;

/// Tokens expiring within this window count as expired, covering clock
/// skew and the latency of the upload that follows.
const EXPIRY_SKEW_MILLIS: u64 = 60_000;

/// Why a client could not be produced. The three variants demand
/// different recovery actions, so callers must never conflate them:
/// `Unauthenticated` and `ReauthorizationRequired` need the user back at
/// the consent screen; `RefreshFailed` is retryable as-is.
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    #[error("no stored credential; authorization required")]
    Unauthenticated,

    #[error("credential expired and cannot be refreshed; re-authorization required")]
    ReauthorizationRequired,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

/// A ready-to-use upload client: HTTP client plus the bearer token that
/// authorizes it. Valid for at least the expiry skew window.
#[derive(Debug, Clone)]
pub struct AuthorizedClient {
    pub http: reqwest::Client,
    pub access_token: String,
}

/// Snapshot of the credential state for status reporting. Computed
/// without side effects — no refresh is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    Unauthenticated,
    Authenticated,
    ExpiredRefreshable,
    ExpiredTerminal,
}

impl CredentialStatus {
    /// Whether the gateway can (possibly after a refresh) upload right now.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Authenticated | Self::ExpiredRefreshable)
    }
}

/// Owns the authorize → exchange → refresh → expire lifecycle.
pub struct CredentialManager {
    store: Arc<CredentialStore>,
    secrets: Arc<ApplicationSecrets>,
    http: reqwest::Client,
    /// Serializes check-expiry-then-refresh-then-persist.
    refresh_gate: Mutex<()>,
}

impl CredentialManager {
    pub fn new(
        store: Arc<CredentialStore>,
        secrets: Arc<ApplicationSecrets>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            store,
            secrets,
            http,
            refresh_gate: Mutex::new(()),
        }
    }

    /// Persist a credential produced by a completed handshake.
    pub async fn install(&self, record: CredentialRecord) -> Result<()> {
        self.store.save(record).await?;
        info!("credential installed");
        Ok(())
    }

    /// Report the current lifecycle state without refreshing.
    pub async fn status(&self) -> CredentialStatus {
        match self.store.load().await {
            None => CredentialStatus::Unauthenticated,
            Some(record) => {
                if !record.is_expired(now_millis(), EXPIRY_SKEW_MILLIS) {
                    CredentialStatus::Authenticated
                } else if record.refresh_token.is_some() {
                    CredentialStatus::ExpiredRefreshable
                } else {
                    CredentialStatus::ExpiredTerminal
                }
            }
        }
    }

    /// Produce a client authorized for the remote store, refreshing and
    /// persisting the credential first if it has expired.
    pub async fn authorized_client(&self) -> std::result::Result<AuthorizedClient, AuthzError> {
        // One refresh at a time: a second caller blocks here and then
        // observes the freshly persisted token instead of refreshing again.
        let _gate = self.refresh_gate.lock().await;

        let record = self
            .store
            .load()
            .await
            .ok_or(AuthzError::Unauthenticated)?;

        if !record.is_expired(now_millis(), EXPIRY_SKEW_MILLIS) {
            debug!("access token still valid");
            return Ok(AuthorizedClient {
                http: self.http.clone(),
                access_token: record.access_token,
            });
        }

        let Some(refresh_token) = record.refresh_token.clone() else {
            warn!("access token expired with no refresh token");
            return Err(AuthzError::ReauthorizationRequired);
        };

        match refresh_access_token(&self.http, &self.secrets, &refresh_token).await {
            Ok(token) => {
                let refreshed = CredentialRecord {
                    access_token: token.access_token.clone(),
                    // The endpoint only sends a refresh token when it rotates one
                    refresh_token: token.refresh_token.or(Some(refresh_token)),
                    expiry: token.expires_in.map(|secs| now_millis() + secs * 1000),
                    scopes: record.scopes,
                    token_type: token.token_type,
                };
                // Persist before handing out the client: a crash after this
                // point must not lose the rotated token
                if let Err(e) = self.store.save(refreshed).await {
                    metrics::counter!("token_refreshes_total", "outcome" => "persist_failed")
                        .increment(1);
                    return Err(AuthzError::RefreshFailed(format!(
                        "persisting refreshed credential: {e}"
                    )));
                }
                metrics::counter!("token_refreshes_total", "outcome" => "ok").increment(1);
                info!("access token refreshed");
                Ok(AuthorizedClient {
                    http: self.http.clone(),
                    access_token: token.access_token,
                })
            }
            Err(Error::InvalidGrant(msg)) => {
                metrics::counter!("token_refreshes_total", "outcome" => "rejected").increment(1);
                warn!(error = %msg, "refresh token rejected, re-authorization required");
                Err(AuthzError::ReauthorizationRequired)
            }
            Err(e) => {
                metrics::counter!("token_refreshes_total", "outcome" => "transient").increment(1);
                warn!(error = %e, "token refresh failed (transient)");
                Err(AuthzError::RefreshFailed(e.to_string()))
            }
        }
    }
}
