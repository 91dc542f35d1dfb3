//! Three-legged authorization handshake
//!
//! Drives the consent redirect/callback exchange. `begin()` stores the
//! expected CSRF state token and hands back the consent URL; `complete()`
//! consumes the pending handshake (on success or failure), verifies the
//! presented state without short-circuiting on attacker-controlled
//! prefixes, and exchanges the code for a fresh credential record.
//!
//! The consent URL always requests `access_type=offline` (so a refresh
//! token is issued) and `prompt=consent` (so the authorization server
//! returns one even on repeat authorizations).

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::credentials::{CredentialRecord, now_millis};
use crate::error::Error;
use crate::secrets::ApplicationSecrets;
use crate::token::exchange_code;

/// Maximum age of a pending handshake before it expires.
const HANDSHAKE_TTL: Duration = Duration::from_secs(600); // 10 minutes

/// A pending handshake awaiting its callback.
///
/// Exactly one may be live at a time; a new `begin()` replaces any
/// previous one, and any matching callback consumes it.
#[derive(Debug, Clone)]
pub struct HandshakeState {
    pub state_token: String,
    pub redirect_uri: String,
    pub created_at: Instant,
}

/// Failure modes of `complete()`, distinguished so the HTTP layer can
/// report a stable discriminator for each.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("no pending authorization handshake (expired or never started)")]
    MissingState,

    #[error("state token does not match the pending handshake")]
    StateMismatch,

    #[error("redirect URI mismatch: consent used {expected}, callback derived {presented}")]
    RedirectMismatch { expected: String, presented: String },

    #[error("code exchange failed: {0}")]
    Exchange(#[source] Error),
}

/// Generate a cryptographically random single-use state token.
///
/// 32 random bytes as URL-safe base64 (no padding), 43 characters.
pub fn generate_state_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Byte-wise comparison that does not bail on the first mismatch.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Build the consent URL with all required OAuth parameters.
pub fn build_consent_url(
    secrets: &ApplicationSecrets,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
        secrets.auth_uri,
        secrets.client_id,
        urlencoded(redirect_uri),
        urlencoded(&scopes.join(" ")),
        state,
    )
}

/// Minimal URL encoding for parameter values.
/// Only encodes characters that would break URL parameter parsing.
fn urlencoded(s: &str) -> String {
    s.replace('%', "%25")
        .replace(' ', "%20")
        .replace(':', "%3A")
        .replace('/', "%2F")
        .replace('?', "%3F")
        .replace('&', "%26")
        .replace('=', "%3D")
}

/// Drives the authorize → callback exchange for the gateway's single
/// browser session.
pub struct HandshakeHandler {
    secrets: Arc<ApplicationSecrets>,
    http: reqwest::Client,
    scopes: Vec<String>,
    pending: Mutex<Option<HandshakeState>>,
}

impl HandshakeHandler {
    pub fn new(secrets: Arc<ApplicationSecrets>, http: reqwest::Client, scopes: Vec<String>) -> Self {
        Self {
            secrets,
            http,
            scopes,
            pending: Mutex::new(None),
        }
    }

    /// Start a handshake: store a fresh state token and return the consent URL.
    ///
    /// Replaces any previous pending handshake — only one browser session
    /// is ever in flight.
    pub async fn begin(&self, redirect_uri: String) -> String {
        let state_token = generate_state_token();
        let url = build_consent_url(&self.secrets, &redirect_uri, &self.scopes, &state_token);

        let mut pending = self.pending.lock().await;
        if pending.is_some() {
            warn!("replacing a pending handshake with a new one");
        }
        *pending = Some(HandshakeState {
            state_token,
            redirect_uri,
            created_at: Instant::now(),
        });
        info!("authorization handshake started");

        url
    }

    /// Complete a handshake from the callback parameters.
    ///
    /// The pending state is consumed before any check, so a failed
    /// callback cannot be replayed. State verification happens before
    /// any network call.
    pub async fn complete(
        &self,
        code: &str,
        presented_state: &str,
        redirect_uri: &str,
    ) -> Result<CredentialRecord, HandshakeError> {
        let pending = {
            let mut slot = self.pending.lock().await;
            slot.take()
        };

        let pending = pending.ok_or(HandshakeError::MissingState)?;

        if pending.created_at.elapsed() > HANDSHAKE_TTL {
            warn!("callback for an expired handshake");
            return Err(HandshakeError::MissingState);
        }

        if !constant_time_eq(&pending.state_token, presented_state) {
            warn!("callback state token mismatch");
            return Err(HandshakeError::StateMismatch);
        }

        // Scheme/host drift between the authorize and callback requests is
        // a distinct failure, not a generic exchange error.
        if pending.redirect_uri != redirect_uri {
            return Err(HandshakeError::RedirectMismatch {
                expected: pending.redirect_uri,
                presented: redirect_uri.to_string(),
            });
        }

        let token = exchange_code(&self.http, &self.secrets, code, &pending.redirect_uri)
            .await
            .map_err(HandshakeError::Exchange)?;

        let scopes = match &token.scope {
            Some(s) => s.split_whitespace().map(str::to_owned).collect(),
            None => self.scopes.clone(),
        };

        info!("authorization handshake completed");
        Ok(CredentialRecord {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expiry: token.expires_in.map(|secs| now_millis() + secs * 1000),
            scopes,
            token_type: token.token_type,
        })
    }
}
