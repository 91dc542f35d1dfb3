//! Token endpoint interactions
//!
//! Handles the two grant types the gateway needs:
//! 1. Authorization code exchange (handshake completion)
//! 2. Token refresh (lazy, at client-request time)
//!
//! Both POST form-encoded bodies to the token URI from the client secrets.
//! The authorization server may omit `refresh_token` on a refresh response
//! (tokens are not rotated by default) and may omit `expires_in`.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::secrets::ApplicationSecrets;

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time. The caller
/// converts it to an absolute unix millisecond timestamp when building
/// the credential record.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".into()
}

/// Exchange an authorization code for tokens.
///
/// The redirect URI must be byte-identical to the one sent in the consent
/// URL or the authorization server rejects the exchange.
pub async fn exchange_code(
    client: &reqwest::Client,
    secrets: &ApplicationSecrets,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(&secrets.token_uri)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", &secrets.client_id),
            ("client_secret", secrets.client_secret.expose()),
            ("redirect_uri", redirect_uri),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}

/// Refresh an access token using a refresh token.
///
/// An `invalid_grant` body or 401/403 status means the grant is revoked —
/// mapped to `InvalidGrant` so the lifecycle manager can surface
/// re-authorization instead of retrying forever.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    secrets: &ApplicationSecrets,
    refresh_token: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(&secrets.token_uri)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &secrets.client_id),
            ("client_secret", secrets.client_secret.expose()),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 401 || status.as_u16() == 403 || body.contains("invalid_grant") {
            return Err(Error::InvalidGrant(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
}
