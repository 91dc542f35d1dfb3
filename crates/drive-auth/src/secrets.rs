//! OAuth client secret material
//!
//! Parses the client-secret JSON file the authorization server's console
//! hands out. The file wraps the actual fields under a `web` or
//! `installed` key depending on the registered application type; both are
//! accepted. The client secret itself is held in a `Secret` wrapper so it
//! never appears in logs.
//!
//! A missing or unparseable file must be caught at startup — the gateway
//! refuses to serve traffic it could never authorize.

use std::path::Path;

use common::Secret;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Default authorization endpoint (Google consent page)
pub const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Default token endpoint for code exchange and refresh
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Scope granting access to files the app itself creates
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// Parsed client secret material for the authorization server.
pub struct ApplicationSecrets {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub auth_uri: String,
    pub token_uri: String,
}

#[derive(Deserialize)]
struct SecretsFile {
    web: Option<RawSecrets>,
    installed: Option<RawSecrets>,
}

#[derive(Deserialize)]
struct RawSecrets {
    client_id: String,
    client_secret: String,
    auth_uri: Option<String>,
    token_uri: Option<String>,
}

impl ApplicationSecrets {
    /// Load and parse a client secret file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("reading client secrets {}: {e}", path.display())))?;
        Self::from_json(&contents)
    }

    /// Parse client secret JSON (`web` or `installed` application type).
    pub fn from_json(contents: &str) -> Result<Self> {
        let file: SecretsFile = serde_json::from_str(contents)
            .map_err(|e| Error::SecretsParse(format!("invalid client secrets JSON: {e}")))?;

        let raw = file.web.or(file.installed).ok_or_else(|| {
            Error::SecretsParse("client secrets must contain a 'web' or 'installed' key".into())
        })?;

        if raw.client_id.is_empty() || raw.client_secret.is_empty() {
            return Err(Error::SecretsParse(
                "client_id and client_secret must be non-empty".into(),
            ));
        }

        Ok(Self {
            client_id: raw.client_id,
            client_secret: Secret::new(raw.client_secret),
            auth_uri: raw.auth_uri.unwrap_or_else(|| DEFAULT_AUTH_URI.into()),
            token_uri: raw.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.into()),
        })
    }
}
