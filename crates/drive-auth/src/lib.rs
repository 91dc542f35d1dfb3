//! Delegated-credential lifecycle for the Drive ingest gateway
//!
//! Owns the OAuth2 access/refresh token pair that authorizes every
//! outbound upload. This crate is a standalone library with no dependency
//! on the gateway binary — it can be tested and used independently.
//!
//! Credential flow:
//! 1. Gateway calls `HandshakeHandler::begin()` and redirects the browser
//!    to the returned consent URL
//! 2. Callback arrives; `HandshakeHandler::complete()` verifies the state
//!    token and exchanges the code via `token::exchange_code()`
//! 3. Resulting record persisted via `CredentialManager::install()`
//! 4. Request path calls `CredentialManager::authorized_client()`, which
//!    refreshes lazily through `token::refresh_access_token()` and
//!    persists the rotated record before returning

pub mod credentials;
pub mod error;
pub mod handshake;
pub mod manager;
pub mod secrets;
pub mod token;

pub use credentials::{CredentialRecord, CredentialStore, now_millis};
pub use error::{Error, Result};
pub use handshake::{HandshakeError, HandshakeHandler, HandshakeState, generate_state_token};
pub use manager::{AuthorizedClient, AuthzError, CredentialManager, CredentialStatus};
pub use secrets::ApplicationSecrets;
pub use token::{TokenResponse, exchange_code, refresh_access_token};
