//! Error types for credential operations

/// Errors from credential storage and token endpoint operations.
///
/// `InvalidGrant` is the terminal case: the authorization server has
/// revoked or rejected the refresh token, and only a new interactive
/// consent can recover. Everything else on the network path is transient.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("grant rejected by authorization server: {0}")]
    InvalidGrant(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("client secrets error: {0}")]
    SecretsParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
