//! Error types for the ingestion pipeline

/// Failure modes of an ingestion request.
///
/// Each variant maps to one HTTP status and one stable discriminator in
/// the gateway's response body; the recovery action differs per variant,
/// so they are never merged.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Caller sent no usable payload. Never retried.
    #[error("empty payload")]
    EmptyPayload,

    /// No credential, or one that only a new consent can revive.
    #[error("authorization required")]
    AuthorizationRequired,

    /// Token refresh hit a transient failure; the caller may retry.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The remote store rejected the upload or was unreachable.
    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// Local disk failure while staging.
    #[error("storage error: {0}")]
    Storage(String),
}
