use thiserror::Error;

/// Top-level error type for wagate.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No session registered under the given name.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A session with this name already exists.
    #[error("session already exists: {0}")]
    SessionAlreadyExists(String),

    /// A record (message, media, webhook) that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation needs a connected session.
    #[error("session not connected: {0}")]
    SessionNotConnected(String),

    /// The operation needs (or forbids) an authenticated device.
    #[error("session not authenticated: {0}")]
    SessionNotAuthenticated(String),

    /// Request decoding or validation failure.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("invalid JID: {0}")]
    InvalidJid(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid base64: {0}")]
    InvalidBase64(String),

    /// Payload exceeded the configured size cap.
    #[error("file too large: {0}")]
    FileTooLarge(String),

    /// The media blob is no longer on the CDN; a re-upload must be requested.
    #[error("media expired: {0}")]
    MediaExpired(String),

    /// The media record lacks the keys needed for download.
    #[error("media missing download keys: {0}")]
    MediaMissingKeys(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// The protocol library did not answer in time.
    #[error("protocol timeout: {0}")]
    ProtocolTimeout(String),

    /// Opaque error from the protocol library.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The protocol backend has no implementation of this operation.
    #[error("not supported: {0}")]
    Unsupported(String),

    /// A webhook POST failed at the transport level.
    #[error("webhook delivery failed: {0}")]
    WebhookDelivery(String),

    /// The object store could not be reached.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Relational store error.
    #[error("database error: {0}")]
    Database(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    /// HTTP status code the API layer answers with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::SessionNotFound(_) | Self::NotFound(_) => 404,
            Self::SessionAlreadyExists(_) => 409,
            Self::SessionNotConnected(_) | Self::SessionNotAuthenticated(_) => 400,
            Self::InvalidRequest(_)
            | Self::InvalidPhone(_)
            | Self::InvalidJid(_)
            | Self::InvalidUrl(_)
            | Self::InvalidBase64(_)
            | Self::MediaMissingKeys(_) => 400,
            Self::FileTooLarge(_) => 413,
            Self::DownloadFailed(_) | Self::UploadFailed(_) | Self::WebhookDelivery(_) => 502,
            Self::Unsupported(_) => 501,
            Self::StorageUnavailable(_) => 503,
            Self::ProtocolTimeout(_) => 504,
            Self::MediaExpired(_)
            | Self::Protocol(_)
            | Self::Database(_)
            | Self::Config(_)
            | Self::Internal(_)
            | Self::Io(_)
            | Self::Serialization(_) => 500,
        }
    }

    /// Whether the error means the media blob must be re-requested from the sender.
    pub fn is_media_expired(&self) -> bool {
        matches!(self, Self::MediaExpired(_))
    }
}
