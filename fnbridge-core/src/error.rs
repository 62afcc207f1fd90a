use thiserror::Error;

use fnbridge_fnos::FnosError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Upstream certificate error: {0}")]
    Certificate(String),

    /// The backend discarded a transcode session the bridge still holds.
    #[error("Transcode session expired: {0}")]
    SessionExpired(String),

    /// A transcode was requested for a rendition that never went through
    /// playback-info resolution, so no start parameters exist for it.
    #[error("No transcode metadata for rendition {0}")]
    NoTranscodeMetadata(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<FnosError> for Error {
    fn from(err: FnosError) -> Self {
        match err {
            FnosError::Timeout => Self::UpstreamTimeout("fnOS request timed out".into()),
            FnosError::Certificate(msg) => Self::Certificate(msg),
            FnosError::Auth(msg) => Self::Unauthorized(msg),
            FnosError::Api { code, message } => {
                Self::Upstream(format!("fnOS api error {code}: {message}"))
            }
            FnosError::Network(msg) | FnosError::Parse(msg) => Self::Upstream(msg),
            FnosError::TooManyRedirects => Self::Upstream("fnOS redirect loop".into()),
            FnosError::UnsupportedMethod(m) => Self::Internal(format!("unsupported method {m}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
