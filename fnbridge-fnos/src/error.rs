//! fnOS client error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FnosError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("TLS certificate error: {0}")]
    Certificate(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error (code {code}): {message}")]
    Api { code: i64, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Redirect limit exceeded")]
    TooManyRedirects,

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),
}

impl From<reqwest::Error> for FnosError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }

        // reqwest does not expose TLS failures as a dedicated kind; walk the
        // source chain so operators can tell a self-signed-certificate
        // misconfiguration apart from a plain connection failure.
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
        while let Some(e) = source {
            let text = e.to_string();
            if text.contains("certificate") || text.contains("CertificateError") {
                return Self::Certificate(err.to_string());
            }
            source = e.source();
        }

        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for FnosError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
