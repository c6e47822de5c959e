use crate::auth::CredentialError;
use axum::http::StatusCode;
use thiserror::Error;

/// Failures of a single forwarded conversation.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Feature disabled or no usable credential source.
    #[error("{0}")]
    Configuration(String),

    /// Malformed input or an unusable resolved token.
    #[error("{0}")]
    Validation(String),

    #[error("failed to acquire access token: {0}")]
    Auth(#[source] CredentialError),

    #[error("Foundry returned {status}: {body}")]
    Upstream {
        status: u16,
        body: String,
    },

    #[error("request to Foundry failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request to Foundry timed out after {0}s")]
    Timeout(u64),

    #[error("reading Foundry stream failed: {0}")]
    StreamRead(#[from] std::io::Error),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Configuration(_) | RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
