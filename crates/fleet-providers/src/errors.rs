//! Provider error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        /// Provider-specific error codes, when the API reports any
        codes: Vec<i64>,
        message: String,
    },

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProviderError::NotFound(_) | ProviderError::Api { status: 404, .. }
        )
    }

    pub fn has_code(&self, code: i64) -> bool {
        match self {
            ProviderError::Api { codes, .. } => codes.contains(&code),
            _ => false,
        }
    }

    pub(crate) fn api(status: u16, message: impl Into<String>) -> Self {
        ProviderError::Api {
            status,
            codes: Vec::new(),
            message: message.into(),
        }
    }
}
