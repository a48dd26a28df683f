//! Error types for the remote routing store

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Provider request failed: {0}")]
    Transport(String),

    #[error("Provider response could not be decoded: {0}")]
    Decode(String),

    #[error("Route not found: {0}")]
    NotFound(String),

    #[error("Provider request timed out")]
    Timeout,
}

impl StoreError {
    /// True when the provider rejected a create because the resource exists
    pub fn is_already_exists(&self) -> bool {
        match self {
            StoreError::Api { status, message } => {
                (*status == 400 || *status == 409)
                    && message.to_ascii_lowercase().contains("already exists")
            }
            _ => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
