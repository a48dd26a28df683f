//! Forwarder error types

use mailbridge_shared::StoreError;
use thiserror::Error;

/// Errors returned by Forward/Delete
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Alias is held by another identity
    #[error("`{alias}` is already assigned to {owner}")]
    Conflict { alias: String, owner: String },

    #[error("Provider error: {0}")]
    Provider(#[from] StoreError),

    #[error("Secret generation failed: {0}")]
    Randomness(#[from] SecretError),
}

impl ForwardError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ForwardError::Conflict { .. })
    }
}

pub type ForwardResult<T> = Result<T, ForwardError>;

/// Secret generation errors
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Randomness source unavailable: {0}")]
    RandomnessUnavailable(String),

    #[error("Invalid secret policy: {0}")]
    InvalidPolicy(&'static str),
}

/// Reasons a refresh left the previous snapshot in place
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Route listing failed: {0}")]
    Store(#[from] StoreError),

    #[error("Route listing exceeded {0} pages")]
    TooManyPages(usize),

    #[error("Route refresh exceeded its deadline")]
    Timeout,
}
