//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed or out-of-range input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The actor lacks the role or ownership the action needs.
    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The action is forbidden from the record's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The payment provider sent confirmations that contradict each other.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Duplicate receipt issuance.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error("Webhook signature error: {0}")]
    Signature(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// `true` for errors that report a problem with the request rather than
    /// with the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Authorization(_)
                | Self::NotFound(_)
                | Self::InvalidState(_)
                | Self::Conflict(_)
                | Self::Signature(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Shorthand constructors used by the lifecycle modules.
pub(crate) fn validation(msg: impl Into<String>) -> LedgerError {
    LedgerError::Validation(msg.into())
}

pub(crate) fn unauthorized(msg: impl Into<String>) -> LedgerError {
    LedgerError::Authorization(msg.into())
}

pub(crate) fn invalid_state(msg: impl Into<String>) -> LedgerError {
    LedgerError::InvalidState(msg.into())
}
