//! Error types for the AnkiConnect provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// AnkiConnect provider errors
#[derive(Error, Debug)]
pub enum AnkiConnectError {
    /// The action ran and reported an error
    #[error("AnkiConnect action {action} failed: {message}")]
    Action { action: String, message: String },

    /// Non-2xx HTTP status from the add-on's server
    #[error("AnkiConnect returned status {0}")]
    Status(u16),

    /// Failed to parse the response envelope or result
    #[error("Failed to parse AnkiConnect response: {0}")]
    ParseError(String),

    #[error("Note not found: {0}")]
    NoteNotFound(i64),

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for AnkiConnect operations
pub type Result<T> = std::result::Result<T, AnkiConnectError>;

impl From<AnkiConnectError> for BridgeError {
    fn from(error: AnkiConnectError) -> Self {
        match error {
            AnkiConnectError::Action { action, message } => {
                BridgeError::OperationFailed(format!("{}: {}", action, message))
            }
            AnkiConnectError::Status(status) => BridgeError::Validation {
                status,
                message: "AnkiConnect rejected the request".to_string(),
            },
            AnkiConnectError::ParseError(msg) => {
                BridgeError::OperationFailed(format!("Parse error: {}", msg))
            }
            AnkiConnectError::NoteNotFound(id) => BridgeError::NotFound(format!("note {}", id)),
            AnkiConnectError::BridgeError(e) => e,
        }
    }
}
