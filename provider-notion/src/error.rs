//! Error types for the Notion provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Notion provider errors
#[derive(Error, Debug)]
pub enum NotionError {
    /// The API answered with an error object
    #[error("Notion API error (status {status}, {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// Rate limit exceeded after the client's retries
    #[error("Rate limited by Notion, retry after {retry_after_seconds} seconds")]
    RateLimited { retry_after_seconds: u64 },

    /// Failed to parse API response
    #[error("Failed to parse Notion response: {0}")]
    ParseError(String),

    /// A page body holds a block the sync cannot represent
    #[error("Unsupported block type: {0}")]
    UnsupportedBlock(String),

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for Notion operations
pub type Result<T> = std::result::Result<T, NotionError>;

impl From<NotionError> for BridgeError {
    fn from(error: NotionError) -> Self {
        match error {
            NotionError::Api {
                status: 404,
                message,
                ..
            } => BridgeError::NotFound(message),
            NotionError::Api {
                status,
                code,
                message,
            } if status >= 500 => BridgeError::Transport(format!(
                "Notion unavailable (status {}, {}): {}",
                status, code, message
            )),
            NotionError::Api {
                status,
                code,
                message,
            } => BridgeError::Validation {
                status,
                message: format!("{}: {}", code, message),
            },
            NotionError::RateLimited {
                retry_after_seconds,
            } => BridgeError::Transport(format!(
                "Rate limited, retry after {} seconds",
                retry_after_seconds
            )),
            NotionError::ParseError(msg) => {
                BridgeError::OperationFailed(format!("Parse error: {}", msg))
            }
            NotionError::UnsupportedBlock(kind) => {
                BridgeError::OperationFailed(format!("Unsupported block type: {}", kind))
            }
            NotionError::BridgeError(e) => e,
        }
    }
}
