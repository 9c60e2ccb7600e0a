use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// The request never produced a usable response (connection, timeout, TLS).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote side answered and rejected the request.
    #[error("Rejected by remote (status {status}): {message}")]
    Validation { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl BridgeError {
    /// Whether the failure happened before the remote side processed anything.
    pub fn is_transport(&self) -> bool {
        matches!(self, BridgeError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
