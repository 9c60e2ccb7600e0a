use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The target schema could not be read; the run stops before any write.
    #[error("Failed to retrieve database schema: {0}")]
    SchemaRetrieval(String),

    #[error("Failed to update database schema: {0}")]
    SchemaUpdate(String),

    #[error("Record {id} could not be normalized: {reason}")]
    RecordNormalization { id: String, reason: String },

    #[error("Duplicate lookup failed: {0}")]
    DuplicateLookup(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Target error: {0}")]
    Target(String),

    #[error("Failed to delete source records: {0}")]
    Deletion(String),

    #[error("Sync already in progress (run {run_id})")]
    SyncInProgress { run_id: String },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Sync run {run_id} not found")]
    RunNotFound { run_id: String },

    #[error("Invalid run ID: {0}")]
    InvalidRunId(String),

    #[error("Invalid run phase: {0}")]
    InvalidPhase(String),

    #[error("Invalid phase transition from {from} to {to}: {reason}")]
    InvalidPhaseTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sync task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// Errors that end the whole run rather than a single record.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::SchemaRetrieval(_)
                | SyncError::Source(_)
                | SyncError::SyncInProgress { .. }
                | SyncError::Cancelled
                | SyncError::Config(_)
        )
    }

    pub(crate) fn write(err: BridgeError) -> Self {
        SyncError::Write(err.to_string())
    }

    pub(crate) fn source(err: BridgeError) -> Self {
        SyncError::Source(err.to_string())
    }
}

impl From<core_runtime::Error> for SyncError {
    fn from(err: core_runtime::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
