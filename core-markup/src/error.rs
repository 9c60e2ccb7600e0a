use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarkupError {
    /// A placeholder referenced a fenced code segment that was never extracted.
    #[error("Code segment {index} missing (only {available} extracted)")]
    MissingCodeSegment { index: usize, available: usize },
}

pub type Result<T> = std::result::Result<T, MarkupError>;
