//! Error taxonomy for the analysis pipeline

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt input: {0}")]
    CorruptInput(String),

    #[error("input decoded to zero samples")]
    EmptyInput,

    #[error("invalid window config: window {window}, hop {hop} (need window > 0, 0 < hop <= window)")]
    InvalidWindowConfig { window: usize, hop: usize },

    #[error("feature sequence has no frames")]
    EmptySequence,

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("config mismatch: expected embeddings from {expected}, found {found}")]
    ConfigMismatch { expected: String, found: String },

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("corrupt container: {0}")]
    CorruptContainer(String),

    #[error("decode timed out after {0} ms")]
    DecodeTimeout(u64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] timbre_store::StoreError),
}

/// Stable, serializable error kind handed to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedFormat,
    CorruptInput,
    EmptyInput,
    InvalidWindowConfig,
    EmptySequence,
    DimensionMismatch,
    ConfigMismatch,
    ModelUnavailable,
    CorruptContainer,
    DecodeTimeout,
    InvalidConfig,
    Cancelled,
    Io,
    Store,
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            AnalysisError::CorruptInput(_) => ErrorKind::CorruptInput,
            AnalysisError::EmptyInput => ErrorKind::EmptyInput,
            AnalysisError::InvalidWindowConfig { .. } => ErrorKind::InvalidWindowConfig,
            AnalysisError::EmptySequence => ErrorKind::EmptySequence,
            AnalysisError::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            AnalysisError::ConfigMismatch { .. } => ErrorKind::ConfigMismatch,
            AnalysisError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            AnalysisError::CorruptContainer(_) => ErrorKind::CorruptContainer,
            AnalysisError::DecodeTimeout(_) => ErrorKind::DecodeTimeout,
            AnalysisError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            AnalysisError::Cancelled => ErrorKind::Cancelled,
            AnalysisError::Io(_) => ErrorKind::Io,
            AnalysisError::Store(_) => ErrorKind::Store,
        }
    }

    /// Only a timeout may be retried, and only by the caller with a larger budget
    pub fn is_retryable(&self) -> bool {
        matches!(self, AnalysisError::DecodeTimeout(_))
    }

    /// Structured form for presentation: kind plus human-readable message
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
