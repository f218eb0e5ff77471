use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store: io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store: invalid record: magic bytes mismatch")]
    InvalidMagic,

    #[error("store: unsupported record version {0}")]
    UnsupportedVersion(u16),

    #[error("store: checksum mismatch (expected {expected:#018x}, found {actual:#018x})")]
    ChecksumMismatch { expected: u64, actual: u64 },

    #[error("store: malformed record: {0}")]
    Malformed(String),

    #[error("store: json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
