//! Timbre embedding record format library
//!
//! Embeddings are persisted one record per file. The binary form (`.tbe`)
//! is used by the on-disk cache and embedding libraries; the JSON form is
//! an interchange/export format readable by the same loader.

pub mod error;
pub mod format;
pub mod json_format;
pub mod reader;
pub mod writer;

pub use error::{Result, StoreError};
pub use format::{EmbeddingRecord, RecordHeader, RecordMetadata, MAGIC, VERSION};
pub use json_format::JsonRecord;
pub use reader::RecordReader;
pub use writer::RecordWriter;

/// File extension of binary records
pub const RECORD_EXTENSION: &str = "tbe";
