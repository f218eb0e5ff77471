//! .tbe record structures

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Magic bytes for .tbe files: "TBEM"
pub const MAGIC: [u8; 4] = [0x54, 0x42, 0x45, 0x4D];

/// Current format version
pub const VERSION: u16 = 1;

/// Size of the fixed binary header in bytes
pub const HEADER_SIZE: usize = 48;

/// Header flag: payload is zstd-compressed
pub const FLAG_COMPRESSED: u16 = 0x1;

/// File header (48 bytes fixed size, little-endian)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    /// Magic bytes: "TBEM"
    pub magic: [u8; 4],
    /// Format version
    pub version: u16,
    /// Flags (bit 0: compressed)
    pub flags: u16,
    /// Number of f32 values in the embedding
    pub dims: u32,
    /// Size of the JSON metadata section
    pub metadata_size: u32,
    /// Size of payload (uncompressed)
    pub payload_size: u64,
    /// Compressed payload size (0 if uncompressed)
    pub payload_size_compressed: u64,
    /// CRC-64 of the uncompressed payload
    pub checksum: u64,
    /// Reserved
    pub reserved: u64,
}

impl RecordHeader {
    pub fn new(dims: u32, metadata_size: u32, payload_size: u64) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags: 0,
            dims,
            metadata_size,
            payload_size,
            payload_size_compressed: 0,
            checksum: 0,
            reserved: 0,
        }
    }

    pub fn is_compressed(&self) -> bool {
        (self.flags & FLAG_COMPRESSED) != 0
    }

    pub fn set_compressed(&mut self, compressed: bool) {
        if compressed {
            self.flags |= FLAG_COMPRESSED;
        } else {
            self.flags &= !FLAG_COMPRESSED;
        }
    }

    /// Number of payload bytes actually stored on disk
    pub fn stored_payload_size(&self) -> u64 {
        if self.is_compressed() {
            self.payload_size_compressed
        } else {
            self.payload_size
        }
    }
}

/// Metadata section, stored as JSON between header and payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Identifier used when ranking (usually the source file name)
    pub identifier: String,
    /// Content fingerprint (hex BLAKE3 of the raw input bytes)
    pub fingerprint: String,
    /// Version string of the extraction configuration
    pub config_version: String,
    /// Original path or upload name
    #[serde(default)]
    pub source: String,
    /// Embedded tags of the source, if read
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// RFC 3339 creation time
    pub created_at: String,
}

/// Complete record: metadata plus embedding values
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub metadata: RecordMetadata,
    pub values: Vec<f32>,
}

impl EmbeddingRecord {
    pub fn new(
        identifier: impl Into<String>,
        fingerprint: impl Into<String>,
        config_version: impl Into<String>,
        values: Vec<f32>,
    ) -> Self {
        Self {
            metadata: RecordMetadata {
                identifier: identifier.into(),
                fingerprint: fingerprint.into(),
                config_version: config_version.into(),
                source: String::new(),
                tags: BTreeMap::new(),
                created_at: chrono::Utc::now().to_rfc3339(),
            },
            values,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = source.into();
        self
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.metadata.tags = tags;
        self
    }

    /// Whether this record was produced by the given extraction configuration
    pub fn matches_version(&self, config_version: &str) -> bool {
        self.metadata.config_version == config_version
    }

    /// Load a record, picking the JSON or binary reader from the extension
    pub fn load_auto(path: &std::path::Path) -> crate::Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(crate::JsonRecord::load(path)?.into_record()),
            _ => crate::RecordReader::read(path),
        }
    }
}

/// Encode embedding values as little-endian bytes
pub(crate) fn values_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian bytes into embedding values
pub(crate) fn bytes_to_values(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub(crate) const CRC64: crc::Crc<u64> = crc::Crc::<u64>::new(&crc::CRC_64_ECMA_182);
