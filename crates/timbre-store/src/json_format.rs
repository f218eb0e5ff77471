//! JSON form of an embedding record
//!
//! Same content as the binary record, meant for export and hand inspection.

use crate::format::{EmbeddingRecord, RecordMetadata};
use serde::{Deserialize, Serialize};

/// Complete JSON record structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRecord {
    pub version: String,
    pub metadata: RecordMetadata,
    pub dims: usize,
    pub embedding: Vec<f32>,
}

impl JsonRecord {
    pub fn from_record(record: &EmbeddingRecord) -> Self {
        Self {
            version: "1.0".to_string(),
            metadata: record.metadata.clone(),
            dims: record.values.len(),
            embedding: record.values.clone(),
        }
    }

    pub fn into_record(self) -> EmbeddingRecord {
        EmbeddingRecord {
            metadata: self.metadata,
            values: self.embedding,
        }
    }

    /// Save to JSON file
    pub fn save(&self, path: &std::path::Path) -> crate::Result<()> {
        let json_str = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json_str)?;
        Ok(())
    }

    /// Load from JSON file
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        let json_str = std::fs::read_to_string(path)?;
        let record: JsonRecord = serde_json::from_str(&json_str)?;
        if record.dims != record.embedding.len() {
            return Err(crate::StoreError::Malformed(format!(
                "dims is {} but embedding holds {} values",
                record.dims,
                record.embedding.len()
            )));
        }
        Ok(record)
    }
}
