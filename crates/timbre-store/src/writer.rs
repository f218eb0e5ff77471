//! .tbe record writer

use crate::format::{values_to_bytes, EmbeddingRecord, RecordHeader, CRC64};
use crate::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub struct RecordWriter {
    compress: bool,
    level: i32,
}

impl RecordWriter {
    pub fn new() -> Self {
        Self {
            compress: false,
            level: 3,
        }
    }

    /// Compress payloads with zstd at the given level
    pub fn compressed(level: i32) -> Self {
        Self {
            compress: true,
            level,
        }
    }

    /// Write a record to `path`.
    ///
    /// The record is written to a sibling temporary file first and renamed
    /// into place, so concurrent readers never observe a partial file.
    pub fn write(&self, path: &Path, record: &EmbeddingRecord) -> Result<()> {
        let tmp_path = path.with_extension("tbe.partial");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            self.write_to(&mut writer, record)?;
            writer.flush()?;
        }
        if let Err(e) = std::fs::rename(&tmp_path, path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }

    /// Serialize a record into any writer
    pub fn write_to<W: Write>(&self, writer: &mut W, record: &EmbeddingRecord) -> Result<()> {
        let metadata = serde_json::to_vec(&record.metadata)?;
        let payload = values_to_bytes(&record.values);

        let mut header = RecordHeader::new(
            record.values.len() as u32,
            metadata.len() as u32,
            payload.len() as u64,
        );
        header.checksum = CRC64.checksum(&payload);

        let stored = if self.compress {
            let compressed = zstd::encode_all(&payload[..], self.level)?;
            header.set_compressed(true);
            header.payload_size_compressed = compressed.len() as u64;
            compressed
        } else {
            payload
        };

        write_header(writer, &header)?;
        writer.write_all(&metadata)?;
        writer.write_all(&stored)?;
        Ok(())
    }
}

impl Default for RecordWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn write_header<W: Write>(writer: &mut W, header: &RecordHeader) -> Result<()> {
    writer.write_all(&header.magic)?;
    writer.write_all(&header.version.to_le_bytes())?;
    writer.write_all(&header.flags.to_le_bytes())?;
    writer.write_all(&header.dims.to_le_bytes())?;
    writer.write_all(&header.metadata_size.to_le_bytes())?;
    writer.write_all(&header.payload_size.to_le_bytes())?;
    writer.write_all(&header.payload_size_compressed.to_le_bytes())?;
    writer.write_all(&header.checksum.to_le_bytes())?;
    writer.write_all(&header.reserved.to_le_bytes())?;
    Ok(())
}
