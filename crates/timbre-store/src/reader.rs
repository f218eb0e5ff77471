//! .tbe record reader

use crate::format::{bytes_to_values, EmbeddingRecord, RecordHeader, RecordMetadata, CRC64, MAGIC, VERSION};
use crate::{Result, StoreError};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Largest embedding a record may declare
pub const MAX_DIMS: u32 = 1 << 24;

/// Largest metadata section a record may declare
pub const MAX_METADATA_SIZE: u32 = 16 << 20;

pub struct RecordReader;

impl RecordReader {
    /// Read a .tbe file
    pub fn read(path: &Path) -> Result<EmbeddingRecord> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::read_from(&mut reader)
    }

    /// Read only the header and metadata section, skipping the payload
    pub fn read_metadata(path: &Path) -> Result<RecordMetadata> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let header = Self::read_header(&mut reader)?;
        Self::read_metadata_section(&mut reader, header.metadata_size)
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<EmbeddingRecord> {
        let header = Self::read_header(reader)?;
        let metadata = Self::read_metadata_section(reader, header.metadata_size)?;

        let stored = read_section(reader, header.stored_payload_size())?;

        // One byte past the declared size is enough to detect an overlong stream
        let payload = if header.is_compressed() {
            let mut payload = Vec::with_capacity(header.payload_size as usize);
            zstd::stream::read::Decoder::new(&stored[..])?
                .take(header.payload_size + 1)
                .read_to_end(&mut payload)?;
            payload
        } else {
            stored
        };

        if payload.len() as u64 != header.payload_size {
            return Err(StoreError::Malformed(format!(
                "payload holds {} bytes, header declares {} values",
                payload.len(),
                header.dims
            )));
        }

        let actual = CRC64.checksum(&payload);
        if actual != header.checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }

        Ok(EmbeddingRecord {
            metadata,
            values: bytes_to_values(&payload),
        })
    }

    fn read_header<R: Read>(reader: &mut R) -> Result<RecordHeader> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(truncated)?;
        if magic != MAGIC {
            return Err(StoreError::InvalidMagic);
        }

        let version = read_u16(reader)?;
        if version != VERSION {
            return Err(StoreError::UnsupportedVersion(version));
        }

        let header = RecordHeader {
            magic,
            version,
            flags: read_u16(reader)?,
            dims: read_u32(reader)?,
            metadata_size: read_u32(reader)?,
            payload_size: read_u64(reader)?,
            payload_size_compressed: read_u64(reader)?,
            checksum: read_u64(reader)?,
            reserved: read_u64(reader)?,
        };
        validate(&header)?;
        Ok(header)
    }

    fn read_metadata_section<R: Read>(reader: &mut R, size: u32) -> Result<RecordMetadata> {
        let bytes = read_section(reader, u64::from(size))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Header sizes are untrusted until they agree with each other and the caps
fn validate(header: &RecordHeader) -> Result<()> {
    if header.dims > MAX_DIMS {
        return Err(StoreError::Malformed(format!(
            "header declares {} values (limit {})",
            header.dims, MAX_DIMS
        )));
    }
    if header.payload_size != u64::from(header.dims) * 4 {
        return Err(StoreError::Malformed(format!(
            "header declares {} payload bytes for {} values",
            header.payload_size, header.dims
        )));
    }
    if header.metadata_size > MAX_METADATA_SIZE {
        return Err(StoreError::Malformed(format!(
            "header declares {} metadata bytes (limit {})",
            header.metadata_size, MAX_METADATA_SIZE
        )));
    }
    Ok(())
}

/// Read exactly `len` bytes without trusting `len` for the allocation
fn read_section<R: Read>(reader: &mut R, len: u64) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut bytes)?;
    if (bytes.len() as u64) < len {
        return Err(StoreError::Malformed("record is truncated".to_string()));
    }
    Ok(bytes)
}

fn truncated(e: std::io::Error) -> StoreError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        StoreError::Malformed("record is truncated".to_string())
    } else {
        StoreError::Io(e)
    }
}

fn read_u16<R: Read>(reader: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::HEADER_SIZE;
    use crate::RecordWriter;

    fn sample_record() -> EmbeddingRecord {
        EmbeddingRecord::new("kick.wav", "deadbeef", "cfg-1", vec![0.25, -1.5, 3.0, 0.0])
            .with_source("/samples/kick.wav")
    }

    #[test]
    fn test_write_then_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kick.tbe");
        let record = sample_record();

        RecordWriter::new().write(&path, &record).unwrap();
        let loaded = RecordReader::read(&path).unwrap();

        assert_eq!(loaded, record);
        assert!(!path.with_extension("tbe.partial").exists());
    }

    #[test]
    fn test_compressed_payload() {
        let record = EmbeddingRecord::new("long", "ff", "cfg-1", vec![0.125; 512]);
        let mut bytes = Vec::new();
        RecordWriter::compressed(3).write_to(&mut bytes, &record).unwrap();

        let loaded = RecordReader::read_from(&mut &bytes[..]).unwrap();
        assert_eq!(loaded.values, record.values);
        // a constant payload compresses well below its raw size
        assert!(bytes.len() < HEADER_SIZE + 512 * 4);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let bytes = b"RIFF0000WAVEfmt ".to_vec();
        let err = RecordReader::read_from(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMagic));
    }

    #[test]
    fn test_detects_corrupted_payload() {
        let mut bytes = Vec::new();
        RecordWriter::new().write_to(&mut bytes, &sample_record()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let err = RecordReader::read_from(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, StoreError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_truncated_record() {
        let mut bytes = Vec::new();
        RecordWriter::new().write_to(&mut bytes, &sample_record()).unwrap();
        bytes.truncate(HEADER_SIZE + 3);

        let err = RecordReader::read_from(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[test]
    fn test_read_metadata_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kick.tbe");
        RecordWriter::new().write(&path, &sample_record()).unwrap();

        let metadata = RecordReader::read_metadata(&path).unwrap();
        assert_eq!(metadata.identifier, "kick.wav");
        assert_eq!(metadata.config_version, "cfg-1");
    }

    /// A valid uncompressed record with `patch` applied to its header bytes
    fn patched(patch: impl FnOnce(&mut [u8])) -> Vec<u8> {
        let mut bytes = Vec::new();
        RecordWriter::new().write_to(&mut bytes, &sample_record()).unwrap();
        patch(&mut bytes[..HEADER_SIZE]);
        bytes
    }

    #[test]
    fn test_oversized_payload_size_is_malformed() {
        let bytes = patched(|h| h[16..24].copy_from_slice(&u64::MAX.to_le_bytes()));
        let err = RecordReader::read_from(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[test]
    fn test_oversized_dims_are_malformed() {
        let bytes = patched(|h| {
            h[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
            h[16..24].copy_from_slice(&(u64::from(u32::MAX) * 4).to_le_bytes());
        });
        let err = RecordReader::read_from(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[test]
    fn test_oversized_metadata_size_is_malformed() {
        let bytes = patched(|h| h[12..16].copy_from_slice(&u32::MAX.to_le_bytes()));
        let err = RecordReader::read_from(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[test]
    fn test_oversized_compressed_size_is_truncated() {
        let record = EmbeddingRecord::new("long", "ff", "cfg-1", vec![0.125; 512]);
        let mut bytes = Vec::new();
        RecordWriter::compressed(3).write_to(&mut bytes, &record).unwrap();
        bytes[24..32].copy_from_slice(&u64::MAX.to_le_bytes());

        let err = RecordReader::read_from(&mut &bytes[..]).unwrap_err();
        match err {
            StoreError::Malformed(msg) => assert_eq!(msg, "record is truncated"),
            other => panic!("expected Malformed, got {:?}", other),
        }
    }
}
