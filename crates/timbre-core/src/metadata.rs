//! Embedded tag and stream information reading
//!
//! Runs on its own path, independent of decoding: the container is probed and
//! its tags are read without decoding any audio packets.

use crate::audio::AudioFormat;
use crate::error::{AnalysisError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::{Metadata, MetadataOptions, StandardTagKey, Tag};
use symphonia::core::probe::Hint;

/// Tag key -> value, keys sorted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TrackMetadata {
    tags: BTreeMap<String, String>,
}

impl TrackMetadata {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn title(&self) -> Option<&str> {
        self.get("title")
    }

    pub fn artist(&self) -> Option<&str> {
        self.get("artist")
    }
}

/// Codec parameters of the default track, for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamInfo {
    pub codec: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub duration_s: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackInfo {
    pub metadata: TrackMetadata,
    pub stream: Option<StreamInfo>,
}

/// Leading bytes kept for format sniffing
const HEAD_LEN: u64 = 256;

impl TrackInfo {
    fn empty() -> Self {
        TrackInfo {
            metadata: TrackMetadata::default(),
            stream: None,
        }
    }
}

/// Read tags and stream info from a file
pub fn read_metadata(path: &Path) -> Result<TrackInfo> {
    let mut file = std::fs::File::open(path)?;
    let mut head = Vec::with_capacity(HEAD_LEN as usize);
    (&mut file).take(HEAD_LEN).read_to_end(&mut head)?;
    if head.is_empty() {
        return Err(AnalysisError::EmptyInput);
    }
    file.seek(SeekFrom::Start(0))?;

    let extension = path.extension().and_then(|e| e.to_str());
    read_track_info(Box::new(file), extension, &head)
}

/// Read tags and stream info from in-memory bytes; `hint` is a file extension
pub fn read_metadata_bytes(bytes: Arc<[u8]>, hint: Option<&str>) -> Result<TrackInfo> {
    if bytes.is_empty() {
        return Err(AnalysisError::EmptyInput);
    }
    let head = bytes[..bytes.len().min(HEAD_LEN as usize)].to_vec();
    read_track_info(Box::new(Cursor::new(bytes)), hint, &head)
}

fn read_track_info(
    source: Box<dyn MediaSource>,
    extension: Option<&str>,
    head: &[u8],
) -> Result<TrackInfo> {
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    );
    let mut probed = match probed {
        Ok(probed) => probed,
        Err(SymphoniaError::Unsupported(what)) => {
            // Recognised formats Symphonia has no reader for carry no tags we can read
            let format = AudioFormat::sniff(head, extension);
            if format.needs_transcoder() || format == AudioFormat::Midi {
                log::debug!("No tag reader for {:?} input ({})", format, what);
                return Ok(TrackInfo::empty());
            }
            return Err(AnalysisError::CorruptContainer(what.to_string()));
        }
        Err(e) => return Err(AnalysisError::CorruptContainer(e.to_string())),
    };

    let mut tags = BTreeMap::new();

    // Tags found ahead of the container (ID3v2), then the container's own
    if let Some(metadata) = probed.metadata.get() {
        collect_tags(&metadata, &mut tags);
    }
    let mut format = probed.format;
    collect_tags(&format.metadata(), &mut tags);

    let stream = format.default_track().map(|track| {
        let params = &track.codec_params;
        let duration_s = params
            .time_base
            .zip(params.n_frames)
            .map(|(time_base, frames)| {
                let time = time_base.calc_time(frames);
                time.seconds as f64 + time.frac
            });
        StreamInfo {
            codec: symphonia::default::get_codecs()
                .get_codec(params.codec)
                .map(|descriptor| descriptor.short_name.to_string()),
            sample_rate: params.sample_rate,
            channels: params.channels.map(|c| c.count() as u16),
            duration_s,
        }
    });

    log::debug!("Read {} tags", tags.len());
    Ok(TrackInfo {
        metadata: TrackMetadata { tags },
        stream,
    })
}

fn collect_tags(metadata: &Metadata<'_>, tags: &mut BTreeMap<String, String>) {
    if let Some(revision) = metadata.current() {
        for tag in revision.tags() {
            let value = tag.value.to_string();
            let value = value.trim_end_matches('\0').trim();
            if value.is_empty() {
                continue;
            }
            tags.insert(tag_name(tag), value.to_string());
        }
    }
}

fn tag_name(tag: &Tag) -> String {
    let name = match tag.std_key {
        Some(StandardTagKey::TrackTitle) => "title",
        Some(StandardTagKey::Artist) => "artist",
        Some(StandardTagKey::Album) => "album",
        Some(StandardTagKey::AlbumArtist) => "album_artist",
        Some(StandardTagKey::Genre) => "genre",
        Some(StandardTagKey::Date) | Some(StandardTagKey::ReleaseDate) => "date",
        Some(StandardTagKey::TrackNumber) => "track_number",
        Some(StandardTagKey::TrackTotal) => "track_total",
        Some(StandardTagKey::DiscNumber) => "disc_number",
        Some(StandardTagKey::Composer) => "composer",
        Some(StandardTagKey::Comment) => "comment",
        Some(StandardTagKey::Bpm) => "bpm",
        Some(StandardTagKey::Lyrics) => "lyrics",
        Some(StandardTagKey::Label) => "label",
        Some(StandardTagKey::Encoder) => "encoder",
        _ => return tag.key.clone(),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::sine_wav;

    /// WAV with a RIFF INFO list ahead of the data chunk
    fn tagged_wav(title: &str, artist: &str) -> Vec<u8> {
        let mut info = b"INFO".to_vec();
        for (id, value) in [(b"INAM", title), (b"IART", artist)] {
            let mut text = value.as_bytes().to_vec();
            text.push(0);
            if text.len() % 2 == 1 {
                text.push(0);
            }
            info.extend_from_slice(id);
            info.extend_from_slice(&(text.len() as u32).to_le_bytes());
            info.extend_from_slice(&text);
        }

        let plain = sine_wav(440.0, 8000, 1, 0.1);
        // hound writes "RIFF" size "WAVE" then the fmt chunk
        let fmt_len = u32::from_le_bytes([plain[16], plain[17], plain[18], plain[19]]) as usize;
        let fmt_end = 12 + 8 + fmt_len;
        let mut out = plain[..fmt_end].to_vec();
        out.extend_from_slice(b"LIST");
        out.extend_from_slice(&(info.len() as u32).to_le_bytes());
        out.extend_from_slice(&info);
        out.extend_from_slice(&plain[fmt_end..]);
        let riff_size = (out.len() - 8) as u32;
        out[4..8].copy_from_slice(&riff_size.to_le_bytes());
        out
    }

    #[test]
    fn test_untagged_wav_has_empty_metadata() {
        let bytes = sine_wav(440.0, 22050, 1, 0.5);
        let info = read_metadata_bytes(bytes.into(), Some("wav")).unwrap();

        assert!(info.metadata.is_empty());
        let stream = info.stream.unwrap();
        assert_eq!(stream.sample_rate, Some(22050));
        assert_eq!(stream.channels, Some(1));
        let duration = stream.duration_s.unwrap();
        assert!((duration - 0.5).abs() < 0.01, "duration = {}", duration);
    }

    #[test]
    fn test_riff_info_tags() {
        let bytes = tagged_wav("Night Drive", "Timbre Band");
        let info = read_metadata_bytes(bytes.into(), Some("wav")).unwrap();

        assert_eq!(info.metadata.title(), Some("Night Drive"));
        assert_eq!(info.metadata.artist(), Some("Timbre Band"));
    }

    #[test]
    fn test_garbage_is_corrupt_container() {
        let garbage: Vec<u8> = (0..512u32).map(|i| (i * 7 % 13) as u8).collect();
        let err = read_metadata_bytes(garbage.into(), None).unwrap_err();
        assert!(matches!(err, AnalysisError::CorruptContainer(_)));
    }

    /// 80-bit IEEE extended float, as AIFF stores its sample rate
    fn extended(rate: u32) -> [u8; 10] {
        let exponent = 31 - rate.leading_zeros();
        let mut out = [0u8; 10];
        out[..2].copy_from_slice(&((16383 + exponent) as u16).to_be_bytes());
        out[2..].copy_from_slice(&((rate as u64) << (63 - exponent)).to_be_bytes());
        out
    }

    fn aiff(rate: u32, frames: u32) -> Vec<u8> {
        let mut comm = Vec::new();
        comm.extend_from_slice(&1u16.to_be_bytes());
        comm.extend_from_slice(&frames.to_be_bytes());
        comm.extend_from_slice(&16u16.to_be_bytes());
        comm.extend_from_slice(&extended(rate));

        let mut ssnd = vec![0u8; 8];
        for i in 0..frames {
            let sample = ((i as f32 * 0.05).sin() * 8000.0) as i16;
            ssnd.extend_from_slice(&sample.to_be_bytes());
        }

        let mut body = b"AIFF".to_vec();
        for (id, chunk) in [(b"COMM", &comm), (b"SSND", &ssnd)] {
            body.extend_from_slice(id);
            body.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
            body.extend_from_slice(chunk);
        }
        let mut out = b"FORM".to_vec();
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn test_aiff_stream_info() {
        let info = read_metadata_bytes(aiff(8000, 800).into(), Some("aiff")).unwrap();
        assert!(info.metadata.is_empty());
        let stream = info.stream.unwrap();
        assert_eq!(stream.sample_rate, Some(8000));
        assert_eq!(stream.channels, Some(1));
    }

    #[test]
    fn test_wma_yields_empty_metadata() {
        // ASF header GUID, as WMA files start
        let mut wma = vec![
            0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62,
            0xCE, 0x6C,
        ];
        wma.resize(512, 0);
        let info = read_metadata_bytes(wma.into(), Some("wma")).unwrap();
        assert_eq!(info, TrackInfo::empty());
    }

    #[test]
    fn test_damaged_wav_is_still_corrupt_container() {
        let mut bytes = b"RIFF\x24\0\0\0WAVEjunk".to_vec();
        bytes.resize(64, 0x11);
        let err = read_metadata_bytes(bytes.into(), Some("wav")).unwrap_err();
        assert!(matches!(err, AnalysisError::CorruptContainer(_)));
    }

    #[test]
    fn test_read_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        std::fs::write(&path, sine_wav(220.0, 16000, 2, 0.25)).unwrap();

        let info = read_metadata(&path).unwrap();
        assert_eq!(info.stream.and_then(|s| s.channels), Some(2));
    }
}
