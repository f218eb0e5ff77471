//! Audio decoding and resampling
//!
//! WAV, MP3, FLAC and Ogg Vorbis are decoded with pure Rust decoders;
//! MP4/M4A, Matroska/WebM, AIFF and ADTS AAC go through Symphonia. Anything
//! else (MPEG-TS, AVI, Opus, WMA, ...) is transcoded by an external ffmpeg.
//! Standard MIDI files carry no audio and are never decoded here.

mod container;
mod decoder;
mod resample;
mod transcode;

pub use container::decode_container;
pub use decoder::{conform, decode};
pub use resample::{convert_layout, resample_to_target};
pub use transcode::{transcode, transcoder_available};

use crate::error::{AnalysisError, Result};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Decoded PCM audio.
///
/// Samples are interleaved when `channels > 1`. The buffer is never empty and
/// cannot be modified after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if samples.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }
        if sample_rate == 0 || channels == 0 {
            return Err(AnalysisError::CorruptInput(format!(
                "invalid stream parameters: {} Hz, {} channels",
                sample_rate, channels
            )));
        }
        if samples.len() % channels as usize != 0 {
            return Err(AnalysisError::CorruptInput(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_ms(&self) -> u32 {
        (self.frames() as f64 / self.sample_rate as f64 * 1000.0) as u32
    }

    /// Mono view: borrowed when already mono, otherwise averaged channels
    pub fn to_mono(&self) -> Cow<'_, [f32]> {
        if self.channels == 1 {
            return Cow::Borrowed(&self.samples);
        }

        let mut mono = Vec::with_capacity(self.frames());
        for chunk in self.samples.chunks(self.channels as usize) {
            let avg: f32 = chunk.iter().sum::<f32>() / chunk.len() as f32;
            mono.push(avg);
        }
        Cow::Owned(mono)
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// Raw encoded input handed to the decoder
#[derive(Debug, Clone)]
pub struct EncodedAudio {
    bytes: Arc<[u8]>,
    path: Option<PathBuf>,
    hint: Option<String>,
}

impl EncodedAudio {
    /// Wrap in-memory bytes; `name` (e.g. an upload's file name) supplies an
    /// extension hint
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, name: Option<&str>) -> Self {
        Self {
            bytes: bytes.into(),
            path: None,
            hint: name.and_then(extension_of),
        }
    }

    /// Read a file fully into memory
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self {
            bytes: bytes.into(),
            path: Some(path.to_path_buf()),
            hint: path.to_str().and_then(extension_of),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Lowercase extension hint, if any
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat::sniff(&self.bytes, self.hint())
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Supported audio and container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    // Pure audio formats, decoded in process
    Wav,
    Mp3,
    Flac,
    Ogg,

    // Decoded through Symphonia
    Aac,
    Mp4,
    Mkv,
    Aiff,

    // Transcoded with ffmpeg
    MpegTs,
    Avi,
    Opus,
    Wma,

    // Note events, not audio
    Midi,

    Unknown,
}

impl AudioFormat {
    /// Detect format from magic bytes, falling back to the extension hint
    pub fn sniff(bytes: &[u8], hint: Option<&str>) -> Self {
        let sniffed = Self::from_magic(bytes);
        if sniffed != AudioFormat::Unknown {
            return sniffed;
        }
        hint.map(Self::from_extension).unwrap_or(AudioFormat::Unknown)
    }

    fn from_magic(bytes: &[u8]) -> Self {
        if bytes.len() < 12 {
            return AudioFormat::Unknown;
        }
        match &bytes[..4] {
            b"RIFF" if &bytes[8..12] == b"WAVE" => return AudioFormat::Wav,
            b"RIFF" if &bytes[8..12] == b"AVI " => return AudioFormat::Avi,
            b"FORM" if &bytes[8..11] == b"AIF" => return AudioFormat::Aiff,
            b"fLaC" => return AudioFormat::Flac,
            b"MThd" => return AudioFormat::Midi,
            b"OggS" => {
                let head = &bytes[..bytes.len().min(64)];
                if contains(head, b"OpusHead") {
                    return AudioFormat::Opus;
                }
                return AudioFormat::Ogg;
            }
            [0x1A, 0x45, 0xDF, 0xA3] => return AudioFormat::Mkv,
            [0x30, 0x26, 0xB2, 0x75] => return AudioFormat::Wma,
            _ => {}
        }
        if &bytes[4..8] == b"ftyp" {
            return AudioFormat::Mp4;
        }
        if &bytes[..3] == b"ID3" {
            return AudioFormat::Mp3;
        }
        if bytes[0] == 0x47 && bytes.len() > 188 && bytes[188] == 0x47 {
            return AudioFormat::MpegTs;
        }
        if bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0 {
            // MPEG sync word; layer bits of zero mean ADTS AAC
            return if (bytes[1] >> 1) & 0x3 == 0 {
                AudioFormat::Aac
            } else {
                AudioFormat::Mp3
            };
        }
        AudioFormat::Unknown
    }

    /// Detect format from a file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "wav" | "wave" => AudioFormat::Wav,
            "mp3" => AudioFormat::Mp3,
            "flac" => AudioFormat::Flac,
            "ogg" | "oga" => AudioFormat::Ogg,

            "aac" => AudioFormat::Aac,
            "mp4" | "m4a" | "m4v" | "mov" => AudioFormat::Mp4,
            "mkv" | "mka" | "webm" => AudioFormat::Mkv,

            "ts" | "mts" | "m2ts" => AudioFormat::MpegTs,
            "avi" => AudioFormat::Avi,
            "opus" => AudioFormat::Opus,
            "wma" | "asf" => AudioFormat::Wma,
            "aif" | "aiff" | "aifc" => AudioFormat::Aiff,
            "mid" | "midi" => AudioFormat::Midi,

            _ => AudioFormat::Unknown,
        }
    }

    /// Formats demuxed and decoded by Symphonia
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            AudioFormat::Aac | AudioFormat::Mp4 | AudioFormat::Mkv | AudioFormat::Aiff
        )
    }

    /// Formats only the external transcoder handles
    pub fn needs_transcoder(&self) -> bool {
        matches!(
            self,
            AudioFormat::MpegTs | AudioFormat::Avi | AudioFormat::Opus | AudioFormat::Wma
        )
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(head: &[u8]) -> Vec<u8> {
        let mut bytes = head.to_vec();
        bytes.resize(256, 0);
        bytes
    }

    #[test]
    fn test_sniff_magic_beats_extension() {
        let wav = padded(b"RIFF\0\0\0\0WAVEfmt ");
        assert_eq!(AudioFormat::sniff(&wav, Some("mp3")), AudioFormat::Wav);
        assert_eq!(AudioFormat::sniff(&padded(b"fLaC\0\0\0\x22"), None), AudioFormat::Flac);
        assert_eq!(AudioFormat::sniff(&padded(b"ID3\x04\0\0"), None), AudioFormat::Mp3);
        assert_eq!(AudioFormat::sniff(&padded(b"\0\0\0\x20ftypM4A "), None), AudioFormat::Mp4);
    }

    #[test]
    fn test_sniff_ogg_payloads() {
        let mut opus = padded(b"OggS\0\x02");
        opus[28..36].copy_from_slice(b"OpusHead");
        assert_eq!(AudioFormat::sniff(&opus, None), AudioFormat::Opus);

        let mut vorbis = padded(b"OggS\0\x02");
        vorbis[28..35].copy_from_slice(b"\x01vorbis");
        assert_eq!(AudioFormat::sniff(&vorbis, None), AudioFormat::Ogg);
    }

    #[test]
    fn test_sniff_mpeg_sync() {
        assert_eq!(AudioFormat::sniff(&padded(&[0xFF, 0xFB, 0x90]), None), AudioFormat::Mp3);
        assert_eq!(AudioFormat::sniff(&padded(&[0xFF, 0xF1, 0x50]), None), AudioFormat::Aac);
    }

    #[test]
    fn test_extension_fallback() {
        let noise = padded(b"\x01\x02\x03\x04 not a header");
        assert_eq!(AudioFormat::sniff(&noise, Some("ts")), AudioFormat::MpegTs);
        assert_eq!(AudioFormat::sniff(&noise, None), AudioFormat::Unknown);
        assert!(AudioFormat::MpegTs.needs_transcoder());
        assert!(AudioFormat::Mkv.is_container());
        assert!(AudioFormat::Aiff.is_container());
    }

    #[test]
    fn test_sniff_midi() {
        let smf = padded(b"MThd\0\0\0\x06\0\0\0\x01");
        assert_eq!(AudioFormat::sniff(&smf, Some("wav")), AudioFormat::Midi);
        assert_eq!(AudioFormat::from_extension("MID"), AudioFormat::Midi);
        assert!(!AudioFormat::Midi.is_container());
        assert!(!AudioFormat::Midi.needs_transcoder());
    }

    #[test]
    fn test_buffer_invariants() {
        assert!(matches!(AudioBuffer::new(vec![], 44100, 1), Err(AnalysisError::EmptyInput)));
        assert!(AudioBuffer::new(vec![0.0; 3], 44100, 2).is_err());
        assert!(AudioBuffer::new(vec![0.0; 4], 0, 2).is_err());

        let stereo = AudioBuffer::new(vec![1.0, 0.0, 0.5, 0.5], 8000, 2).unwrap();
        assert_eq!(stereo.frames(), 2);
        assert_eq!(stereo.to_mono().as_ref(), &[0.5, 0.5]);
    }

    #[test]
    fn test_hint_is_lowercased() {
        let input = EncodedAudio::from_bytes(vec![1u8, 2, 3], Some("Upload.WAV"));
        assert_eq!(input.hint(), Some("wav"));
    }
}
