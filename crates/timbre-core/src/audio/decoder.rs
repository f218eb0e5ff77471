//! Audio decoding for multiple formats

use super::{container, convert_layout, resample_to_target, transcode, AudioBuffer, AudioFormat, EncodedAudio};
use crate::cancel::DecodeBudget;
use crate::config::ChannelLayout;
use crate::error::{AnalysisError, Result};
use std::io::Cursor;

/// Check the budget every this many decoded samples
const BUDGET_CHECK_INTERVAL: usize = 1 << 16;

/// Decode input to the target sample rate and channel layout.
///
/// Zero-length input fails with `EmptyInput` before any decoder runs.
pub fn decode(
    input: &EncodedAudio,
    target_sample_rate: u32,
    layout: ChannelLayout,
    budget: &DecodeBudget,
) -> Result<AudioBuffer> {
    if input.is_empty() {
        return Err(AnalysisError::EmptyInput);
    }
    budget.check()?;

    let format = input.format();
    log::debug!("Decoding {} bytes as {:?}", input.bytes().len(), format);

    if format == AudioFormat::Midi {
        return Err(AnalysisError::UnsupportedFormat(
            "MIDI holds note events, not audio; use MIDI analysis".to_string(),
        ));
    }

    if format.needs_transcoder() {
        return transcode(input, target_sample_rate, layout, budget);
    }

    let decoded = match format {
        AudioFormat::Wav => decode_wav(input.bytes(), budget)?,
        AudioFormat::Mp3 => decode_mp3(input.bytes(), budget)?,
        AudioFormat::Flac => decode_flac(input.bytes(), budget)?,
        AudioFormat::Ogg => decode_ogg(input.bytes(), budget)?,
        _ => match decode_container(input, budget) {
            Err(AnalysisError::UnsupportedFormat(reason)) if super::transcoder_available() => {
                log::info!("Symphonia cannot decode input ({}), falling back to ffmpeg", reason);
                return transcode(input, target_sample_rate, layout, budget);
            }
            other => other?,
        },
    };

    conform(decoded, target_sample_rate, layout, budget)
}

fn decode_container(input: &EncodedAudio, budget: &DecodeBudget) -> Result<AudioBuffer> {
    container::decode_container(input.shared_bytes(), input.hint(), budget)
}

/// Bring decoded audio to the canonical layout and rate
pub fn conform(
    audio: AudioBuffer,
    target_sample_rate: u32,
    layout: ChannelLayout,
    budget: &DecodeBudget,
) -> Result<AudioBuffer> {
    let source_rate = audio.sample_rate();
    let audio = if audio.channels() != layout.count() {
        convert_layout(&audio, layout)?
    } else {
        audio
    };

    if source_rate == target_sample_rate {
        return Ok(audio);
    }

    let channels = audio.channels() as usize;
    let mut planar: Vec<Vec<f32>> = (0..channels)
        .map(|ch| audio.samples().iter().skip(ch).step_by(channels).copied().collect())
        .collect();

    for channel in planar.iter_mut() {
        budget.check()?;
        *channel = resample_to_target(channel, source_rate, target_sample_rate)?;
    }

    let frames = planar[0].len();
    let mut interleaved = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        for channel in &planar {
            interleaved.push(channel[i]);
        }
    }

    log::debug!(
        "Resampled {} Hz -> {} Hz ({} frames)",
        source_rate,
        target_sample_rate,
        frames
    );
    AudioBuffer::new(interleaved, target_sample_rate, channels as u16)
}

/// Decode WAV data
fn decode_wav(bytes: &[u8], budget: &DecodeBudget) -> Result<AudioBuffer> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(wav_error)?;

    let spec = reader.spec();
    let mut samples = Vec::with_capacity(reader.len() as usize);

    match spec.sample_format {
        hound::SampleFormat::Float => {
            for (i, sample) in reader.into_samples::<f32>().enumerate() {
                if i % BUDGET_CHECK_INTERVAL == 0 {
                    budget.check()?;
                }
                samples.push(sample.map_err(wav_error)?);
            }
        }
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            for (i, sample) in reader.into_samples::<i32>().enumerate() {
                if i % BUDGET_CHECK_INTERVAL == 0 {
                    budget.check()?;
                }
                samples.push(sample.map_err(wav_error)? as f32 / max_val);
            }
        }
    }

    AudioBuffer::new(samples, spec.sample_rate, spec.channels)
}

fn wav_error(e: hound::Error) -> AnalysisError {
    match e {
        hound::Error::Unsupported | hound::Error::TooWide => {
            AnalysisError::UnsupportedFormat(format!("wav: {}", e))
        }
        other => AnalysisError::CorruptInput(format!("wav: {}", other)),
    }
}

/// Decode MP3 data
fn decode_mp3(bytes: &[u8], budget: &DecodeBudget) -> Result<AudioBuffer> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut samples = Vec::new();
    let mut sample_rate = 0;
    let mut channels = 0;

    loop {
        budget.check()?;
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = frame.sample_rate as u32;
                    channels = frame.channels as u16;
                } else if frame.channels as u16 != channels {
                    return Err(AnalysisError::CorruptInput(format!(
                        "mp3: channel count changed from {} to {} mid-stream",
                        channels, frame.channels
                    )));
                }
                // Convert i16 to f32
                for &sample in &frame.data {
                    samples.push(sample as f32 / 32768.0);
                }
            }
            Err(minimp3::Error::Eof) | Err(minimp3::Error::InsufficientData) => break,
            Err(minimp3::Error::SkippedData) => continue,
            Err(minimp3::Error::Io(e)) => {
                return Err(AnalysisError::CorruptInput(format!("mp3: {}", e)));
            }
        }
    }

    AudioBuffer::new(samples, sample_rate, channels)
}

/// Decode FLAC data
fn decode_flac(bytes: &[u8], budget: &DecodeBudget) -> Result<AudioBuffer> {
    let mut reader = claxon::FlacReader::new(Cursor::new(bytes)).map_err(flac_error)?;

    let info = reader.streaminfo();
    let sample_rate = info.sample_rate;
    let channels = info.channels as u16;
    let max_val = (1i64 << (info.bits_per_sample - 1)) as f32;

    let mut samples = Vec::new();
    for (i, sample) in reader.samples().enumerate() {
        if i % BUDGET_CHECK_INTERVAL == 0 {
            budget.check()?;
        }
        samples.push(sample.map_err(flac_error)? as f32 / max_val);
    }

    AudioBuffer::new(samples, sample_rate, channels)
}

fn flac_error(e: claxon::Error) -> AnalysisError {
    match e {
        claxon::Error::Unsupported(what) => AnalysisError::UnsupportedFormat(format!("flac: {}", what)),
        other => AnalysisError::CorruptInput(format!("flac: {}", other)),
    }
}

/// Decode Ogg Vorbis data
fn decode_ogg(bytes: &[u8], budget: &DecodeBudget) -> Result<AudioBuffer> {
    let mut reader = lewton::inside_ogg::OggStreamReader::new(Cursor::new(bytes))
        .map_err(|e| AnalysisError::CorruptInput(format!("ogg: {}", e)))?;

    let sample_rate = reader.ident_hdr.audio_sample_rate;
    let channels = reader.ident_hdr.audio_channels as u16;

    let mut samples = Vec::new();
    loop {
        budget.check()?;
        match reader.read_dec_packet_itl() {
            Ok(Some(packet)) => {
                // Convert i16 to f32
                samples.extend(packet.iter().map(|&s| s as f32 / 32768.0));
            }
            Ok(None) => break,
            Err(e) => return Err(AnalysisError::CorruptInput(format!("ogg: {}", e))),
        }
    }

    AudioBuffer::new(samples, sample_rate, channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::testutil::sine_wav;
    use std::time::Duration;

    #[test]
    fn test_decode_wav_same_rate() {
        let bytes = sine_wav(440.0, 22050, 1, 0.5);
        let input = EncodedAudio::from_bytes(bytes, Some("tone.wav"));
        let audio = decode(&input, 22050, ChannelLayout::Mono, &DecodeBudget::unlimited()).unwrap();

        assert_eq!(audio.sample_rate(), 22050);
        assert_eq!(audio.channels(), 1);
        assert_eq!(audio.frames(), 11025);
        let peak = audio.samples().iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_decode_resamples_and_downmixes() {
        let bytes = sine_wav(440.0, 44100, 2, 1.0);
        let input = EncodedAudio::from_bytes(bytes, None);
        let audio = decode(&input, 22050, ChannelLayout::Mono, &DecodeBudget::unlimited()).unwrap();

        assert_eq!(audio.sample_rate(), 22050);
        assert_eq!(audio.channels(), 1);
        assert_eq!(audio.frames(), 22050);
    }

    #[test]
    fn test_empty_input_fails_before_decoding() {
        let input = EncodedAudio::from_bytes(Vec::new(), Some("empty.wav"));
        let err = decode(&input, 22050, ChannelLayout::Mono, &DecodeBudget::unlimited()).unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyInput));
    }

    #[test]
    fn test_wav_without_samples_is_empty_input() {
        let bytes = sine_wav(440.0, 22050, 1, 0.0);
        let input = EncodedAudio::from_bytes(bytes, None);
        let err = decode(&input, 22050, ChannelLayout::Mono, &DecodeBudget::unlimited()).unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyInput));
    }

    #[test]
    fn test_truncated_wav_is_corrupt() {
        let mut bytes = sine_wav(440.0, 22050, 1, 0.1);
        bytes.truncate(30);
        let input = EncodedAudio::from_bytes(bytes, None);
        let err = decode(&input, 22050, ChannelLayout::Mono, &DecodeBudget::unlimited()).unwrap_err();
        assert!(matches!(err, AnalysisError::CorruptInput(_)));
    }

    #[test]
    fn test_expired_budget_times_out() {
        let bytes = sine_wav(440.0, 22050, 1, 0.1);
        let input = EncodedAudio::from_bytes(bytes, None);
        let budget = DecodeBudget::new(Duration::ZERO, CancelToken::new());
        std::thread::sleep(Duration::from_millis(2));

        let err = decode(&input, 22050, ChannelLayout::Mono, &budget).unwrap_err();
        assert!(matches!(err, AnalysisError::DecodeTimeout(_)));
    }

    #[test]
    fn test_cancelled_request_stops_decode() {
        let bytes = sine_wav(440.0, 22050, 1, 0.1);
        let input = EncodedAudio::from_bytes(bytes, None);
        let token = CancelToken::new();
        token.cancel();
        let budget = DecodeBudget::new(Duration::from_secs(5), token);

        let err = decode(&input, 22050, ChannelLayout::Mono, &budget).unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled));
    }
}
