//! Synthetic audio fixtures shared by unit tests

use std::f32::consts::PI;
use std::io::Cursor;

/// Unit-amplitude sine samples
pub(crate) fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
        .collect()
}

/// 16-bit PCM WAV file of a half-amplitude sine
pub(crate) fn sine_wav(freq: f32, sample_rate: u32, channels: u16, seconds: f32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let frames = (sample_rate as f32 * seconds) as usize;
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for value in sine(freq, sample_rate, frames) {
            let sample = (value * 0.5 * i16::MAX as f32) as i16;
            for _ in 0..channels {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Chord of several sines as a WAV file
pub(crate) fn chord_wav(freqs: &[f32], sample_rate: u32, seconds: f32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let frames = (sample_rate as f32 * seconds) as usize;
    let scale = 0.8 / freqs.len() as f32;
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let value: f32 = freqs.iter().map(|f| (2.0 * PI * f * t).sin()).sum::<f32>() * scale;
            writer.write_sample((value * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
