//! Sample-rate and channel-layout conversion

use super::AudioBuffer;
use crate::config::ChannelLayout;
use crate::error::{AnalysisError, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

const CHUNK_SIZE: usize = 1024;

/// Resample one channel with a windowed-sinc resampler.
///
/// The output holds exactly `ceil(len * to_rate / from_rate)` samples, aligned
/// with the input (the resampler's delay is trimmed).
pub fn resample_to_target(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(AnalysisError::CorruptInput(format!(
            "cannot resample {} Hz -> {} Hz",
            from_rate, to_rate
        )));
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, 1)
        .map_err(|e| AnalysisError::CorruptInput(format!("resampler setup failed: {}", e)))?;

    let expected = (samples.len() as f64 * ratio).ceil() as usize;
    let delay = resampler.output_delay();
    let wanted = delay + expected;

    let mut output = Vec::with_capacity(wanted + CHUNK_SIZE);
    let mut position = 0;
    let mut chunk = vec![0.0f32; CHUNK_SIZE];

    // Keep feeding (zero padding past the end) until the delayed tail is out
    while output.len() < wanted {
        let end = (position + CHUNK_SIZE).min(samples.len());
        let available = end.saturating_sub(position);
        chunk[..available].copy_from_slice(&samples[position.min(end)..end]);
        chunk[available..].fill(0.0);
        position = end;

        let result = resampler
            .process(&[&chunk[..]], None)
            .map_err(|e| AnalysisError::CorruptInput(format!("resampling failed: {}", e)))?;
        output.extend_from_slice(&result[0]);
    }

    Ok(output[delay..wanted].to_vec())
}

/// Convert interleaved audio to the requested channel layout.
///
/// Downmixing to mono averages every channel. Mono is duplicated to stereo;
/// wider layouts keep their first two (front left/right) channels.
pub fn convert_layout(audio: &AudioBuffer, layout: ChannelLayout) -> Result<AudioBuffer> {
    let channels = audio.channels();
    if channels == layout.count() {
        return Ok(audio.clone());
    }

    match layout {
        ChannelLayout::Mono => {
            AudioBuffer::new(audio.to_mono().into_owned(), audio.sample_rate(), 1)
        }
        ChannelLayout::Stereo if channels == 1 => {
            let stereo = audio.samples().iter().flat_map(|&s| [s, s]).collect();
            AudioBuffer::new(stereo, audio.sample_rate(), 2)
        }
        ChannelLayout::Stereo => {
            let stereo = audio
                .samples()
                .chunks(channels as usize)
                .flat_map(|frame| [frame[0], frame[1]])
                .collect();
            AudioBuffer::new(stereo, audio.sample_rate(), 2)
        }
    }
}
