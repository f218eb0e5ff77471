//! Per-window spectral measurements

use rustfft::num_complex::Complex;
use std::f32::consts::PI;
use std::ops::Range;

/// Chroma only looks at partials below this frequency (Hz)
const CHROMA_MAX_FREQ: f32 = 5000.0;
const ROLLOFF_FRACTION: f32 = 0.85;
const FLATNESS_EPSILON: f32 = 1e-10;

/// Periodic Hann window
pub(crate) fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}

/// Log-spaced band edges from `min_freq` to `max_freq`, `bands + 1` values
pub(crate) fn band_edges(bands: usize, min_freq: f32, max_freq: f32) -> Vec<f32> {
    let ratio = max_freq / min_freq;
    let mut edges: Vec<f32> = (0..=bands)
        .map(|i| min_freq * ratio.powf(i as f32 / bands as f32))
        .collect();
    edges[bands] = max_freq;
    edges
}

/// FFT bins averaged for each band.
///
/// A band narrower than one bin takes the single bin nearest its centre.
pub(crate) fn band_bins(edges: &[f32], fft_size: usize, sample_rate: u32) -> Vec<Range<usize>> {
    let bin_hz = sample_rate as f32 / fft_size as f32;
    let last_bin = fft_size / 2;
    let bands = edges.len() - 1;

    (0..bands)
        .map(|band| {
            let lo = edges[band];
            let hi = edges[band + 1];
            let first = (lo / bin_hz).ceil() as usize;
            // The top band includes the Nyquist bin
            let end = if band + 1 == bands {
                last_bin + 1
            } else {
                ((hi / bin_hz).ceil() as usize).min(last_bin + 1)
            };
            if first < end {
                first..end
            } else {
                let centre = ((lo * hi).sqrt() / bin_hz).round() as usize;
                let centre = centre.min(last_bin);
                centre..centre + 1
            }
        })
        .collect()
}

/// Pitch class (C = 0) for every FFT bin, `None` outside the chroma range
pub(crate) fn chroma_map(fft_size: usize, sample_rate: u32, min_freq: f32) -> Vec<Option<u8>> {
    let bin_hz = sample_rate as f32 / fft_size as f32;
    (0..=fft_size / 2)
        .map(|k| {
            let freq = k as f32 * bin_hz;
            if k == 0 || freq < min_freq || freq > CHROMA_MAX_FREQ {
                return None;
            }
            // MIDI note number, 69 = A4 = 440 Hz
            let midi = 69.0 + 12.0 * (freq / 440.0).log2();
            Some((midi.round() as i32).rem_euclid(12) as u8)
        })
        .collect()
}

/// Scaled magnitudes of the non-negative frequency bins
pub(crate) fn magnitudes(spectrum: &[Complex<f32>], scale: f32, out: &mut Vec<f32>) {
    out.clear();
    out.extend(spectrum[..spectrum.len() / 2 + 1].iter().map(|c| c.norm() * scale));
}

pub(crate) fn band_values(mags: &[f32], bins: &[Range<usize>], out: &mut Vec<f32>) {
    for range in bins {
        let slice = &mags[range.clone()];
        out.push(slice.iter().sum::<f32>() / slice.len() as f32);
    }
}

/// RMS, zero-crossing rate, centroid, rolloff and flatness of one frame.
///
/// Centroid and rolloff are fractions of Nyquist. A silent frame yields zeros.
pub(crate) fn descriptors(frame: &[f32], mags: &[f32], out: &mut Vec<f32>) {
    let rms = (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt();

    let crossings = frame
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    let zcr = crossings as f32 / (frame.len().max(2) - 1) as f32;

    let last = (mags.len() - 1).max(1) as f32;
    let total: f32 = mags.iter().sum();
    let (centroid, rolloff, flatness) = if total > 0.0 {
        let centroid = mags
            .iter()
            .enumerate()
            .map(|(k, m)| k as f32 * m)
            .sum::<f32>()
            / total
            / last;

        let threshold = ROLLOFF_FRACTION * total;
        let mut cumulative = 0.0;
        let mut rolloff_bin = mags.len() - 1;
        for (k, m) in mags.iter().enumerate() {
            cumulative += m;
            if cumulative >= threshold {
                rolloff_bin = k;
                break;
            }
        }

        let powers = mags.iter().map(|m| m * m + FLATNESS_EPSILON);
        let log_mean = powers.clone().map(f32::ln).sum::<f32>() / mags.len() as f32;
        let mean = powers.sum::<f32>() / mags.len() as f32;

        (centroid, rolloff_bin as f32 / last, log_mean.exp() / mean)
    } else {
        (0.0, 0.0, 0.0)
    };

    out.extend_from_slice(&[rms, zcr, centroid, rolloff, flatness]);
}

/// L1-normalised 12-bin pitch-class profile
pub(crate) fn chroma(mags: &[f32], map: &[Option<u8>], out: &mut Vec<f32>) {
    let mut bins = [0.0f32; 12];
    for (m, class) in mags.iter().zip(map) {
        if let Some(class) = class {
            bins[*class as usize] += m;
        }
    }
    let total: f32 = bins.iter().sum();
    if total > 0.0 {
        bins.iter_mut().for_each(|b| *b /= total);
    }
    out.extend_from_slice(&bins);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_hann_window_is_periodic() {
        let window = hann_window(512);
        assert_eq!(window.len(), 512);
        assert_abs_diff_eq!(window[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(window[256], 1.0, epsilon = 1e-6);
        // periodic: sum is exactly N / 2
        assert_abs_diff_eq!(window.iter().sum::<f32>(), 256.0, epsilon = 1e-3);
    }

    #[test]
    fn test_band_edges_are_log_spaced() {
        let edges = band_edges(4, 100.0, 1600.0);
        let expected = [100.0, 200.0, 400.0, 800.0, 1600.0];
        for (edge, want) in edges.iter().zip(expected) {
            assert_abs_diff_eq!(*edge, want, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_narrow_bands_take_nearest_bin() {
        // 10.77 Hz bins; the lowest bands are narrower than a bin
        let edges = band_edges(32, 40.0, 11025.0);
        let bins = band_bins(&edges, 2048, 22050);
        assert_eq!(bins.len(), 32);
        assert!(bins.iter().all(|r| !r.is_empty()));
        assert_eq!(bins.last().map(|r| r.end), Some(1025));
    }

    #[test]
    fn test_chroma_map_places_a440() {
        let map = chroma_map(4096, 44100, 40.0);
        let bin = (440.0f32 / (44100.0 / 4096.0)).round() as usize;
        assert_eq!(map[bin], Some(9));
        assert_eq!(map[0], None);
    }

    #[test]
    fn test_silent_frame_descriptors() {
        let mut out = Vec::new();
        descriptors(&[0.0; 64], &[0.0; 33], &mut out);
        assert_eq!(out, vec![0.0; 5]);
    }
}
