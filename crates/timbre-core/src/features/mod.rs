//! Short-time spectral feature extraction
//!
//! Audio is mixed to mono, cut into Hann-windowed frames and transformed with
//! a forward FFT. Each frame becomes one fixed-length vector laid out as
//! log-spaced magnitude bands, then optional descriptors, then optional chroma.

mod spectrum;


use crate::audio::AudioBuffer;
use crate::config::FeatureConfig;
use crate::error::{AnalysisError, Result};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::Serialize;
use std::borrow::Cow;
use std::ops::Range;
use std::sync::Arc;

/// Number of temporal/spectral descriptors appended per frame
pub const DESCRIPTOR_COUNT: usize = 5;
/// Pitch classes in a chroma profile
pub const CHROMA_BINS: usize = 12;

/// Analysis window and hop, both in samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    window: usize,
    hop: usize,
}

impl WindowConfig {
    /// Requires `window > 0` and `0 < hop <= window`
    pub fn new(window: usize, hop: usize) -> Result<Self> {
        if window == 0 || hop == 0 || hop > window {
            return Err(AnalysisError::InvalidWindowConfig { window, hop });
        }
        Ok(Self { window, hop })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Frames produced for `samples` mono samples; the last partial window
    /// is zero-padded
    pub fn frame_count(&self, samples: usize) -> usize {
        if samples == 0 {
            0
        } else if samples <= self.window {
            1
        } else {
            1 + (samples - self.window).div_ceil(self.hop)
        }
    }
}

/// Slot layout of every frame vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureLayout {
    pub bands: usize,
    pub descriptors: bool,
    pub chroma: bool,
}

impl FeatureLayout {
    pub fn from_config(config: &FeatureConfig) -> Self {
        Self {
            bands: config.bands,
            descriptors: config.descriptors,
            chroma: config.chroma,
        }
    }

    /// Frame vector length
    pub fn dims(&self) -> usize {
        self.bands
            + if self.descriptors { DESCRIPTOR_COUNT } else { 0 }
            + if self.chroma { CHROMA_BINS } else { 0 }
    }

    pub fn band_range(&self) -> Range<usize> {
        0..self.bands
    }

    pub fn descriptor_range(&self) -> Option<Range<usize>> {
        self.descriptors
            .then(|| self.bands..self.bands + DESCRIPTOR_COUNT)
    }

    pub fn chroma_range(&self) -> Option<Range<usize>> {
        let start = self.bands + if self.descriptors { DESCRIPTOR_COUNT } else { 0 };
        self.chroma.then(|| start..start + CHROMA_BINS)
    }
}

/// Features of one analysis window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureFrame {
    /// Window index
    pub index: usize,
    /// Window start (seconds)
    pub time_s: f32,
    pub values: Vec<f32>,
}

/// Ordered frames extracted from one buffer
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSequence {
    layout: FeatureLayout,
    frames: Vec<FeatureFrame>,
}

impl FeatureSequence {
    /// Every frame must match the layout's vector length
    pub fn new(layout: FeatureLayout, frames: Vec<FeatureFrame>) -> Result<Self> {
        let dims = layout.dims();
        if let Some(bad) = frames.iter().find(|f| f.values.len() != dims) {
            return Err(AnalysisError::DimensionMismatch {
                expected: dims,
                found: bad.values.len(),
            });
        }
        Ok(Self { layout, frames })
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    pub fn frames(&self) -> &[FeatureFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.layout.dims()
    }

    /// Chroma slice of each frame with its start time, if chroma is enabled
    pub fn chroma(&self) -> Option<impl Iterator<Item = (f32, &[f32])> + '_> {
        let range = self.layout.chroma_range()?;
        Some(
            self.frames
                .iter()
                .map(move |f| (f.time_s, &f.values[range.clone()])),
        )
    }
}

/// STFT feature extractor for one sample rate and window configuration
pub struct FeatureExtractor {
    sample_rate: u32,
    window: WindowConfig,
    layout: FeatureLayout,
    fft: Arc<dyn Fft<f32>>,
    hann: Vec<f32>,
    magnitude_scale: f32,
    band_edges: Vec<f32>,
    band_bins: Vec<Range<usize>>,
    chroma_map: Vec<Option<u8>>,
}

impl FeatureExtractor {
    pub fn new(sample_rate: u32, window: WindowConfig, config: &FeatureConfig) -> Result<Self> {
        let nyquist = sample_rate as f32 / 2.0;
        if config.bands == 0 {
            return Err(AnalysisError::InvalidConfig("features.bands must be > 0".into()));
        }
        if !(config.min_freq > 0.0 && config.min_freq < nyquist) {
            return Err(AnalysisError::InvalidConfig(format!(
                "features.min_freq {} outside (0, {})",
                config.min_freq, nyquist
            )));
        }

        let size = window.window();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let hann = spectrum::hann_window(size);
        let window_sum: f32 = hann.iter().sum();
        // A one-sample periodic Hann window is all zeros
        let magnitude_scale = if window_sum > 0.0 { 2.0 / window_sum } else { 0.0 };
        let band_edges = spectrum::band_edges(config.bands, config.min_freq, nyquist);
        let band_bins = spectrum::band_bins(&band_edges, size, sample_rate);
        let chroma_map = spectrum::chroma_map(size, sample_rate, config.min_freq);

        log::debug!(
            "Feature extractor: {} Hz, window {}, hop {}, {} dims",
            sample_rate,
            size,
            window.hop(),
            FeatureLayout::from_config(config).dims()
        );

        Ok(Self {
            sample_rate,
            window,
            layout: FeatureLayout::from_config(config),
            fft,
            hann,
            magnitude_scale,
            band_edges,
            band_bins,
            chroma_map,
        })
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    pub fn window(&self) -> WindowConfig {
        self.window
    }

    /// Lazy frame source over `buffer`; every call starts from the first window
    pub fn frames<'a>(&'a self, buffer: &'a AudioBuffer) -> Result<FrameIter<'a>> {
        if buffer.sample_rate() != self.sample_rate {
            return Err(AnalysisError::InvalidConfig(format!(
                "buffer is {} Hz but the extractor expects {} Hz",
                buffer.sample_rate(),
                self.sample_rate
            )));
        }
        let samples = buffer.to_mono();
        let total = self.window.frame_count(samples.len());
        Ok(FrameIter {
            extractor: self,
            samples,
            next: 0,
            total,
            frame: vec![0.0; self.window.window()],
            spectrum: vec![Complex::new(0.0, 0.0); self.window.window()],
            scratch: vec![Complex::new(0.0, 0.0); self.fft.get_inplace_scratch_len()],
            mags: Vec::with_capacity(self.window.window() / 2 + 1),
        })
    }

    /// Collect all frames into a sequence
    pub fn extract(&self, buffer: &AudioBuffer) -> Result<FeatureSequence> {
        let frames: Vec<FeatureFrame> = self.frames(buffer)?.collect();
        log::trace!("Extracted {} frames", frames.len());
        FeatureSequence::new(self.layout, frames)
    }

    /// Index of the magnitude band containing `freq`, if it lies in
    /// `[min_freq, nyquist]`
    pub fn band_for_frequency(&self, freq: f32) -> Option<usize> {
        let first = *self.band_edges.first()?;
        let last = *self.band_edges.last()?;
        if !(first..=last).contains(&freq) {
            return None;
        }
        let upper = self.band_edges.partition_point(|&edge| edge <= freq);
        Some(upper.saturating_sub(1).min(self.layout.bands - 1))
    }

    fn compute(
        &self,
        frame: &[f32],
        spectrum: &mut [Complex<f32>],
        scratch: &mut [Complex<f32>],
        mags: &mut Vec<f32>,
    ) -> Vec<f32> {
        for ((bin, &sample), &w) in spectrum.iter_mut().zip(frame).zip(&self.hann) {
            *bin = Complex::new(sample * w, 0.0);
        }
        self.fft.process_with_scratch(spectrum, scratch);
        spectrum::magnitudes(spectrum, self.magnitude_scale, mags);

        let mut values = Vec::with_capacity(self.layout.dims());
        spectrum::band_values(mags, &self.band_bins, &mut values);
        if self.layout.descriptors {
            spectrum::descriptors(frame, mags, &mut values);
        }
        if self.layout.chroma {
            spectrum::chroma(mags, &self.chroma_map, &mut values);
        }
        values
    }
}

/// Iterator computing one FFT per frame
pub struct FrameIter<'a> {
    extractor: &'a FeatureExtractor,
    samples: Cow<'a, [f32]>,
    next: usize,
    total: usize,
    frame: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    mags: Vec<f32>,
}

impl Iterator for FrameIter<'_> {
    type Item = FeatureFrame;

    fn next(&mut self) -> Option<FeatureFrame> {
        if self.next >= self.total {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let hop = self.extractor.window.hop();
        let start = index * hop;
        let end = (start + self.frame.len()).min(self.samples.len());
        let available = end - start;
        self.frame[..available].copy_from_slice(&self.samples[start..end]);
        // zero-pad the tail window
        self.frame[available..].fill(0.0);

        let values = self.extractor.compute(
            &self.frame,
            &mut self.spectrum,
            &mut self.scratch,
            &mut self.mags,
        );
        Some(FeatureFrame {
            index,
            time_s: start as f32 / self.extractor.sample_rate as f32,
            values,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for FrameIter<'_> {}
