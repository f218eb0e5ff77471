//! Chord and key estimation from chroma profiles
//!
//! Chords are matched against major and minor triad templates; keys against
//! the Krumhansl-Kessler tonal hierarchy profiles rotated to all 24 keys.

use crate::features::{FeatureSequence, CHROMA_BINS};
use serde::Serialize;

pub const PITCH_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Krumhansl-Kessler major key profile, tonic first
const MAJOR_PROFILE: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
/// Krumhansl-Kessler minor key profile, tonic first
const MINOR_PROFILE: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Major,
    Minor,
}

impl Mode {
    /// Third above the root, in semitones
    fn third(&self) -> usize {
        match self {
            Mode::Major => 4,
            Mode::Minor => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChordEstimate {
    /// `C`, `C#m`, ...
    pub label: String,
    pub root: u8,
    pub mode: Mode,
    /// Cosine between the chroma profile and the triad template, in [0, 1]
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyEstimate {
    /// `C major`, `A minor`, ...
    pub label: String,
    pub tonic: u8,
    pub mode: Mode,
    /// Pearson correlation with the key profile
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChordChange {
    pub time_s: f32,
    pub label: String,
}

/// Harmony of a whole recording
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarmonySummary {
    /// Chord of the averaged chroma profile
    pub chord: Option<ChordEstimate>,
    pub key: Option<KeyEstimate>,
    pub progression: Vec<ChordChange>,
}

/// Best matching triad, or `None` for silence or a malformed profile
pub fn estimate_chord(chroma: &[f32]) -> Option<ChordEstimate> {
    let norm = profile_norm(chroma)?;
    // |template| for three equal notes
    let template_norm = 3f32.sqrt();

    let mut best: Option<ChordEstimate> = None;
    for mode in [Mode::Major, Mode::Minor] {
        for root in 0..CHROMA_BINS {
            let score = chroma[root]
                + chroma[(root + mode.third()) % CHROMA_BINS]
                + chroma[(root + 7) % CHROMA_BINS];
            let confidence = score / (norm * template_norm);
            if best.as_ref().map_or(true, |b| confidence > b.confidence) {
                best = Some(ChordEstimate {
                    label: chord_label(root, mode),
                    root: root as u8,
                    mode,
                    confidence,
                });
            }
        }
    }
    best
}

/// Most correlated major or minor key, or `None` for a flat profile
pub fn estimate_key(chroma: &[f32]) -> Option<KeyEstimate> {
    profile_norm(chroma)?;

    let mut best: Option<KeyEstimate> = None;
    for (mode, profile) in [(Mode::Major, &MAJOR_PROFILE), (Mode::Minor, &MINOR_PROFILE)] {
        for tonic in 0..CHROMA_BINS {
            let rotated: Vec<f32> = (0..CHROMA_BINS)
                .map(|pc| profile[(pc + CHROMA_BINS - tonic) % CHROMA_BINS])
                .collect();
            let r = pearson(chroma, &rotated)?;
            if best.as_ref().map_or(true, |b| r > b.confidence) {
                best = Some(KeyEstimate {
                    label: key_label(tonic, mode),
                    tonic: tonic as u8,
                    mode,
                    confidence: r,
                });
            }
        }
    }
    best
}

/// Per-frame chords with consecutive repeats collapsed; silent frames are skipped
pub fn chord_progression<'a>(frames: impl IntoIterator<Item = (f32, &'a [f32])>) -> Vec<ChordChange> {
    let mut progression: Vec<ChordChange> = Vec::new();
    for (time_s, chroma) in frames {
        let Some(chord) = estimate_chord(chroma) else {
            continue;
        };
        if progression.last().map(|c| c.label.as_str()) != Some(chord.label.as_str()) {
            progression.push(ChordChange {
                time_s,
                label: chord.label,
            });
        }
    }
    progression
}

/// Harmony summary of a sequence; `None` when chroma was not extracted
pub fn summarize(sequence: &FeatureSequence) -> Option<HarmonySummary> {
    Some(summarize_frames(sequence.chroma()?))
}

/// Chord and key of the mean profile plus the per-frame progression
pub fn summarize_frames<'a>(frames: impl IntoIterator<Item = (f32, &'a [f32])>) -> HarmonySummary {
    let frames: Vec<(f32, &[f32])> = frames.into_iter().collect();

    let mut mean = [0.0f32; CHROMA_BINS];
    for (_, chroma) in &frames {
        for (acc, v) in mean.iter_mut().zip(chroma.iter()) {
            *acc += v;
        }
    }
    if !frames.is_empty() {
        let n = frames.len() as f32;
        mean.iter_mut().for_each(|v| *v /= n);
    }

    HarmonySummary {
        chord: estimate_chord(&mean),
        key: estimate_key(&mean),
        progression: chord_progression(frames),
    }
}

fn chord_label(root: usize, mode: Mode) -> String {
    match mode {
        Mode::Major => PITCH_NAMES[root].to_string(),
        Mode::Minor => format!("{}m", PITCH_NAMES[root]),
    }
}

fn key_label(tonic: usize, mode: Mode) -> String {
    match mode {
        Mode::Major => format!("{} major", PITCH_NAMES[tonic]),
        Mode::Minor => format!("{} minor", PITCH_NAMES[tonic]),
    }
}

/// L2 norm of a 12-bin profile with some energy
fn profile_norm(chroma: &[f32]) -> Option<f32> {
    if chroma.len() != CHROMA_BINS {
        return None;
    }
    let norm = chroma.iter().map(|v| v * v).sum::<f32>().sqrt();
    (norm > 0.0 && norm.is_finite()).then_some(norm)
}

fn pearson(a: &[f32], b: &[f32]) -> Option<f32> {
    let n = a.len() as f32;
    let mean_a = a.iter().sum::<f32>() / n;
    let mean_b = b.iter().sum::<f32>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    let denom = (var_a * var_b).sqrt();
    (denom > 0.0).then(|| cov / denom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn profile(notes: &[usize]) -> Vec<f32> {
        let mut chroma = vec![0.0; 12];
        for &n in notes {
            chroma[n] = 1.0 / notes.len() as f32;
        }
        chroma
    }

    #[test]
    fn test_triads_are_recognised() {
        let c_major = estimate_chord(&profile(&[0, 4, 7])).unwrap();
        assert_eq!(c_major.label, "C");
        assert_eq!(c_major.mode, Mode::Major);
        assert_abs_diff_eq!(c_major.confidence, 1.0, epsilon = 1e-5);

        let a_minor = estimate_chord(&profile(&[9, 0, 4])).unwrap();
        assert_eq!(a_minor.label, "Am");
        assert_eq!(a_minor.root, 9);

        let f_sharp = estimate_chord(&profile(&[6, 10, 1])).unwrap();
        assert_eq!(f_sharp.label, "F#");
    }

    #[test]
    fn test_silence_has_no_chord_or_key() {
        assert!(estimate_chord(&[0.0; 12]).is_none());
        assert!(estimate_key(&[0.0; 12]).is_none());
        assert!(estimate_chord(&[1.0; 5]).is_none());
    }

    #[test]
    fn test_key_profiles_identify_themselves() {
        let g_major: Vec<f32> = (0..12).map(|pc| MAJOR_PROFILE[(pc + 12 - 7) % 12]).collect();
        let key = estimate_key(&g_major).unwrap();
        assert_eq!(key.label, "G major");
        assert_abs_diff_eq!(key.confidence, 1.0, epsilon = 1e-5);

        let d_minor: Vec<f32> = (0..12).map(|pc| MINOR_PROFILE[(pc + 12 - 2) % 12]).collect();
        assert_eq!(estimate_key(&d_minor).unwrap().label, "D minor");
    }

    #[test]
    fn test_progression_collapses_repeats() {
        let c = profile(&[0, 4, 7]);
        let g = profile(&[7, 11, 2]);
        let silence = vec![0.0; 12];
        let frames = vec![
            (0.0, c.as_slice()),
            (0.5, c.as_slice()),
            (1.0, silence.as_slice()),
            (1.5, g.as_slice()),
            (2.0, c.as_slice()),
        ];

        let progression = chord_progression(frames);
        let labels: Vec<&str> = progression.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["C", "G", "C"]);
        assert_eq!(progression[1].time_s, 1.5);
    }

    #[test]
    fn test_summary_of_frames() {
        let c = profile(&[0, 4, 7]);
        let e_minor = profile(&[4, 7, 11]);
        let summary = summarize_frames(vec![
            (0.0, c.as_slice()),
            (0.5, c.as_slice()),
            (1.0, c.as_slice()),
            (1.5, e_minor.as_slice()),
        ]);
        assert_eq!(summary.chord.unwrap().label, "C");
        assert_eq!(summary.progression.len(), 2);
        assert_eq!(summary.progression[1].label, "Em");

        let empty = summarize_frames(Vec::<(f32, &[f32])>::new());
        assert!(empty.chord.is_none());
        assert!(empty.key.is_none());
        assert!(empty.progression.is_empty());
    }
}
