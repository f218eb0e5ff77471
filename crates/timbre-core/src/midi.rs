//! Harmony of Standard MIDI Files
//!
//! Sounding notes are rendered onto a fixed time grid as pitch-class
//! durations, so a MIDI file yields chroma frames the same way decoded audio
//! does and feeds the same chord and key estimation.

use crate::error::{AnalysisError, Result};
use crate::features::CHROMA_BINS;
use crate::harmony::HarmonySummary;
use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use serde::Serialize;
use std::collections::HashMap;

/// Microseconds per quarter note until a tempo event says otherwise (120 BPM)
const DEFAULT_TEMPO_US: u32 = 500_000;

/// Zero-based channel of General MIDI percussion (channel 10)
const PERCUSSION_CHANNEL: u8 = 9;

/// Longest rendering accepted, in seconds
const MAX_DURATION_S: f64 = 4.0 * 3600.0;

/// Harmony report for one MIDI input; no embedding is produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MidiAnalysis {
    pub source: Option<String>,
    /// Hex BLAKE3 of the raw input bytes
    pub fingerprint: String,
    pub harmony: HarmonySummary,
    /// Pitched notes; percussion is not counted
    pub notes: usize,
    pub duration_s: f32,
}

/// Pitch-class durations per frame
#[derive(Debug, Clone, PartialEq)]
pub struct MidiChroma {
    pub frame_s: f32,
    pub frames: Vec<[f32; CHROMA_BINS]>,
    pub notes: usize,
    pub duration_s: f32,
}

impl MidiChroma {
    /// Frames with their start times
    pub fn timed_frames(&self) -> impl Iterator<Item = (f32, &[f32])> + '_ {
        self.frames
            .iter()
            .enumerate()
            .map(move |(i, chroma)| (i as f32 * self.frame_s, chroma.as_slice()))
    }
}

#[derive(Debug, Clone, Copy)]
struct Note {
    start_s: f64,
    end_s: f64,
    pitch_class: usize,
}

/// Parse `bytes` as a Standard MIDI File and render chroma frames `frame_s` long
pub fn midi_chroma(bytes: &[u8], frame_s: f32) -> Result<MidiChroma> {
    if !(frame_s > 0.0 && frame_s.is_finite()) {
        return Err(AnalysisError::InvalidConfig(format!(
            "MIDI frame length must be positive, got {}",
            frame_s
        )));
    }

    let smf = Smf::parse(bytes).map_err(|e| AnalysisError::CorruptInput(format!("midi: {}", e)))?;
    let (notes, end_s) = collect_notes(&smf);
    if end_s > MAX_DURATION_S {
        return Err(AnalysisError::CorruptInput(format!(
            "midi: renders to {:.0}s, longer than {:.0}s",
            end_s, MAX_DURATION_S
        )));
    }

    let frame = f64::from(frame_s);
    let count = (end_s / frame).ceil() as usize;
    let mut frames = vec![[0.0f32; CHROMA_BINS]; count];
    for note in &notes {
        let first = (note.start_s / frame) as usize;
        let last = ((note.end_s / frame).ceil() as usize).min(count);
        for (i, chroma) in frames.iter_mut().enumerate().take(last).skip(first) {
            let lo = (i as f64 * frame).max(note.start_s);
            let hi = ((i + 1) as f64 * frame).min(note.end_s);
            if hi > lo {
                chroma[note.pitch_class] += (hi - lo) as f32;
            }
        }
    }

    log::debug!(
        "Rendered {} MIDI notes into {} frames ({:.2}s)",
        notes.len(),
        frames.len(),
        end_s
    );
    Ok(MidiChroma {
        frame_s,
        frames,
        notes: notes.len(),
        duration_s: end_s as f32,
    })
}

/// Pitched notes in seconds, plus the time of the last event
fn collect_notes(smf: &Smf<'_>) -> (Vec<Note>, f64) {
    let mut clock = Clock::new(smf.header.timing);
    let mut sounding: HashMap<(u8, u8), f64> = HashMap::new();
    let mut notes = Vec::new();
    let mut end_s = 0.0;

    for (tick, kind) in merged_events(smf) {
        let now = clock.seconds(tick);
        end_s = now;
        match kind {
            TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => clock.set_tempo(tempo.as_int()),
            TrackEventKind::Midi { channel, message } if channel.as_int() != PERCUSSION_CHANNEL => {
                // NoteOn with zero velocity is a NoteOff
                let (key, on) = match message {
                    MidiMessage::NoteOn { key, vel } => (key.as_int(), vel.as_int() > 0),
                    MidiMessage::NoteOff { key, .. } => (key.as_int(), false),
                    _ => continue,
                };
                let id = (channel.as_int(), key);
                if let Some(start_s) = sounding.remove(&id) {
                    notes.push(Note {
                        start_s,
                        end_s: now,
                        pitch_class: usize::from(key) % CHROMA_BINS,
                    });
                }
                if on {
                    sounding.insert(id, now);
                }
            }
            _ => {}
        }
    }

    // Notes never released stop at the last event
    for ((_, key), start_s) in sounding {
        notes.push(Note {
            start_s,
            end_s,
            pitch_class: usize::from(key) % CHROMA_BINS,
        });
    }
    notes.sort_by(|a, b| a.start_s.total_cmp(&b.start_s));
    (notes, end_s)
}

/// Events of all tracks on one timeline of absolute ticks
fn merged_events<'a>(smf: &Smf<'a>) -> Vec<(u64, TrackEventKind<'a>)> {
    let mut events = Vec::new();
    let mut offset = 0u64;
    for track in &smf.tracks {
        let mut tick = offset;
        for event in track {
            tick += u64::from(event.delta.as_int());
            events.push((tick, event.kind));
        }
        // Sequential files play their tracks one after another
        if smf.header.format == Format::Sequential {
            offset = tick;
        }
    }
    // Stable: simultaneous events keep their track order
    events.sort_by_key(|(tick, _)| *tick);
    events
}

/// Tick to seconds conversion that follows tempo changes
struct Clock {
    timing: Timing,
    tempo_us: u32,
    last_tick: u64,
    last_s: f64,
}

impl Clock {
    fn new(timing: Timing) -> Self {
        Self {
            timing,
            tempo_us: DEFAULT_TEMPO_US,
            last_tick: 0,
            last_s: 0.0,
        }
    }

    fn tick_s(&self) -> f64 {
        match self.timing {
            Timing::Metrical(ticks_per_beat) => {
                f64::from(self.tempo_us) / 1e6 / f64::from(ticks_per_beat.as_int().max(1))
            }
            // SMPTE timing ignores tempo events
            Timing::Timecode(fps, subframes) => {
                1.0 / (f64::from(fps.as_f32()) * f64::from(subframes.max(1)))
            }
        }
    }

    /// Seconds at `tick`; ticks must not decrease between calls
    fn seconds(&mut self, tick: u64) -> f64 {
        let elapsed = tick.saturating_sub(self.last_tick) as f64;
        self.last_s += elapsed * self.tick_s();
        self.last_tick = tick;
        self.last_s
    }

    fn set_tempo(&mut self, tempo_us: u32) {
        if tempo_us > 0 {
            self.tempo_us = tempo_us;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::harmony;
    use approx::assert_abs_diff_eq;
    use midly::num::{u15, u24, u28, u4, u7};
    use midly::{Header, TrackEvent};

    fn event(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind,
        }
    }

    pub(crate) fn note(delta: u32, channel: u8, key: u8, on: bool) -> TrackEvent<'static> {
        let message = if on {
            MidiMessage::NoteOn {
                key: u7::new(key),
                vel: u7::new(100),
            }
        } else {
            MidiMessage::NoteOff {
                key: u7::new(key),
                vel: u7::new(0),
            }
        };
        event(
            delta,
            TrackEventKind::Midi {
                channel: u4::new(channel),
                message,
            },
        )
    }

    pub(crate) fn tempo(delta: u32, us_per_beat: u32) -> TrackEvent<'static> {
        event(delta, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(us_per_beat))))
    }

    /// Encoded SMF with `ticks_per_beat` resolution
    pub(crate) fn smf_bytes(ticks_per_beat: u16, tracks: Vec<Vec<TrackEvent<'static>>>) -> Vec<u8> {
        let format = if tracks.len() > 1 {
            Format::Parallel
        } else {
            Format::SingleTrack
        };
        let mut smf = Smf::new(Header::new(format, Timing::Metrical(u15::new(ticks_per_beat))));
        for mut track in tracks {
            track.push(event(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)));
            smf.tracks.push(track);
        }
        let mut out = Vec::new();
        smf.write_std(&mut out).unwrap();
        out
    }

    /// Notes `keys` held together for `ticks`
    pub(crate) fn chord(keys: &[u8], ticks: u32) -> Vec<TrackEvent<'static>> {
        let mut events: Vec<_> = keys.iter().map(|&k| note(0, 0, k, true)).collect();
        for (i, &k) in keys.iter().enumerate() {
            events.push(note(if i == 0 { ticks } else { 0 }, 0, k, false));
        }
        events
    }

    #[test]
    fn test_triad_renders_to_its_chord() {
        // Default tempo: 960 ticks at 480 per beat is one second
        let bytes = smf_bytes(480, vec![chord(&[60, 64, 67], 960)]);
        let chroma = midi_chroma(&bytes, 0.125).unwrap();

        assert_eq!(chroma.notes, 3);
        assert_abs_diff_eq!(chroma.duration_s, 1.0, epsilon = 1e-6);
        assert_eq!(chroma.frames.len(), 8);
        assert_abs_diff_eq!(chroma.frames[3][0], 0.125, epsilon = 1e-6);
        assert_eq!(chroma.frames[3][1], 0.0);

        let summary = harmony::summarize_frames(chroma.timed_frames());
        assert_eq!(summary.chord.unwrap().label, "C");
    }

    #[test]
    fn test_tempo_map_scales_time() {
        // One beat at 1,000,000 us per beat
        let track = vec![tempo(0, 1_000_000), note(0, 0, 69, true), note(480, 0, 69, false)];
        let chroma = midi_chroma(&smf_bytes(480, vec![track]), 0.25).unwrap();
        assert_abs_diff_eq!(chroma.duration_s, 1.0, epsilon = 1e-6);
        assert_eq!(chroma.frames.len(), 4);
        assert!(chroma.frames.iter().all(|f| f[9] > 0.0));
    }

    #[test]
    fn test_percussion_channel_is_ignored() {
        let mut drums = Vec::new();
        for _ in 0..8 {
            drums.push(note(0, PERCUSSION_CHANNEL, 38, true));
            drums.push(note(120, PERCUSSION_CHANNEL, 38, false));
        }
        let bytes = smf_bytes(480, vec![chord(&[57, 60, 64], 960), drums]);
        let chroma = midi_chroma(&bytes, 0.125).unwrap();

        assert_eq!(chroma.notes, 3);
        // D (38 % 12 = 2) never sounds
        assert!(chroma.frames.iter().all(|f| f[2] == 0.0));
        let summary = harmony::summarize_frames(chroma.timed_frames());
        assert_eq!(summary.chord.unwrap().label, "Am");
    }

    #[test]
    fn test_progression_follows_note_changes() {
        let mut track = chord(&[60, 64, 67], 480);
        track.extend(chord(&[55, 59, 62], 480));
        let chroma = midi_chroma(&smf_bytes(480, vec![track]), 0.125).unwrap();

        let summary = harmony::summarize_frames(chroma.timed_frames());
        let labels: Vec<&str> = summary.progression.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["C", "G"]);
        assert_abs_diff_eq!(summary.progression[1].time_s, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_unreleased_notes_end_with_the_file() {
        let track = vec![note(0, 0, 60, true), note(480, 0, 64, true), note(480, 0, 64, false)];
        let chroma = midi_chroma(&smf_bytes(480, vec![track]), 0.5).unwrap();
        assert_eq!(chroma.notes, 2);
        assert_abs_diff_eq!(chroma.frames.iter().map(|f| f[0]).sum::<f32>(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_garbage_is_corrupt_input() {
        let err = midi_chroma(b"this is not a standard midi file", 0.1).unwrap_err();
        assert!(matches!(err, AnalysisError::CorruptInput(_)));
    }

    #[test]
    fn test_rejects_zero_frame_length() {
        let bytes = smf_bytes(480, vec![chord(&[60], 480)]);
        assert!(matches!(midi_chroma(&bytes, 0.0), Err(AnalysisError::InvalidConfig(_))));
    }
}
