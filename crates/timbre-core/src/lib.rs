//! Timbre Core - audio feature extraction, similarity and classification
//!
//! Encoded audio is decoded to a canonical PCM buffer, cut into overlapping
//! windows, described per window by spectral band energies, spectral
//! descriptors and chroma, and reduced to one fixed-length embedding.
//! Embeddings are compared by cosine or euclidean similarity, or classified
//! with a pretrained model. Standard MIDI files skip the audio path and go
//! straight to chord and key estimation.

pub mod aggregate;
pub mod audio;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod harmony;
pub mod metadata;
pub mod midi;
pub mod models;
pub mod scoring;

#[cfg(test)]
mod testutil;

pub use aggregate::{Aggregator, Embedding};
pub use audio::{AudioBuffer, AudioFormat, EncodedAudio};
pub use cache::{CacheKey, CacheStats, EmbeddingCache};
pub use cancel::{CancelToken, DecodeBudget};
pub use config::{AggregationMode, AnalysisConfig, ChannelLayout, ComparisonMode};
pub use engine::{Analysis, Engine};
pub use error::{AnalysisError, ErrorKind, ErrorReport, Result};
pub use features::{FeatureExtractor, FeatureSequence, WindowConfig};
pub use harmony::HarmonySummary;
pub use metadata::{read_metadata, TrackMetadata};
pub use midi::{midi_chroma, MidiAnalysis};
pub use scoring::{Candidate, Classification, ScoreEntry, ScoreResult, Scorer};
