//! Analysis engine: process-wide state and the request pipeline
//!
//! An [`Engine`] owns the loaded models, the embedding cache and the worker
//! pool. Each request runs decode, feature extraction and aggregation in
//! order, checking its cancel token between stages. Tag metadata is read on
//! a separate path and never fails the request.

use crate::aggregate::{Aggregator, Embedding};
use crate::audio::{self, AudioFormat, EncodedAudio};
use crate::cache::{CacheKey, CacheStats, CachedEmbedding, DiskCache, EmbeddingCache};
use crate::cancel::{CancelToken, DecodeBudget};
use crate::config::{AggregationMode, AnalysisConfig, ComparisonMode};
use crate::error::{AnalysisError, ErrorReport, Result};
use crate::features::FeatureExtractor;
use crate::harmony::{self, HarmonySummary};
use crate::metadata::{self, StreamInfo, TrackMetadata};
use crate::midi::{self, MidiAnalysis};
use crate::models::ModelSet;
use crate::scoring::{Candidate, Classification, ScoreResult, Scorer};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use timbre_store::EmbeddingRecord;


/// Report for one analysed input
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    /// Path or upload name, when known
    pub source: Option<String>,
    /// Hex BLAKE3 of the raw input bytes
    pub fingerprint: String,
    pub embedding: Embedding,
    pub metadata: TrackMetadata,
    pub stream: Option<StreamInfo>,
    pub harmony: Option<HarmonySummary>,
    /// Present when a classifier is loaded
    pub classification: Option<Classification>,
    /// Served from the embedding cache
    pub cached: bool,
    /// Non-fatal failures (e.g. unreadable tags)
    pub errors: Vec<ErrorReport>,
}

impl Analysis {
    /// Library record for this analysis
    pub fn to_record(&self, identifier: impl Into<String>) -> EmbeddingRecord {
        let tags = self
            .metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EmbeddingRecord::new(
            identifier,
            self.fingerprint.clone(),
            self.embedding.config_version(),
            self.embedding.values().to_vec(),
        )
        .with_source(self.source.clone().unwrap_or_default())
        .with_tags(tags)
    }
}

pub struct Engine {
    config: AnalysisConfig,
    config_version: String,
    extractor: FeatureExtractor,
    aggregator: Aggregator,
    scorer: Scorer,
    embedding_dims: usize,
    models: RwLock<Option<Arc<ModelSet>>>,
    cache: EmbeddingCache,
    pool: rayon::ThreadPool,
}

impl Engine {
    /// Validate the configuration, load models and build the worker pool
    pub fn start(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;

        let window = config.window()?;
        let extractor = FeatureExtractor::new(config.sample_rate, window, &config.features)?;
        let aggregator = Aggregator::new(config.aggregation);
        let models = ModelSet::load(&config.models)?;

        let reduction = match config.aggregation {
            AggregationMode::Learned => Some(models.reduction()?),
            _ => None,
        };
        let embedding_dims = aggregator.output_dims(extractor.layout().dims(), reduction)?;
        if let Some(classifier) = &models.classifier {
            if classifier.input_dim != embedding_dims {
                return Err(AnalysisError::DimensionMismatch {
                    expected: embedding_dims,
                    found: classifier.input_dim,
                });
            }
        }
        let config_version = config.config_version(reduction.map(|m| m.digest()));

        let disk = match &config.cache.directory {
            Some(dir) => Some(DiskCache::open(dir, config.cache.compress)?),
            None => None,
        };
        let cache = EmbeddingCache::new(config.cache.enabled, disk)
            .with_capacity(config.cache.max_entries);

        let workers = config.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("timbre-worker-{}", i))
            .build()
            .map_err(|e| AnalysisError::InvalidConfig(format!("failed to build worker pool: {}", e)))?;

        log::info!(
            "Engine started: config {}, {} dims, {} workers",
            config_version,
            embedding_dims,
            workers
        );

        Ok(Self {
            config,
            config_version,
            extractor,
            aggregator,
            scorer: Scorer::new(),
            embedding_dims,
            models: RwLock::new(Some(Arc::new(models))),
            cache,
            pool,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn config_version(&self) -> &str {
        &self.config_version
    }

    /// Length of every embedding this engine produces
    pub fn embedding_dims(&self) -> usize {
        self.embedding_dims
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Loaded models; fails once the engine is shut down
    pub fn models(&self) -> Result<Arc<ModelSet>> {
        self.models
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| AnalysisError::ModelUnavailable("engine is shut down".into()))
    }

    /// Run the full pipeline on one input
    pub fn analyze(&self, input: &EncodedAudio, cancel: &CancelToken) -> Result<Analysis> {
        if input.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }
        cancel.check()?;
        let models = self.models()?;
        let started = Instant::now();

        let fingerprint = blake3::hash(input.bytes()).to_hex().to_string();
        let source = input
            .path()
            .map(|p| p.display().to_string());

        let mut errors = Vec::new();
        let (metadata, stream) = match metadata::read_metadata_bytes(input.shared_bytes(), input.hint()) {
            Ok(info) => (info.metadata, info.stream),
            Err(e) => {
                log::warn!("Could not read tags of {}: {}", fingerprint, e);
                errors.push(e.report());
                (TrackMetadata::default(), None)
            }
        };
        cancel.check()?;

        let key = CacheKey::new(fingerprint.clone(), self.config_version.clone());
        let (entry, cached) = self
            .cache
            .get_or_compute(&key, || self.extract(input, &models, cancel))?;

        let classification = match &models.classifier {
            Some(classifier) => {
                match self
                    .scorer
                    .score(&entry.embedding, &[], ComparisonMode::Classify, Some(classifier))
                {
                    Ok(scores) => Some(Classification::from_scores(&scores, self.config.confidence_threshold)),
                    Err(e) => {
                        errors.push(e.report());
                        None
                    }
                }
            }
            None => None,
        };

        log::info!(
            "Analyzed {} in {:?}{}",
            source.as_deref().unwrap_or(&fingerprint),
            started.elapsed(),
            if cached { " (cached)" } else { "" }
        );

        Ok(Analysis {
            source,
            fingerprint,
            embedding: entry.embedding,
            metadata,
            stream,
            harmony: entry.harmony,
            classification,
            cached,
            errors,
        })
    }

    /// Chord, progression and key of a Standard MIDI File.
    ///
    /// Notes are rendered into chroma frames one hop long; no embedding is
    /// produced and the cache is not consulted.
    pub fn analyze_midi(&self, input: &EncodedAudio, cancel: &CancelToken) -> Result<MidiAnalysis> {
        if input.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }
        cancel.check()?;
        self.models()?;
        if input.format() != AudioFormat::Midi {
            return Err(AnalysisError::UnsupportedFormat(format!(
                "{:?} input is not a MIDI file",
                input.format()
            )));
        }
        let started = Instant::now();

        let fingerprint = blake3::hash(input.bytes()).to_hex().to_string();
        let source = input.path().map(|p| p.display().to_string());

        let frame_s = self.config.hop_size as f32 / self.config.sample_rate as f32;
        let chroma = midi::midi_chroma(input.bytes(), frame_s)?;
        cancel.check()?;
        let harmony = harmony::summarize_frames(chroma.timed_frames());

        log::info!(
            "Analyzed MIDI {} in {:?} ({} notes)",
            source.as_deref().unwrap_or(&fingerprint),
            started.elapsed(),
            chroma.notes
        );

        Ok(MidiAnalysis {
            source,
            fingerprint,
            harmony,
            notes: chroma.notes,
            duration_s: chroma.duration_s,
        })
    }

    /// Decode, extract and aggregate, checking for cancellation between stages
    fn extract(&self, input: &EncodedAudio, models: &ModelSet, cancel: &CancelToken) -> Result<CachedEmbedding> {
        let budget = DecodeBudget::new(Duration::from_millis(self.config.decode_timeout_ms), cancel.clone());
        let stage = Instant::now();
        let buffer = audio::decode(input, self.config.sample_rate, self.config.channels, &budget)?;
        log::debug!("Decoded {} ms of audio in {:?}", buffer.duration_ms(), stage.elapsed());
        cancel.check()?;

        let stage = Instant::now();
        let sequence = self.extractor.extract(&buffer)?;
        drop(buffer);
        log::debug!("Extracted {} frames in {:?}", sequence.len(), stage.elapsed());
        cancel.check()?;

        let harmony = harmony::summarize(&sequence);
        let reduction = match self.aggregator.mode() {
            AggregationMode::Learned => Some(models.reduction()?),
            _ => None,
        };
        let values = self.aggregator.aggregate(&sequence, reduction)?;
        Ok(CachedEmbedding {
            embedding: Embedding::new(values, self.config_version.clone()),
            harmony,
        })
    }

    /// Analyse inputs on the worker pool; results keep input order
    pub fn analyze_batch(&self, inputs: &[EncodedAudio], cancel: &CancelToken) -> Vec<Result<Analysis>> {
        self.pool
            .install(|| inputs.par_iter().map(|input| self.analyze(input, cancel)).collect())
    }

    /// Compare using the configured comparison mode
    pub fn compare(&self, query: &Embedding, candidates: &[Candidate]) -> Result<ScoreResult> {
        self.compare_with(self.config.comparison, query, candidates, None)
    }

    pub fn compare_with(
        &self,
        mode: ComparisonMode,
        query: &Embedding,
        candidates: &[Candidate],
        top_k: Option<usize>,
    ) -> Result<ScoreResult> {
        let scorer = match top_k {
            Some(k) => self.scorer.with_top_k(k),
            None => self.scorer,
        };
        match mode {
            ComparisonMode::Classify => {
                let models = self.models()?;
                scorer.score(query, candidates, mode, Some(models.classifier()?))
            }
            _ => scorer.score(query, candidates, mode, None),
        }
    }

    /// Classify an embedding with the loaded classifier
    pub fn classify(&self, query: &Embedding) -> Result<Classification> {
        let scores = self.compare_with(ComparisonMode::Classify, query, &[], None)?;
        Ok(Classification::from_scores(&scores, self.config.confidence_threshold))
    }

    /// Release models and cached embeddings; later model access fails
    pub fn shutdown(&self) {
        let released = self
            .models
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        self.cache.clear();
        if released.is_some() {
            log::info!("Engine shut down");
        }
    }
}
