//! Analysis configuration
//!
//! Every field has a default so a TOML file only needs to name what it
//! overrides. Configurations are validated when loaded and again when an
//! [`Engine`](crate::Engine) is started from them.

use crate::error::{AnalysisError, Result};
use crate::features::WindowConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Bumped whenever the meaning of stored embeddings changes
const EXTRACTION_FORMAT: u32 = 1;

/// How a feature sequence is reduced to one embedding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// Per-dimension average
    Mean,
    /// Averages followed by population variances
    MeanVariance,
    /// Mean and variance passed through the pretrained reduction model
    Learned,
}

/// How a query embedding is compared against candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    Cosine,
    Euclidean,
    Classify,
}

/// Canonical channel layout after decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    pub fn count(&self) -> u16 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }
}

/// Per-frame feature vector layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Number of log-spaced magnitude bands
    #[serde(default = "default_bands")]
    pub bands: usize,
    /// Lower edge of the first band (Hz)
    #[serde(default = "default_min_freq")]
    pub min_freq: f32,
    /// Append RMS, zero-crossing rate, centroid, rolloff and flatness
    #[serde(default = "default_true")]
    pub descriptors: bool,
    /// Append a 12-bin chroma profile
    #[serde(default = "default_true")]
    pub chroma: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            bands: default_bands(),
            min_freq: default_min_freq(),
            descriptors: true,
            chroma: true,
        }
    }
}

/// Pretrained model weight files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPaths {
    /// Reduction model used by [`AggregationMode::Learned`]
    #[serde(default)]
    pub reduction: Option<PathBuf>,
    /// Classifier used by [`ComparisonMode::Classify`]
    #[serde(default)]
    pub classifier: Option<PathBuf>,
}

/// Embedding cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Keep embeddings in memory, keyed by content fingerprint
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Also persist embeddings as records in this directory
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// zstd-compress persisted records
    #[serde(default)]
    pub compress: bool,
    /// In-memory entries kept before the oldest is evicted
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            compress: false,
            max_entries: default_max_entries(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: ChannelLayout,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_hop_size")]
    pub hop_size: usize,
    #[serde(default = "default_aggregation")]
    pub aggregation: AggregationMode,
    #[serde(default = "default_comparison")]
    pub comparison: ComparisonMode,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default = "default_decode_timeout_ms")]
    pub decode_timeout_ms: u64,
    /// Worker threads for batch analysis (defaults to the CPU count)
    #[serde(default)]
    pub workers: Option<usize>,
    /// Minimum probability for a classification to be reported
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default)]
    pub models: ModelPaths,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            window_size: default_window_size(),
            hop_size: default_hop_size(),
            aggregation: default_aggregation(),
            comparison: default_comparison(),
            features: FeatureConfig::default(),
            decode_timeout_ms: default_decode_timeout_ms(),
            workers: None,
            confidence_threshold: default_confidence_threshold(),
            models: ModelPaths::default(),
            cache: CacheConfig::default(),
        }
    }
}

fn default_max_entries() -> usize {
    4096
}
fn default_sample_rate() -> u32 {
    22050
}
fn default_channels() -> ChannelLayout {
    ChannelLayout::Mono
}
fn default_window_size() -> usize {
    2048
}
fn default_hop_size() -> usize {
    512
}
fn default_aggregation() -> AggregationMode {
    AggregationMode::MeanVariance
}
fn default_comparison() -> ComparisonMode {
    ComparisonMode::Cosine
}
fn default_bands() -> usize {
    32
}
fn default_min_freq() -> f32 {
    40.0
}
fn default_true() -> bool {
    true
}
fn default_decode_timeout_ms() -> u64 {
    30_000
}
fn default_confidence_threshold() -> f32 {
    0.5
}

/// The subset of configuration that determines embedding values
#[derive(Serialize)]
struct ExtractionProfile<'a> {
    format: u32,
    sample_rate: u32,
    channels: ChannelLayout,
    window_size: usize,
    hop_size: usize,
    aggregation: AggregationMode,
    features: &'a FeatureConfig,
    reduction_model: Option<&'a str>,
}

impl AnalysisConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AnalysisConfig = toml::from_str(content)
            .map_err(|e| AnalysisError::InvalidConfig(format!("failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validated window/hop pair
    pub fn window(&self) -> Result<WindowConfig> {
        WindowConfig::new(self.window_size, self.hop_size)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.sample_rate > 384_000 {
            return Err(AnalysisError::InvalidConfig(format!(
                "sample_rate must be in 1..=384000, got {}",
                self.sample_rate
            )));
        }
        self.window()?;
        if self.features.bands == 0 {
            return Err(AnalysisError::InvalidConfig("features.bands must be > 0".into()));
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        if !(self.features.min_freq > 0.0 && self.features.min_freq < nyquist) {
            return Err(AnalysisError::InvalidConfig(format!(
                "features.min_freq must be in (0, {}), got {}",
                nyquist, self.features.min_freq
            )));
        }
        if self.decode_timeout_ms == 0 {
            return Err(AnalysisError::InvalidConfig("decode_timeout_ms must be > 0".into()));
        }
        if self.cache.max_entries == 0 {
            return Err(AnalysisError::InvalidConfig("cache.max_entries must be > 0".into()));
        }
        if self.workers == Some(0) {
            return Err(AnalysisError::InvalidConfig("workers must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(AnalysisError::InvalidConfig(format!(
                "confidence_threshold must be in [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.aggregation == AggregationMode::Learned && self.models.reduction.is_none() {
            return Err(AnalysisError::InvalidConfig(
                "aggregation = \"learned\" requires models.reduction".into(),
            ));
        }
        if self.comparison == ComparisonMode::Classify && self.models.classifier.is_none() {
            return Err(AnalysisError::InvalidConfig(
                "comparison = \"classify\" requires models.classifier".into(),
            ));
        }
        Ok(())
    }

    /// Version string identifying the extraction configuration.
    ///
    /// Two configurations share a version exactly when they produce the same
    /// embeddings for the same input. `reduction_digest` identifies the loaded
    /// reduction model and only matters for learned aggregation.
    pub fn config_version(&self, reduction_digest: Option<&str>) -> String {
        let profile = ExtractionProfile {
            format: EXTRACTION_FORMAT,
            sample_rate: self.sample_rate,
            channels: self.channels,
            window_size: self.window_size,
            hop_size: self.hop_size,
            aggregation: self.aggregation,
            features: &self.features,
            reduction_model: match self.aggregation {
                AggregationMode::Learned => reduction_digest,
                _ => None,
            },
        };
        let canonical = serde_json::to_vec(&profile).unwrap_or_default();
        let digest = blake3::hash(&canonical).to_hex();
        format!("v{}-{}", EXTRACTION_FORMAT, &digest.as_str()[..16])
    }

    /// Worker pool size for batch analysis
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }
}
