//! Pretrained dense models used for learned aggregation and classification
//!
//! Weight files are JSON (`.json`) or bincode (`.bin`, `.bincode`), chosen by
//! extension. A model is a chain of fully connected layers; each layer's
//! weights are stored row-major as `[output][input]`.

use crate::config::ModelPaths;
use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Tanh,
}

impl Activation {
    fn apply(&self, x: f32) -> f32 {
        match self {
            Activation::Linear => x,
            Activation::Relu => x.max(0.0),
            Activation::Tanh => x.tanh(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    pub activation: Activation,
}

impl DenseLayer {
    pub fn input_dim(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    pub fn output_dim(&self) -> usize {
        self.weights.len()
    }

    fn forward(&self, input: &[f32]) -> Vec<f32> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| {
                let sum: f32 = row.iter().zip(input).map(|(w, x)| w * x).sum();
                self.activation.apply(sum + b)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseModel {
    #[serde(default)]
    pub name: Option<String>,
    pub input_dim: usize,
    pub layers: Vec<DenseLayer>,
    /// Class names, one per output, for classifiers
    #[serde(default)]
    pub labels: Vec<String>,
    /// Content digest of the weight file
    #[serde(skip)]
    digest: String,
}

impl DenseModel {
    /// Build and validate a model in memory
    pub fn new(input_dim: usize, layers: Vec<DenseLayer>, labels: Vec<String>) -> Result<Self> {
        let mut model = Self {
            name: None,
            input_dim,
            layers,
            labels,
            digest: String::new(),
        };
        model.validate()?;
        model.digest = model.compute_digest();
        Ok(model)
    }

    /// Load weights from a JSON or bincode file
    pub fn load(path: &Path) -> Result<Self> {
        let unavailable =
            |reason: String| AnalysisError::ModelUnavailable(format!("{}: {}", path.display(), reason));

        let bytes = std::fs::read(path).map_err(|e| unavailable(e.to_string()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let mut model: DenseModel = match ext.as_deref() {
            Some("json") => serde_json::from_slice(&bytes).map_err(|e| unavailable(e.to_string()))?,
            Some("bin") | Some("bincode") => {
                bincode::deserialize(&bytes).map_err(|e| unavailable(e.to_string()))?
            }
            _ => return Err(unavailable("expected a .json or .bin weight file".into())),
        };

        model.validate().map_err(|e| unavailable(e.to_string()))?;
        model.digest = blake3::hash(&bytes).to_hex().as_str()[..16].to_string();

        log::info!(
            "Loaded model {} ({} -> {}, {} layers)",
            model.name.as_deref().unwrap_or("<unnamed>"),
            model.input_dim,
            model.output_dim(),
            model.layers.len()
        );
        Ok(model)
    }

    /// Check that layer shapes chain and labels match the output width
    fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(AnalysisError::ModelUnavailable("model has no layers".into()));
        }
        let mut width = self.input_dim;
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.output_dim() == 0 || layer.bias.len() != layer.output_dim() {
                return Err(AnalysisError::ModelUnavailable(format!(
                    "layer {} has {} rows and {} biases",
                    i,
                    layer.output_dim(),
                    layer.bias.len()
                )));
            }
            if let Some(row) = layer.weights.iter().find(|row| row.len() != width) {
                return Err(AnalysisError::ModelUnavailable(format!(
                    "layer {} expects {} inputs but has a row of {}",
                    i,
                    width,
                    row.len()
                )));
            }
            width = layer.output_dim();
        }
        if !self.labels.is_empty() && self.labels.len() != width {
            return Err(AnalysisError::ModelUnavailable(format!(
                "{} labels for {} outputs",
                self.labels.len(),
                width
            )));
        }
        Ok(())
    }

    fn compute_digest(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&canonical).to_hex().as_str()[..16].to_string()
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, DenseLayer::output_dim)
    }

    /// Short content digest identifying these weights
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Run inference
    pub fn forward(&self, input: &[f32]) -> Result<Vec<f32>> {
        if input.len() != self.input_dim {
            return Err(AnalysisError::DimensionMismatch {
                expected: self.input_dim,
                found: input.len(),
            });
        }
        let mut activations = input.to_vec();
        for layer in &self.layers {
            activations = layer.forward(&activations);
        }
        Ok(activations)
    }

    /// Label of output `index`, or the index itself for unlabelled models
    pub fn label(&self, index: usize) -> String {
        self.labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", index))
    }
}

/// Models loaded at engine start
#[derive(Debug, Clone, Default)]
pub struct ModelSet {
    pub reduction: Option<DenseModel>,
    pub classifier: Option<DenseModel>,
}

impl ModelSet {
    /// Load every configured model; a configured path that fails is an error
    pub fn load(paths: &ModelPaths) -> Result<Self> {
        let reduction = paths.reduction.as_deref().map(DenseModel::load).transpose()?;
        let classifier = paths.classifier.as_deref().map(DenseModel::load).transpose()?;
        Ok(Self {
            reduction,
            classifier,
        })
    }

    pub fn reduction(&self) -> Result<&DenseModel> {
        self.reduction
            .as_ref()
            .ok_or_else(|| AnalysisError::ModelUnavailable("no reduction model loaded".into()))
    }

    pub fn classifier(&self) -> Result<&DenseModel> {
        self.classifier
            .as_ref()
            .ok_or_else(|| AnalysisError::ModelUnavailable("no classifier loaded".into()))
    }
}
