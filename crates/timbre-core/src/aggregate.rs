//! Reduction of a feature sequence to one fixed-length embedding

use crate::config::AggregationMode;
use crate::error::{AnalysisError, Result};
use crate::features::FeatureSequence;
use crate::models::DenseModel;
use serde::{Deserialize, Serialize};

/// Fixed-length descriptor of one recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    values: Vec<f32>,
    config_version: String,
}

impl Embedding {
    pub fn new(values: Vec<f32>, config_version: impl Into<String>) -> Self {
        Self {
            values,
            config_version: config_version.into(),
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dims(&self) -> usize {
        self.values.len()
    }

    /// Version of the extraction configuration that produced this embedding
    pub fn config_version(&self) -> &str {
        &self.config_version
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

/// Sequence-to-embedding reducer
#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    mode: AggregationMode,
}

impl Aggregator {
    pub fn new(mode: AggregationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> AggregationMode {
        self.mode
    }

    /// Embedding length for frames of `feature_dims` values
    pub fn output_dims(&self, feature_dims: usize, reduction: Option<&DenseModel>) -> Result<usize> {
        match self.mode {
            AggregationMode::Mean => Ok(feature_dims),
            AggregationMode::MeanVariance => Ok(2 * feature_dims),
            AggregationMode::Learned => {
                let model = learned_model(reduction, 2 * feature_dims)?;
                Ok(model.output_dim())
            }
        }
    }

    /// Reduce `sequence`; `reduction` is only consulted by learned aggregation
    pub fn aggregate(&self, sequence: &FeatureSequence, reduction: Option<&DenseModel>) -> Result<Vec<f32>> {
        if sequence.is_empty() {
            return Err(AnalysisError::EmptySequence);
        }

        let dims = sequence.dims();
        let n = sequence.len() as f32;

        let mut mean = vec![0.0f32; dims];
        for frame in sequence.frames() {
            for (acc, v) in mean.iter_mut().zip(&frame.values) {
                *acc += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        if self.mode == AggregationMode::Mean {
            return Ok(mean);
        }

        // Population variance
        let mut variance = vec![0.0f32; dims];
        for frame in sequence.frames() {
            for ((acc, v), m) in variance.iter_mut().zip(&frame.values).zip(&mean) {
                let d = v - m;
                *acc += d * d;
            }
        }
        variance.iter_mut().for_each(|v| *v /= n);

        let mut stats = mean;
        stats.extend_from_slice(&variance);

        match self.mode {
            AggregationMode::Learned => learned_model(reduction, stats.len())?.forward(&stats),
            _ => Ok(stats),
        }
    }
}

fn learned_model(reduction: Option<&DenseModel>, input_dims: usize) -> Result<&DenseModel> {
    let model = reduction
        .ok_or_else(|| AnalysisError::ModelUnavailable("learned aggregation needs a reduction model".into()))?;
    if model.input_dim != input_dims {
        return Err(AnalysisError::DimensionMismatch {
            expected: input_dims,
            found: model.input_dim,
        });
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureFrame, FeatureLayout};
    use crate::models::{Activation, DenseLayer};
    use approx::assert_abs_diff_eq;

    fn sequence(rows: &[[f32; 2]]) -> FeatureSequence {
        let layout = FeatureLayout {
            bands: 2,
            descriptors: false,
            chroma: false,
        };
        let frames = rows
            .iter()
            .enumerate()
            .map(|(index, row)| FeatureFrame {
                index,
                time_s: index as f32 * 0.1,
                values: row.to_vec(),
            })
            .collect();
        FeatureSequence::new(layout, frames).unwrap()
    }

    #[test]
    fn test_mean_and_variance() {
        let seq = sequence(&[[1.0, 10.0], [3.0, 10.0]]);

        let mean = Aggregator::new(AggregationMode::Mean).aggregate(&seq, None).unwrap();
        assert_eq!(mean, vec![2.0, 10.0]);

        let stats = Aggregator::new(AggregationMode::MeanVariance)
            .aggregate(&seq, None)
            .unwrap();
        assert_eq!(stats.len(), 4);
        assert_abs_diff_eq!(stats[2], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(stats[3], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_length_independent_of_duration() {
        let aggregator = Aggregator::new(AggregationMode::MeanVariance);
        let short = aggregator.aggregate(&sequence(&[[1.0, 2.0]]), None).unwrap();
        let long = aggregator
            .aggregate(&sequence(&[[1.0, 2.0]; 500]), None)
            .unwrap();
        assert_eq!(short.len(), long.len());
        assert_eq!(aggregator.output_dims(2, None).unwrap(), short.len());
    }

    #[test]
    fn test_empty_sequence() {
        let empty = sequence(&[]);
        let err = Aggregator::new(AggregationMode::Mean).aggregate(&empty, None).unwrap_err();
        assert!(matches!(err, AnalysisError::EmptySequence));
    }

    #[test]
    fn test_learned_reduction() {
        let model = DenseModel::new(
            4,
            vec![DenseLayer {
                weights: vec![vec![1.0, 1.0, 0.0, 0.0], vec![0.0, 0.0, 1.0, 1.0]],
                bias: vec![0.0, 0.0],
                activation: Activation::Linear,
            }],
            vec![],
        )
        .unwrap();
        let aggregator = Aggregator::new(AggregationMode::Learned);
        let seq = sequence(&[[1.0, 10.0], [3.0, 10.0]]);

        let out = aggregator.aggregate(&seq, Some(&model)).unwrap();
        assert_eq!(out, vec![12.0, 1.0]);
        assert_eq!(aggregator.output_dims(2, Some(&model)).unwrap(), 2);

        assert!(matches!(
            aggregator.aggregate(&seq, None),
            Err(AnalysisError::ModelUnavailable(_))
        ));
        let three = sequence(&[[1.0, 2.0]]);
        assert!(matches!(
            aggregator.output_dims(3, Some(&model)),
            Err(AnalysisError::DimensionMismatch { expected: 6, found: 4 })
        ));
        assert!(aggregator.aggregate(&three, Some(&model)).is_ok());
    }
}
