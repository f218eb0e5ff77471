//! Embedding comparison, ranking and classification

use crate::aggregate::Embedding;
use crate::config::ComparisonMode;
use crate::error::{AnalysisError, Result};
use crate::models::DenseModel;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[cfg(test)]
mod tests;

/// A library entry to compare against
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub embedding: Embedding,
}

impl Candidate {
    pub fn new(id: impl Into<String>, embedding: Embedding) -> Self {
        Self {
            id: id.into(),
            embedding,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    /// Candidate id, or class label when classifying
    pub id: String,
    pub score: f32,
}

/// Ranked scores: descending score, ties by ascending id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub mode: ComparisonMode,
    pub entries: Vec<ScoreEntry>,
}

impl ScoreResult {
    pub fn best(&self) -> Option<&ScoreEntry> {
        self.entries.first()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Top class of a classification, reported only above the confidence threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// `None` when the best probability is below the threshold
    pub label: Option<String>,
    pub confidence: f32,
    pub probabilities: Vec<ScoreEntry>,
}

impl Classification {
    pub fn from_scores(scores: &ScoreResult, threshold: f32) -> Self {
        let best = scores.best();
        let confidence = best.map_or(0.0, |b| b.score);
        let label = best
            .filter(|b| b.score >= threshold)
            .map(|b| b.id.clone());
        if label.is_none() {
            log::debug!(
                "Classification undetermined: best {:.3} below threshold {:.3}",
                confidence,
                threshold
            );
        }
        Self {
            label,
            confidence,
            probabilities: scores.entries.clone(),
        }
    }
}

/// Cosine similarity in [-1, 1]; 0 when either vector has zero norm
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dims(a.len(), b.len())?;
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += *x as f64 * *y as f64;
        norm_a += *x as f64 * *x as f64;
        norm_b += *y as f64 * *y as f64;
    }
    let denom = (norm_a * norm_b).sqrt();
    if denom <= f64::EPSILON {
        return Ok(0.0);
    }
    Ok((dot / denom).clamp(-1.0, 1.0) as f32)
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dims(a.len(), b.len())?;
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum();
    Ok(sum.sqrt() as f32)
}

fn check_dims(expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(AnalysisError::DimensionMismatch { expected, found });
    }
    Ok(())
}

/// Scores a query against candidates or a classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct Scorer {
    top_k: Option<usize>,
}

impl Scorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the best `k` entries
    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = Some(k);
        self
    }

    /// Score `query` in the given mode.
    ///
    /// `classifier` is required by [`ComparisonMode::Classify`], which ignores
    /// the candidates and returns softmax probabilities per class label.
    /// Candidates must share the query's length and config version.
    pub fn score(
        &self,
        query: &Embedding,
        candidates: &[Candidate],
        mode: ComparisonMode,
        classifier: Option<&DenseModel>,
    ) -> Result<ScoreResult> {
        let entries = match mode {
            ComparisonMode::Cosine | ComparisonMode::Euclidean => {
                let mut entries = Vec::with_capacity(candidates.len());
                for candidate in candidates {
                    if candidate.embedding.config_version() != query.config_version() {
                        return Err(AnalysisError::ConfigMismatch {
                            expected: query.config_version().to_string(),
                            found: candidate.embedding.config_version().to_string(),
                        });
                    }
                    let (q, c) = (query.values(), candidate.embedding.values());
                    let score = match mode {
                        ComparisonMode::Cosine => cosine_similarity(q, c)?,
                        _ => 1.0 / (1.0 + euclidean_distance(q, c)?),
                    };
                    entries.push(ScoreEntry {
                        id: candidate.id.clone(),
                        score,
                    });
                }
                entries
            }
            ComparisonMode::Classify => {
                let model = classifier
                    .ok_or_else(|| AnalysisError::ModelUnavailable("no classifier loaded".into()))?;
                let logits = model.forward(query.values())?;
                softmax(&logits)
                    .into_iter()
                    .enumerate()
                    .map(|(i, p)| ScoreEntry {
                        id: model.label(i),
                        score: p,
                    })
                    .collect()
            }
        };

        let mut entries = rank(entries);
        if let Some(k) = self.top_k {
            entries.truncate(k);
        }
        log::debug!("Scored {} entries in {:?} mode", entries.len(), mode);
        Ok(ScoreResult { mode, entries })
    }
}

/// Sort descending by score, ties by ascending id
pub(crate) fn rank(mut entries: Vec<ScoreEntry>) -> Vec<ScoreEntry> {
    entries.sort_by(|a, b| match b.score.total_cmp(&a.score) {
        Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    });
    entries
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
