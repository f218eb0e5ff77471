//! Tests for scoring and ranking

use super::*;
use crate::models::{Activation, DenseLayer};
use approx::assert_abs_diff_eq;

fn embedding(values: &[f32]) -> Embedding {
    Embedding::new(values.to_vec(), "v1-test")
}

fn entry(id: &str, score: f32) -> ScoreEntry {
    ScoreEntry {
        id: id.to_string(),
        score,
    }
}

fn ids(result: &ScoreResult) -> Vec<&str> {
    result.entries.iter().map(|e| e.id.as_str()).collect()
}

fn mood_classifier() -> DenseModel {
    DenseModel::new(
        2,
        vec![DenseLayer {
            weights: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 0.0]],
            bias: vec![0.0, 0.0, 0.0],
            activation: Activation::Linear,
        }],
        vec!["happy".into(), "sad".into(), "calm".into()],
    )
    .unwrap()
}

#[test]
fn test_ties_broken_by_ascending_id() {
    let ranked = rank(vec![entry("c", 0.9), entry("b", 0.5), entry("a", 0.9)]);
    let order: Vec<&str> = ranked.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(order, vec!["a", "c", "b"]);
}

#[test]
fn test_cosine_ranking() {
    let query = embedding(&[1.0, 0.0]);
    let candidates = vec![
        Candidate::new("orthogonal", embedding(&[0.0, 1.0])),
        Candidate::new("same", embedding(&[2.0, 0.0])),
        Candidate::new("opposite", embedding(&[-1.0, 0.0])),
        Candidate::new("silent", embedding(&[0.0, 0.0])),
    ];

    let result = Scorer::new()
        .score(&query, &candidates, ComparisonMode::Cosine, None)
        .unwrap();
    assert_eq!(ids(&result), vec!["same", "orthogonal", "silent", "opposite"]);
    assert_abs_diff_eq!(result.entries[0].score, 1.0, epsilon = 1e-6);
    assert_eq!(result.entries[2].score, 0.0);
    assert_abs_diff_eq!(result.entries[3].score, -1.0, epsilon = 1e-6);
}

#[test]
fn test_euclidean_scores_in_unit_interval() {
    let query = embedding(&[1.0, 1.0]);
    let candidates = vec![
        Candidate::new("far", embedding(&[4.0, 5.0])),
        Candidate::new("identical", embedding(&[1.0, 1.0])),
    ];

    let result = Scorer::new()
        .score(&query, &candidates, ComparisonMode::Euclidean, None)
        .unwrap();
    assert_eq!(ids(&result), vec!["identical", "far"]);
    assert_eq!(result.entries[0].score, 1.0);
    // distance 5
    assert_abs_diff_eq!(result.entries[1].score, 1.0 / 6.0, epsilon = 1e-6);
}

#[test]
fn test_dimension_mismatch() {
    let query = embedding(&[1.0, 0.0]);
    let candidates = vec![Candidate::new("short", embedding(&[1.0]))];

    let err = Scorer::new()
        .score(&query, &candidates, ComparisonMode::Cosine, None)
        .unwrap_err();
    assert!(matches!(err, AnalysisError::DimensionMismatch { expected: 2, found: 1 }));
}

#[test]
fn test_top_k_truncates() {
    let query = embedding(&[1.0]);
    let candidates: Vec<Candidate> = (0..10)
        .map(|i| Candidate::new(format!("track{:02}", i), embedding(&[i as f32])))
        .collect();

    let result = Scorer::new()
        .with_top_k(3)
        .score(&query, &candidates, ComparisonMode::Euclidean, None)
        .unwrap();
    assert_eq!(ids(&result), vec!["track01", "track00", "track02"]);
}

#[test]
fn test_classify_returns_probabilities() {
    let model = mood_classifier();
    let query = embedding(&[3.0, 1.0]);
    let unrelated = vec![Candidate::new("ignored", embedding(&[9.0]))];

    let result = Scorer::new()
        .score(&query, &unrelated, ComparisonMode::Classify, Some(&model))
        .unwrap();
    assert_eq!(ids(&result), vec!["happy", "sad", "calm"]);
    let total: f32 = result.entries.iter().map(|e| e.score).sum();
    assert_abs_diff_eq!(total, 1.0, epsilon = 1e-5);
    assert!(result.entries.iter().all(|e| (0.0..=1.0).contains(&e.score)));
}

#[test]
fn test_classify_without_model() {
    let err = Scorer::new()
        .score(&embedding(&[1.0, 2.0]), &[], ComparisonMode::Classify, None)
        .unwrap_err();
    assert!(matches!(err, AnalysisError::ModelUnavailable(_)));

    let model = mood_classifier();
    let err = Scorer::new()
        .score(&embedding(&[1.0]), &[], ComparisonMode::Classify, Some(&model))
        .unwrap_err();
    assert!(matches!(err, AnalysisError::DimensionMismatch { expected: 2, found: 1 }));
}

#[test]
fn test_classification_threshold() {
    let scores = ScoreResult {
        mode: ComparisonMode::Classify,
        entries: vec![entry("happy", 0.7), entry("sad", 0.3)],
    };
    let confident = Classification::from_scores(&scores, 0.5);
    assert_eq!(confident.label.as_deref(), Some("happy"));

    let unsure = Classification::from_scores(&scores, 0.8);
    assert_eq!(unsure.label, None);
    assert_abs_diff_eq!(unsure.confidence, 0.7);
    assert_eq!(unsure.probabilities.len(), 2);
}

#[test]
fn test_foreign_config_is_rejected() {
    let query = embedding(&[1.0, 0.0]);
    let candidates = vec![
        Candidate::new("local", embedding(&[1.0, 0.0])),
        Candidate::new("foreign", Embedding::new(vec![1.0, 0.0], "v1-other")),
    ];

    for mode in [ComparisonMode::Cosine, ComparisonMode::Euclidean] {
        let err = Scorer::new().score(&query, &candidates, mode, None).unwrap_err();
        match err {
            AnalysisError::ConfigMismatch { expected, found } => {
                assert_eq!(expected, "v1-test");
                assert_eq!(found, "v1-other");
            }
            other => panic!("expected ConfigMismatch, got {:?}", other),
        }
    }
}
