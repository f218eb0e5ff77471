//! Library directories of embedding records

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use timbre_core::{Candidate, Embedding};
use timbre_store::{EmbeddingRecord, JsonRecord, RecordReader, RecordWriter, RECORD_EXTENSION};

/// Hex digits of the fingerprint appended to a clashing identifier
const SUFFIX_LEN: usize = 8;

/// Write `record` into `dir` as `<identifier>.tbe`, or `.json` when `json` is set
pub fn save_record(dir: &Path, record: &EmbeddingRecord, json: bool) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create library directory: {}", dir.display()))?;

    let extension = if json { "json" } else { RECORD_EXTENSION };
    let path = dir.join(format!("{}.{}", record.metadata.identifier, extension));
    if json {
        JsonRecord::from_record(record).save(&path)?;
    } else {
        RecordWriter::new().write(&path, record)?;
    }
    log::info!("Saved record {}", path.display());
    Ok(path)
}

/// Record identifier for an input named `stem`, unique within the run.
///
/// The stem is kept unless an earlier input of the run took it, or `dir`
/// already holds a record under that name for different content. Then the
/// first hex digits of `fingerprint` are appended (`stem-1a2b3c4d`).
pub fn assign_identifier(
    dir: &Path,
    stem: &str,
    fingerprint: &str,
    taken: &mut HashSet<String>,
) -> String {
    let clashes = |id: &str| {
        taken.contains(id)
            || stored_fingerprint(dir, id).map_or(false, |stored| stored != fingerprint)
    };

    let suffix = fingerprint.get(..SUFFIX_LEN).unwrap_or(fingerprint);
    let mut identifier = stem.to_string();
    if clashes(&identifier) {
        identifier = format!("{}-{}", stem, suffix);
    }
    let mut n = 2;
    while clashes(&identifier) {
        identifier = format!("{}-{}-{}", stem, suffix, n);
        n += 1;
    }

    if identifier != stem {
        log::warn!("Identifier {} is taken; saving as {}", stem, identifier);
    }
    taken.insert(identifier.clone());
    identifier
}

/// Fingerprint of the record saved as `identifier` in `dir`, if readable
fn stored_fingerprint(dir: &Path, identifier: &str) -> Option<String> {
    let binary = dir.join(format!("{}.{}", identifier, RECORD_EXTENSION));
    if binary.exists() {
        return RecordReader::read_metadata(&binary).ok().map(|m| m.fingerprint);
    }
    let json = dir.join(format!("{}.json", identifier));
    if json.exists() {
        return JsonRecord::load(&json).ok().map(|r| r.metadata.fingerprint);
    }
    None
}

/// Load every `.tbe` and `.json` record in `dir`, in parallel.
///
/// Unreadable files are skipped with a warning. Records are sorted by
/// identifier.
pub fn load_library(dir: &Path) -> Result<Vec<EmbeddingRecord>> {
    if !dir.is_dir() {
        anyhow::bail!("Library directory not found: {}", dir.display());
    }

    let paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| is_record_file(path))
        .collect();

    log::info!("Found {} records, loading in parallel...", paths.len());
    let start = std::time::Instant::now();

    let mut records: Vec<EmbeddingRecord> = paths
        .par_iter()
        .filter_map(|path| match EmbeddingRecord::load_auto(path) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Failed to load {}: {}", path.display(), e);
                None
            }
        })
        .collect();
    records.sort_by(|a, b| a.metadata.identifier.cmp(&b.metadata.identifier));

    log::info!("Loaded {} records in {:.2}s", records.len(), start.elapsed().as_secs_f64());
    Ok(records)
}

fn is_record_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| ext == RECORD_EXTENSION || ext == "json")
        .unwrap_or(false)
}

/// Candidates extracted with `config_version`; other records are skipped
pub fn candidates(records: Vec<EmbeddingRecord>, config_version: &str) -> Vec<Candidate> {
    records
        .into_iter()
        .filter_map(|record| {
            if !record.matches_version(config_version) {
                log::warn!(
                    "Skipping {}: extracted with config {} (current {})",
                    record.metadata.identifier,
                    record.metadata.config_version,
                    config_version
                );
                return None;
            }
            let embedding = Embedding::new(record.values, record.metadata.config_version);
            Some(Candidate::new(record.metadata.identifier, embedding))
        })
        .collect()
}
