//! tbcompare - Rank a library against a query, or classify the query
//!
//! Usage:
//!   tbcompare <query> <library_dir>                   # configured mode
//!   tbcompare --mode euclidean --top 5 <query> <dir>
//!   tbcompare --mode classify <query>                 # needs models.classifier
//!
//! The query is an audio file or a saved record (.tbe / .json).

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use timbre_cli::library::{candidates, load_library};
use timbre_cli::output::{print_error, print_json};
use timbre_core::{
    AnalysisConfig, AnalysisError, CancelToken, Classification, ComparisonMode, Embedding,
    EncodedAudio, Engine, ScoreResult,
};
use timbre_store::{EmbeddingRecord, RECORD_EXTENSION};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Cosine,
    Euclidean,
    Classify,
}

impl From<ModeArg> for ComparisonMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Cosine => ComparisonMode::Cosine,
            ModeArg::Euclidean => ComparisonMode::Euclidean,
            ModeArg::Classify => ComparisonMode::Classify,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "tbcompare")]
#[command(about = "Compare a query against a library of embeddings", long_about = None)]
struct Args {
    /// Query audio file or embedding record
    query: PathBuf,

    /// Library directory of .tbe / .json records
    library: Option<PathBuf>,

    /// Path to configuration file (TOML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comparison mode (overrides the configuration)
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// Only report the best N entries
    #[arg(short, long)]
    top: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct CompareOutput {
    query: String,
    config_version: String,
    candidates: usize,
    result: ScoreResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    classification: Option<Classification>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Off)
            .init();
    }

    let config = match &args.config {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("Failed to load configuration: {}", path.display()))?,
        None => AnalysisConfig::default(),
    };
    let mode = args.mode.map(ComparisonMode::from).unwrap_or(config.comparison);

    let engine = match Engine::start(config) {
        Ok(engine) => engine,
        Err(e) => {
            print_error(&e);
            return Err(e).context("Failed to start analysis engine");
        }
    };

    let outcome = run_tbcompare(&engine, &args, mode);
    engine.shutdown();
    outcome
}

fn run_tbcompare(engine: &Engine, args: &Args, mode: ComparisonMode) -> Result<()> {
    if !args.query.exists() {
        anyhow::bail!("Query file not found: {}", args.query.display());
    }

    let query = match query_embedding(engine, &args.query) {
        Ok(query) => query,
        Err(e) => {
            if let Some(analysis_error) = e.downcast_ref::<AnalysisError>() {
                print_error(analysis_error);
            }
            return Err(e);
        }
    };

    let library = match (mode, &args.library) {
        (ComparisonMode::Classify, _) => Vec::new(),
        (_, Some(dir)) => candidates(load_library(dir)?, engine.config_version()),
        (_, None) => anyhow::bail!("A library directory is required for {:?} comparison", mode),
    };

    let start = std::time::Instant::now();
    let result = match engine.compare_with(mode, &query, &library, args.top) {
        Ok(result) => result,
        Err(e) => {
            print_error(&e);
            return Err(e).context("Comparison failed");
        }
    };
    log::info!(
        "Scored {} candidates in {:.3}s",
        library.len(),
        start.elapsed().as_secs_f64()
    );

    let classification = match mode {
        ComparisonMode::Classify => Some(Classification::from_scores(
            &result,
            engine.config().confidence_threshold,
        )),
        _ => None,
    };

    print_json(&CompareOutput {
        query: args.query.display().to_string(),
        config_version: engine.config_version().to_string(),
        candidates: library.len(),
        result,
        classification,
    });
    Ok(())
}

/// Embedding of the query: loaded from a record, or analysed from audio
fn query_embedding(engine: &Engine, path: &Path) -> Result<Embedding> {
    let is_record = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| ext == RECORD_EXTENSION || ext == "json")
        .unwrap_or(false);

    if is_record {
        let record = EmbeddingRecord::load_auto(path)
            .with_context(|| format!("Failed to load query record: {}", path.display()))?;
        if !record.matches_version(engine.config_version()) {
            return Err(AnalysisError::ConfigMismatch {
                expected: engine.config_version().to_string(),
                found: record.metadata.config_version,
            })
            .with_context(|| format!("Query record is stale: {}", path.display()));
        }
        return Ok(Embedding::new(record.values, record.metadata.config_version));
    }

    let input = EncodedAudio::from_path(path)?;
    let analysis = engine.analyze(&input, &CancelToken::new())?;
    Ok(analysis.embedding)
}
