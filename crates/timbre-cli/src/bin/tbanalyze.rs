//! tbanalyze - Extract embeddings, harmony and tags from audio files
//!
//! Usage: tbanalyze [--config <path>] [--library <dir>] <input>...
//!
//! MIDI inputs (.mid / .midi) get a harmony report and no embedding.

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use timbre_cli::library::{assign_identifier, save_record};
use timbre_cli::output::{print_error, print_json, InputReport};
use timbre_core::{AnalysisConfig, AnalysisError, AudioFormat, CancelToken, EncodedAudio, Engine};

#[derive(Parser, Debug)]
#[command(name = "tbanalyze")]
#[command(about = "Analyse audio files into embeddings", long_about = None)]
struct Args {
    /// Input audio or MIDI files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Path to configuration file (TOML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Save one record per analysed input into this directory
    #[arg(short, long)]
    library: Option<PathBuf>,

    /// Save library records as JSON instead of binary .tbe
    #[arg(long)]
    json_records: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Default: no logs, so stdout stays clean JSON
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

    let engine = match Engine::start(config) {
        Ok(engine) => engine,
        Err(e) => {
            print_error(&e);
            return Err(e).context("Failed to start analysis engine");
        }
    };

    let failed = run_tbanalyze(&engine, &args)?;
    engine.shutdown();

    if failed > 0 {
        anyhow::bail!("{} of {} inputs failed", failed, args.inputs.len());
    }
    Ok(())
}

/// How each input gets its report
enum Route {
    Failed(InputReport),
    Audio,
    Midi(EncodedAudio),
}

/// Analyse every input and print one report per input; returns the failure count
fn run_tbanalyze(engine: &Engine, args: &Args) -> Result<usize> {
    let start = std::time::Instant::now();

    // Unreadable files fail individually without stopping the batch
    let mut routes = Vec::with_capacity(args.inputs.len());
    let mut audio = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        match EncodedAudio::from_path(path) {
            Ok(input) if input.format() == AudioFormat::Midi => routes.push(Route::Midi(input)),
            Ok(input) => {
                audio.push(input);
                routes.push(Route::Audio);
            }
            Err(e) => routes.push(Route::Failed(InputReport::from_result(display(path), Err(e)))),
        }
    }

    let cancel = CancelToken::new();
    let mut results = engine.analyze_batch(&audio, &cancel).into_iter();

    let mut reports: Vec<InputReport> = routes
        .into_iter()
        .zip(&args.inputs)
        .map(|(route, path)| match route {
            Route::Failed(report) => report,
            Route::Audio => {
                let result = results
                    .next()
                    .unwrap_or(Err(AnalysisError::Cancelled));
                InputReport::from_result(display(path), result)
            }
            Route::Midi(input) => {
                InputReport::from_midi_result(display(path), engine.analyze_midi(&input, &cancel))
            }
        })
        .collect();

    if let Some(dir) = &args.library {
        let mut taken = HashSet::new();
        for (report, path) in reports.iter_mut().zip(&args.inputs) {
            let Some(analysis) = &report.analysis else {
                continue;
            };
            let identifier = assign_identifier(dir, &stem(path), &analysis.fingerprint, &mut taken);
            let record = analysis.to_record(identifier);
            let saved = save_record(dir, &record, args.json_records)?;
            report.record = Some(saved.display().to_string());
        }
    }

    let failed = reports.iter().filter(|r| r.is_error()).count();
    log::info!(
        "Analysed {} inputs in {:.2}s ({} failed, cache {:?})",
        reports.len(),
        start.elapsed().as_secs_f64(),
        failed,
        engine.cache_stats()
    );

    print_json(&reports);
    Ok(failed)
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// Input file stem, the preferred record identifier
fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| display(path))
}
