//! Fallback decoding through an external ffmpeg process

use super::{AudioBuffer, EncodedAudio};
use crate::cancel::DecodeBudget;
use crate::config::ChannelLayout;
use crate::error::{AnalysisError, Result};
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

const FFMPEG: &str = "ffmpeg";
const POLL_INTERVAL: Duration = Duration::from_millis(10);

static FFMPEG_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Whether an `ffmpeg` binary can be spawned; looked up once per process
pub fn transcoder_available() -> bool {
    *FFMPEG_AVAILABLE.get_or_init(|| {
        let found = Command::new(FFMPEG)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        log::debug!("ffmpeg {}", if found { "found" } else { "not found" });
        found
    })
}

/// Decode anything ffmpeg understands to raw f32 PCM at the target layout.
///
/// In-memory input is spilled to a temporary file that is removed on return.
/// The process is killed if the budget runs out.
pub fn transcode(
    input: &EncodedAudio,
    target_sample_rate: u32,
    layout: ChannelLayout,
    budget: &DecodeBudget,
) -> Result<AudioBuffer> {
    if !transcoder_available() {
        return Err(AnalysisError::UnsupportedFormat(format!(
            "{:?} input needs ffmpeg, which was not found on PATH",
            input.format()
        )));
    }

    let mut spill = None;
    let source = match input.path() {
        Some(path) => path.to_path_buf(),
        None => {
            let suffix = input.hint().map(|h| format!(".{}", h)).unwrap_or_default();
            let mut file = tempfile::Builder::new()
                .prefix("timbre-")
                .suffix(&suffix)
                .tempfile()?;
            file.write_all(input.bytes())?;
            file.flush()?;
            let path = file.path().to_path_buf();
            spill = Some(file);
            path
        }
    };

    let result = run_ffmpeg(&source, target_sample_rate, layout, budget);
    drop(spill);
    result
}

fn run_ffmpeg(
    source: &Path,
    target_sample_rate: u32,
    layout: ChannelLayout,
    budget: &DecodeBudget,
) -> Result<AudioBuffer> {
    let mut child = Command::new(FFMPEG)
        .arg("-nostdin")
        .arg("-hide_banner")
        .arg("-i")
        .arg(source)
        .arg("-vn") // No video
        .arg("-acodec")
        .arg("pcm_f32le")
        .arg("-ar")
        .arg(target_sample_rate.to_string())
        .arg("-ac")
        .arg(layout.count().to_string())
        .arg("-f")
        .arg("f32le")
        .arg("pipe:1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = thread::spawn(move || read_all(stdout));
    let stderr_reader = thread::spawn(move || read_all(stderr));

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if let Err(e) = budget.check() {
            kill(&mut child);
            log::warn!("ffmpeg stopped for {}: {}", source.display(), e);
            return Err(e);
        }
        thread::sleep(POLL_INTERVAL);
    };

    let pcm = stdout_reader.join().unwrap_or_default();
    let diagnostics = String::from_utf8_lossy(&stderr_reader.join().unwrap_or_default()).into_owned();

    if !status.success() {
        let last_line = diagnostics.lines().last().unwrap_or("").trim().to_string();
        log::debug!("ffmpeg failed ({}): {}", status, diagnostics);
        return Err(if diagnostics.contains("Invalid data found") {
            AnalysisError::UnsupportedFormat(format!("ffmpeg: {}", last_line))
        } else {
            AnalysisError::CorruptInput(format!("ffmpeg exited with {}: {}", status, last_line))
        });
    }

    let samples: Vec<f32> = pcm
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    log::debug!("ffmpeg produced {} samples from {}", samples.len(), source.display());
    AudioBuffer::new(samples, target_sample_rate, layout.count())
}

fn read_all<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut data = Vec::new();
    if let Some(mut pipe) = pipe {
        // A failed read leaves a short buffer; the exit status reports the error
        let _ = pipe.read_to_end(&mut data);
    }
    data
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
