//! FFprobe duration lookup.

use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Get media duration in seconds.
pub async fn get_duration(path: impl AsRef<Path>) -> MediaResult<f64> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: "FFprobe failed".to_string(),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_duration(&output.stdout)
}

fn parse_duration(stdout: &[u8]) -> MediaResult<f64> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| MediaError::InvalidDuration(e.to_string()))?;

    let raw = probe
        .format
        .duration
        .ok_or_else(|| MediaError::InvalidDuration("missing format.duration".to_string()))?;

    raw.trim()
        .parse::<f64>()
        .map_err(|_| MediaError::InvalidDuration(raw))
}
