//! Segment concatenation through the concat demuxer.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Render the concat demuxer list for `files`, in order.
pub fn concat_list_contents(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|f| format!("file '{}'\n", f.to_string_lossy().replace('\'', "'\\''")))
        .collect()
}

/// Concatenate `files` (already in playback order) into one mp4 in `output_dir`.
///
/// The input files are removed once the joined file exists.
pub async fn concatenate_segments(
    runner: &FfmpegRunner,
    files: &[PathBuf],
    output_dir: &Path,
) -> MediaResult<PathBuf> {
    if files.is_empty() {
        return Err(MediaError::EmptyInput);
    }

    let id = uuid::Uuid::new_v4();
    let list_path = output_dir.join(format!("{}.txt", id));
    let output = output_dir.join(format!("{}.mp4", id));

    tokio::fs::write(&list_path, concat_list_contents(files)).await?;

    let cmd = FfmpegCommand::new(&output)
        .input_with_args(&list_path, ["-f", "concat", "-safe", "0"])
        .stream_copy();
    let result = runner.run(&cmd).await;

    if let Err(e) = tokio::fs::remove_file(&list_path).await {
        warn!("Failed to remove concat list {}: {}", list_path.display(), e);
    }
    result?;

    for file in files {
        if let Err(e) = tokio::fs::remove_file(file).await {
            warn!("Failed to remove segment file {}: {}", file.display(), e);
        }
    }

    info!(segments = files.len(), output = %output.display(), "Concatenated video segments");
    Ok(output)
}
