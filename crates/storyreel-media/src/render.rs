//! Still-image narration segment rendering.

use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::get_duration;

/// A rendered clip on the scratch filesystem.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedClip {
    pub path: PathBuf,
    pub duration: f64,
}

/// Build the command that loops `image` for the length of `audio`.
pub fn still_segment_command(image: &Path, audio: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(output)
        .input_with_args(image, ["-loop", "1"])
        .input(audio)
        .video_codec("libx264")
        .output_args(["-tune", "stillimage"])
        .audio_codec("aac")
        .audio_bitrate("192k")
        .output_args(["-pix_fmt", "yuv420p", "-shortest"])
}

/// Render `image` + `audio` into an mp4 in `output_dir`.
pub async fn render_still_segment<C>(
    runner: &FfmpegRunner,
    image: &Path,
    audio: &Path,
    output_dir: &Path,
    cancelled: C,
) -> MediaResult<RenderedClip>
where
    C: Future<Output = ()>,
{
    for input in [image, audio] {
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }
    }

    let output = output_dir.join(format!("{}.mp4", uuid::Uuid::new_v4()));
    let cmd = still_segment_command(image, audio, &output);
    runner.run_until(&cmd, cancelled).await?;

    let duration = get_duration(&output).await?;
    debug!(
        output = %output.display(),
        duration = duration,
        "Rendered still segment"
    );

    Ok(RenderedClip {
        path: output,
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_still_segment_command() {
        let args = still_segment_command(
            Path::new("/tmp/bg.png"),
            Path::new("/tmp/voice.mp3"),
            Path::new("/tmp/out.mp4"),
        )
        .build_args();

        assert!(args.windows(2).any(|w| w == ["-tune", "stillimage"]));
        assert!(args.windows(2).any(|w| w == ["-b:a", "192k"]));
        assert!(args.contains(&"-shortest".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");
    }

    #[tokio::test]
    async fn test_missing_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = render_still_segment(
            &FfmpegRunner::new(),
            &dir.path().join("missing.png"),
            &dir.path().join("missing.mp3"),
            dir.path(),
            std::future::pending::<()>(),
        )
        .await;
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }
}
