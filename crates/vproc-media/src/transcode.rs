//! Trimming and fixed-resolution transcoding.

use std::path::Path;
use tracing::{debug, info};

use vproc_models::{EncodingConfig, TargetResolution};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::fs_utils::{move_file, remove_if_exists, staging_path};

/// Cut a video down to its first `max_seconds` seconds without re-encoding.
pub async fn trim_video(
    runner: &FfmpegRunner,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    max_seconds: u64,
) -> MediaResult<()> {
    let input = input.as_ref();
    let output = output.as_ref();

    info!(
        "Trimming video: {} -> {} (max: {}s)",
        input.display(),
        output.display(),
        max_seconds
    );

    let cmd = trim_command(input, output, max_seconds);
    runner.run(&cmd).await
}

/// Transcode a video to `target`, publishing `output` only on success.
///
/// `duration_hint` is the probed input duration and only drives progress logs.
pub async fn convert_to_resolution(
    runner: &FfmpegRunner,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    target: TargetResolution,
    encoding: &EncodingConfig,
    duration_hint: Option<f64>,
) -> MediaResult<()> {
    let input = input.as_ref();
    let output = output.as_ref();
    let staged = staging_path(output);

    info!(
        "Converting video to {}: {} -> {}",
        target.as_str(),
        input.display(),
        output.display()
    );

    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let cmd = transcode_command(input, &staged, target, encoding);
    let output_name = output.display().to_string();
    let result = runner
        .run_with_progress(&cmd, move |progress| {
            if let Some(total) = duration_hint {
                debug!(
                    output = %output_name,
                    percent = progress.percentage(total),
                    speed = progress.speed,
                    "Transcode progress"
                );
            }
        })
        .await;

    if let Err(e) = result {
        let _ = remove_if_exists(&staged).await;
        return Err(e);
    }

    move_file(&staged, output).await
}

fn trim_command(input: &Path, output: &Path, max_seconds: u64) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .duration(max_seconds as f64)
        .codec_copy()
}

fn transcode_command(
    input: &Path,
    output: &Path,
    target: TargetResolution,
    encoding: &EncodingConfig,
) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .video_filter(target.scale_filter())
        .output_args(encoding.to_ffmpeg_args())
        .output_args(["-movflags", "+faststart"])
        // Staged file has no usable extension, so the muxer is explicit.
        .format("mp4")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_command_args() {
        let args = trim_command(Path::new("in.mp4"), Path::new("out.mp4"), 30).build_args();
        let joined = args.join(" ");

        assert!(joined.contains("-t 30.000 -i in.mp4"));
        assert!(joined.ends_with("-c copy out.mp4"));
    }

    #[test]
    fn test_transcode_command_args() {
        let args = transcode_command(
            Path::new("in.mp4"),
            Path::new("out.mp4.partial"),
            TargetResolution::Hd720,
            &EncodingConfig::default(),
        )
        .build_args();
        let joined = args.join(" ");

        assert!(joined.contains("-vf scale=-2:720"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-movflags +faststart"));
        assert!(joined.ends_with("-f mp4 out.mp4.partial"));
    }
}
