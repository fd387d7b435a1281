//! The local media tool seam.
//!
//! [`MediaTool`] covers the handful of subprocess operations the stitch and
//! audio stages need. [`FfmpegTool`] implements it by shelling out to
//! `ffmpeg` / `ffprobe`; every call captures stderr so failures carry the
//! tool's own diagnostics.

use std::path::Path;

use async_trait::async_trait;
use storyreel_core::ffmpeg;

use crate::error::PipelineError;

/// How to fit a soundtrack onto a video when muxing.
#[derive(Debug, Clone, PartialEq)]
pub struct MuxPlan {
    /// Audio filter chain applied before the output is cut.
    pub audio_filter: Option<String>,
    /// Output length in seconds (always the video's length).
    pub duration_secs: f64,
}

#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Fail fast when the tool is not on the execution path.
    fn ensure_available(&self) -> Result<(), PipelineError>;

    /// Stream-copy concatenation of the files listed in a concat manifest.
    async fn concat(&self, manifest: &Path, output: &Path) -> Result<(), PipelineError>;

    async fn probe_duration(&self, path: &Path) -> Result<f64, PipelineError>;

    /// Write a silent audio clip of the given length.
    async fn silence(&self, duration_secs: f64, output: &Path) -> Result<(), PipelineError>;

    /// Cut audio down to its first `duration_secs`.
    async fn trim_audio(&self, input: &Path, duration_secs: f64, output: &Path) -> Result<(), PipelineError>;

    /// Append `second` to `first`, crossfading when `crossfade_secs > 0`.
    async fn append_audio(
        &self,
        first: &Path,
        second: &Path,
        crossfade_secs: f64,
        output: &Path,
    ) -> Result<(), PipelineError>;

    /// Put `audio` under `video`, copying the video stream untouched.
    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        plan: &MuxPlan,
        output: &Path,
    ) -> Result<(), PipelineError>;
}

/// [`MediaTool`] backed by FFmpeg subprocesses.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffmpeg_bin: String,
    ffprobe_bin: String,
}

impl FfmpegTool {
    pub fn new(ffmpeg_bin: impl Into<String>, ffprobe_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<(), PipelineError> {
        let output = tokio::process::Command::new(&self.ffmpeg_bin)
            .args(["-y", "-hide_banner", "-loglevel", "error"])
            .args(args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    PipelineError::ToolUnavailable(format!("{}: {e}", self.ffmpeg_bin))
                }
                _ => PipelineError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            tracing::error!(
                exit_code = ?output.status.code(),
                stderr = %stderr,
                "ffmpeg invocation failed"
            );
            return Err(PipelineError::ToolExecution {
                exit_code: output.status.code(),
                stderr,
            });
        }
        Ok(())
    }
}

fn path_arg(path: &Path) -> Result<&str, PipelineError> {
    path.to_str()
        .ok_or_else(|| PipelineError::Validation(format!("non UTF-8 path: {}", path.display())))
}

#[async_trait]
impl MediaTool for FfmpegTool {
    fn ensure_available(&self) -> Result<(), PipelineError> {
        for bin in [&self.ffmpeg_bin, &self.ffprobe_bin] {
            which::which(bin)
                .map_err(|e| PipelineError::ToolUnavailable(format!("{bin}: {e}")))?;
        }
        Ok(())
    }

    async fn concat(&self, manifest: &Path, output: &Path) -> Result<(), PipelineError> {
        self.run(&[
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
            path_arg(manifest)?,
            "-c",
            "copy",
            path_arg(output)?,
        ])
        .await
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64, PipelineError> {
        let probe = ffmpeg::probe_media(&self.ffprobe_bin, path).await?;
        Ok(probe.duration_secs)
    }

    async fn silence(&self, duration_secs: f64, output: &Path) -> Result<(), PipelineError> {
        let duration = format!("{duration_secs:.3}");
        self.run(&[
            "-f",
            "lavfi",
            "-i",
            "anullsrc=r=44100:cl=stereo",
            "-t",
            &duration,
            "-c:a",
            "libmp3lame",
            "-q:a",
            "4",
            path_arg(output)?,
        ])
        .await
    }

    async fn trim_audio(&self, input: &Path, duration_secs: f64, output: &Path) -> Result<(), PipelineError> {
        let duration = format!("{duration_secs:.3}");
        self.run(&[
            "-i",
            path_arg(input)?,
            "-t",
            &duration,
            "-c:a",
            "libmp3lame",
            "-q:a",
            "2",
            path_arg(output)?,
        ])
        .await
    }

    async fn append_audio(
        &self,
        first: &Path,
        second: &Path,
        crossfade_secs: f64,
        output: &Path,
    ) -> Result<(), PipelineError> {
        let filter = if crossfade_secs > 0.0 {
            format!("[0:a][1:a]acrossfade=d={crossfade_secs:.3}:c1=tri:c2=tri[out]")
        } else {
            "[0:a][1:a]concat=n=2:v=0:a=1[out]".to_string()
        };
        self.run(&[
            "-i",
            path_arg(first)?,
            "-i",
            path_arg(second)?,
            "-filter_complex",
            &filter,
            "-map",
            "[out]",
            "-c:a",
            "libmp3lame",
            "-q:a",
            "2",
            path_arg(output)?,
        ])
        .await
    }

    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        plan: &MuxPlan,
        output: &Path,
    ) -> Result<(), PipelineError> {
        let duration = format!("{:.3}", plan.duration_secs);
        let mut args = vec![
            "-i",
            path_arg(video)?,
            "-i",
            path_arg(audio)?,
            "-map",
            "0:v:0",
            "-map",
            "1:a:0",
            "-c:v",
            "copy",
        ];
        if let Some(filter) = plan.audio_filter.as_deref() {
            args.extend(["-af", filter]);
        }
        args.extend(["-c:a", "aac", "-b:a", "192k", "-t", &duration, path_arg(output)?]);
        self.run(&args).await
    }
}
