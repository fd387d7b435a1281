//! `ffprobe` invocation and the summary the pipeline reads from it.
//!
//! Only two facts matter downstream: how long a file plays and whether it
//! carries audio. [`MediaProbe`] condenses the raw JSON into exactly that.

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The probe binary could not be spawned.
    #[error("cannot run {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ffprobe exited with {exit_code:?}: {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("unreadable ffprobe output: {0}")]
    Parse(String),

    #[error("no such media file: {0}")]
    Missing(String),
}

// ---------------------------------------------------------------------------
// Raw ffprobe JSON (`-print_format json -show_format -show_streams`)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawProbe {
    #[serde(default)]
    streams: Vec<RawStream>,
    #[serde(default)]
    format: RawFormat,
}

#[derive(Debug, Deserialize)]
struct RawStream {
    codec_type: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFormat {
    duration: Option<String>,
}

fn seconds(field: Option<&str>) -> Option<f64> {
    field
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
}

/// What the pipeline needs to know about a media file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaProbe {
    /// Container duration, falling back to the first stream that reports
    /// one. Zero when nothing does.
    pub duration_secs: f64,
    pub has_audio: bool,
}

impl MediaProbe {
    /// Summarize raw `ffprobe` JSON.
    pub fn from_json(json: &str) -> Result<Self, ProbeError> {
        let raw: RawProbe =
            serde_json::from_str(json).map_err(|e| ProbeError::Parse(format!("{e}: {json}")))?;

        let duration_secs = seconds(raw.format.duration.as_deref())
            .or_else(|| {
                raw.streams
                    .iter()
                    .find_map(|s| seconds(s.duration.as_deref()))
            })
            .unwrap_or(0.0);
        let has_audio = raw
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio"));

        Ok(Self {
            duration_secs,
            has_audio,
        })
    }
}

/// Run `ffprobe_bin` against `path` and summarize the result.
pub async fn probe_media(ffprobe_bin: &str, path: &Path) -> Result<MediaProbe, ProbeError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(ProbeError::Missing(path.display().to_string()));
    }

    let output = tokio::process::Command::new(ffprobe_bin)
        .args(["-v", "error", "-print_format", "json"])
        .args(["-show_format", "-show_streams"])
        .arg(path)
        .output()
        .await
        .map_err(|source| ProbeError::Spawn {
            bin: ffprobe_bin.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(ProbeError::Failed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    MediaProbe::from_json(&String::from_utf8_lossy(&output.stdout))
}
