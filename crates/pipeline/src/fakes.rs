//! In-process stand-ins for the external providers and the media tool.
//!
//! [`FakeMediaTool`] understands a tiny textual container,
//! `media:<seconds>:<label>`, so durations and clip order can be asserted
//! without FFmpeg installed.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use storyreel_core::render::RenderRequest;
use storyreel_providers::{
    ComposeRequest, ComposedAudio, Coverage, MusicProvider, ProviderError, RemoteJob,
    RemoteStatus, RenderProvider,
};
use tokio::sync::Semaphore;

use crate::error::PipelineError;
use crate::media::{MediaTool, MuxPlan};

// ---------------------------------------------------------------------------
// Fake container format
// ---------------------------------------------------------------------------

pub fn fake_media(duration_secs: f64, label: &str) -> Bytes {
    Bytes::from(format!("media:{duration_secs}:{label}"))
}

/// Parse a fake media blob into `(duration, label)`.
pub fn parse_fake_media(bytes: &[u8]) -> Option<(f64, String)> {
    let text = std::str::from_utf8(bytes).ok()?;
    let rest = text.strip_prefix("media:")?;
    let (duration, label) = rest.split_once(':')?;
    Some((duration.parse().ok()?, label.to_string()))
}

async fn read_fake(path: &Path) -> Result<(f64, String), PipelineError> {
    let bytes = tokio::fs::read(path).await?;
    parse_fake_media(&bytes).ok_or_else(|| PipelineError::ToolExecution {
        exit_code: Some(1),
        stderr: format!("{}: Invalid data found when processing input", path.display()),
    })
}

async fn write_fake(path: &Path, duration_secs: f64, label: &str) -> Result<(), PipelineError> {
    tokio::fs::write(path, fake_media(duration_secs, label)).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Media tool
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeMediaTool {
    pub unavailable: bool,
    pub fail_concat: bool,
    pub concat_calls: AtomicUsize,
    pub mux_plans: Mutex<Vec<MuxPlan>>,
}

impl FakeMediaTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concat_calls(&self) -> usize {
        self.concat_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTool for FakeMediaTool {
    fn ensure_available(&self) -> Result<(), PipelineError> {
        if self.unavailable {
            return Err(PipelineError::ToolUnavailable("ffmpeg: not found".into()));
        }
        Ok(())
    }

    async fn concat(&self, manifest: &Path, output: &Path) -> Result<(), PipelineError> {
        self.concat_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_concat {
            return Err(PipelineError::ToolExecution {
                exit_code: Some(1),
                stderr: "concat: Invalid data found when processing input".into(),
            });
        }

        let listing = tokio::fs::read_to_string(manifest).await?;
        let mut total = 0.0;
        let mut labels = Vec::new();
        for line in listing.lines().filter(|l| !l.trim().is_empty()) {
            let path = line
                .trim()
                .strip_prefix("file '")
                .and_then(|l| l.strip_suffix('\''))
                .ok_or_else(|| PipelineError::ToolExecution {
                    exit_code: Some(1),
                    stderr: format!("bad manifest line: {line}"),
                })?;
            let (duration, label) = read_fake(Path::new(path)).await?;
            total += duration;
            labels.push(label);
        }
        write_fake(output, total, &labels.join(",")).await
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64, PipelineError> {
        Ok(read_fake(path).await?.0)
    }

    async fn silence(&self, duration_secs: f64, output: &Path) -> Result<(), PipelineError> {
        write_fake(output, duration_secs, "silence").await
    }

    async fn trim_audio(&self, input: &Path, duration_secs: f64, output: &Path) -> Result<(), PipelineError> {
        let (duration, label) = read_fake(input).await?;
        write_fake(output, duration.min(duration_secs.max(0.0)), &label).await
    }

    async fn append_audio(
        &self,
        first: &Path,
        second: &Path,
        crossfade_secs: f64,
        output: &Path,
    ) -> Result<(), PipelineError> {
        let (a, a_label) = read_fake(first).await?;
        let (b, b_label) = read_fake(second).await?;
        let overlap = crossfade_secs.max(0.0).min(a).min(b);
        write_fake(output, a + b - overlap, &format!("{a_label},{b_label}")).await
    }

    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        plan: &MuxPlan,
        output: &Path,
    ) -> Result<(), PipelineError> {
        let (_, video_label) = read_fake(video).await?;
        let (_, audio_label) = read_fake(audio).await?;
        self.mux_plans
            .lock()
            .map_err(|_| PipelineError::Validation("mux plan log poisoned".into()))?
            .push(plan.clone());
        write_fake(output, plan.duration_secs, &format!("{video_label}|{audio_label}")).await
    }
}

// ---------------------------------------------------------------------------
// Render provider
// ---------------------------------------------------------------------------

/// Render provider returning fixed-length stub clips labelled by prompt.
pub struct FakeRender {
    clip_secs: f64,
    failing_prompts: HashSet<String>,
    /// When set, each poll waits for a permit before answering.
    gate: Option<Arc<Semaphore>>,
    /// Upcoming submissions and downloads answered with a 502.
    flaky_submits: AtomicUsize,
    flaky_downloads: AtomicUsize,
    pub submitted: AtomicUsize,
}

fn bad_gateway(counter: &AtomicUsize) -> Result<(), ProviderError> {
    let took = counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if took {
        return Err(ProviderError::Api {
            status: 502,
            body: "bad gateway".into(),
        });
    }
    Ok(())
}

impl FakeRender {
    pub fn new(clip_secs: f64) -> Self {
        Self {
            clip_secs,
            failing_prompts: HashSet::new(),
            gate: None,
            flaky_submits: AtomicUsize::new(0),
            flaky_downloads: AtomicUsize::new(0),
            submitted: AtomicUsize::new(0),
        }
    }

    /// Renders of scenes with this prompt end in a remote failure.
    pub fn failing(mut self, prompt: &str) -> Self {
        self.failing_prompts.insert(prompt.to_string());
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Answer the next `n` submissions with a 502.
    pub fn flaky_submits(self, n: usize) -> Self {
        self.flaky_submits.store(n, Ordering::SeqCst);
        self
    }

    /// Answer the next `n` downloads with a 502.
    pub fn flaky_downloads(self, n: usize) -> Self {
        self.flaky_downloads.store(n, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl RenderProvider for FakeRender {
    async fn submit(&self, request: &RenderRequest) -> Result<String, ProviderError> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        bad_gateway(&self.flaky_submits)?;
        Ok(format!("fake:{}", request.prompt))
    }

    async fn poll(&self, handle: &str) -> Result<RemoteJob, ProviderError> {
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| ProviderError::Decode(e.to_string()))?;
            permit.forget();
        }
        let prompt = handle.trim_start_matches("fake:");
        let failed = self.failing_prompts.contains(prompt);
        Ok(RemoteJob {
            handle: handle.to_string(),
            status: if failed {
                RemoteStatus::Failed
            } else {
                RemoteStatus::Succeeded
            },
            output_url: (!failed).then(|| format!("fake://{prompt}")),
            error: failed.then(|| "render rejected by provider".to_string()),
        })
    }

    async fn download(&self, url: &str) -> Result<Bytes, ProviderError> {
        bad_gateway(&self.flaky_downloads)?;
        let label = url.trim_start_matches("fake://");
        Ok(fake_media(self.clip_secs, label))
    }
}

// ---------------------------------------------------------------------------
// Music provider
// ---------------------------------------------------------------------------

/// Music provider returning clips of exactly the requested duration, or of
/// the requested duration rounded up to whole seconds.
pub struct FakeMusic {
    coverage: Coverage,
    hosted: bool,
    whole_seconds: bool,
    fail_all: bool,
    failing_calls: HashSet<usize>,
    pub requests: Mutex<Vec<ComposeRequest>>,
}

impl FakeMusic {
    pub fn new(coverage: Coverage) -> Self {
        Self {
            coverage,
            hosted: false,
            whole_seconds: false,
            fail_all: false,
            failing_calls: HashSet::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Attach a provider-hosted URL to every response.
    pub fn hosted(mut self) -> Self {
        self.hosted = true;
        self
    }

    /// Round every generated segment up to whole seconds, the way MusicGen
    /// only accepts integer durations.
    pub fn whole_seconds(mut self) -> Self {
        self.whole_seconds = true;
        self
    }

    pub fn failing_all(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Fail the `n`th compose call (zero-based).
    pub fn failing_call(mut self, n: usize) -> Self {
        self.failing_calls.insert(n);
        self
    }

    pub fn recorded(&self) -> Vec<ComposeRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MusicProvider for FakeMusic {
    async fn compose(&self, request: &ComposeRequest) -> Result<ComposedAudio, ProviderError> {
        let (call, previous_secs) = {
            let mut log = self
                .requests
                .lock()
                .map_err(|e| ProviderError::Decode(e.to_string()))?;
            log.push(request.clone());
            let previous = request
                .continuation
                .as_ref()
                .map(|c| c.window_end_secs)
                .unwrap_or(0.0);
            (log.len() - 1, previous)
        };

        if self.fail_all || self.failing_calls.contains(&call) {
            return Err(ProviderError::JobFailed {
                handle: format!("music-{call}"),
                message: "generation failed".into(),
            });
        }

        let segment_secs = if self.whole_seconds {
            request.duration_secs.ceil()
        } else {
            request.duration_secs
        };
        let (duration, label) = match self.coverage {
            Coverage::Cumulative => (previous_secs + segment_secs, format!("upto{call}")),
            Coverage::Increment => (segment_secs, format!("music{call}")),
        };
        Ok(ComposedAudio {
            bytes: fake_media(duration, &label),
            hosted_url: self
                .hosted
                .then(|| format!("https://provider.example/out/{call}.mp3")),
            coverage: self.coverage,
        })
    }
}
