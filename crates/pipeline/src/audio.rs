//! Audio continuation pipeline.
//!
//! Builds a soundtrack scene by scene, strictly in order: each segment is
//! generated as a continuation of everything composed so far, referenced
//! through a fetchable URL (the provider's own, or one minted by the
//! [`ArtifactCache`]) plus a short trailing window. The finished track can
//! then be muxed under the stitched video.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;
use storyreel_core::audio::{
    atempo_chain, bounded_tempo_factor, continuation_window, tempo_factor, AudioErrorStrategy,
    SyncMode,
};
use storyreel_core::scene::SceneSpec;
use storyreel_providers::{ComposeRequest, Continuation, Coverage, MusicProvider};

use crate::cache::ArtifactCache;
use crate::config::AudioSettings;
use crate::error::PipelineError;
use crate::media::{MediaTool, MuxPlan};

/// Overshoot tolerated before the running track is cut back to the
/// storyboard length.
const TRIM_SLACK_SECS: f64 = 0.05;

/// A finished soundtrack.
#[derive(Debug, Clone)]
pub struct ComposedTrack {
    pub audio: Bytes,
    pub duration_secs: f64,
    /// Storyboard indices whose segment was replaced by silence.
    pub silent_scenes: Vec<usize>,
}

/// Duration reconciliation for muxing `audio_secs` of sound under
/// `video_secs` of picture. The video length is never changed.
pub fn mux_plan(mode: SyncMode, audio_secs: f64, video_secs: f64) -> MuxPlan {
    let audio_filter = match mode {
        SyncMode::Trim => "apad".to_string(),
        SyncMode::Stretch => format!("{},apad", atempo_chain(tempo_factor(audio_secs, video_secs))),
        SyncMode::Tempo => format!(
            "{},apad",
            atempo_chain(bounded_tempo_factor(audio_secs, video_secs))
        ),
    };
    MuxPlan {
        audio_filter: Some(audio_filter),
        duration_secs: video_secs,
    }
}

pub struct AudioPipeline {
    music: Arc<dyn MusicProvider>,
    tool: Arc<dyn MediaTool>,
    cache: Arc<ArtifactCache>,
    settings: AudioSettings,
    public_base_url: String,
    scratch_root: PathBuf,
}

/// Per-run scratch directory with sequentially numbered files.
struct Scratch<'a> {
    dir: &'a Path,
    next: usize,
}

impl Scratch<'_> {
    async fn write(&mut self, bytes: &[u8]) -> Result<PathBuf, PipelineError> {
        let path = self.reserve();
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    fn reserve(&mut self) -> PathBuf {
        self.next += 1;
        self.dir.join(format!("seg_{:04}.mp3", self.next))
    }
}

impl AudioPipeline {
    pub fn new(
        music: Arc<dyn MusicProvider>,
        tool: Arc<dyn MediaTool>,
        cache: Arc<ArtifactCache>,
        settings: AudioSettings,
        public_base_url: impl Into<String>,
        scratch_root: PathBuf,
    ) -> Self {
        Self {
            music,
            tool,
            cache,
            settings,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            scratch_root,
        }
    }

    pub fn settings(&self) -> &AudioSettings {
        &self.settings
    }

    /// Fetchable URL for a cached artifact token.
    pub fn segment_url(&self, token: &str) -> String {
        format!("{}/segments/{token}", self.public_base_url)
    }

    /// Compose one continuous track covering every scene in order.
    ///
    /// Scenes listed in `silent` (storyboard indices) are scored with
    /// silence without asking the provider, which keeps the track aligned
    /// with the storyboard when some renders failed.
    pub async fn compose(
        &self,
        scenes: &[SceneSpec],
        silent: &[usize],
        strategy: AudioErrorStrategy,
    ) -> Result<ComposedTrack, PipelineError> {
        if scenes.is_empty() {
            return Err(PipelineError::Validation("No scenes to score".into()));
        }
        self.tool.ensure_available()?;

        let scratch = self.scratch_dir("audio-").await?;
        let result = self
            .compose_in(
                &mut Scratch {
                    dir: scratch.path(),
                    next: 0,
                },
                scenes,
                silent,
                strategy,
            )
            .await;
        if let Err(e) = scratch.close() {
            tracing::warn!(error = %e, "Failed to remove audio scratch directory");
        }
        result
    }

    async fn compose_in(
        &self,
        scratch: &mut Scratch<'_>,
        scenes: &[SceneSpec],
        silent: &[usize],
        strategy: AudioErrorStrategy,
    ) -> Result<ComposedTrack, PipelineError> {
        let seed = i64::from(rand::rng().random::<u32>());
        let mut track: Option<Bytes> = None;
        // Provider-hosted copy of exactly `track`, when one exists.
        let mut hosted_url: Option<String> = None;
        let mut cumulative_secs = 0.0;
        // Storyboard length of every scene handled so far.
        let mut target_secs = 0.0;
        let mut silent_scenes = Vec::new();

        for (index, spec) in scenes.iter().enumerate() {
            target_secs += spec.duration_secs;
            let composed = if silent.contains(&index) {
                tracing::debug!(scene_index = index, "Scene has no clip, scoring with silence");
                None
            } else {
                let continuation = match &track {
                    None => None,
                    Some(current) => {
                        let url = match hosted_url.take() {
                            Some(url) => url,
                            None => {
                                let token = self.cache.store(current.clone()).await;
                                self.segment_url(&token)
                            }
                        };
                        let (start, end) = continuation_window(
                            cumulative_secs,
                            self.settings.continuation_window_secs,
                        );
                        Some(Continuation {
                            url,
                            window_start_secs: start,
                            window_end_secs: end,
                        })
                    }
                };
                let request = ComposeRequest {
                    prompt: spec.music_prompt(),
                    duration_secs: spec.duration_secs,
                    seed: Some(seed),
                    continuation,
                };
                match self.music.compose(&request).await {
                    Ok(audio) => Some(audio),
                    Err(e) => match strategy {
                        AudioErrorStrategy::Halt => {
                            tracing::error!(scene_index = index, error = %e, "Audio segment failed, halting");
                            return Err(PipelineError::AudioHalted {
                                scene_index: index,
                                source: Box::new(e.into()),
                            });
                        }
                        AudioErrorStrategy::ContinueWithSilence => {
                            tracing::warn!(
                                scene_index = index,
                                duration_secs = spec.duration_secs,
                                error = %e,
                                "Audio segment failed, substituting silence"
                            );
                            None
                        }
                    },
                }
            };

            let next = match composed {
                Some(audio) => match (audio.coverage, &track) {
                    (Coverage::Cumulative, _) | (Coverage::Increment, None) => {
                        hosted_url = audio.hosted_url;
                        audio.bytes
                    }
                    (Coverage::Increment, Some(previous)) => {
                        hosted_url = None;
                        self.append(scratch, previous, &audio.bytes, self.settings.crossfade_secs)
                            .await?
                    }
                },
                None => {
                    silent_scenes.push(index);
                    hosted_url = None;
                    let silence = self.silence(scratch, spec.duration_secs).await?;
                    match &track {
                        None => silence,
                        Some(previous) => self.append(scratch, previous, &silence, 0.0).await?,
                    }
                }
            };

            let mut path = scratch.write(&next).await?;
            cumulative_secs = self.tool.probe_duration(&path).await?;
            let next = if cumulative_secs > target_secs + TRIM_SLACK_SECS {
                // Providers may only generate whole seconds; cut the overshoot
                // so later segments start where the storyboard says.
                tracing::debug!(
                    scene_index = index,
                    cumulative_secs,
                    target_secs,
                    "Trimming soundtrack overshoot"
                );
                let trimmed = scratch.reserve();
                self.tool.trim_audio(&path, target_secs, &trimmed).await?;
                path = trimmed;
                cumulative_secs = self.tool.probe_duration(&path).await?;
                hosted_url = None;
                Bytes::from(tokio::fs::read(&path).await?)
            } else {
                next
            };
            tracing::debug!(scene_index = index, cumulative_secs, "Audio segment appended");
            track = Some(next);
        }

        let audio = track.ok_or_else(|| PipelineError::Validation("No scenes to score".into()))?;
        Ok(ComposedTrack {
            audio,
            duration_secs: cumulative_secs,
            silent_scenes,
        })
    }

    async fn append(
        &self,
        scratch: &mut Scratch<'_>,
        first: &Bytes,
        second: &Bytes,
        crossfade_secs: f64,
    ) -> Result<Bytes, PipelineError> {
        let first = scratch.write(first).await?;
        let second = scratch.write(second).await?;
        let output = scratch.reserve();
        self.tool
            .append_audio(&first, &second, crossfade_secs, &output)
            .await?;
        Ok(Bytes::from(tokio::fs::read(&output).await?))
    }

    async fn silence(
        &self,
        scratch: &mut Scratch<'_>,
        duration_secs: f64,
    ) -> Result<Bytes, PipelineError> {
        let output = scratch.reserve();
        self.tool.silence(duration_secs, &output).await?;
        Ok(Bytes::from(tokio::fs::read(&output).await?))
    }

    /// Put `audio` under `video` using the given sync mode.
    pub async fn mux(
        &self,
        video: &Bytes,
        audio: &Bytes,
        mode: SyncMode,
    ) -> Result<Bytes, PipelineError> {
        self.tool.ensure_available()?;
        let scratch = self.scratch_dir("mux-").await?;
        let result = self.mux_in(scratch.path(), video, audio, mode).await;
        if let Err(e) = scratch.close() {
            tracing::warn!(error = %e, "Failed to remove mux scratch directory");
        }
        result
    }

    async fn mux_in(
        &self,
        dir: &Path,
        video: &Bytes,
        audio: &Bytes,
        mode: SyncMode,
    ) -> Result<Bytes, PipelineError> {
        let video_path = dir.join("video.mp4");
        let audio_path = dir.join("audio.mp3");
        let output = dir.join("muxed.mp4");
        tokio::fs::write(&video_path, video).await?;
        tokio::fs::write(&audio_path, audio).await?;

        let video_secs = self.tool.probe_duration(&video_path).await?;
        let audio_secs = self.tool.probe_duration(&audio_path).await?;
        let plan = mux_plan(mode, audio_secs, video_secs);
        tracing::debug!(
            mode = mode.as_str(),
            video_secs,
            audio_secs,
            filter = ?plan.audio_filter,
            "Muxing soundtrack"
        );

        self.tool.mux(&video_path, &audio_path, &plan, &output).await?;
        Ok(Bytes::from(tokio::fs::read(&output).await?))
    }

    async fn scratch_dir(&self, prefix: &str) -> Result<tempfile::TempDir, PipelineError> {
        tokio::fs::create_dir_all(&self.scratch_root).await?;
        Ok(tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&self.scratch_root)?)
    }
}
