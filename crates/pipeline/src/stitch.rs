//! Media stitch assembler.
//!
//! Concatenates completed scene clips, in storyboard order, into a single
//! video with a stream-copy concat (no re-encode). All scratch files live in
//! a per-invocation temporary directory that is removed on every exit path
//! when its guard drops.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use storyreel_core::scene::{Scene, SceneStatus};
use storyreel_core::types::DbId;

use crate::error::PipelineError;
use crate::media::MediaTool;

/// Required free scratch space as a multiple of the input payload.
pub const SCRATCH_SPACE_FACTOR: u64 = 2;

/// Which clips go into a stitch and which scenes were left out.
#[derive(Debug, Clone)]
pub struct StitchPlan {
    /// Completed clips in storyboard order.
    pub clips: Vec<(DbId, Bytes)>,
    /// Scenes without a usable clip, in storyboard order.
    pub skipped: Vec<DbId>,
}

impl StitchPlan {
    /// Build the plan from a job's scenes. Scenes must already be sorted by
    /// position.
    pub fn from_scenes(scenes: &[Scene]) -> Self {
        let mut clips = Vec::new();
        let mut skipped = Vec::new();
        for scene in scenes {
            match (&scene.status, &scene.clip) {
                (SceneStatus::Completed, Some(clip)) => clips.push((scene.id, clip.clone())),
                _ => skipped.push(scene.id),
            }
        }
        Self { clips, skipped }
    }

    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }

    pub fn payload_bytes(&self) -> u64 {
        self.clips.iter().map(|(_, c)| c.len() as u64).sum()
    }
}

/// A stitched video and what went into it.
#[derive(Debug, Clone)]
pub struct StitchOutput {
    pub video: Bytes,
    pub clip_count: usize,
    pub skipped_scenes: Vec<DbId>,
}

pub struct StitchAssembler {
    tool: Arc<dyn MediaTool>,
    scratch_root: PathBuf,
}

impl StitchAssembler {
    pub fn new(tool: Arc<dyn MediaTool>, scratch_root: PathBuf) -> Self {
        Self { tool, scratch_root }
    }

    /// Concatenate the plan's clips into one video.
    pub async fn stitch(&self, plan: StitchPlan) -> Result<StitchOutput, PipelineError> {
        if plan.clips.is_empty() {
            return Err(PipelineError::Validation(
                "Nothing to stitch: no completed clips".into(),
            ));
        }

        self.tool.ensure_available()?;
        self.ensure_scratch_space(plan.payload_bytes()).await?;

        tokio::fs::create_dir_all(&self.scratch_root).await?;
        let scratch = tempfile::Builder::new()
            .prefix("stitch-")
            .tempdir_in(&self.scratch_root)?;

        let video = self.concat_in(scratch.path(), &plan.clips).await;
        if let Err(e) = scratch.close() {
            tracing::warn!(error = %e, "Failed to remove stitch scratch directory");
        }
        let video = video?;

        tracing::info!(
            clips = plan.clips.len(),
            skipped = plan.skipped.len(),
            bytes = video.len(),
            "Stitch complete"
        );
        Ok(StitchOutput {
            video,
            clip_count: plan.clips.len(),
            skipped_scenes: plan.skipped,
        })
    }

    async fn concat_in(&self, dir: &Path, clips: &[(DbId, Bytes)]) -> Result<Bytes, PipelineError> {
        let mut manifest = String::new();
        for (index, (_, clip)) in clips.iter().enumerate() {
            let path = dir.join(format!("clip_{index:04}.mp4"));
            tokio::fs::write(&path, clip).await?;
            manifest.push_str(&format!("file '{}'\n", path.display()));
        }

        let manifest_path = dir.join("concat.txt");
        tokio::fs::write(&manifest_path, manifest).await?;

        let output = dir.join("stitched.mp4");
        self.tool.concat(&manifest_path, &output).await?;
        Ok(Bytes::from(tokio::fs::read(&output).await?))
    }

    async fn ensure_scratch_space(&self, payload_bytes: u64) -> Result<(), PipelineError> {
        let required = payload_bytes.saturating_mul(SCRATCH_SPACE_FACTOR);
        let root = existing_ancestor(&self.scratch_root);
        let available = tokio::task::spawn_blocking(move || available_space(&root))
            .await
            .map_err(|e| PipelineError::Io(std::io::Error::other(e.to_string())))??;

        if available < required {
            return Err(PipelineError::InsufficientResource {
                required_bytes: required,
                available_bytes: available,
            });
        }
        Ok(())
    }
}

/// Closest existing directory at or above `path`.
fn existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Free bytes available to unprivileged users on the filesystem holding `path`.
#[cfg(unix)]
pub fn available_space(path: &Path) -> std::io::Result<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    // Safety: `c_path` is a valid NUL-terminated string and `stat` is only
    // read after statvfs reports success.
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let stat = unsafe { stat.assume_init() };
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
pub fn available_space(_path: &Path) -> std::io::Result<u64> {
    Ok(u64::MAX)
}
