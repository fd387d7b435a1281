//! In-process [`JobStore`] backed by hash maps.

use std::collections::HashMap;

use async_trait::async_trait;
use storyreel_core::job::{Job, JobStatus};
use storyreel_core::progress::ProgressSnapshot;
use storyreel_core::scene::{Scene, SceneStatus};
use storyreel_core::types::DbId;
use tokio::sync::RwLock;

use crate::store::{JobStore, NewJob, StoreError};

#[derive(Default)]
struct Tables {
    next_job_id: DbId,
    next_scene_id: DbId,
    jobs: HashMap<DbId, Job>,
    scenes: HashMap<DbId, Scene>,
}

/// Job storage that lives and dies with the process.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update_job(&self, job_id: DbId, apply: impl FnOnce(&mut Job)) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let slot = tables.jobs.get_mut(&job_id).ok_or(StoreError::NotFound {
            entity: "Job",
            id: job_id,
        })?;
        apply(slot);
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, input: NewJob) -> Result<(Job, Vec<Scene>), StoreError> {
        let mut tables = self.tables.write().await;
        let now = chrono::Utc::now();

        tables.next_job_id += 1;
        let job_id = tables.next_job_id;

        let mut scenes = Vec::with_capacity(input.storyboard.len());
        for (position, spec) in input.storyboard.iter().enumerate() {
            tables.next_scene_id += 1;
            let scene = Scene {
                id: tables.next_scene_id,
                job_id,
                position: position as i32,
                spec: spec.clone(),
                status: SceneStatus::Pending,
                provider_handle: None,
                clip: None,
                error_message: None,
                updated_at: now,
            };
            tables.scenes.insert(scene.id, scene.clone());
            scenes.push(scene);
        }

        let job = Job {
            id: job_id,
            status: JobStatus::Pending,
            storyboard: input.storyboard,
            progress: ProgressSnapshot::recompute(
                JobStatus::Pending,
                &scenes,
                &ProgressSnapshot::default(),
            ),
            result: None,
            audio_track: None,
            muxed_result: None,
            audio_error_strategy: input.audio_error_strategy,
            cost_estimate: input.cost_estimate,
            created_at: now,
            updated_at: now,
        };
        tables.jobs.insert(job_id, job.clone());

        Ok((job, scenes))
    }

    async fn load_job(&self, job_id: DbId) -> Result<Job, StoreError> {
        self.tables
            .read()
            .await
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "Job",
                id: job_id,
            })
    }

    async fn load_scenes(&self, job_id: DbId) -> Result<Vec<Scene>, StoreError> {
        let tables = self.tables.read().await;
        if !tables.jobs.contains_key(&job_id) {
            return Err(StoreError::NotFound {
                entity: "Job",
                id: job_id,
            });
        }
        let mut scenes: Vec<Scene> = tables
            .scenes
            .values()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect();
        scenes.sort_by_key(|s| (s.position, s.id));
        Ok(scenes)
    }

    async fn load_scene_states(&self, job_id: DbId) -> Result<Vec<Scene>, StoreError> {
        let mut scenes = self.load_scenes(job_id).await?;
        for scene in &mut scenes {
            scene.clip = None;
        }
        Ok(scenes)
    }

    async fn save_progress(&self, job: &Job) -> Result<(), StoreError> {
        self.update_job(job.id, |slot| {
            slot.status = job.status;
            slot.progress = job.progress.clone();
            slot.updated_at = job.updated_at;
        })
        .await
    }

    async fn save_outputs(&self, job: &Job) -> Result<(), StoreError> {
        self.update_job(job.id, |slot| {
            slot.result = job.result.clone();
            slot.audio_track = job.audio_track.clone();
            slot.muxed_result = job.muxed_result.clone();
            slot.updated_at = job.updated_at;
        })
        .await
    }

    async fn save_scene(&self, scene: &Scene) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.scenes.get_mut(&scene.id) {
            Some(slot) if slot.job_id == scene.job_id => {
                *slot = scene.clone();
                Ok(())
            }
            _ => Err(StoreError::NotFound {
                entity: "Scene",
                id: scene.id,
            }),
        }
    }

    async fn delete_scene(&self, job_id: DbId, scene_id: DbId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.scenes.get(&scene_id) {
            Some(scene) if scene.job_id == job_id => {
                tables.scenes.remove(&scene_id);
                Ok(())
            }
            _ => Err(StoreError::NotFound {
                entity: "Scene",
                id: scene_id,
            }),
        }
    }
}
