//! PostgreSQL-backed [`JobStore`].

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use storyreel_core::audio::AudioErrorStrategy;
use storyreel_core::job::{Job, JobStatus};
use storyreel_core::progress::ProgressSnapshot;
use storyreel_core::scene::{Scene, SceneSpec, SceneStatus};
use storyreel_core::types::{DbId, Timestamp};

use crate::store::{JobStore, NewJob, StoreError};

/// Column list shared across job queries.
const JOB_COLUMNS: &str = "id, status, storyboard, progress, result, audio_track, \
    muxed_result, audio_error_strategy, cost_estimate, created_at, updated_at";

/// Column list shared across scene queries.
const SCENE_COLUMNS: &str =
    "id, job_id, position, spec, status, provider_handle, clip, error_message, updated_at";

/// Scene columns with the clip replaced by a typed NULL.
const SCENE_STATE_COLUMNS: &str = "id, job_id, position, spec, status, provider_handle, \
    NULL::bytea AS clip, error_message, updated_at";

/// A row from the `jobs` table.
#[derive(Debug, FromRow)]
struct JobRow {
    id: DbId,
    status: String,
    storyboard: Json<Vec<SceneSpec>>,
    progress: Json<ProgressSnapshot>,
    result: Option<Vec<u8>>,
    audio_track: Option<Vec<u8>>,
    muxed_result: Option<Vec<u8>>,
    audio_error_strategy: Option<String>,
    cost_estimate: Option<f64>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            status: JobStatus::parse(&row.status)?,
            storyboard: row.storyboard.0,
            progress: row.progress.0,
            result: row.result.map(Bytes::from),
            audio_track: row.audio_track.map(Bytes::from),
            muxed_result: row.muxed_result.map(Bytes::from),
            audio_error_strategy: row
                .audio_error_strategy
                .as_deref()
                .map(AudioErrorStrategy::parse)
                .transpose()?,
            cost_estimate: row.cost_estimate,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A row from the `scenes` table.
#[derive(Debug, FromRow)]
struct SceneRow {
    id: DbId,
    job_id: DbId,
    position: i32,
    spec: Json<SceneSpec>,
    status: String,
    provider_handle: Option<String>,
    clip: Option<Vec<u8>>,
    error_message: Option<String>,
    updated_at: Timestamp,
}

impl TryFrom<SceneRow> for Scene {
    type Error = StoreError;

    fn try_from(row: SceneRow) -> Result<Self, Self::Error> {
        Ok(Scene {
            id: row.id,
            job_id: row.job_id,
            position: row.position,
            spec: row.spec.0,
            status: SceneStatus::parse(&row.status)?,
            provider_handle: row.provider_handle,
            clip: row.clip.map(Bytes::from),
            error_message: row.error_message,
            updated_at: row.updated_at,
        })
    }
}

fn to_vec(bytes: &Option<Bytes>) -> Option<Vec<u8>> {
    bytes.as_ref().map(|b| b.to_vec())
}

/// Job storage in PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

fn job_updated(job_id: DbId, rows_affected: u64) -> Result<(), StoreError> {
    if rows_affected == 0 {
        return Err(StoreError::NotFound {
            entity: "Job",
            id: job_id,
        });
    }
    Ok(())
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn select_scenes(&self, job_id: DbId, columns: &str) -> Result<Vec<Scene>, StoreError> {
        let exists: Option<(DbId,)> = sqlx::query_as("SELECT id FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound {
                entity: "Job",
                id: job_id,
            });
        }

        let query = format!("SELECT {columns} FROM scenes WHERE job_id = $1 ORDER BY position ASC, id ASC");
        sqlx::query_as::<_, SceneRow>(&query)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Scene::try_from)
            .collect()
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn create_job(&self, input: NewJob) -> Result<(Job, Vec<Scene>), StoreError> {
        let mut tx = self.pool.begin().await?;

        let progress = ProgressSnapshot {
            stage: JobStatus::Pending.as_str().to_string(),
            scenes: storyreel_core::progress::SceneCounts {
                total: input.storyboard.len() as u32,
                pending: input.storyboard.len() as u32,
                ..Default::default()
            },
            ..Default::default()
        };

        let query = format!(
            "INSERT INTO jobs (status, storyboard, progress, audio_error_strategy, cost_estimate)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {JOB_COLUMNS}"
        );
        let job_row = sqlx::query_as::<_, JobRow>(&query)
            .bind(JobStatus::Pending.as_str())
            .bind(Json(&input.storyboard))
            .bind(Json(&progress))
            .bind(input.audio_error_strategy.map(|s| s.as_str()))
            .bind(input.cost_estimate)
            .fetch_one(&mut *tx)
            .await?;
        let job = Job::try_from(job_row)?;

        let scene_query = format!(
            "INSERT INTO scenes (job_id, position, spec, status)
             VALUES ($1, $2, $3, $4)
             RETURNING {SCENE_COLUMNS}"
        );
        let mut scenes = Vec::with_capacity(input.storyboard.len());
        for (position, spec) in input.storyboard.iter().enumerate() {
            let row = sqlx::query_as::<_, SceneRow>(&scene_query)
                .bind(job.id)
                .bind(position as i32)
                .bind(Json(spec))
                .bind(SceneStatus::Pending.as_str())
                .fetch_one(&mut *tx)
                .await?;
            scenes.push(Scene::try_from(row)?);
        }

        tx.commit().await?;
        tracing::debug!(job_id = job.id, scenes = scenes.len(), "Job persisted");
        Ok((job, scenes))
    }

    async fn load_job(&self, job_id: DbId) -> Result<Job, StoreError> {
        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "Job",
                id: job_id,
            })?;
        Job::try_from(row)
    }

    async fn load_scenes(&self, job_id: DbId) -> Result<Vec<Scene>, StoreError> {
        self.select_scenes(job_id, SCENE_COLUMNS).await
    }

    async fn load_scene_states(&self, job_id: DbId) -> Result<Vec<Scene>, StoreError> {
        self.select_scenes(job_id, SCENE_STATE_COLUMNS).await
    }

    async fn save_progress(&self, job: &Job) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET
                status = $2,
                progress = $3,
                updated_at = $4
             WHERE id = $1",
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(Json(&job.progress))
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        job_updated(job.id, result.rows_affected())
    }

    async fn save_outputs(&self, job: &Job) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET
                result = $2,
                audio_track = $3,
                muxed_result = $4,
                updated_at = $5
             WHERE id = $1",
        )
        .bind(job.id)
        .bind(to_vec(&job.result))
        .bind(to_vec(&job.audio_track))
        .bind(to_vec(&job.muxed_result))
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        job_updated(job.id, result.rows_affected())
    }

    async fn save_scene(&self, scene: &Scene) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE scenes SET
                spec = $3,
                status = $4,
                provider_handle = $5,
                clip = $6,
                error_message = $7,
                updated_at = $8
             WHERE id = $1 AND job_id = $2",
        )
        .bind(scene.id)
        .bind(scene.job_id)
        .bind(Json(&scene.spec))
        .bind(scene.status.as_str())
        .bind(&scene.provider_handle)
        .bind(to_vec(&scene.clip))
        .bind(&scene.error_message)
        .bind(scene.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "Scene",
                id: scene.id,
            });
        }
        Ok(())
    }

    async fn delete_scene(&self, job_id: DbId, scene_id: DbId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM scenes WHERE id = $1 AND job_id = $2")
            .bind(scene_id)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "Scene",
                id: scene_id,
            });
        }
        Ok(())
    }
}
