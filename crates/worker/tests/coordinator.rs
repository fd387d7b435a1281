use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use storyreel_core::audio::AudioErrorStrategy;
use storyreel_core::error::CoreError;
use storyreel_core::job::{Job, JobStatus, ProcessingStage};
use storyreel_core::render::RenderModel;
use storyreel_core::scene::{MusicDescriptors, Scene, SceneSpec, SceneStatus};
use storyreel_core::types::DbId;
use storyreel_db::MemoryStore;
use storyreel_events::bus::{EVENT_JOB_STATUS_CHANGED, EVENT_SCENE_SETTLED};
use storyreel_events::{EventBus, JobEvents};
use storyreel_pipeline::fakes::{parse_fake_media, FakeMediaTool, FakeMusic, FakeRender};
use storyreel_pipeline::{ArtifactCache, AudioPipeline, AudioSettings, RenderDispatcher, StitchAssembler};
use storyreel_providers::{Coverage, PollConfig};
use storyreel_worker::{Coordinator, CoordinatorError};
use tokio::sync::Semaphore;

fn spec(prompt: &str) -> SceneSpec {
    SceneSpec {
        prompt: prompt.into(),
        duration_secs: 4.0,
        transition: None,
        music: MusicDescriptors {
            style: Some("ambient".into()),
            ..MusicDescriptors::default()
        },
        first_frame_url: Some(format!("https://img.test/{prompt}/first.png")),
        last_frame_url: Some(format!("https://img.test/{prompt}/last.png")),
        render_model: None,
        aspect_ratio: Some("16:9".into()),
    }
}

fn storyboard() -> Vec<SceneSpec> {
    vec![spec("one"), spec("two"), spec("three")]
}

struct Harness {
    coordinator: Coordinator,
    tool: Arc<FakeMediaTool>,
    music: Arc<FakeMusic>,
    _scratch: tempfile::TempDir,
}

fn harness(render: FakeRender, music: FakeMusic, audio_enabled: bool) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::default());
    let tool = Arc::new(FakeMediaTool::new());
    let music = Arc::new(music);
    let scratch = tempfile::tempdir().unwrap();

    let dispatcher = RenderDispatcher::new(Arc::new(render), PollConfig::default(), RenderModel::KlingV21);
    let stitcher = StitchAssembler::new(tool.clone(), scratch.path().to_path_buf());
    let audio = AudioPipeline::new(
        music.clone(),
        tool.clone(),
        Arc::new(ArtifactCache::new(Duration::from_secs(1800))),
        AudioSettings {
            enabled: audio_enabled,
            crossfade_secs: 0.0,
            ..AudioSettings::default()
        },
        "http://reel.test",
        scratch.path().to_path_buf(),
    );

    Harness {
        coordinator: Coordinator::new(store, bus, dispatcher, stitcher, audio, 1),
        tool,
        music,
        _scratch: scratch,
    }
}

/// Status labels published for the job, up to and including the terminal
/// one.
async fn statuses_until_done(events: &mut JobEvents) -> Vec<String> {
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut seen = Vec::new();
        while let Some(status) = events.next_status().await {
            seen.push(status.as_str().to_string());
            if status.is_terminal() {
                break;
            }
        }
        seen
    })
    .await
    .expect("job never reached a terminal status")
}

impl Harness {
    /// Create, approve and start a job, subscribing to its events before
    /// approval.
    async fn create_and_start(
        &self,
        strategy: Option<AudioErrorStrategy>,
    ) -> (DbId, Vec<Scene>, JobEvents) {
        let (job, scenes) = self.coordinator.create_job(storyboard(), strategy).await.unwrap();
        let events = self.coordinator.events().subscribe_job(job.id);
        self.coordinator.approve(job.id).await.unwrap();
        let started = self.coordinator.start(job.id).await.unwrap();
        assert_eq!(started.status, JobStatus::Processing(ProcessingStage::Rendering));
        (job.id, scenes, events)
    }

    async fn job(&self, job_id: DbId) -> (Job, Vec<Scene>) {
        self.coordinator.job(job_id).await.unwrap()
    }
}

#[tokio::test]
async fn all_scenes_succeed_and_stitch_in_order() {
    let h = harness(FakeRender::new(4.0), FakeMusic::new(Coverage::Increment), false);
    let (job_id, _, mut events) = h.create_and_start(None).await;

    let statuses = statuses_until_done(&mut events).await;
    assert_eq!(statuses, vec!["approved", "rendering", "stitching", "completed"]);

    let (job, scenes) = h.job(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.as_ref().unwrap();
    assert_eq!(parse_fake_media(result), Some((12.0, "one,two,three".to_string())));
    assert_eq!(job.progress.percentage, 100);
    assert_eq!(job.progress.scenes.completed, 3);
    assert!(job.progress.skipped_scenes.is_empty());
    assert!(job.cost_estimate.unwrap() > 0.0);
    assert!(scenes.iter().all(|s| s.status == SceneStatus::Completed && s.clip.is_some()));
    assert_eq!(h.tool.concat_calls(), 1);
}

#[tokio::test]
async fn every_scene_settlement_is_published() {
    let h = harness(FakeRender::new(4.0).failing("two"), FakeMusic::new(Coverage::Increment), false);
    let (_, scenes, mut events) = h.create_and_start(None).await;

    let mut settled = Vec::new();
    while settled.len() < 3 {
        let event = tokio::time::timeout(Duration::from_secs(10), events.next())
            .await
            .unwrap()
            .unwrap();
        if event.event_type == EVENT_SCENE_SETTLED {
            settled.push((event.scene_id.unwrap(), event.payload["status"].as_str().unwrap().to_string()));
        }
    }
    settled.sort();
    assert_eq!(
        settled,
        vec![
            (scenes[0].id, "completed".to_string()),
            (scenes[1].id, "failed".to_string()),
            (scenes[2].id, "completed".to_string()),
        ]
    );
}

#[tokio::test]
async fn failed_scene_yields_partial_stitch() {
    let h = harness(FakeRender::new(4.0).failing("two"), FakeMusic::new(Coverage::Increment), false);
    let (job_id, scenes, mut events) = h.create_and_start(None).await;

    let statuses = statuses_until_done(&mut events).await;
    assert_eq!(statuses.last().map(String::as_str), Some("completed_partial"));

    let (job, stored) = h.job(job_id).await;
    assert_eq!(job.status, JobStatus::CompletedPartial);
    assert_eq!(
        parse_fake_media(job.result.as_ref().unwrap()),
        Some((8.0, "one,three".to_string()))
    );
    assert_eq!(job.progress.skipped_scenes, vec![scenes[1].id]);
    assert_eq!(stored[1].status, SceneStatus::Failed);
    assert_eq!(stored[1].provider_handle.as_deref(), Some("fake:two"));
    assert!(stored[1].error_message.is_some());
}

#[tokio::test]
async fn partial_job_soundtrack_keeps_storyboard_length() {
    let h = harness(FakeRender::new(4.0).failing("two"), FakeMusic::new(Coverage::Increment), true);
    let (job_id, _, mut events) = h
        .create_and_start(Some(AudioErrorStrategy::ContinueWithSilence))
        .await;

    let statuses = statuses_until_done(&mut events).await;
    assert_eq!(
        statuses,
        vec![
            "approved",
            "rendering",
            "stitching",
            "audio_pending",
            "audio_generation",
            "completed_partial"
        ]
    );

    let (job, _) = h.job(job_id).await;
    let (audio_secs, audio_label) = parse_fake_media(job.audio_track.as_ref().unwrap()).unwrap();
    assert!((audio_secs - 12.0).abs() < 1e-9);
    assert_eq!(audio_label, "music0,silence,music1");
    assert_eq!(
        parse_fake_media(job.muxed_result.as_ref().unwrap()),
        Some((8.0, "one,three|music0,silence,music1".to_string()))
    );
    assert_eq!(h.music.recorded().len(), 2);
    assert!(job.progress.error_message.is_none());
}

#[tokio::test]
async fn all_renders_failing_fails_without_stitching() {
    let render = FakeRender::new(4.0)
        .failing("one")
        .failing("two")
        .failing("three");
    let h = harness(render, FakeMusic::new(Coverage::Increment), true);
    let (job_id, _, mut events) = h.create_and_start(None).await;

    let statuses = statuses_until_done(&mut events).await;
    assert_eq!(statuses, vec!["approved", "rendering", "failed"]);

    let (job, _) = h.job(job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress.error_message.as_deref(), Some("all renders failed"));
    assert!(job.result.is_none());
    assert_eq!(h.tool.concat_calls(), 0);
    assert!(h.music.recorded().is_empty());
}

#[tokio::test]
async fn stitch_failure_records_tool_output() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe();
    let tool = Arc::new(FakeMediaTool {
        fail_concat: true,
        ..FakeMediaTool::default()
    });
    let scratch = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::new(
        store,
        bus,
        RenderDispatcher::new(Arc::new(FakeRender::new(4.0)), PollConfig::default(), RenderModel::KlingV21),
        StitchAssembler::new(tool.clone(), scratch.path().to_path_buf()),
        AudioPipeline::new(
            Arc::new(FakeMusic::new(Coverage::Increment)),
            tool.clone(),
            Arc::new(ArtifactCache::new(Duration::from_secs(60))),
            AudioSettings::default(),
            "http://reel.test",
            scratch.path().to_path_buf(),
        ),
        1,
    );

    let (job, _) = coordinator.create_job(storyboard(), None).await.unwrap();
    coordinator.approve(job.id).await.unwrap();
    coordinator.start(job.id).await.unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.unwrap();
            if event.event_type == EVENT_JOB_STATUS_CHANGED && event.payload["to"] == "failed" {
                break;
            }
        }
    })
    .await
    .unwrap();

    let (job, _) = coordinator.job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .progress
        .error_message
        .unwrap()
        .contains("Invalid data found when processing input"));
    assert!(job.result.is_none());
}

#[tokio::test]
async fn halted_audio_keeps_stitched_video() {
    let h = harness(
        FakeRender::new(4.0),
        FakeMusic::new(Coverage::Increment).failing_call(1),
        true,
    );
    let (job_id, _, mut events) = h.create_and_start(Some(AudioErrorStrategy::Halt)).await;

    let statuses = statuses_until_done(&mut events).await;
    assert_eq!(statuses.last().map(String::as_str), Some("completed"));

    let (job, _) = h.job(job_id).await;
    assert!(job.result.is_some());
    assert!(job.audio_track.is_none());
    assert!(job.muxed_result.is_none());
    assert!(job
        .progress
        .error_message
        .unwrap()
        .starts_with("audio generation failed"));
    assert_eq!(h.music.recorded().len(), 2);
}

#[tokio::test]
async fn scene_mutations_are_rejected_while_rendering() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(
        FakeRender::new(4.0).gated(gate.clone()),
        FakeMusic::new(Coverage::Increment),
        false,
    );
    let (job_id, scenes, mut events) = h.create_and_start(None).await;
    let first = scenes[0].id;

    assert_matches!(
        h.coordinator.scene_regenerate(job_id, first).await,
        Err(CoordinatorError::Core(CoreError::Validation(_)))
    );
    assert_matches!(
        h.coordinator.scene_deleted(job_id, scenes[1].id).await,
        Err(CoordinatorError::Core(CoreError::Validation(_)))
    );
    assert_matches!(
        h.coordinator.scene_updated(job_id, first, SceneStatus::Failed).await,
        Err(CoordinatorError::Core(CoreError::Validation(_)))
    );

    let (job, stored) = h.job(job_id).await;
    assert_eq!(job.status, JobStatus::Processing(ProcessingStage::Rendering));
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|s| s.status == SceneStatus::Processing));

    gate.add_permits(3);
    let statuses = statuses_until_done(&mut events).await;
    assert_eq!(statuses.last().map(String::as_str), Some("completed"));

    let scene = h.coordinator.scene_regenerate(job_id, first).await.unwrap();
    assert_eq!(scene.status, SceneStatus::Pending);
    assert!(scene.clip.is_none());
    assert!(scene.provider_handle.is_none());

    let job = h.coordinator.scene_deleted(job_id, scenes[1].id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.scenes.total, 2);
    assert_eq!(job.progress.scenes.pending, 1);
    assert_eq!(job.progress.scenes.completed, 1);
}

#[tokio::test]
async fn pending_job_accepts_scene_mutations() {
    let h = harness(FakeRender::new(4.0), FakeMusic::new(Coverage::Increment), false);
    let (job, scenes) = h.coordinator.create_job(storyboard(), None).await.unwrap();

    let scene = h
        .coordinator
        .scene_updated(job.id, scenes[0].id, SceneStatus::Processing)
        .await
        .unwrap();
    assert_eq!(scene.status, SceneStatus::Processing);

    assert_matches!(
        h.coordinator
            .scene_updated(job.id, scenes[1].id, SceneStatus::Completed)
            .await,
        Err(CoordinatorError::Core(CoreError::Validation(_)))
    );

    let (job, _) = h.job(job.id).await;
    assert_eq!(job.progress.scenes.processing, 1);
    assert_eq!(job.progress.scenes.pending, 2);
}

#[tokio::test]
async fn lifecycle_entry_points_enforce_order() {
    let h = harness(FakeRender::new(4.0), FakeMusic::new(Coverage::Increment), false);
    let (job, _) = h.coordinator.create_job(storyboard(), None).await.unwrap();

    assert_matches!(
        h.coordinator.start(job.id).await,
        Err(CoordinatorError::Core(CoreError::Validation(_)))
    );

    let approved = h.coordinator.approve(job.id).await.unwrap();
    assert_eq!(approved.status, JobStatus::Approved);
    assert_matches!(
        h.coordinator.approve(job.id).await,
        Err(CoordinatorError::Core(CoreError::Validation(_)))
    );

    h.coordinator.start(job.id).await.unwrap();
    assert_matches!(
        h.coordinator.start(job.id).await,
        Err(CoordinatorError::Core(CoreError::Validation(_)))
    );

    let missing = h.coordinator.approve(9_999).await.unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn invalid_storyboards_are_rejected() {
    let h = harness(FakeRender::new(4.0), FakeMusic::new(Coverage::Increment), false);

    assert_matches!(
        h.coordinator.create_job(Vec::new(), None).await,
        Err(CoordinatorError::Core(CoreError::Validation(_)))
    );

    let mut bad = spec("zero");
    bad.duration_secs = 0.0;
    assert_matches!(
        h.coordinator.create_job(vec![spec("ok"), bad], None).await,
        Err(CoordinatorError::Core(CoreError::Validation(msg))) if msg.starts_with("Scene 1")
    );
}

#[tokio::test]
async fn shutdown_waits_for_running_stages() {
    let h = harness(FakeRender::new(4.0), FakeMusic::new(Coverage::Increment), true);
    let (job_id, _, mut events) = h.create_and_start(None).await;

    assert!(h.coordinator.shutdown(Duration::from_secs(10)).await);
    let (job, _) = h.job(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.audio_track.is_some());
    let statuses = statuses_until_done(&mut events).await;
    assert_eq!(statuses.last().map(String::as_str), Some("completed"));
}

#[tokio::test]
async fn hand_set_statuses_are_rendered_on_start() {
    let h = harness(FakeRender::new(4.0), FakeMusic::new(Coverage::Increment), false);
    let (job, scenes) = h.coordinator.create_job(storyboard(), None).await.unwrap();
    let mut events = h.coordinator.events().subscribe_job(job.id);

    h.coordinator
        .scene_updated(job.id, scenes[0].id, SceneStatus::Processing)
        .await
        .unwrap();
    h.coordinator
        .scene_updated(job.id, scenes[2].id, SceneStatus::Processing)
        .await
        .unwrap();
    h.coordinator
        .scene_updated(job.id, scenes[2].id, SceneStatus::Failed)
        .await
        .unwrap();

    h.coordinator.approve(job.id).await.unwrap();
    h.coordinator.start(job.id).await.unwrap();

    let statuses = statuses_until_done(&mut events).await;
    assert_eq!(statuses.last().map(String::as_str), Some("completed"));

    let (job, stored) = h.job(job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        parse_fake_media(job.result.as_ref().unwrap()),
        Some((12.0, "one,two,three".to_string()))
    );
    assert!(job.progress.skipped_scenes.is_empty());
    assert!(stored.iter().all(Scene::is_rendered));
}
