//! Production wiring: Replicate-backed providers and the FFmpeg media tool.

use std::sync::Arc;

use storyreel_db::JobStore;
use storyreel_events::EventBus;
use storyreel_pipeline::{
    ArtifactCache, AudioPipeline, FfmpegTool, MediaTool, PipelineConfig, RenderDispatcher,
    StitchAssembler,
};
use storyreel_providers::api::ReplicateApi;
use storyreel_providers::music::ReplicateMusic;
use storyreel_providers::render::ReplicateRender;
use storyreel_providers::ProviderConfig;

use crate::coordinator::Coordinator;

/// Build a [`Coordinator`] talking to the configured providers.
pub fn from_config(
    store: Arc<dyn JobStore>,
    events: Arc<EventBus>,
    cache: Arc<ArtifactCache>,
    providers: &ProviderConfig,
    pipeline: &PipelineConfig,
) -> Coordinator {
    let api = ReplicateApi::new(providers.api_url.clone(), providers.api_token.clone());
    let tool: Arc<dyn MediaTool> = Arc::new(FfmpegTool::new(
        pipeline.ffmpeg_bin.clone(),
        pipeline.ffprobe_bin.clone(),
    ));

    let dispatcher = RenderDispatcher::new(
        Arc::new(ReplicateRender::new(api.clone())),
        providers.poll.clone(),
        providers.default_render_model,
    );
    let stitcher = StitchAssembler::new(Arc::clone(&tool), pipeline.scratch_dir.clone());
    let music = ReplicateMusic::new(
        api,
        providers.music_model_version.clone(),
        providers.poll.clone(),
    );
    let audio = AudioPipeline::new(
        Arc::new(music),
        tool,
        cache,
        pipeline.audio.clone(),
        pipeline.public_base_url.clone(),
        pipeline.scratch_dir.clone(),
    );

    Coordinator::new(
        store,
        events,
        dispatcher,
        stitcher,
        audio,
        pipeline.min_success_scenes,
    )
}
