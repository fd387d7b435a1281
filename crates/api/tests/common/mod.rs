#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use storyreel_api::config::ServerConfig;
use storyreel_api::router::build_app_router;
use storyreel_api::state::AppState;
use storyreel_core::render::RenderModel;
use storyreel_db::MemoryStore;
use storyreel_events::EventBus;
use storyreel_pipeline::fakes::{FakeMediaTool, FakeMusic, FakeRender};
use storyreel_pipeline::{ArtifactCache, AudioPipeline, AudioSettings, RenderDispatcher, StitchAssembler};
use storyreel_providers::{Coverage, PollConfig};
use storyreel_worker::Coordinator;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
    }
}

/// Handles the tests need besides the router itself.
pub struct TestApp {
    pub router: Router,
    pub cache: Arc<ArtifactCache>,
    pub events: Arc<EventBus>,
    _scratch: tempfile::TempDir,
}

/// Build the full application router over an in-memory store, fake
/// providers and the fake media tool.
pub fn build_test_app(render: FakeRender) -> TestApp {
    let scratch = tempfile::tempdir().unwrap();
    let tool = Arc::new(FakeMediaTool::new());
    let cache = Arc::new(ArtifactCache::new(Duration::from_secs(60)));
    let events = Arc::new(EventBus::default());

    let audio = AudioPipeline::new(
        Arc::new(FakeMusic::new(Coverage::Increment)),
        tool.clone(),
        Arc::clone(&cache),
        AudioSettings::default(),
        "http://reel.test",
        scratch.path().to_path_buf(),
    );
    let coordinator = Coordinator::new(
        Arc::new(MemoryStore::new()),
        Arc::clone(&events),
        RenderDispatcher::new(Arc::new(render), PollConfig::default(), RenderModel::KlingV21),
        StitchAssembler::new(tool, scratch.path().to_path_buf()),
        audio,
        1,
    );

    let config = test_config();
    let state = AppState {
        coordinator,
        cache: Arc::clone(&cache),
        pool: None,
    };

    TestApp {
        router: build_app_router(state, &config),
        cache,
        events,
        _scratch: scratch,
    }
}

pub async fn send(app: &Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None).await
}

pub async fn post(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::POST, uri, None).await
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// A storyboard entry as the API receives it.
pub fn scene_json(prompt: &str) -> serde_json::Value {
    serde_json::json!({
        "prompt": prompt,
        "duration_secs": 4.0,
        "music": { "style": "ambient", "mood": "calm" },
        "first_frame_url": format!("https://img.test/{prompt}/first.png"),
        "last_frame_url": format!("https://img.test/{prompt}/last.png"),
    })
}

/// Create a three-scene job and return its JSON representation.
pub async fn create_job(app: &Router) -> serde_json::Value {
    let response = post_json(
        app,
        "/api/v1/jobs",
        serde_json::json!({
            "storyboard": [scene_json("one"), scene_json("two"), scene_json("three")],
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["data"].clone()
}

/// Poll `GET /jobs/{id}` until the job reaches a terminal status.
pub async fn wait_until_finished(app: &Router, job_id: i64) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let json = body_json(get(app, &format!("/api/v1/jobs/{job_id}")).await).await;
            let status = json["data"]["status"].as_str().unwrap().to_string();
            if matches!(status.as_str(), "completed" | "completed_partial" | "failed") {
                return json["data"].clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job never finished")
}
