//! End-to-end job lifecycle over HTTP.

mod common;

use axum::http::{Method, StatusCode};
use common::{
    body_bytes, body_json, build_test_app, create_job, get, post, post_json, scene_json, send,
    wait_until_finished,
};
use serde_json::json;
use storyreel_pipeline::fakes::{parse_fake_media, FakeRender};

fn job_id(job: &serde_json::Value) -> i64 {
    job["id"].as_i64().unwrap()
}

async fn approve_and_start(app: &axum::Router, id: i64) {
    let response = post(app, &format!("/api/v1/jobs/{id}/approve")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = post(app, &format!("/api/v1/jobs/{id}/start")).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn create_returns_pending_job_with_scenes() {
    let app = build_test_app(FakeRender::new(4.0));
    let job = create_job(&app.router).await;

    assert_eq!(job["status"], "pending");
    assert_eq!(job["scenes"].as_array().unwrap().len(), 3);
    assert_eq!(job["scenes"][0]["status"], "pending");
    assert_eq!(job["scenes"][2]["position"], 2);
    assert_eq!(job["progress"]["scenes"]["total"], 3);
    assert_eq!(job["has_result"], false);
    assert!(job["cost_estimate"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn empty_storyboard_is_rejected() {
    let app = build_test_app(FakeRender::new(4.0));
    let response = post_json(&app.router, "/api/v1/jobs", json!({ "storyboard": [] })).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn invalid_scene_is_reported_by_index() {
    let app = build_test_app(FakeRender::new(4.0));
    let mut bad = scene_json("two");
    bad["prompt"] = json!("");
    let response = post_json(
        &app.router,
        "/api/v1/jobs",
        json!({ "storyboard": [scene_json("one"), bad] }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().starts_with("Scene 1: "));
}

#[tokio::test]
async fn start_requires_approval() {
    let app = build_test_app(FakeRender::new(4.0));
    let id = job_id(&create_job(&app.router).await);

    let response = post(&app.router, &format!("/api/v1/jobs/{id}/start")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn missing_job_is_404() {
    let app = build_test_app(FakeRender::new(4.0));

    let response = get(&app.router, "/api/v1/jobs/9999").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");

    let response = post(&app.router, "/api/v1/jobs/9999/approve").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn approved_job_renders_and_stitches() {
    let app = build_test_app(FakeRender::new(4.0));
    let id = job_id(&create_job(&app.router).await);
    approve_and_start(&app.router, id).await;

    let job = wait_until_finished(&app.router, id).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["has_result"], true);
    assert_eq!(job["has_audio"], false);
    assert_eq!(job["progress"]["percentage"], 100);
    assert_eq!(job["progress"]["scenes"]["completed"], 3);

    let response = get(&app.router, &format!("/api/v1/jobs/{id}/result")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "video/mp4");
    let (duration, labels) = parse_fake_media(&body_bytes(response).await).unwrap();
    assert_eq!(duration, 12.0);
    assert_eq!(labels, "one,two,three");

    let response = get(&app.router, &format!("/api/v1/jobs/{id}/audio")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_scene_completes_partially() {
    let app = build_test_app(FakeRender::new(4.0).failing("two"));
    let id = job_id(&create_job(&app.router).await);
    approve_and_start(&app.router, id).await;

    let job = wait_until_finished(&app.router, id).await;
    assert_eq!(job["status"], "completed_partial");
    assert_eq!(job["scenes"][1]["status"], "failed");
    assert!(job["scenes"][1]["error_message"].is_string());
    assert_eq!(job["progress"]["skipped_scenes"], json!([job["scenes"][1]["id"]]));

    let response = get(&app.router, &format!("/api/v1/jobs/{id}/result")).await;
    let (duration, labels) = parse_fake_media(&body_bytes(response).await).unwrap();
    assert_eq!(duration, 8.0);
    assert_eq!(labels, "one,three");
}

#[tokio::test]
async fn result_is_404_before_stitching() {
    let app = build_test_app(FakeRender::new(4.0));
    let id = job_id(&create_job(&app.router).await);

    let response = get(&app.router, &format!("/api/v1/jobs/{id}/result")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn scene_status_updates_follow_legal_transitions() {
    let app = build_test_app(FakeRender::new(4.0));
    let job = create_job(&app.router).await;
    let id = job_id(&job);
    let scene_id = job["scenes"][0]["id"].as_i64().unwrap();
    let uri = format!("/api/v1/jobs/{id}/scenes/{scene_id}");

    let response = send(&app.router, Method::PUT, &uri, Some(json!({ "status": "completed" }))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app.router, Method::PUT, &uri, Some(json!({ "status": "processing" }))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["status"], "processing");
}

#[tokio::test]
async fn finished_job_scenes_can_be_regenerated_and_deleted() {
    let app = build_test_app(FakeRender::new(4.0));
    let job = create_job(&app.router).await;
    let id = job_id(&job);
    let first = job["scenes"][0]["id"].as_i64().unwrap();
    let last = job["scenes"][2]["id"].as_i64().unwrap();
    approve_and_start(&app.router, id).await;
    wait_until_finished(&app.router, id).await;

    let response = post(&app.router, &format!("/api/v1/jobs/{id}/scenes/{first}/regenerate")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let scene = body_json(response).await["data"].clone();
    assert_eq!(scene["status"], "pending");
    assert!(scene["provider_handle"].is_null());

    let response = send(
        &app.router,
        Method::DELETE,
        &format!("/api/v1/jobs/{id}/scenes/{last}"),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let job = body_json(response).await["data"].clone();
    assert_eq!(job["progress"]["scenes"]["total"], 2);
    assert_eq!(job["progress"]["scenes"]["pending"], 1);

    let response = get(&app.router, &format!("/api/v1/jobs/{id}")).await;
    let job = body_json(response).await["data"].clone();
    assert_eq!(job["scenes"].as_array().unwrap().len(), 2);
    assert_eq!(job["status"], "completed");
}

#[tokio::test]
async fn deleting_unknown_scene_is_404() {
    let app = build_test_app(FakeRender::new(4.0));
    let id = job_id(&create_job(&app.router).await);

    let response = send(
        &app.router,
        Method::DELETE,
        &format!("/api/v1/jobs/{id}/scenes/424242"),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
