//! HTTP surface, driven through the router without binding a socket.

mod helpers;

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use helpers::*;
use pixel_art_gen::routes;
use pixel_art_gen::services::worker::GenerationWorker;

const UPLOAD_LIMIT: usize = 1024 * 1024;
const BOUNDARY: &str = "pixel-art-test-boundary";

fn app(svc: &TestServices) -> Router {
    routes::router(svc.state.clone(), UPLOAD_LIMIT)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body)
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn text_body(text: &str) -> Value {
    json!({
        "text": text,
        "style": "8bit",
        "resolution": "32x32",
        "color_palette": "classic",
    })
}

enum Part<'a> {
    Field(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn multipart(parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Field(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Part::File(name, filename, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: image/png\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/generate/image")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn job_id(body: &Value) -> Uuid {
    body["job_id"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .expect("response should carry a UUID job_id")
}

#[tokio::test]
async fn test_health_ok() {
    let svc = services();
    let (status, body) = send_json(&app(&svc), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["queue"]["status"], "ok");
}

#[tokio::test]
async fn test_health_degraded_when_queue_down() {
    let svc = services();
    svc.dispatcher
        .unavailable
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let (status, body) = send_json(&app(&svc), get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["checks"]["queue"]["status"], "error");
}

#[tokio::test]
async fn test_submit_text_then_poll() {
    let svc = services();
    let app = app(&svc);

    let (status, body) = send_json(&app, post_json("/generate/text", text_body("a red castle"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    let id = job_id(&body);

    let (status, body) = send_json(&app, get(&format!("/generation/{id}/status"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_id"], id.to_string());
    assert_eq!(body["status"], "pending");
    assert_eq!(body["progress"], 0.0);
    assert!(body.get("result_url").is_none());
}

#[tokio::test]
async fn test_unknown_job_is_404() {
    let svc = services();
    let (status, body) = send_json(
        &app(&svc),
        get(&format!("/generation/{}/status", Uuid::new_v4())),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_invalid_parameters_name_the_field() {
    let svc = services();
    let app = app(&svc);

    let mut bad_style = text_body("a red castle");
    bad_style["style"] = json!("watercolor");
    let (status, body) = send_json(&app, post_json("/generate/text", bad_style)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["field"], "style");

    let mut zero_batch = text_body("a red castle");
    zero_batch["batch_count"] = json!(0);
    let (status, body) = send_json(&app, post_json("/generate/text", zero_batch)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "batch_count");

    let (status, body) = send_json(
        &app,
        post_json(
            "/generate/text",
            json!({"style": "8bit", "resolution": "32x32", "color_palette": "classic"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "input");

    assert!(svc.store.is_empty().await);
    assert!(svc.dispatcher.queued().is_empty());
}

#[tokio::test]
async fn test_malformed_json_is_400() {
    let svc = services();
    let request = Request::post("/generate/text")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"text\": "))
        .unwrap();

    let (status, body) = send_json(&app(&svc), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_submit_image_multipart() {
    let svc = services();
    let png = tiny_png();

    let (status, body) = send_json(
        &app(&svc),
        multipart(&[
            Part::File("image", "sprite.png", &png),
            Part::Field("style", "gameboy"),
            Part::Field("resolution", "16x16"),
            Part::Field("color_palette", "gameboy"),
            Part::Field("batch_count", "2"),
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED, "{body}");
    let id = job_id(&body);

    assert_eq!(
        svc.storage.get(&format!("uploads/{id}.png")).map(|(b, _)| b),
        Some(png)
    );
    let queued = svc.dispatcher.queued();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].parameters.batch_count, 2);
}

#[tokio::test]
async fn test_image_and_text_together_rejected() {
    let svc = services();
    let png = tiny_png();

    let (status, body) = send_json(
        &app(&svc),
        multipart(&[
            Part::File("image", "sprite.png", &png),
            Part::Field("text", "a red castle"),
            Part::Field("style", "8bit"),
            Part::Field("resolution", "32x32"),
            Part::Field("color_palette", "classic"),
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "input");
    assert!(svc.storage.keys().is_empty());
}

#[tokio::test]
async fn test_multipart_missing_parameter() {
    let svc = services();
    let png = tiny_png();

    let (status, body) = send_json(
        &app(&svc),
        multipart(&[
            Part::File("image", "sprite.png", &png),
            Part::Field("style", "8bit"),
            Part::Field("color_palette", "classic"),
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "resolution");
}

#[tokio::test]
async fn test_dispatch_outage_is_503() {
    let svc = services();
    svc.dispatcher
        .unavailable
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let (status, body) = send_json(
        &app(&svc),
        post_json("/generate/text", text_body("a red castle")),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_history_newest_first() {
    let svc = services();
    let app = app(&svc);

    for text in ["first", "second", "third"] {
        let (status, _) = send_json(&app, post_json("/generate/text", text_body(text))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    let (status, body) = send_json(&app, get("/history?limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    let generations = body["generations"].as_array().unwrap();
    assert_eq!(generations.len(), 2);
    assert_eq!(generations[0]["text"], "third");
    assert_eq!(generations[0]["input_kind"], "text");
    assert_eq!(generations[0]["parameters"]["style"], "8bit");
    assert_eq!(generations[1]["text"], "second");

    let (status, body) = send_json(&app, get("/history?status=completed")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["generations"].as_array().unwrap().is_empty());

    let (status, _) = send_json(&app, get("/history?status=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_export_after_completion() {
    let svc = services();
    let app = app(&svc);
    let worker = GenerationWorker::new(
        svc.store.clone(),
        svc.storage.clone(),
        Arc::new(ScriptedBackend::default()),
        1,
    );

    let (_, body) = send_json(&app, post_json("/generate/text", text_body("a red castle"))).await;
    let id = job_id(&body);

    let (status, body) = send_json(&app, get(&format!("/generation/{id}/export"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    let queued = svc.dispatcher.take();
    worker.process(&queued[0]).await.unwrap();

    let (status, body) = send_json(&app, get(&format!("/generation/{id}/status"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(
        body["result_url"],
        format!("{ASSET_BASE_URL}/outputs/{id}/0.png")
    );

    let response = app
        .clone()
        .oneshot(get(&format!("/generation/{id}/export?format=svg")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/svg+xml");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let svg = String::from_utf8(body.to_vec()).unwrap();
    assert!(svg.starts_with("<svg"));
    assert!(svg.contains("<rect"));

    let (status, png) = send(&app, get(&format!("/generation/{id}/export"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(image::load_from_memory(&png).is_ok());

    let (status, _) = send(&app, get(&format!("/generation/{id}/export?index=3"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
