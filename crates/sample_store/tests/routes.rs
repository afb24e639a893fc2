use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use common::{LinkDiagnostics, PushSource, Sample, SampleSource};
use sample_store::{router, AppState, MemoryStore, SampleStore, StoreError, StoreResult};

struct BrokenStore;

#[async_trait]
impl SampleStore for BrokenStore {
    async fn insert(&self, _sample: &Sample) -> StoreResult<i64> {
        Err(StoreError::Internal("disk full".to_string()))
    }

    async fn query_latest(&self, _n: usize) -> StoreResult<Vec<Sample>> {
        Err(StoreError::Internal("disk full".to_string()))
    }
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.expect("Failed to send request");
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::json!({}));
    (status, json)
}

fn upload_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn upload_stores_value() {
    let store = Arc::new(MemoryStore::new());
    let app = router(AppState::new(store.clone()));

    let (status, json) = send(app, upload_request("adc_value=512.5")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Data saved successfully!");
    let stored = store.query_latest(1).await.unwrap();
    assert_eq!(stored[0].value, 512.5);
    assert!(stored[0].timestamp > 1_600_000_000.0);
}

#[tokio::test]
async fn upload_without_value_is_rejected() {
    let store = Arc::new(MemoryStore::new());

    let (status, json) = send(router(AppState::new(store.clone())), upload_request("other=1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Missing adc_value parameter");

    let bare = Request::builder().method("POST").uri("/upload").body(Body::empty()).unwrap();
    let (status, json) = send(router(AppState::new(store.clone())), bare).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Missing adc_value parameter");

    assert!(store.is_empty());
}

#[tokio::test]
async fn upload_with_garbage_value_is_rejected() {
    let store = Arc::new(MemoryStore::new());

    for body in ["adc_value=abc", "adc_value=NaN", "adc_value="] {
        let (status, json) = send(router(AppState::new(store.clone())), upload_request(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(json["error"], "adc_value must be a number");
    }
    assert!(store.is_empty());
}

#[tokio::test]
async fn storage_failure_is_a_server_error() {
    let app = router(AppState::new(Arc::new(BrokenStore)));
    let (status, json) = send(app, upload_request("adc_value=1")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("disk full"));
}

#[tokio::test]
async fn upload_is_relayed_to_the_push_source() {
    let (sink, mut source) = PushSource::channel(8, Arc::new(LinkDiagnostics::default()));
    let app = router(AppState::new(Arc::new(MemoryStore::new())).with_relay(sink));

    let (status, _) = send(app, upload_request("adc_value=-3")).await;
    assert_eq!(status, StatusCode::OK);

    let relayed = source.next_sample(Duration::ZERO).unwrap();
    assert_eq!(relayed.value, -3.0);
}

#[tokio::test]
async fn latest_returns_most_recent_last() {
    let store = Arc::new(MemoryStore::new());
    for i in 0..5 {
        store.insert(&Sample::new(i as f64, i as f64)).await.unwrap();
    }

    let request = Request::builder().uri("/samples/latest?n=2").body(Body::empty()).unwrap();
    let (status, json) = send(router(AppState::new(store.clone())), request).await;

    assert_eq!(status, StatusCode::OK);
    let samples: Vec<Sample> = serde_json::from_value(json).unwrap();
    assert_eq!(samples, vec![Sample::new(3.0, 3.0), Sample::new(4.0, 4.0)]);
}

#[tokio::test]
async fn health_reports_ok() {
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, json) = send(router(AppState::new(Arc::new(MemoryStore::new()))), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}
