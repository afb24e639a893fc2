use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, warn};

use common::{Sample, SampleSink};

use crate::SampleStore;

const DEFAULT_LATEST: usize = 100;

/// Shared state behind the ingest routes.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SampleStore>,
    /// When set, every stored upload is also handed to the socket fan-out.
    pub relay: Option<SampleSink>,
}

impl AppState {
    pub fn new(store: Arc<dyn SampleStore>) -> Self {
        Self { store, relay: None }
    }

    pub fn with_relay(mut self, relay: SampleSink) -> Self {
        self.relay = Some(relay);
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/samples/latest", get(latest))
        .route("/health", get(health_check))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct UploadForm {
    adc_value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LatestQuery {
    n: Option<usize>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Seconds since the Unix epoch, with microsecond resolution.
fn wall_clock_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

async fn upload(State(state): State<AppState>, form: Result<Form<UploadForm>, FormRejection>) -> Response {
    // A body that is not a form at all is treated like a missing field.
    let raw = match form {
        Ok(Form(UploadForm { adc_value: Some(raw) })) => raw,
        _ => return error_response(StatusCode::BAD_REQUEST, "Missing adc_value parameter"),
    };

    let value = match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => {
            warn!(adc_value = %raw, "rejected non-numeric upload");
            return error_response(StatusCode::BAD_REQUEST, "adc_value must be a number");
        }
    };

    let sample = Sample::new(value, wall_clock_secs());
    if let Err(e) = state.store.insert(&sample).await {
        error!(error = %e, "failed to store upload");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    debug!(value, "stored upload");

    if let Some(relay) = &state.relay {
        relay.on_sample(sample.value, sample.timestamp);
    }

    Json(json!({ "message": "Data saved successfully!" })).into_response()
}

async fn latest(State(state): State<AppState>, Query(query): Query<LatestQuery>) -> Response {
    let n = query.n.unwrap_or(DEFAULT_LATEST);
    match state.store.query_latest(n).await {
        Ok(samples) => Json(samples).into_response(),
        Err(e) => {
            error!(error = %e, "failed to query samples");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
