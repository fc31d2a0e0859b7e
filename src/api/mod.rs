// REST API over a loaded slide dataset

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use rand::rngs::StdRng;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::dataset::{SlideDataset, Split};
use crate::export::encode_png;
use crate::generator::{draw_patch, seeded_rng};
use crate::slide::SlideError;

pub struct DatasetState {
    pub dataset: SlideDataset,
    rng: StdRng,
}

impl DatasetState {
    pub fn new(dataset: SlideDataset, seed: Option<u64>) -> Self {
        Self {
            dataset,
            rng: seeded_rng(seed),
        }
    }
}

pub type AppState = Arc<Mutex<DatasetState>>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/slides", get(list_slides))
        .route("/slides/{index}/patch", get(get_patch))
        .route("/splits/{split}/sample", get(sample_split))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

async fn list_slides(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let state = state.lock().await;
    let summary = state.dataset.summary();

    Ok(Json(serde_json::json!({
        "summary": summary,
        "count": state.dataset.len(),
    })))
}

#[derive(Debug, Deserialize)]
struct PatchQuery {
    #[serde(default)]
    x: i64,
    #[serde(default)]
    y: i64,
}

/// Raw patch at level coordinates `(x, y)` as PNG. Coordinates that cannot be
/// addressed on the slide are a 400.
async fn get_patch(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Query(query): Query<PatchQuery>,
) -> Result<Response, StatusCode> {
    let state = state.lock().await;
    let container = state.dataset.files.get(index).ok_or(StatusCode::NOT_FOUND)?;

    let patch = container.get_patch(query.x, query.y).map_err(|e| match e {
        SlideError::LocationOutOfRange { .. } => StatusCode::BAD_REQUEST,
        e => {
            error!("Patch extraction failed for slide {}: {}", index, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    })?;
    let png = encode_png(&patch).map_err(|_e| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

/// Draw one random sample from a split, the same way the patch generator
/// does.
async fn sample_split(
    State(state): State<AppState>,
    Path(split): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let split: Split = split.parse().map_err(|_e| StatusCode::BAD_REQUEST)?;

    // Mutating operation: advances the shared rng.
    let mut guard = state.lock().await;
    let state = &mut *guard;

    let indices = state.dataset.split(split);
    if indices.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }
    let slide_index = indices[state.rng.random_range(0..indices.len())];
    let container = &state.dataset.files[slide_index];

    let sample = draw_patch(container, slide_index, &mut state.rng).map_err(|e| {
        error!("Sampling failed for slide {}: {}", slide_index, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let png = encode_png(&sample.image).map_err(|_e| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(serde_json::json!({
        "split": split,
        "slide_index": sample.slide_index,
        "slide_id": state.dataset.slide_id(sample.slide_index),
        "x": sample.x,
        "y": sample.y,
        "width": sample.image.width(),
        "height": sample.image.height(),
        "boxes": sample.boxes,
        "image_png_base64": STANDARD.encode(png),
    })))
}
