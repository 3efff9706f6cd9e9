//! Browser-facing front end: an upload form that forwards images to the
//! inference server and shows the predicted artist.
//!
//! Every outcome, failures included, is rendered as a regular page.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
    response::Html,
    routing::get,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::inference::FILE_FIELD;

pub mod client;
pub mod labels;
pub mod page;

pub use self::{
    client::{ClientError, InferenceClient, Upload},
    labels::LabelMap,
    page::{Outcome, PredictionView},
};

pub struct WebState {
    pub client: InferenceClient,
    pub labels: LabelMap,
}

pub fn router(state: Arc<WebState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/predict", get(index).post(predict))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index(State(state): State<Arc<WebState>>) -> Html<String> {
    Html(page::render(&state.labels, None))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ready" }))
}

async fn predict(
    State(state): State<Arc<WebState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Html<String> {
    let outcome = match read_upload(multipart).await {
        Ok(upload) => {
            debug!(file = %upload.file_name, size = upload.bytes.len(), "forwarding upload");
            match state.client.predict(upload).await {
                Ok(result) => Outcome::Prediction(PredictionView::new(&result, &state.labels)),
                Err(err) => {
                    warn!("prediction request to {} failed: {err}", state.client.url());
                    Outcome::Error(format!(
                        "Could not get a prediction from the inference server: {err}"
                    ))
                }
            }
        }
        Err(message) => Outcome::Error(message),
    };
    Html(page::render(&state.labels, Some(&outcome)))
}

async fn read_upload(multipart: Result<Multipart, MultipartRejection>) -> Result<Upload, String> {
    let mut multipart = multipart.map_err(|e| format!("Malformed upload: {}", e.body_text()))?;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err("Please choose an image to upload.".into()),
            Err(e) => return Err(format!("Malformed upload: {}", e.body_text())),
        };
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_owned();
        let content_type = field.content_type().map(str::to_owned);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| format!("Malformed upload: {}", e.body_text()))?;
        if bytes.is_empty() {
            return Err("Please choose an image to upload.".into());
        }
        return Ok(Upload {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }
}
