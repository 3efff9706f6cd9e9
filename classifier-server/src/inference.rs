//! JSON API of the inference server.
//!
//! - `GET /health`: `{"status": "ready"}`, regardless of model or cache state.
//! - `POST /predict`: multipart upload with a `file` field; answers with a
//!   [`PredictionResult`] or `{"detail": ...}` on failure.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use classifier::{InferenceService, PipelineError, PredictionResult, ResultCache};
use serde_json::json;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::debug;

/// Name of the multipart field carrying the image.
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
    /// Origins allowed to call the API from a browser. `*` allows any; empty
    /// disables CORS.
    pub allowed_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
            allowed_origins: vec![],
        }
    }
}

pub fn router<C>(service: Arc<InferenceService<C>>, config: &HttpConfig) -> anyhow::Result<Router>
where
    C: ResultCache + Send + Sync + 'static,
{
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/predict", post(predict::<C>))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(service);
    if let Some(cors) = cors_layer(&config.allowed_origins)? {
        router = router.layer(cors);
    }
    Ok(router)
}

fn cors_layer(origins: &[String]) -> anyhow::Result<Option<CorsLayer>> {
    if origins.is_empty() {
        return Ok(None);
    }
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let origins = origins
            .iter()
            .map(|o| HeaderValue::from_str(o))
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(origins)
    };
    Ok(Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any),
    ))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ready" }))
}

async fn predict<C>(
    State(service): State<Arc<InferenceService<C>>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResult>, ApiError>
where
    C: ResultCache + Send + Sync + 'static,
{
    let image = read_file_field(multipart?).await?;
    let result = service.predict(image).await?;
    debug!(
        class = result.predicted_class,
        source = %result.source,
        "prediction done"
    );
    Ok(Json(result))
}

/// Bytes of the first `file` field; other fields are skipped.
async fn read_file_field(mut multipart: Multipart) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FILE_FIELD) {
            return Ok(field.bytes().await?.to_vec());
        }
    }
    Err(ApiError::MissingFile)
}

#[derive(Debug, derive_more::From)]
pub enum ApiError {
    Pipeline(PipelineError),
    NotMultipart(MultipartRejection),
    Multipart(MultipartError),
    #[from(ignore)]
    MissingFile,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Pipeline(err) if err.is_client_error() => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            ApiError::Pipeline(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            ApiError::NotMultipart(rejection) => {
                (StatusCode::UNPROCESSABLE_ENTITY, rejection.body_text())
            }
            ApiError::Multipart(err) => (err.status(), err.body_text()),
            ApiError::MissingFile => (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("missing multipart field `{FILE_FIELD}`"),
            ),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
