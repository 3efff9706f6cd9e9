use std::time::Duration;

use classifier::PredictionResult;
use reqwest::multipart::{Form, Part};
use thiserror::Error;
use url::Url;

use crate::inference::FILE_FIELD;

/// An image as uploaded by the browser.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("server answered {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("unexpected answer: {0}")]
    Decode(String),
}

/// Client of an inference server's `POST /predict`.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    http: reqwest::Client,
    url: Url,
}

impl InferenceClient {
    pub fn new(url: Url, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Forwards the upload, file name and content type included.
    pub async fn predict(&self, upload: Upload) -> Result<PredictionResult, ClientError> {
        let part = Part::bytes(upload.bytes).file_name(upload.file_name);
        let part = match upload.content_type {
            Some(content_type) => part.mime_str(&content_type)?,
            None => part,
        };
        let form = Form::new().part(FILE_FIELD, part);

        let response = self
            .http
            .post(self.url.clone())
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                detail: detail(&body),
            });
        }
        serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

/// The `detail` of an error body, or the raw body.
fn detail(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_owned();
    };
    match value.get("detail") {
        Some(serde_json::Value::String(detail)) => detail.clone(),
        Some(other) => other.to_string(),
        None => body.to_owned(),
    }
}
