use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use classifier_server::{
    logging::setup_logging,
    web::{self, InferenceClient, LabelMap, WebState},
};
use tracing::{info, warn};
use url::Url;

/// Serve the upload page in front of an inference server
#[derive(Parser)]
#[command(version, about)]
struct Args {
    #[arg(long, env, default_value = "0.0.0.0:8080")]
    addr: SocketAddr,

    /// The `/predict` endpoint of the inference server
    #[arg(
        long,
        env = "INFERENCE_SERVER_URL",
        default_value = "http://localhost:8000/predict"
    )]
    inference_url: Url,

    /// CSV file mapping class indices to names (`Index,Folder Name`)
    #[arg(long, env = "LABELS_PATH")]
    labels: Option<PathBuf>,

    /// Upper bound of a forwarded prediction request (in seconds)
    #[arg(long, env, default_value = "60")]
    request_timeout_secs: u64,

    /// Largest accepted upload (in bytes)
    #[arg(long, env, default_value = "10485760")]
    max_upload_bytes: usize,

    /// Should the logs be printed in json format or not
    #[arg(long, env)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(args.json)?;

    let labels = match &args.labels {
        Some(path) => {
            let labels = LabelMap::load(path)?;
            info!("Loaded {} labels from {}", labels.len(), path.display());
            labels
        }
        None => {
            warn!("No label file given, classes will be shown by index");
            LabelMap::default()
        }
    };

    info!("Forwarding predictions to {}", args.inference_url);
    let client = InferenceClient::new(
        args.inference_url,
        Duration::from_secs(args.request_timeout_secs),
    )
    .context("building HTTP client")?;

    let app = web::router(Arc::new(WebState { client, labels }), args.max_upload_bytes);
    classifier_server::serve(args.addr, app).await
}
