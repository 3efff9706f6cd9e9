use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use classifier::{
    CacheKind, Classifier, InferenceService, MemCache, OnnxModel, Preprocessor, RedisCache,
    ServiceConfig,
};
use classifier_server::{
    inference::{self, HttpConfig},
    logging::setup_logging,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    run_mode: RunMode,
}

#[derive(Subcommand)]
enum RunMode {
    /// Serve the prediction API over HTTP
    Serve {
        #[arg(long, env, default_value = "0.0.0.0:8000")]
        addr: SocketAddr,

        /// The ONNX classifier
        #[arg(short, long, env = "MODEL_PATH", default_value = "/app/model.onnx")]
        model: PathBuf,

        /// Expected number of classes; model outputs of another width are
        /// rejected
        #[arg(long, env)]
        num_classes: Option<usize>,

        /// Side of the square input the model expects
        #[arg(long, env, default_value = "512")]
        image_size: u32,

        /// The cache database, e.g. `redis://localhost:6379/0`. Without it
        /// results are cached in process memory
        #[arg(long, env)]
        redis_url: Option<String>,

        /// Turn result caching off, even if a redis URL is given
        #[arg(long, env)]
        no_cache: bool,

        /// Lifetime of a cached prediction (in seconds)
        #[arg(long, env, default_value = "600")]
        cache_ttl_secs: u64,

        /// Upper bound of a single cache operation (in milliseconds)
        #[arg(long, env, default_value = "500")]
        cache_timeout_ms: u64,

        /// Upper bound of preprocessing and model execution (in seconds)
        #[arg(long, env, default_value = "30")]
        inference_timeout_secs: u64,

        /// Largest accepted upload (in bytes)
        #[arg(long, env, default_value = "10485760")]
        max_upload_bytes: usize,

        /// Origins allowed to call the API from a browser; `*` for any
        #[arg(long, env, value_delimiter = ',')]
        allowed_origins: Vec<String>,

        /// Should the logs be printed in json format or not
        #[arg(long, env)]
        json: bool,
    },

    /// Classify a single image file and print the result
    Predict {
        #[arg(short, long)]
        model: PathBuf,

        #[arg(long, default_value = "512")]
        image_size: u32,

        #[arg(long)]
        num_classes: Option<usize>,

        /// The image to classify
        image: PathBuf,
    },

    /// Remove every entry from the cache database
    FlushCache {
        #[arg(long, env)]
        redis_url: String,
    },
}

async fn load_classifier(
    model: PathBuf,
    image_size: u32,
    num_classes: Option<usize>,
) -> anyhow::Result<Classifier> {
    info!("Loading model from {}", model.display());
    let model = tokio::task::spawn_blocking(move || OnnxModel::load(&model, image_size))
        .await
        .context("running model loading task")?
        .context("loading model")?;
    let classifier = Classifier::new(Arc::new(model));
    Ok(match num_classes {
        Some(n) => classifier.with_num_classes(n),
        None => classifier,
    })
}

async fn serve(args: RunMode) -> anyhow::Result<()> {
    let RunMode::Serve {
        addr,
        model,
        num_classes,
        image_size,
        redis_url,
        no_cache,
        cache_ttl_secs,
        cache_timeout_ms,
        inference_timeout_secs,
        max_upload_bytes,
        allowed_origins,
        json,
    } = args
    else {
        unreachable!()
    };

    setup_logging(json)?;

    let classifier = load_classifier(model, image_size, num_classes).await?;

    let config = ServiceConfig {
        cache_ttl: Duration::from_secs(cache_ttl_secs),
        cache_timeout: Duration::from_millis(cache_timeout_ms),
        inference_timeout: Duration::from_secs(inference_timeout_secs),
    };

    let cache = if no_cache {
        warn!("Running without a result cache");
        CacheKind::Disabled
    } else if let Some(url) = redis_url {
        info!("Running with redis cache");
        let cache = RedisCache::open(&url).context("parsing redis URL")?;
        match tokio::time::timeout(config.cache_timeout, cache.ping()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("cache not reachable yet, serving without it: {e}"),
            Err(_) => warn!("cache not reachable yet, serving without it: no answer"),
        }
        CacheKind::Redis(cache)
    } else {
        warn!("Running with in-memory cache. Specify --redis-url to use redis instead");
        CacheKind::Mem(MemCache::default())
    };

    let service = InferenceService::new(Preprocessor::new(image_size), classifier, cache)
        .with_config(config);
    let app = inference::router(
        Arc::new(service),
        &HttpConfig {
            max_upload_bytes,
            allowed_origins: allowed_origins
                .into_iter()
                .map(|o| o.trim().to_owned())
                .filter(|o| !o.is_empty())
                .collect(),
        },
    )
    .context("building router")?;

    classifier_server::serve(addr, app).await
}

async fn predict_locally(args: RunMode) -> anyhow::Result<()> {
    let RunMode::Predict {
        model,
        image_size,
        num_classes,
        image,
    } = args
    else {
        unreachable!()
    };

    setup_logging(false)?;

    let classifier = load_classifier(model, image_size, num_classes).await?;
    let bytes = tokio::fs::read(&image)
        .await
        .with_context(|| format!("reading {}", image.display()))?;
    let service = InferenceService::new(
        Preprocessor::new(image_size),
        classifier,
        CacheKind::Disabled,
    );
    let result = service.predict(bytes).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn flush_cache(args: RunMode) -> anyhow::Result<()> {
    let RunMode::FlushCache { redis_url } = args else {
        unreachable!()
    };

    setup_logging(false)?;

    let cache = RedisCache::open(&redis_url).context("parsing redis URL")?;
    match tokio::time::timeout(Duration::from_secs(10), cache.flush()).await {
        Ok(result) => result.context("flushing the cache")?,
        Err(_) => bail!("no answer from {redis_url}"),
    }
    info!("Cache flushed");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.run_mode {
        serve_args @ RunMode::Serve { .. } => serve(serve_args).await,
        predict_args @ RunMode::Predict { .. } => predict_locally(predict_args).await,
        flush_args @ RunMode::FlushCache { .. } => flush_cache(flush_args).await,
    }
}
