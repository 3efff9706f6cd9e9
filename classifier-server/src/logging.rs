use anyhow::Context as _;
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt::format::FmtSpan};

/// Installs the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn setup_logging(json: bool) -> anyhow::Result<()> {
    if json {
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_env_filter(env_filter())
            .with_span_events(FmtSpan::CLOSE)
            .finish();
        tracing::subscriber::set_global_default(subscriber).context("setting up logging")
    } else {
        let subscriber = tracing_subscriber::fmt()
            .compact()
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_env_filter(env_filter())
            .finish();
        tracing::subscriber::set_global_default(subscriber).context("setting up logging")
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}
