use anyhow::Context;
use ffmpeg_next::{self as ffmpeg};
use frame_extractor::Config;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    ffmpeg::init().context("Failed to initialize FFmpeg")?;

    // Load configuration from CLI and/or config file
    let config = Config::load().context("Failed to load configuration")?;

    if config.url.is_some() {
        frame_extractor::run_once(&config).await?;
        Ok(())
    } else {
        frame_extractor::run(config).await
    }
}
