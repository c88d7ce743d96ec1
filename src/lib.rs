pub mod api;
pub mod app_state;
pub mod config;
pub mod download;
pub mod extract;
pub mod job;
pub mod ui;

use anyhow::Context;
use axum::Router;
use axum::extract::Extension;
use axum::routing::{get, post};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

//
// Re-export
//
pub use api::{
    extract_form, index, job_page, job_status, log_request_errors, serve_frame, waitlist,
};
pub use app_state::{AppState, Submission};
pub use config::Config;
pub use download::{DownloadError, Downloader, video_file_name, video_id};
pub use extract::{
    ExtractError, ExtractOptions, ExtractProgress, Extraction, LogProgress, ProgressCallback,
    extract_frames,
};
pub use job::{DownloadJob, ExtractJob, Job, JobBoard, JobResult, JobStatus, JobView};

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/extract", post(extract_form))
        .route("/jobs/{id}", get(job_page))
        .route("/api/jobs/{id}", get(job_status))
        .route("/waitlist", get(waitlist))
        .route("/frames/{id}/{file}", get(serve_frame))
        .layer(axum::middleware::from_fn(api::log_request_errors))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(Extension(state))
}

/// Serve the browser UI until the process is stopped.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(&config)
        .await
        .context("Failed to create app state")?;
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.listen_on_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Frame extractor listening on http://{addr}");

    axum::serve(listener, app).await.context("Server error")
}

/// Download `config.url` into the workspace and extract its frames into `config.output_folder`.
pub async fn run_once(config: &Config) -> anyhow::Result<Extraction> {
    let url = config
        .url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .context("No url given")?;

    let options = ExtractOptions::new(&config.output_folder, config.frame_skip)
        .with_quality(config.jpeg_quality);
    options.validate()?;

    let workspace = PathBuf::from(&config.workspace);
    tokio::fs::create_dir_all(&workspace)
        .await
        .with_context(|| format!("Failed to create workspace {}", workspace.display()))?;

    info!(url, "Downloading video");
    let video = config
        .downloader()
        .download(url, &workspace)
        .await
        .map_err(|error| {
            let message = error.user_message();
            anyhow::Error::new(error).context(message)
        })?;
    info!(video = %video.display(), "Video downloaded");

    let label = video_id(url);
    let extraction = tokio::task::spawn_blocking(move || {
        extract_frames(&video, &options, &LogProgress::new(label))
    })
    .await
    .context("Extraction task failed")??;

    info!(
        saved = extraction.saved,
        decoded = extraction.decoded,
        "{}",
        extraction.summary()
    );
    Ok(extraction)
}
