use crate::config::Config;
use crate::download::{Downloader, video_id};
use crate::job::manager::JobSetManager;
use crate::job::{AnyJob, DownloadJob, Job, JobBoard, JobResult};
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::stream::FuturesUnordered;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

const DOWNLOADS_DIR: &str = "downloads";
const FRAMES_DIR: &str = "frames";

fn init_workspace(workspace: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(workspace.join(DOWNLOADS_DIR))?;
    std::fs::create_dir_all(workspace.join(FRAMES_DIR))?;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
pub enum Submission {
    Accepted(String),
    InProgress(String),
}

#[derive(Clone)]
pub struct AppState {
    pub job_tx: UnboundedSender<AnyJob>,
    pub jobs_manager: JobSetManager,
    pub board: JobBoard,
    pub downloader: Downloader,
    pub permits: usize,
    pub download_retries: u8,
    pub jpeg_quality: u8,
    pub sample_count: usize,

    pub downloads_dir: PathBuf,
    pub frames_dir: PathBuf,
}

impl AppState {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let workspace = PathBuf::from(&config.workspace);
        init_workspace(&workspace)?;
        let (tx, rx) = unbounded();

        let jobs_manager = JobSetManager::new(&workspace)?;

        let this = Self {
            job_tx: tx,
            jobs_manager,
            board: JobBoard::default(),
            downloader: config.downloader(),
            permits: config.permits,
            download_retries: config.download_retries,
            jpeg_quality: config.jpeg_quality,
            sample_count: config.sample_count,

            downloads_dir: workspace.join(DOWNLOADS_DIR),
            frames_dir: workspace.join(FRAMES_DIR),
        };

        for job in this.jobs_manager.pending().await {
            let (url, frame_skip) = match &job {
                AnyJob::Download(download) => (download.url.clone(), download.frame_skip),
                AnyJob::Extract(extract) => (String::new(), extract.frame_skip),
            };
            info!(job_id = %job.id(), kind = %job.kind(), "Loading pending job");
            this.board.submit(job.id(), &url, frame_skip).await;
            _ = this.job_tx.unbounded_send(job);
        }

        this.start_job_handler(rx, config.permits);

        Ok(this)
    }

    pub fn downloads_dir(&self) -> &Path {
        self.downloads_dir.as_path()
    }

    pub fn frames_dir(&self) -> &Path {
        self.frames_dir.as_path()
    }

    /// Queue a download-then-extract run for `url`.
    pub async fn submit(&self, url: &str, frame_skip: u32) -> Submission {
        let url = url.trim();
        let job_id = video_id(url);

        if !self.board.submit(&job_id, url, frame_skip).await {
            return Submission::InProgress(job_id);
        }

        let job = AnyJob::from(DownloadJob::new(job_id.clone(), url.to_string(), frame_skip));
        self.jobs_manager.add(&job).await;
        _ = self.job_tx.unbounded_send(job);
        info!(job_id, url, frame_skip, "Job submitted");
        Submission::Accepted(job_id)
    }

    fn start_job_handler(&self, rx: UnboundedReceiver<AnyJob>, permits: usize) {
        info!(permits, "Job handler started");
        let this = self.clone();
        let semaphore = Arc::new(Semaphore::new(permits));

        tokio::spawn(async move {
            let mut rx = rx.fuse();
            let mut running = FuturesUnordered::new();
            let mut in_progress = HashSet::new();

            loop {
                debug!("Waiting for job");
                futures::select! {
                    maybe_job = rx.next() => {
                        let Some(job) = maybe_job else {
                            error!("Job channel closed");
                            break;
                        };

                        let kind = job.kind();
                        let job_id = job.id().to_string();
                        if !in_progress.insert(job_id.clone()) {
                            warn!("Job {job_id} already in-progress, skipping");
                            continue;
                        }

                        let this_c = this.clone();
                        let semaphore_c = semaphore.clone();
                        let id = job_id.clone();
                        running.push(async move {
                            (id, job.gen_task(this_c, semaphore_c).await)
                        });
                        info!(job_id, kind, "Job added to processing queue");
                    }
                    (id, result) = running.select_next_some() => {
                        in_progress.remove(&id);
                        match result {
                            JobResult::Done => {
                                info!(id, "Job completed successfully");
                                this.jobs_manager.remove(&id).await;
                            },
                            JobResult::Next(next_job) => {
                                let kind = next_job.kind();
                                info!(id, kind, "NextJob added to processing queue");
                                this.jobs_manager.add(&next_job).await;
                                _ = this.job_tx.unbounded_send(next_job);
                            },
                            JobResult::Retry(job) => {
                                warn!(job_id = %job.id(), "Retrying job");
                                _ = this.job_tx.unbounded_send(job);
                            },
                            JobResult::Err(failure_job) => {
                                info!(id, "Job failed with failure handling");
                                failure_job.execute_actions(&this).await;
                            },
                        }
                    }
                }
            }

            debug!("Job handler finished");
        });
    }
}
