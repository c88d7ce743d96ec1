pub mod download;
pub mod extract;
pub mod manager;
pub mod status;

use crate::app_state::AppState;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore as TokioSemaphore;
use tokio::task::JoinHandle as TokioJoinHandle;
use tracing::{debug, error, info};

// Re-exports for convenience
pub use download::DownloadJob;
pub use extract::ExtractJob;
pub use status::{JobBoard, JobStatus, JobView};

pub type JobKind = &'static str;
pub const DOWNLOAD_KIND: JobKind = "download";
pub const EXTRACT_KIND: JobKind = "extract";

pub enum JobResult {
    Done,
    Next(AnyJob),
    Retry(AnyJob),
    Err(FailureJob),
}

impl From<Option<AnyJob>> for JobResult {
    fn from(job: Option<AnyJob>) -> Self {
        match job {
            Some(job) => JobResult::Next(job),
            None => JobResult::Done,
        }
    }
}

pub trait Job: Clone + Send + Sync + 'static {
    fn kind(&self) -> JobKind;

    fn need_permit(&self) -> bool {
        false
    }

    fn id(&self) -> &str;

    fn gen_job(&self, state: AppState) -> TokioJoinHandle<anyhow::Result<()>>;

    fn next_job(&self, _state: &AppState) -> Option<AnyJob> {
        None
    }

    fn wait_for_retry(&self, _state: &AppState) -> Option<Duration> {
        None
    }

    fn on_final_failure(&self, error: &anyhow::Error) -> FailureJob;
}

/// Every job the pipeline knows about; this is also the persisted form.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnyJob {
    Download(DownloadJob),
    Extract(ExtractJob),
}

impl From<DownloadJob> for AnyJob {
    fn from(job: DownloadJob) -> Self {
        AnyJob::Download(job)
    }
}

impl From<ExtractJob> for AnyJob {
    fn from(job: ExtractJob) -> Self {
        AnyJob::Extract(job)
    }
}

macro_rules! dispatch {
    ($self:ident, $job:ident => $body:expr) => {
        match $self {
            AnyJob::Download($job) => $body,
            AnyJob::Extract($job) => $body,
        }
    };
}

impl AnyJob {
    /// Wait for a permit if needed, run the job and decide what happens next.
    pub async fn gen_task(self, state: AppState, semaphore: Arc<TokioSemaphore>) -> JobResult {
        let job_id = self.id().to_string();
        let kind = self.kind();
        debug!(job_id, kind, "job wait for permit");

        let permit = if self.need_permit() {
            semaphore.acquire().await.ok()
        } else {
            None
        };

        info!(job_id, kind, "job started");

        let outcome = self.gen_job(state.clone()).await;
        // the retry wait must not hold a worker slot
        drop(permit);

        let error = match outcome {
            Ok(Ok(())) => return JobResult::from(self.next_job(&state)),
            Ok(Err(error)) => error,
            Err(join_error) => anyhow::anyhow!("job task panicked or was cancelled: {join_error}"),
        };

        if let Some(retry_interval) = self.wait_for_retry(&state) {
            error!(?error, %job_id, kind, "Job process failed, wait for retry");
            tokio::time::sleep(retry_interval).await;
            JobResult::Retry(self)
        } else {
            error!(?error, job_id, kind, "Job final failure");
            JobResult::Err(self.on_final_failure(&error))
        }
    }
}

impl Job for AnyJob {
    fn kind(&self) -> JobKind {
        dispatch!(self, job => job.kind())
    }

    fn need_permit(&self) -> bool {
        dispatch!(self, job => job.need_permit())
    }

    fn id(&self) -> &str {
        dispatch!(self, job => job.id())
    }

    fn gen_job(&self, state: AppState) -> TokioJoinHandle<anyhow::Result<()>> {
        dispatch!(self, job => job.gen_job(state))
    }

    fn next_job(&self, state: &AppState) -> Option<AnyJob> {
        dispatch!(self, job => job.next_job(state))
    }

    fn wait_for_retry(&self, state: &AppState) -> Option<Duration> {
        dispatch!(self, job => job.wait_for_retry(state))
    }

    fn on_final_failure(&self, error: &anyhow::Error) -> FailureJob {
        dispatch!(self, job => job.on_final_failure(error))
    }
}

#[derive(Clone, Debug)]
pub enum Action {
    Silent,
    Cleanup,
    MarkFailed { message: String },
}

impl Action {
    async fn execute_action(action: Action, state: &AppState, job_id: &str, kind: JobKind) {
        match action {
            Action::Silent => {
                debug!(job_id, "Silent handling failed");
            }
            Action::Cleanup => {
                info!(job_id, kind, "Performing cleanup");
                match kind {
                    DOWNLOAD_KIND => {
                        let video = state.downloads_dir().join(format!("video_{job_id}.mp4"));
                        let _ = tokio::fs::remove_file(video).await;
                    }
                    EXTRACT_KIND => {
                        let _ = tokio::fs::remove_dir_all(state.frames_dir().join(job_id)).await;
                    }
                    _ => {}
                }
            }
            Action::MarkFailed { message } => {
                info!(job_id, kind, message, "Marking job as failed");
                state.board.failed(job_id, message).await;
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct FailureJob {
    pub job_id: String,
    pub kind: JobKind,
    pub actions: Vec<Action>,
}

impl FailureJob {
    pub fn new(job_id: String, kind: JobKind, actions: Vec<Action>) -> Self {
        Self {
            job_id,
            kind,
            actions,
        }
    }

    pub async fn execute_actions(self, state: &AppState) {
        state.jobs_manager.remove(&self.job_id).await;
        for action in self.actions {
            Action::execute_action(action, state, &self.job_id, self.kind).await;
        }
    }
}
