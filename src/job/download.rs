use crate::app_state::AppState;
use crate::download::{DownloadError, video_file_name};
use crate::job::{Action, AnyJob, DOWNLOAD_KIND, ExtractJob, FailureJob, Job, JobKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle as TokioJoinHandle;
use tracing::info;

const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Fetch the video for a submitted URL with the configured downloader.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DownloadJob {
    pub id: String,
    pub url: String,
    pub frame_skip: u32,

    #[serde(default)]
    #[serde(skip)]
    pub retry_times: Arc<AtomicU8>,
}

impl DownloadJob {
    pub fn new(id: String, url: String, frame_skip: u32) -> Self {
        Self {
            id,
            url,
            frame_skip,
            retry_times: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn file_name(&self) -> String {
        video_file_name(&self.url)
    }
}

impl Job for DownloadJob {
    fn kind(&self) -> JobKind {
        DOWNLOAD_KIND
    }

    fn need_permit(&self) -> bool {
        true
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn gen_job(&self, state: AppState) -> TokioJoinHandle<anyhow::Result<()>> {
        let job = self.clone();
        tokio::spawn(async move {
            state.board.downloading(&job.id, job.file_name()).await;
            let path = state
                .downloader
                .download(&job.url, state.downloads_dir())
                .await?;
            info!(job_id = %job.id, ?path, "Video downloaded");
            Ok(())
        })
    }

    fn next_job(&self, _state: &AppState) -> Option<AnyJob> {
        Some(ExtractJob::new(self.id.clone(), self.file_name(), self.frame_skip).into())
    }

    fn wait_for_retry(&self, state: &AppState) -> Option<Duration> {
        let retry_times = self.retry_times.load(Ordering::Acquire);
        if retry_times < state.download_retries {
            self.retry_times.store(retry_times + 1, Ordering::Release);
            Some(RETRY_INTERVAL)
        } else {
            None
        }
    }

    fn on_final_failure(&self, error: &anyhow::Error) -> FailureJob {
        let message = match error.downcast_ref::<DownloadError>() {
            Some(error) => error.user_message(),
            None => format!("Failed to download the video: {error}"),
        };

        FailureJob::new(
            self.id.clone(),
            self.kind(),
            vec![Action::Cleanup, Action::MarkFailed { message }],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobResult;
    use std::process::ExitStatus;
    use tokio::sync::Semaphore;

    fn job() -> DownloadJob {
        DownloadJob::new(
            "0123456789".into(),
            "https://example.com/watch?v=0123456789".into(),
            3,
        )
    }

    #[test]
    fn test_download_job_file_name_uses_video_id() {
        assert_eq!(job().file_name(), "video_0123456789.mp4");
    }

    #[test]
    fn test_download_job_deserialize_without_retry_counter() {
        let json = r#"{"id":"abc","url":"https://a/abc","frame_skip":2}"#;
        let job: DownloadJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.id, "abc");
        assert_eq!(job.frame_skip, 2);
        assert_eq!(job.retry_times.load(Ordering::Relaxed), 0);

        let out = serde_json::to_value(&job).unwrap();
        assert!(out.get("retry_times").is_none());
    }

    async fn failing_state(download_retries: u8) -> (AppState, tempfile::TempDir) {
        let workspace = tempfile::tempdir().unwrap();
        let config = crate::Config {
            workspace: workspace.path().to_string_lossy().into_owned(),
            downloader: "definitely-not-a-real-downloader".to_string(),
            download_retries,
            ..Default::default()
        };
        let state = AppState::new(&config).await.unwrap();
        (state, workspace)
    }

    #[tokio::test]
    async fn test_retry_budget_is_shared_between_clones() {
        let (state, _workspace) = failing_state(2).await;
        let job = job();

        assert_eq!(job.wait_for_retry(&state), Some(RETRY_INTERVAL));
        // the requeued copy keeps counting from the same budget
        let requeued = AnyJob::from(job.clone());
        assert_eq!(requeued.wait_for_retry(&state), Some(RETRY_INTERVAL));
        assert_eq!(job.wait_for_retry(&state), None);
        assert_eq!(requeued.wait_for_retry(&state), None);
    }

    #[tokio::test]
    async fn test_no_retries_by_default() {
        let (state, _workspace) = failing_state(0).await;
        assert_eq!(job().wait_for_retry(&state), None);
    }

    #[tokio::test]
    async fn test_failed_download_retries_then_fails_without_holding_permit() {
        let (state, _workspace) = failing_state(1).await;
        let semaphore = Arc::new(Semaphore::new(1));

        let first = tokio::spawn(AnyJob::from(job()).gen_task(state.clone(), semaphore.clone()));
        // the spawn error is immediate, so by now the job is waiting to retry
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(semaphore.available_permits(), 1);

        let retried = match first.await.unwrap() {
            JobResult::Retry(job) => job,
            _ => panic!("expected a retry"),
        };
        assert_eq!(retried.id(), "0123456789");

        match retried.gen_task(state.clone(), semaphore.clone()).await {
            JobResult::Err(failure) => {
                assert_eq!(failure.kind, DOWNLOAD_KIND);
                assert_eq!(failure.job_id, "0123456789");
            }
            _ => panic!("expected a final failure"),
        }
        assert_eq!(semaphore.available_permits(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_final_failure_uses_user_message() {
        use std::os::unix::process::ExitStatusExt;

        let error = anyhow::Error::from(DownloadError::Failed {
            status: ExitStatus::from_raw(256),
            stderr: String::new(),
        });
        let failure = job().on_final_failure(&error);

        assert_eq!(failure.kind, DOWNLOAD_KIND);
        assert!(matches!(failure.actions[0], Action::Cleanup));
        match &failure.actions[1] {
            Action::MarkFailed { message } => assert_eq!(
                message,
                "Failed to download the video. Please check the URL and try again."
            ),
            other => panic!("unexpected action {other:?}"),
        }
    }
}
