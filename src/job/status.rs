use crate::extract::{ExtractProgress, ProgressCallback};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock as TokioRwLock;

/// Frame counters shared between the decoding thread and status readers.
#[derive(Debug, Default)]
pub struct LiveProgress {
    decoded: AtomicU64,
    saved: AtomicU64,
    // 0 means unknown
    total: AtomicU64,
}

impl LiveProgress {
    pub fn snapshot(&self) -> ExtractProgress {
        let total = self.total.load(Ordering::Relaxed);
        ExtractProgress {
            decoded: self.decoded.load(Ordering::Relaxed),
            saved: self.saved.load(Ordering::Relaxed),
            total: (total > 0).then_some(total),
        }
    }
}

impl ProgressCallback for LiveProgress {
    fn on_progress(&self, progress: &ExtractProgress) {
        self.decoded.store(progress.decoded, Ordering::Relaxed);
        self.saved.store(progress.saved, Ordering::Relaxed);
        self.total.store(progress.total.unwrap_or(0), Ordering::Relaxed);
    }
}

#[derive(Clone, Debug)]
enum Phase {
    Queued,
    Downloading { file: String },
    Extracting(Arc<LiveProgress>),
    Done {
        saved: u64,
        folder: String,
        samples: Vec<String>,
    },
    Failed { message: String },
}

/// Point-in-time view of a job, as rendered by the UI and the JSON API.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Downloading {
        file: String,
    },
    Extracting {
        decoded: u64,
        saved: u64,
        total: Option<u64>,
        fraction: Option<f32>,
    },
    Done {
        saved: u64,
        folder: String,
        samples: Vec<String>,
    },
    Failed {
        message: String,
    },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Done { .. } | JobStatus::Failed { .. })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct JobView {
    pub id: String,
    pub url: String,
    pub frame_skip: u32,
    pub status: JobStatus,
}

#[derive(Clone, Debug)]
struct Entry {
    url: String,
    frame_skip: u32,
    phase: Phase,
}

impl Entry {
    fn view(&self, id: &str) -> JobView {
        let status = match &self.phase {
            Phase::Queued => JobStatus::Queued,
            Phase::Downloading { file } => JobStatus::Downloading { file: file.clone() },
            Phase::Extracting(live) => {
                let progress = live.snapshot();
                JobStatus::Extracting {
                    decoded: progress.decoded,
                    saved: progress.saved,
                    total: progress.total,
                    fraction: progress.fraction(),
                }
            }
            Phase::Done {
                saved,
                folder,
                samples,
            } => JobStatus::Done {
                saved: *saved,
                folder: folder.clone(),
                samples: samples.clone(),
            },
            Phase::Failed { message } => JobStatus::Failed {
                message: message.clone(),
            },
        };

        JobView {
            id: id.to_string(),
            url: self.url.clone(),
            frame_skip: self.frame_skip,
            status,
        }
    }
}

/// In-memory status of every job submitted since the server started.
#[derive(Clone, Debug, Default)]
pub struct JobBoard {
    entries: Arc<TokioRwLock<HashMap<String, Entry>>>,
}

impl JobBoard {
    /// Register a job as queued. Returns `false` if a job with this id is still active.
    pub async fn submit(&self, id: &str, url: &str, frame_skip: u32) -> bool {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(id)
            && !matches!(entry.phase, Phase::Done { .. } | Phase::Failed { .. })
        {
            return false;
        }

        entries.insert(
            id.to_string(),
            Entry {
                url: url.to_string(),
                frame_skip,
                phase: Phase::Queued,
            },
        );
        true
    }

    pub async fn is_active(&self, id: &str) -> bool {
        self.get(id)
            .await
            .is_some_and(|view| !view.status.is_finished())
    }

    pub async fn get(&self, id: &str) -> Option<JobView> {
        self.entries.read().await.get(id).map(|entry| entry.view(id))
    }

    pub async fn downloading(&self, id: &str, file: String) {
        self.set_phase(id, Phase::Downloading { file }).await;
    }

    /// Switch to extracting and hand back the counters the decoder should update.
    pub async fn extracting(&self, id: &str) -> Arc<LiveProgress> {
        let live = Arc::new(LiveProgress::default());
        self.set_phase(id, Phase::Extracting(live.clone())).await;
        live
    }

    pub async fn done(&self, id: &str, saved: u64, folder: String, samples: Vec<String>) {
        self.set_phase(
            id,
            Phase::Done {
                saved,
                folder,
                samples,
            },
        )
        .await;
    }

    pub async fn failed(&self, id: &str, message: String) {
        self.set_phase(id, Phase::Failed { message }).await;
    }

    async fn set_phase(&self, id: &str, phase: Phase) {
        if let Some(entry) = self.entries.write().await.get_mut(id) {
            entry.phase = phase;
        } else {
            tracing::warn!(id, "Status update for unknown job");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_submit_rejects_active_duplicates() {
        let board = JobBoard::default();
        assert!(board.submit("abc", "https://a/abc", 1).await);
        assert!(!board.submit("abc", "https://a/abc", 2).await);
        assert!(board.is_active("abc").await);

        board.failed("abc", "boom".into()).await;
        assert!(!board.is_active("abc").await);
        // a finished job can be submitted again
        assert!(board.submit("abc", "https://a/abc", 2).await);
        assert_eq!(board.get("abc").await.unwrap().frame_skip, 2);
    }

    #[tokio::test]
    async fn test_phases_render_to_status() {
        let board = JobBoard::default();
        board.submit("job", "https://a/job", 3).await;
        assert_eq!(board.get("job").await.unwrap().status, JobStatus::Queued);

        board.downloading("job", "video_job.mp4".into()).await;
        assert_eq!(
            board.get("job").await.unwrap().status,
            JobStatus::Downloading {
                file: "video_job.mp4".into()
            }
        );

        let live = board.extracting("job").await;
        live.on_progress(&ExtractProgress {
            decoded: 25,
            saved: 9,
            total: Some(100),
        });
        assert_eq!(
            board.get("job").await.unwrap().status,
            JobStatus::Extracting {
                decoded: 25,
                saved: 9,
                total: Some(100),
                fraction: Some(0.25),
            }
        );

        board
            .done("job", 34, "frames/job".into(), vec!["frame_0000.jpg".into()])
            .await;
        let view = board.get("job").await.unwrap();
        assert!(view.status.is_finished());
        assert_eq!(view.url, "https://a/job");
    }

    #[tokio::test]
    async fn test_status_json_shape() {
        let board = JobBoard::default();
        board.submit("job", "https://a/job", 1).await;
        board.extracting("job").await;

        let json = serde_json::to_value(board.get("job").await.unwrap()).unwrap();
        assert_eq!(json["status"]["state"], "extracting");
        assert_eq!(json["status"]["total"], serde_json::Value::Null);
        assert_eq!(json["status"]["fraction"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let board = JobBoard::default();
        assert!(board.get("missing").await.is_none());
        assert!(!board.is_active("missing").await);
        // updating an unknown job is a no-op
        board.failed("missing", "x".into()).await;
        assert!(board.get("missing").await.is_none());
    }
}
