use crate::job::{AnyJob, Job};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;
use tracing::{error, info, warn};

const PENDING_FILE: &str = "pending-jobs.json";

/// Tracks jobs that have not finished yet and persists them to disk.
#[derive(Debug, Clone)]
pub struct JobSetManager {
    path: PathBuf,
    pub jobs: Arc<TokioMutex<Vec<AnyJob>>>,
}

impl JobSetManager {
    /// Load pending jobs left over from a previous run, skipping entries that no longer parse.
    pub fn new(workspace: &Path) -> anyhow::Result<Self> {
        let path = workspace.join(PENDING_FILE);
        let jobs = if path.exists() {
            let content = fs::read_to_string(&path)?;

            let values: Vec<JsonValue> = serde_json::from_str(&content)
                .inspect_err(|error| {
                    warn!(?error, ?path, "Failed to parse job file.");
                })
                .unwrap_or_default();
            values
                .into_iter()
                .filter_map(|value| {
                    serde_json::from_value::<AnyJob>(value)
                        .inspect_err(|error| warn!(?error, ?path, "Failed to parse job json."))
                        .ok()
                })
                .collect()
        } else {
            Vec::new()
        };

        info!(
            count = jobs.len(),
            file = %path.display(),
            "Initialize job manager"
        );

        Ok(Self {
            path,
            jobs: Arc::new(TokioMutex::new(jobs)),
        })
    }

    pub async fn pending(&self) -> Vec<AnyJob> {
        self.jobs.lock().await.clone()
    }

    async fn save(&self, jobs: &[AnyJob]) -> anyhow::Result<()> {
        let content = serde_json::to_string(jobs)?;
        tracing::debug!(path = %self.path.display(), ?content, "Saving jobs to file");

        Ok(tokio::fs::write(&self.path, content).await?)
    }

    /// Adds a job to the set, replacing any job with the same id, and persists the change.
    pub async fn add(&self, job: &AnyJob) {
        let kind = job.kind();
        tracing::debug!(id = %job.id(), kind, "Adding job");
        let mut jobs = self.jobs.lock().await;

        jobs.retain(|j| j.id() != job.id());
        jobs.push(job.clone());

        if let Err(error) = self.save(&jobs).await {
            error!(?kind, ?error, "Failed to save jobs file after adding a job");
        }
    }

    /// Removes a job from the set by its ID and persists the change.
    pub async fn remove(&self, id: &str) {
        tracing::debug!(id, "Removing job");
        let mut jobs = self.jobs.lock().await;
        jobs.retain(|j| j.id() != id);

        if let Err(error) = self.save(&jobs).await {
            error!(id, ?error, "Failed to save jobs file after removing a job");
        }
    }
}
