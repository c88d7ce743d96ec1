use crate::app_state::AppState;
use crate::extract::{ExtractError, ExtractOptions, extract_frames};
use crate::job::{Action, EXTRACT_KIND, FailureJob, Job, JobKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::task::JoinHandle as TokioJoinHandle;
use tracing::info;

/// Turn a downloaded video into JPEG frames under `frames/<id>`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExtractJob {
    pub id: String,
    /// File name inside the downloads directory.
    pub video: String,
    pub frame_skip: u32,
}

impl ExtractJob {
    pub fn new(id: String, video: String, frame_skip: u32) -> Self {
        Self {
            id,
            video,
            frame_skip,
        }
    }

    pub fn video_path(&self, state: &AppState) -> PathBuf {
        state.downloads_dir().join(&self.video)
    }

    pub fn output_folder(&self, state: &AppState) -> PathBuf {
        state.frames_dir().join(&self.id)
    }
}

impl Job for ExtractJob {
    fn kind(&self) -> JobKind {
        EXTRACT_KIND
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
            let live = state.board.extracting(&job.id).await;
            let video_path = job.video_path(&state);
            let output_folder = job.output_folder(&state);
            // frames from an earlier run of the same id
            if tokio::fs::metadata(&output_folder).await.is_ok() {
                tokio::fs::remove_dir_all(&output_folder).await?;
            }
            let options =
                ExtractOptions::new(output_folder, job.frame_skip).with_quality(state.jpeg_quality);

            let extraction = tokio::task::spawn_blocking(move || {
                extract_frames(&video_path, &options, live.as_ref())
            })
            .await??;

            let samples = extraction
                .frames
                .iter()
                .take(state.sample_count)
                .filter_map(|path| path.file_name())
                .map(|name| name.to_string_lossy().into_owned())
                .collect();
            let folder = extraction.output_folder.display().to_string();
            info!(job_id = %job.id, saved = extraction.saved, folder, "Extraction finished");

            state
                .board
                .done(&job.id, extraction.saved, folder, samples)
                .await;
            Ok(())
        })
    }

    fn on_final_failure(&self, error: &anyhow::Error) -> FailureJob {
        let message = match error.downcast_ref::<ExtractError>() {
            Some(error) => error.to_string(),
            None => format!("Frame extraction failed: {error}"),
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

    #[test]
    fn test_open_failure_message_matches_ui_text() {
        let job = ExtractJob::new("abc".into(), "video_abc.mp4".into(), 1);
        let error = anyhow::Error::from(ExtractError::Open(ffmpeg_next::Error::InvalidData));
        let failure = job.on_final_failure(&error);

        match &failure.actions[1] {
            Action::MarkFailed { message } => assert_eq!(message, "Cannot open video file."),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_extract_job_round_trips_through_json() {
        let json = r#"{"id":"abc","video":"video_abc.mp4","frame_skip":4}"#;
        let job: ExtractJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.video, "video_abc.mp4");
        assert_eq!(job.frame_skip, 4);
    }
}
