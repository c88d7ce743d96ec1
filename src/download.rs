use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info};

pub const DEFAULT_DOWNLOADER: &str = "yt-dlp";
pub const DEFAULT_FORMAT: &str = "best";

const VIDEO_ID_LEN: usize = 10;
const STDERR_TAIL_LINES: usize = 5;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Please enter a valid YouTube URL.")]
    EmptyUrl,

    #[error("Failed to start downloader `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to download the video. Please check the URL and try again. ({status})")]
    Failed { status: ExitStatus, stderr: String },

    #[error("Downloader finished but produced no file at {}", .0.display())]
    Missing(PathBuf),
}

impl DownloadError {
    /// Message shown to the person who submitted the URL.
    pub fn user_message(&self) -> String {
        match self {
            DownloadError::Failed { .. } => {
                "Failed to download the video. Please check the URL and try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Replace every run of non-word characters with a single underscore.
pub fn sanitize_filename(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    let mut in_run = false;
    for ch in url.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            out.push(ch);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

/// Last ten characters of the sanitized URL.
pub fn video_id(url: &str) -> String {
    let sanitized = sanitize_filename(url);
    let count = sanitized.chars().count();
    sanitized
        .chars()
        .skip(count.saturating_sub(VIDEO_ID_LEN))
        .collect()
}

pub fn video_file_name(url: &str) -> String {
    format!("video_{}.mp4", video_id(url))
}

/// Thin wrapper around an external downloader such as `yt-dlp`.
#[derive(Clone, Debug)]
pub struct Downloader {
    program: String,
    format: String,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new(DEFAULT_DOWNLOADER, DEFAULT_FORMAT)
    }
}

impl Downloader {
    pub fn new(program: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            format: format.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Download `url` into `dest_dir` and return the path of the video file.
    ///
    /// Runs `<program> -f <format> -o <dest_dir>/video_<id>.mp4 <url>`.
    pub async fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, DownloadError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(DownloadError::EmptyUrl);
        }

        let output = dest_dir.join(video_file_name(url));
        info!(program = %self.program, ?output, "Downloading video to '{}'", output.display());

        let result = Command::new(&self.program)
            .arg("-f")
            .arg(&self.format)
            .arg("-o")
            .arg(&output)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| DownloadError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !result.status.success() {
            let stderr = stderr_tail(&result.stderr);
            error!(status = %result.status, %stderr, url, "Downloader failed");
            return Err(DownloadError::Failed {
                status: result.status,
                stderr,
            });
        }

        if tokio::fs::metadata(&output).await.is_err() {
            return Err(DownloadError::Missing(output));
        }

        debug!(?output, "Download finished");
        Ok(output)
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines = text.lines().collect::<Vec<_>>();
    lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename_collapses_runs() {
        assert_eq!(
            sanitize_filename("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            "https_www_youtube_com_watch_v_dQw4w9WgXcQ"
        );
        assert_eq!(sanitize_filename("a--b"), "a_b");
        assert_eq!(sanitize_filename("keep_under_score"), "keep_under_score");
        assert_eq!(sanitize_filename(""), "");
    }

    #[test]
    fn test_sanitize_filename_keeps_unicode_letters() {
        assert_eq!(sanitize_filename("vidéo/名前"), "vidéo_名前");
    }

    #[test]
    fn test_video_id_takes_last_ten_chars() {
        assert_eq!(
            video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            "Qw4w9WgXcQ"
        );
        assert_eq!(video_id("abc"), "abc");
        assert_eq!(video_file_name("https://youtu.be/abc"), "video_utu_be_abc.mp4");
    }

    #[tokio::test]
    async fn test_empty_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let error = Downloader::default()
            .download("   ", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(error, DownloadError::EmptyUrl));
    }

    #[tokio::test]
    async fn test_missing_program_reports_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new("definitely-not-a-real-downloader", "best");
        let error = downloader
            .download("https://example.com/v", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(error, DownloadError::Spawn { .. }));
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_download_passes_expected_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let args_file = dir.path().join("args.txt");
        let script = write_script(
            dir.path(),
            "fake-dl",
            &format!("echo \"$@\" > {}\ntouch \"$4\"", args_file.display()),
        );

        let downloader = Downloader::new(script.to_string_lossy(), "best");
        let url = "https://example.com/watch?v=0123456789";
        let path = downloader.download(url, dir.path()).await.unwrap();

        assert_eq!(path, dir.path().join("video_0123456789.mp4"));
        assert!(path.exists());

        let args = std::fs::read_to_string(&args_file).unwrap();
        assert_eq!(args.trim(), format!("-f best -o {} {url}", path.display()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_a_failed_download() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "fail-dl", "echo 'ERROR: bad url' >&2\nexit 1");

        let downloader = Downloader::new(script.to_string_lossy(), "best");
        let error = downloader
            .download("https://example.com/bad", dir.path())
            .await
            .unwrap_err();

        match &error {
            DownloadError::Failed { stderr, .. } => assert!(stderr.contains("bad url")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            error.user_message(),
            "Failed to download the video. Please check the URL and try again."
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_zero_exit_without_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "noop-dl", "exit 0");

        let downloader = Downloader::new(script.to_string_lossy(), "best");
        let error = downloader
            .download("https://example.com/none", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(error, DownloadError::Missing(_)));
    }
}
