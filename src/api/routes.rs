use crate::app_state::Submission;
use crate::job::{DOWNLOAD_KIND, EXTRACT_KIND, Job};
use crate::{AppState, ui};
use axum::body::Body;
use axum::extract::{Extension, Form, Path as AxumPath};
use axum::http::{HeaderValue, Response, StatusCode, header};
use axum::response::{Html, IntoResponse, Json, Redirect};
use mime_guess::from_path;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

const EMPTY_URL_WARNING: &str = "Please enter a valid YouTube URL.";
const FRAME_SKIP_WARNING: &str = "Frame skip must be a whole number of at least 1.";

#[derive(Debug, Default, Deserialize)]
pub struct ExtractForm {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub frame_skip: String,
}

#[derive(Serialize, Deserialize)]
pub struct WaitlistResponse {
    pub pending_download_jobs: usize,
    pub pending_extract_jobs: usize,
    pub total_pending_jobs: usize,
}

/// Job ids are url suffixes with non-word runs collapsed to `_`.
fn is_valid_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id.len() <= 128
        && job_id.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn is_valid_frame_name(file: &str) -> bool {
    !file.is_empty()
        && !file.contains('/')
        && !file.contains('\\')
        && !file.contains("..")
        && file.len() <= 128
}

/// An empty field falls back to 1 like the form's default value.
fn parse_frame_skip(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(1);
    }
    raw.parse::<u32>().ok().filter(|&skip| skip >= 1)
}

fn warning_page(status: StatusCode, warning: &str, form: &ExtractForm) -> Response<Body> {
    (
        status,
        Html(ui::index_page(Some(warning), &form.url, &form.frame_skip)),
    )
        .into_response()
}

pub async fn index() -> Html<String> {
    Html(ui::index_page(None, "", "1"))
}

pub async fn extract_form(
    Extension(state): Extension<AppState>,
    Form(form): Form<ExtractForm>,
) -> Response<Body> {
    let url = form.url.trim();
    if url.is_empty() {
        return warning_page(StatusCode::BAD_REQUEST, EMPTY_URL_WARNING, &form);
    }

    let Some(frame_skip) = parse_frame_skip(&form.frame_skip) else {
        warn!(frame_skip = %form.frame_skip, "Rejected frame skip");
        return warning_page(StatusCode::BAD_REQUEST, FRAME_SKIP_WARNING, &form);
    };

    match state.submit(url, frame_skip).await {
        Submission::Accepted(job_id) => {
            info!(%job_id, "Redirecting to job page");
            Redirect::to(&format!("/jobs/{job_id}")).into_response()
        }
        Submission::InProgress(job_id) => warning_page(
            StatusCode::BAD_REQUEST,
            &format!("Video {job_id} is already in-progress."),
            &form,
        ),
    }
}

pub async fn job_page(
    Extension(state): Extension<AppState>,
    AxumPath(job_id): AxumPath<String>,
) -> Response<Body> {
    if !is_valid_job_id(&job_id) {
        return err_response(StatusCode::BAD_REQUEST, "Invalid job ID format");
    }

    match state.board.get(&job_id).await {
        Some(view) => Html(ui::job_page(&view)).into_response(),
        None => err_response(StatusCode::NOT_FOUND, "Job not found"),
    }
}

pub async fn job_status(
    Extension(state): Extension<AppState>,
    AxumPath(job_id): AxumPath<String>,
) -> Response<Body> {
    match state.board.get(&job_id).await {
        Some(view) => (StatusCode::OK, Json(view)).into_response(),
        None => err_response(StatusCode::NOT_FOUND, "Job not found"),
    }
}

#[axum::debug_handler]
pub async fn waitlist(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let jobs_guard = state.jobs_manager.jobs.lock().await;
    let kinds = jobs_guard.iter().map(Job::kind).collect::<Vec<_>>();
    drop(jobs_guard);

    let download_jobs = kinds.iter().filter(|&&kind| kind == DOWNLOAD_KIND).count();
    let extract_jobs = kinds.iter().filter(|&&kind| kind == EXTRACT_KIND).count();

    (
        StatusCode::OK,
        Json(WaitlistResponse {
            pending_download_jobs: download_jobs,
            pending_extract_jobs: extract_jobs,
            total_pending_jobs: download_jobs + extract_jobs,
        }),
    )
}

pub async fn serve_frame(
    Extension(state): Extension<AppState>,
    AxumPath((job_id, file)): AxumPath<(String, String)>,
) -> Response<Body> {
    if !is_valid_job_id(&job_id) || !is_valid_frame_name(&file) {
        warn!(%job_id, %file, "Invalid frame path");
        return err_response(StatusCode::BAD_REQUEST, "Invalid frame path");
    }

    let path = state.frames_dir().join(&job_id).join(&file);
    let fh = match tokio::fs::File::open(&path).await {
        Ok(fh) => fh,
        Err(error) => {
            debug!(?path, ?error, "Frame not readable");
            return err_response(StatusCode::NOT_FOUND, "File not found");
        }
    };
    let len = fh.metadata().await.map(|m| m.len()).ok();

    let mut res = Response::new(Body::from_stream(ReaderStream::new(fh)));
    let headers = res.headers_mut();
    if let Ok(mime) = HeaderValue::from_str(from_path(&file).first_or_octet_stream().as_ref()) {
        headers.insert(header::CONTENT_TYPE, mime);
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public,max-age=3600"),
    );
    if let Some(len) = len {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    res
}

pub(crate) fn err_response(status: StatusCode, body_str: &'static str) -> Response<Body> {
    (status, body_str).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_job_id() {
        assert!(is_valid_job_id("Qw4w9WgXcQ"));
        assert!(is_valid_job_id("utu_be_abc"));

        assert!(!is_valid_job_id(""));
        assert!(!is_valid_job_id("a/b"));
        assert!(!is_valid_job_id(".."));
        assert!(!is_valid_job_id("has space"));
        assert!(!is_valid_job_id(&"a".repeat(129)));
    }

    #[test]
    fn test_is_valid_frame_name() {
        assert!(is_valid_frame_name("frame_0000.jpg"));

        assert!(!is_valid_frame_name(""));
        assert!(!is_valid_frame_name("../secret"));
        assert!(!is_valid_frame_name("a/b.jpg"));
        assert!(!is_valid_frame_name("a\\b.jpg"));
        assert!(!is_valid_frame_name(".."));
    }

    #[test]
    fn test_parse_frame_skip() {
        assert_eq!(parse_frame_skip("1"), Some(1));
        assert_eq!(parse_frame_skip(" 30 "), Some(30));
        assert_eq!(parse_frame_skip(""), Some(1));

        assert_eq!(parse_frame_skip("0"), None);
        assert_eq!(parse_frame_skip("-2"), None);
        assert_eq!(parse_frame_skip("1.5"), None);
        assert_eq!(parse_frame_skip("many"), None);
    }

    #[test]
    fn test_warning_page_keeps_input() {
        let form = ExtractForm {
            url: "   ".into(),
            frame_skip: "3".into(),
        };
        let res = warning_page(StatusCode::BAD_REQUEST, EMPTY_URL_WARNING, &form);
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            res.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
    }
}
