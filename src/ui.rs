//! Server-rendered HTML for the browser UI.

use crate::job::{JobStatus, JobView};
use std::fmt::Write as _;

const TITLE: &str = "🎞️ YouTube Video Frame Extractor";
const URL_PLACEHOLDER: &str = "https://www.youtube.com/watch?v=...";
const REFRESH_SECS: u32 = 1;

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn layout(head_extra: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
{head_extra}<title>{TITLE}</title>
<style>
body {{ font-family: sans-serif; max-width: 730px; margin: 2rem auto; padding: 0 1rem; }}
.info {{ background: #e8f0fe; padding: .6rem; border-radius: 4px; }}
.success {{ background: #e6f4ea; padding: .6rem; border-radius: 4px; }}
.warning {{ background: #fef7e0; padding: .6rem; border-radius: 4px; }}
.error {{ background: #fce8e6; padding: .6rem; border-radius: 4px; }}
progress {{ width: 100%; }}
label, input {{ display: block; margin-bottom: .6rem; }}
input[type=text], input[type=number] {{ width: 100%; }}
</style>
</head>
<body>
<h1>{TITLE}</h1>
{body}
</body>
</html>
"#
    )
}

/// The submission form, optionally with a warning and the previously entered values.
pub fn index_page(warning: Option<&str>, url: &str, frame_skip: &str) -> String {
    let mut body = String::new();
    if let Some(warning) = warning {
        let _ = writeln!(body, r#"<p class="warning">⚠️ {}</p>"#, escape_html(warning));
    }
    let _ = write!(
        body,
        r#"<form method="post" action="/extract">
<label for="url">🔗 Enter YouTube Video URL</label>
<input type="text" id="url" name="url" placeholder="{URL_PLACEHOLDER}" value="{url}">
<label for="frame_skip">📸 Frame skip (1 = every frame, 2 = every other...)</label>
<input type="number" id="frame_skip" name="frame_skip" min="1" step="1" value="{frame_skip}">
<button type="submit">🚀 Download &amp; Extract Frames</button>
</form>
"#,
        url = escape_html(url),
        frame_skip = escape_html(frame_skip),
    );
    layout("", &body)
}

/// Status page for one job; refreshes itself until the job is finished.
pub fn job_page(view: &JobView) -> String {
    let id = escape_html(&view.id);
    let mut body = String::new();
    if !view.url.is_empty() {
        let _ = writeln!(body, "<p><code>{}</code></p>", escape_html(&view.url));
    }

    match &view.status {
        JobStatus::Queued => {
            let _ = writeln!(
                body,
                r#"<p class="info">⏳ Processing... waiting for a free worker.</p>"#
            );
            let _ = writeln!(body, "<progress></progress>");
        }
        JobStatus::Downloading { file } => {
            let _ = writeln!(
                body,
                r#"<p class="info">📥 Downloading video to '{}'...</p>"#,
                escape_html(file)
            );
            let _ = writeln!(body, "<progress></progress>");
        }
        JobStatus::Extracting {
            decoded,
            saved,
            fraction,
            ..
        } => {
            let _ = writeln!(
                body,
                r#"<p class="info">⏳ Extracting frames: {decoded} decoded, {saved} saved.</p>"#
            );
            match fraction {
                Some(fraction) => {
                    let _ = writeln!(
                        body,
                        r#"<progress max="1" value="{fraction:.3}"></progress>"#
                    );
                }
                None => {
                    let _ = writeln!(body, "<progress></progress>");
                }
            }
        }
        JobStatus::Done {
            saved,
            folder,
            samples,
        } => {
            let _ = writeln!(body, r#"<progress max="1" value="1"></progress>"#);
            let _ = writeln!(
                body,
                r#"<p class="success">✅ Done! {saved} frames saved in '{}'.</p>"#,
                escape_html(folder)
            );
            if !samples.is_empty() {
                let _ = writeln!(body, "<h3>🖼️ Sample Extracted Frames:</h3>");
                for sample in samples {
                    let sample = escape_html(sample);
                    let _ = writeln!(
                        body,
                        r#"<p><img src="/frames/{id}/{sample}" alt="{sample}" width="300"></p>"#
                    );
                }
            }
        }
        JobStatus::Failed { message } => {
            let _ = writeln!(body, r#"<p class="error">❌ {}</p>"#, escape_html(message));
        }
    }
    let _ = writeln!(body, r#"<p><a href="/">Extract another video</a></p>"#);

    let head = if view.status.is_finished() {
        String::new()
    } else {
        format!("<meta http-equiv=\"refresh\" content=\"{REFRESH_SECS}\">\n")
    };
    layout(&head, &body)
}
