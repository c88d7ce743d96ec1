pub mod middleware;
pub mod routes;

// Re-export public types and functions
pub use middleware::log_request_errors;
pub use routes::{extract_form, index, job_page, job_status, serve_frame, waitlist};
