//! Liveness endpoint.
//!
//! Answers 200 as long as the process is serving HTTP. It does not touch the
//! store, so a database outage shows up as 503s on the API routes rather than
//! as a failed health check.

use axum::http::StatusCode;

/// Health check handler.
///
/// ```ignore
/// GET /health HTTP/1.1
///
/// HTTP/1.1 200 OK
///
/// OK
/// ```
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
