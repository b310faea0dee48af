//! Webhook endpoint handler.
//!
//! Accepts GitHub webhook deliveries, optionally validates signatures, and
//! runs them through the ingestion pipeline before responding. Processing is
//! synchronous: the response reflects whether the delivery was stored.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use super::AppState;
use crate::ingest::IngestOutcome;
use crate::types::DeliveryId;
use crate::webhooks::SignatureError;

/// Header name for GitHub event type.
const HEADER_EVENT: &str = "x-github-event";
/// Header name for GitHub delivery ID.
const HEADER_DELIVERY: &str = "x-github-delivery";
/// Header name for GitHub signature.
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Errors that stop a delivery before it reaches the pipeline.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Missing required header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// Signature verification failed.
    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    /// Invalid JSON body.
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingHeader(_) => StatusCode::BAD_REQUEST,
            WebhookError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            WebhookError::InvalidJson(_) => StatusCode::BAD_REQUEST,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Maps an ingestion outcome to the gateway response.
pub fn outcome_response(event_type: &str, outcome: &IngestOutcome) -> Response {
    let (status, body) = match outcome {
        IngestOutcome::Applied(_) => (
            StatusCode::OK,
            json!({ "message": "Success", "event": event_type }),
        ),
        IngestOutcome::Skipped { .. } => (
            StatusCode::OK,
            json!({ "message": "Not Pull Request", "event": event_type }),
        ),
        IngestOutcome::Malformed { reason } => {
            (StatusCode::BAD_REQUEST, json!({ "error": reason }))
        }
        IngestOutcome::StorageUnavailable { reason } => {
            (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": reason }))
        }
        IngestOutcome::StorageInvariantViolation { reason }
        | IngestOutcome::ConstraintViolation { reason } => {
            (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": reason }))
        }
    };

    (status, Json(body)).into_response()
}

/// Webhook handler.
///
/// # Request
///
/// - Method: POST
/// - Required headers:
///   - `X-GitHub-Event`: Event type (e.g., "pull_request", "issue_comment")
///   - `X-Hub-Signature-256`: only when a webhook secret is configured
/// - Optional headers:
///   - `X-GitHub-Delivery`: Delivery ID, used for log correlation
/// - Body: JSON webhook payload
///
/// # Response
///
/// - 200 OK: Pull request stored, or event category ignored
/// - 400 Bad Request: Missing header, invalid JSON, or malformed payload
/// - 401 Unauthorized: Invalid or missing signature
/// - 503 Service Unavailable: Store unreachable; safe to redeliver
/// - 500 Internal Server Error: Store rejected the snapshot
///
/// # Example
///
/// ```ignore
/// POST /api/webhooks/github HTTP/1.1
/// X-GitHub-Event: pull_request
/// X-GitHub-Delivery: 550e8400-e29b-41d4-a716-446655440000
/// Content-Type: application/json
///
/// {"action": "opened", "pull_request": {...}, "repository": {...}}
///
/// HTTP/1.1 200 OK
///
/// {"message": "Success", "event": "pull_request"}
/// ```
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WebhookError> {
    let event_type = get_header(&headers, HEADER_EVENT)?;
    let delivery_id = get_header(&headers, HEADER_DELIVERY)
        .ok()
        .map(DeliveryId::new);

    debug!(
        delivery_id = delivery_id.as_ref().map(DeliveryId::as_str).unwrap_or("-"),
        event_type = %event_type,
        "Received webhook"
    );

    // Signature is checked before the body is parsed.
    if let Some(secret) = app_state.webhook_secret() {
        let signature = headers
            .get(HEADER_SIGNATURE)
            .and_then(|v| v.to_str().ok());
        if let Err(e) = secret.verify(&body, signature) {
            warn!(
                delivery_id = delivery_id.as_ref().map(DeliveryId::as_str).unwrap_or("-"),
                error = %e,
                "Rejecting webhook with bad signature"
            );
            return Err(e.into());
        }
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)?;

    let outcome = app_state
        .ingestor()
        .ingest(&event_type, &payload, delivery_id.as_ref())
        .await;

    Ok(outcome_response(&event_type, &outcome))
}

/// Extracts a required header value as a string.
fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or(WebhookError::MissingHeader(name))
}
