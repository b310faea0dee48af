//! Read-only query endpoints for the dashboard.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use super::AppState;
use crate::store::{PullRequestListing, StoreError};
use crate::types::{InvalidFullName, PrNumber, RepoFullName};

pub const DEFAULT_LIST_LIMIT: usize = 200;
pub const MAX_LIST_LIMIT: usize = 1000;

/// Errors that can occur when querying pull requests.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("pull request not found: {full_name}{number}")]
    NotFound {
        full_name: RepoFullName,
        number: PrNumber,
    },

    #[error("{0}")]
    InvalidRepository(#[from] InvalidFullName),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let status = match &self {
            QueryError::NotFound { .. } => StatusCode::NOT_FOUND,
            QueryError::InvalidRepository(_) => StatusCode::BAD_REQUEST,
            QueryError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            QueryError::Store(e) if e.is_retriable() => StatusCode::SERVICE_UNAVAILABLE,
            QueryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

impl ListParams {
    /// The requested limit, defaulted and capped.
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub data: Vec<PullRequestListing>,
}

async fn bounded<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T, StoreError>>,
) -> Result<T, QueryError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(|e| {
            warn!(error = %e, "Query failed");
            QueryError::Store(e)
        }),
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "Query timed out");
            Err(QueryError::Timeout(timeout))
        }
    }
}

/// Pull request listing handler.
///
/// # Query Parameters
///
/// - `limit` - Maximum rows to return (default 200, capped at 1000)
///
/// # Example
///
/// ```ignore
/// GET /api/prs?limit=50 HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// {
///   "data": [
///     {
///       "id": 1,
///       "number": 7,
///       "title": "Fix bug",
///       "state": "open",
///       "author": "dev1",
///       "url": "https://github.com/acme/widgets/pull/7",
///       "created_at": "2024-01-15T12:00:00Z",
///       "updated_at": "2024-01-15T12:30:00Z",
///       "repository": { "id": 1, "full_name": "acme/widgets", "name": "widgets", "owner": "acme" }
///     }
///   ]
/// }
/// ```
pub async fn list_prs_handler(
    State(app_state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, QueryError> {
    let limit = params.effective_limit();
    let data = bounded(
        app_state.query_timeout(),
        app_state.store().list_pull_requests(limit),
    )
    .await?;

    Ok(Json(ListResponse { data }))
}

/// Single pull request handler.
///
/// # Path Parameters
///
/// - `owner` - The repository owner
/// - `repo` - The repository name
/// - `number` - The pull request number
///
/// # Response
///
/// - 200 OK with the same row shape as the listing
/// - 404 Not Found if the pull request has never been ingested
pub async fn pull_request_handler(
    State(app_state): State<AppState>,
    Path((owner, repo, number)): Path<(String, String, u64)>,
) -> Result<Json<PullRequestListing>, QueryError> {
    let full_name = RepoFullName::parse(format!("{owner}/{repo}"))?;
    let number = PrNumber(number);

    bounded(
        app_state.query_timeout(),
        app_state.store().get_pull_request(&full_name, number),
    )
    .await?
    .map(Json)
    .ok_or(QueryError::NotFound { full_name, number })
}
