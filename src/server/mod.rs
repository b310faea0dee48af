//! HTTP server for the PR dashboard.
//!
//! This module implements the HTTP server that:
//! - Accepts webhooks from GitHub, optionally validates signatures, and runs
//!   them through the ingestion pipeline
//! - Serves the current pull request listing
//! - Streams refresh signals to connected dashboards
//! - Provides a liveness health check
//!
//! # Endpoints
//!
//! - `POST /api/webhooks/github` - Ingests a GitHub webhook delivery
//! - `GET /api/prs` - Lists pull requests, most recently changed first
//! - `GET /api/repos/{owner}/{repo}/pulls/{number}` - A single pull request
//! - `GET /api/events` - Server-Sent Events stream of `pr_update` signals
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub mod events;
pub mod health;
pub mod prs;
pub mod webhook;

pub use events::events_handler;
pub use health::health_handler;
pub use prs::{list_prs_handler, pull_request_handler};
pub use webhook::webhook_handler;

use crate::ingest::Ingestor;
use crate::notify::ChangeNotifier;
use crate::projector::DEFAULT_STORE_TIMEOUT;
use crate::store::PrStore;
use crate::webhooks::WebhookSecret;

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    ingestor: Ingestor,

    /// Read side of the store, used by the query endpoints.
    store: Arc<dyn PrStore>,

    /// When set, every delivery must carry a valid `X-Hub-Signature-256`.
    webhook_secret: Option<WebhookSecret>,

    /// Bound on each query the read endpoints make.
    query_timeout: Duration,

    /// Cancelled on shutdown; ends open event streams.
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(ingestor: Ingestor, store: Arc<dyn PrStore>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                ingestor,
                store,
                webhook_secret: None,
                query_timeout: DEFAULT_STORE_TIMEOUT,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Builder-style setters. Only meaningful before the state is cloned.
    pub fn with_webhook_secret(self, secret: Option<WebhookSecret>) -> Self {
        self.map_inner(|inner| inner.webhook_secret = secret)
    }

    pub fn with_query_timeout(self, timeout: Duration) -> Self {
        self.map_inner(|inner| inner.query_timeout = timeout)
    }

    pub fn with_shutdown(self, shutdown: CancellationToken) -> Self {
        self.map_inner(|inner| inner.shutdown = shutdown)
    }

    fn map_inner(self, f: impl FnOnce(&mut AppStateInner)) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                f(&mut inner);
                AppState {
                    inner: Arc::new(inner),
                }
            }
            Err(shared) => {
                let mut inner = AppStateInner {
                    ingestor: shared.ingestor.clone(),
                    store: shared.store.clone(),
                    webhook_secret: shared.webhook_secret.clone(),
                    query_timeout: shared.query_timeout,
                    shutdown: shared.shutdown.clone(),
                };
                f(&mut inner);
                AppState {
                    inner: Arc::new(inner),
                }
            }
        }
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.inner.ingestor
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        self.inner.ingestor.notifier()
    }

    pub fn store(&self) -> &Arc<dyn PrStore> {
        &self.inner.store
    }

    pub fn webhook_secret(&self) -> Option<&WebhookSecret> {
        self.inner.webhook_secret.as_ref()
    }

    pub fn query_timeout(&self) -> Duration {
        self.inner.query_timeout
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.inner.shutdown
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/api/webhooks/github", post(webhook_handler))
        .route("/api/prs", get(list_prs_handler))
        .route(
            "/api/repos/{owner}/{repo}/pulls/{number}",
            get(pull_request_handler),
        )
        .route("/api/events", get(events_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}


#[cfg(test)]
mod integration_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::projector::Projector;
    use crate::store::{SqliteStore, StoreError};
    use crate::test_utils::FailingStore;

    fn app_state_over(store: Arc<dyn PrStore>) -> AppState {
        let ingestor = Ingestor::new(Projector::new(store.clone()), ChangeNotifier::new());
        AppState::new(ingestor, store)
    }

    fn test_app_state() -> AppState {
        app_state_over(Arc::new(SqliteStore::open_in_memory().unwrap()))
    }

    fn pr_payload(number: u64, state: &str, updated_at: &str) -> Value {
        json!({
            "action": "opened",
            "repository": {
                "full_name": "acme/widgets",
                "name": "widgets",
                "owner": { "login": "acme" }
            },
            "pull_request": {
                "number": number,
                "title": "Fix bug",
                "state": state,
                "user": { "login": "dev1" },
                "html_url": format!("https://github.com/acme/widgets/pull/{number}"),
                "created_at": "2024-01-15T12:00:00Z",
                "updated_at": updated_at
            }
        })
    }

    fn webhook_request(event_type: &str, body: &Value, secret: Option<&WebhookSecret>) -> Request<Body> {
        let body_bytes = serde_json::to_vec(body).unwrap();
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/webhooks/github")
            .header("content-type", "application/json")
            .header("x-github-event", event_type)
            .header("x-github-delivery", "550e8400-e29b-41d4-a716-446655440000");
        if let Some(secret) = secret {
            builder = builder.header("x-hub-signature-256", secret.sign(&body_bytes));
        }
        builder.body(Body::from(body_bytes)).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    // ─── Health endpoint tests ───

    #[tokio::test]
    async fn health_returns_200() {
        let app = build_router(test_app_state());

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    // ─── Webhook endpoint tests ───

    #[tokio::test]
    async fn pull_request_webhook_is_applied_and_listed() {
        let state = test_app_state();
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(webhook_request(
                "pull_request",
                &pr_payload(7, "open", "2024-01-15T12:00:00Z"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "message": "Success", "event": "pull_request" })
        );

        let request = Request::builder()
            .uri("/api/prs")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["number"], 7);
        assert_eq!(rows[0]["title"], "Fix bug");
        assert_eq!(rows[0]["state"], "open");
        assert_eq!(rows[0]["author"], "dev1");
        assert_eq!(rows[0]["repository"]["name"], "widgets");
        assert_eq!(rows[0]["repository"]["owner"], "acme");
    }

    #[tokio::test]
    async fn non_pull_request_event_is_acknowledged() {
        let app = build_router(test_app_state());

        let response = app
            .oneshot(webhook_request("issue_comment", &json!({ "comment": {} }), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "message": "Not Pull Request", "event": "issue_comment" })
        );
    }

    #[tokio::test]
    async fn malformed_pull_request_returns_400() {
        let app = build_router(test_app_state());

        let response = app
            .oneshot(webhook_request(
                "pull_request",
                &json!({ "pull_request": { "title": "no number" } }),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("pull_request.number"));
    }

    #[tokio::test]
    async fn missing_event_header_returns_400() {
        let app = build_router(test_app_state());

        let request = Request::builder()
            .method("POST")
            .uri("/api/webhooks/github")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_json_returns_400() {
        let app = build_router(test_app_state());

        let request = Request::builder()
            .method("POST")
            .uri("/api/webhooks/github")
            .header("x-github-event", "pull_request")
            .body(Body::from("not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn storage_outage_returns_503() {
        let app = build_router(app_state_over(Arc::new(FailingStore::new(
            StoreError::unavailable("apply", "connection refused"),
        ))));

        let response = app
            .oneshot(webhook_request(
                "pull_request",
                &pr_payload(7, "open", "2024-01-15T12:00:00Z"),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn storage_rejection_returns_500() {
        for err in [
            StoreError::constraint("apply", "bad value"),
            StoreError::MissingIdentifier {
                entity: "repository",
            },
        ] {
            let app = build_router(app_state_over(Arc::new(FailingStore::new(err))));
            let response = app
                .oneshot(webhook_request(
                    "pull_request",
                    &pr_payload(7, "open", "2024-01-15T12:00:00Z"),
                    None,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    // ─── Signature tests ───

    #[tokio::test]
    async fn valid_signature_is_accepted() {
        let secret = WebhookSecret::new("test-secret");
        let app = build_router(test_app_state().with_webhook_secret(Some(secret.clone())));

        let response = app
            .oneshot(webhook_request(
                "pull_request",
                &pr_payload(7, "open", "2024-01-15T12:00:00Z"),
                Some(&secret),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_secret_returns_401_and_stores_nothing() {
        let state = test_app_state()
            .with_webhook_secret(Some(WebhookSecret::new("correct-secret")));
        let app = build_router(state.clone());

        let response = app
            .oneshot(webhook_request(
                "pull_request",
                &pr_payload(7, "open", "2024-01-15T12:00:00Z"),
                Some(&WebhookSecret::new("wrong-secret")),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(state.store().list_pull_requests(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_signature_returns_401_before_parsing() {
        let app = build_router(
            test_app_state().with_webhook_secret(Some(WebhookSecret::new("secret"))),
        );

        let request = Request::builder()
            .method("POST")
            .uri("/api/webhooks/github")
            .header("x-github-event", "pull_request")
            .body(Body::from("not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // ─── Query endpoint tests ───

    #[tokio::test]
    async fn list_is_ordered_and_limited() {
        let state = test_app_state();
        let app = build_router(state.clone());

        for (number, updated) in [
            (1, "2024-01-15T10:00:00Z"),
            (2, "2024-01-15T12:00:00Z"),
            (3, "2024-01-15T11:00:00Z"),
        ] {
            let response = app
                .clone()
                .oneshot(webhook_request("pull_request", &pr_payload(number, "open", updated), None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let request = Request::builder()
            .uri("/api/prs?limit=2")
            .body(Body::empty())
            .unwrap();
        let body = json_body(app.oneshot(request).await.unwrap()).await;
        let numbers: Vec<u64> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["number"].as_u64().unwrap())
            .collect();
        assert_eq!(numbers, vec![2, 3]);
    }

    #[tokio::test]
    async fn list_with_bad_limit_returns_400() {
        let app = build_router(test_app_state());
        let request = Request::builder()
            .uri("/api/prs?limit=lots")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_during_outage_returns_503() {
        let app = build_router(app_state_over(Arc::new(FailingStore::new(
            StoreError::unavailable("list", "down"),
        ))));
        let request = Request::builder()
            .uri("/api/prs")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn single_pull_request_endpoint() {
        let app = build_router(test_app_state());

        app.clone()
            .oneshot(webhook_request(
                "pull_request",
                &pr_payload(7, "closed", "2024-01-15T12:00:00Z"),
                None,
            ))
            .await
            .unwrap();

        let request = Request::builder()
            .uri("/api/repos/acme/widgets/pulls/7")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["state"], "closed");
        assert_eq!(body["repository"]["full_name"], "acme/widgets");

        let request = Request::builder()
            .uri("/api/repos/acme/widgets/pulls/8")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    // ─── Event stream tests ───

    #[tokio::test]
    async fn event_stream_sends_connected_then_updates() {
        let state = test_app_state();
        let app = build_router(state.clone());

        let request = Request::builder()
            .uri("/api/events")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );

        let mut body = response.into_body();
        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        let first = String::from_utf8(first.to_vec()).unwrap();
        assert!(first.contains("event: connected"), "{first}");

        app.oneshot(webhook_request(
            "pull_request",
            &pr_payload(7, "open", "2024-01-15T12:00:00Z"),
            None,
        ))
        .await
        .unwrap();

        let next = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .into_data()
            .unwrap();
        let next = String::from_utf8(next.to_vec()).unwrap();
        assert!(next.contains("event: pr_update"), "{next}");
        assert!(next.contains(r#"{"refresh":true}"#), "{next}");
    }

    #[tokio::test]
    async fn event_stream_ends_on_shutdown() {
        let token = CancellationToken::new();
        let state = test_app_state().with_shutdown(token.clone());
        let app = build_router(state.clone());

        let request = Request::builder()
            .uri("/api/events")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let mut body = response.into_body();
        body.frame().await.unwrap().unwrap();

        token.cancel();

        let end = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .unwrap();
        assert!(end.is_none());
        assert_eq!(state.notifier().observer_count(), 0);
    }
}
