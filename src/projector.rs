//! Idempotent projection of normalized events into the store.
//!
//! The projector owns no state of its own. It forwards one snapshot to the
//! injected [`PrStore`], bounds the call with a timeout, and folds the store's
//! errors into the projection taxonomy:
//!
//! | Store result | Projection result |
//! |--------------|-------------------|
//! | `Ok(ids)` | [`Applied`] |
//! | `Unavailable`, timeout | [`ProjectionError::StorageUnavailable`] |
//! | `MissingIdentifier` | [`ProjectionError::InvariantViolation`] |
//! | `Constraint` | [`ProjectionError::ConstraintViolation`] |
//!
//! A timeout abandons the wait, not the write: the store call keeps running
//! on the blocking pool and may still commit after `StorageUnavailable` has
//! been returned. No notification is sent for it. Redelivery of the same
//! event is safe because every write is an upsert.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::store::{ConflictPolicy, PrStore, StoreError};
use crate::types::{PrNumber, PullRequestId, RepoFullName, RepositoryId};
use crate::webhooks::NormalizedEvent;

/// Default bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// A snapshot that is now reflected in durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub repository_id: RepositoryId,
    pub pull_request_id: PullRequestId,
    pub full_name: RepoFullName,
    pub number: PrNumber,
}

/// Why a projection did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    /// The store was unreachable, failed transiently, or took too long.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The store accepted an upsert but did not return an identifier.
    #[error("storage invariant violated: {0}")]
    InvariantViolation(String),

    /// The store rejected the values.
    #[error("storage constraint violated: {0}")]
    ConstraintViolation(String),
}

impl From<StoreError> for ProjectionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { .. } => ProjectionError::StorageUnavailable(err.to_string()),
            StoreError::MissingIdentifier { .. } => {
                ProjectionError::InvariantViolation(err.to_string())
            }
            StoreError::Constraint { .. } => ProjectionError::ConstraintViolation(err.to_string()),
        }
    }
}

/// Applies normalized events to a [`PrStore`].
#[derive(Clone)]
pub struct Projector {
    store: Arc<dyn PrStore>,
    timeout: Duration,
    policy: ConflictPolicy,
}

impl Projector {
    pub fn new(store: Arc<dyn PrStore>) -> Self {
        Projector {
            store,
            timeout: DEFAULT_STORE_TIMEOUT,
            policy: ConflictPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Upserts the event's repository and pull request as one unit of work.
    ///
    /// Re-projecting the same event yields the same identifiers and leaves the
    /// stored rows unchanged.
    pub async fn project(&self, event: &NormalizedEvent) -> Result<Applied, ProjectionError> {
        let snapshot = &event.pull_request;
        let full_name = snapshot.repo.full_name.clone();
        let number = snapshot.number;

        let result = tokio::time::timeout(self.timeout, self.store.apply(snapshot, self.policy)).await;

        let ids = match result {
            Ok(Ok(ids)) => ids,
            Ok(Err(e)) => {
                warn!(repo = %full_name, pr = %number, error = %e, "Projection failed");
                return Err(e.into());
            }
            Err(_) => {
                warn!(
                    repo = %full_name,
                    pr = %number,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Projection timed out"
                );
                return Err(ProjectionError::StorageUnavailable(format!(
                    "store did not respond within {:?}",
                    self.timeout
                )));
            }
        };

        debug!(
            repo = %full_name,
            pr = %number,
            repository_id = %ids.repository_id,
            pull_request_id = %ids.pull_request_id,
            "Projected pull request"
        );

        Ok(Applied {
            repository_id: ids.repository_id,
            pull_request_id: ids.pull_request_id,
            full_name,
            number,
        })
    }
}
