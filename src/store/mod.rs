//! Durable storage for repositories and pull requests.
//!
//! The [`PrStore`] trait is the only seam between the ingestion pipeline and
//! the relational store. Implementations must make every write an upsert on
//! its natural key so that re-delivered events are harmless:
//!
//! - repositories conflict on `full_name`
//! - pull requests conflict on `(repository_id, number)`
//!
//! [`SqliteStore`] is the bundled implementation.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    PrNumber, PrState, PullRequestId, PullRequestSnapshot, RepoFullName, RepositoryId,
    RepositoryRef,
};

pub use sqlite::SqliteStore;

/// Errors reported by a [`PrStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached or did not complete the call.
    /// Retrying is safe because every write is an upsert.
    #[error("store unavailable during {operation}: {message}")]
    Unavailable {
        operation: &'static str,
        message: String,
    },

    /// An upsert completed without yielding the row identifier.
    #[error("store returned no {entity} identifier after upsert")]
    MissingIdentifier { entity: &'static str },

    /// The store rejected the values (type mismatch, constraint failure).
    #[error("store rejected {operation}: {message}")]
    Constraint {
        operation: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn unavailable(operation: &'static str, message: impl Into<String>) -> Self {
        StoreError::Unavailable {
            operation,
            message: message.into(),
        }
    }

    pub fn constraint(operation: &'static str, message: impl Into<String>) -> Self {
        StoreError::Constraint {
            operation,
            message: message.into(),
        }
    }

    /// Returns true if the whole ingestion call can simply be retried.
    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

/// Decides whether a PR upsert may overwrite an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Always overwrite; the most recently arrived delivery wins.
    #[default]
    LastWriteWins,

    /// Overwrite only when the incoming `source_updated_at` is not older than
    /// the stored one. Unknown timestamps on either side always overwrite.
    NewerOnly,
}

/// Identifiers of the rows touched by a successful projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedIds {
    pub repository_id: RepositoryId,
    pub pull_request_id: PullRequestId,
}

/// Repository fields embedded in a [`PullRequestListing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub id: RepositoryId,
    pub full_name: RepoFullName,
    pub name: String,
    pub owner: String,
}

/// One row of the dashboard's pull request listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestListing {
    pub id: PullRequestId,
    pub number: PrNumber,
    pub title: Option<String>,
    pub state: Option<PrState>,
    pub author: Option<String>,
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub repository: RepositorySummary,
}

/// Storage operations used by the projector and the query surface.
#[async_trait]
pub trait PrStore: Send + Sync {
    /// Inserts or re-affirms a repository, returning its identifier either way.
    async fn upsert_repository(&self, repo: &RepositoryRef) -> Result<RepositoryId, StoreError>;

    /// Inserts or overwrites a pull request under an already-stored repository.
    async fn upsert_pull_request(
        &self,
        repository_id: RepositoryId,
        pr: &PullRequestSnapshot,
        policy: ConflictPolicy,
    ) -> Result<PullRequestId, StoreError>;

    /// Applies a snapshot: repository upsert, then PR upsert.
    ///
    /// The default runs the two upserts as separate calls. If the second one
    /// fails the repository row stays behind, which is harmless because it is
    /// idempotent. Stores with transactions should override this so that
    /// partial application cannot happen.
    async fn apply(
        &self,
        pr: &PullRequestSnapshot,
        policy: ConflictPolicy,
    ) -> Result<AppliedIds, StoreError> {
        let repository_id = self.upsert_repository(&pr.repo).await?;
        let pull_request_id = self.upsert_pull_request(repository_id, pr, policy).await?;
        Ok(AppliedIds {
            repository_id,
            pull_request_id,
        })
    }

    /// Lists pull requests, most recently changed first.
    async fn list_pull_requests(&self, limit: usize)
    -> Result<Vec<PullRequestListing>, StoreError>;

    /// Looks up a single pull request by repository and number.
    async fn get_pull_request(
        &self,
        full_name: &RepoFullName,
        number: PrNumber,
    ) -> Result<Option<PullRequestListing>, StoreError>;
}
