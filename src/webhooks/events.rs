//! Typed results of webhook normalization.
//!
//! The dashboard only tracks one GitHub event category, `pull_request`. Every
//! other category is classified as a skip, which is an ordinary outcome and
//! not an error.

use serde::{Deserialize, Serialize};

use crate::types::{PrNumber, PullRequestSnapshot, RepositoryRef};

/// The `X-GitHub-Event` value for pull request lifecycle changes.
pub const PULL_REQUEST_EVENT: &str = "pull_request";

/// A pull request event reduced to the fields the dashboard stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// The payload's `action` (e.g. `opened`, `closed`, `synchronize`).
    ///
    /// Only carried for logging; every action is projected because each
    /// delivery contains the complete current snapshot.
    pub action: Option<String>,

    /// The PR snapshot, including its owning repository.
    pub pull_request: PullRequestSnapshot,
}

impl NormalizedEvent {
    pub fn new(pull_request: PullRequestSnapshot) -> Self {
        NormalizedEvent {
            action: None,
            pull_request,
        }
    }

    pub fn repository(&self) -> &RepositoryRef {
        &self.pull_request.repo
    }

    pub fn number(&self) -> PrNumber {
        self.pull_request.number
    }
}

/// Result of classifying and normalizing a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// A pull request event ready for projection.
    Event(NormalizedEvent),

    /// An event category the dashboard does not track.
    Skip { event_type: String },
}

impl Normalized {
    pub fn is_skip(&self) -> bool {
        matches!(self, Normalized::Skip { .. })
    }
}
