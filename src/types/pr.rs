//! Pull request snapshot types.
//!
//! A snapshot is the full state of a pull request as asserted by a single
//! webhook delivery. Fields GitHub did not send are `None` rather than a
//! made-up default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::PrNumber;
use super::repository::RepositoryRef;

/// The lifecycle state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

impl PrState {
    /// Folds GitHub's `state` and `merged` fields into a single state.
    ///
    /// GitHub only ever reports `open` or `closed`; a merged PR is `closed`
    /// with `merged: true`. `merged` is also accepted verbatim so that
    /// payloads from other producers round-trip.
    pub fn from_github(state: &str, merged: bool) -> Option<Self> {
        match state {
            "open" => Some(PrState::Open),
            "closed" if merged => Some(PrState::Merged),
            "closed" => Some(PrState::Closed),
            "merged" => Some(PrState::Merged),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrState::Open => "open",
            PrState::Closed => "closed",
            PrState::Merged => "merged",
        }
    }
}

impl fmt::Display for PrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state of one pull request as carried by a single event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestSnapshot {
    /// The repository this PR belongs to.
    pub repo: RepositoryRef,

    /// The PR number. Immutable once assigned.
    pub number: PrNumber,

    pub title: Option<String>,

    pub state: Option<PrState>,

    /// Login of the PR author.
    pub author: Option<String>,

    /// Canonical HTML link to the PR.
    pub url: Option<String>,

    /// Creation time as asserted by GitHub (not local write time).
    pub source_created_at: Option<DateTime<Utc>>,

    /// Last-update time as asserted by GitHub (not local write time).
    pub source_updated_at: Option<DateTime<Utc>>,
}

impl PullRequestSnapshot {
    /// Creates a snapshot with every optional field unknown.
    pub fn new(repo: RepositoryRef, number: PrNumber) -> Self {
        PullRequestSnapshot {
            repo,
            number,
            title: None,
            state: None,
            author: None,
            url: None,
            source_created_at: None,
            source_updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_github_folds_merged_flag() {
        assert_eq!(PrState::from_github("open", false), Some(PrState::Open));
        assert_eq!(PrState::from_github("closed", false), Some(PrState::Closed));
        assert_eq!(PrState::from_github("closed", true), Some(PrState::Merged));
        assert_eq!(PrState::from_github("merged", false), Some(PrState::Merged));
    }

    #[test]
    fn from_github_ignores_merged_flag_on_open_prs() {
        assert_eq!(PrState::from_github("open", true), Some(PrState::Open));
    }

    #[test]
    fn from_github_rejects_unknown_states() {
        assert_eq!(PrState::from_github("draft", false), None);
        assert_eq!(PrState::from_github("OPEN", false), None);
        assert_eq!(PrState::from_github("", false), None);
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&PrState::Merged).unwrap(), "\"merged\"");
        for state in [PrState::Open, PrState::Closed, PrState::Merged] {
            assert_eq!(
                serde_json::to_string(&state).unwrap(),
                format!("\"{}\"", state.as_str())
            );
        }
    }
}
