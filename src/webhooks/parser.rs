//! Webhook payload normalizer.
//!
//! Turns an `X-GitHub-Event` tag and its JSON body into a [`Normalized`]
//! value. Normalization is pure: no I/O, and the same input always produces
//! the same output.
//!
//! # Strategy
//!
//! 1. Tags other than `pull_request` are skipped without looking at the body
//! 2. The body is deserialized into permissive raw structs (every field optional)
//! 3. Required identifying fields are checked explicitly, and all missing ones
//!    are reported together
//! 4. Optional fields that are absent, or of the wrong JSON type, stay `None`

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::types::{PrNumber, PrState, PullRequestSnapshot, RepoFullName, RepositoryRef};

use super::events::{Normalized, NormalizedEvent, PULL_REQUEST_EVENT};

/// Required field paths, as reported in [`NormalizeError::MissingFields`].
pub const FIELD_PR_NUMBER: &str = "pull_request.number";
pub const FIELD_REPO_FULL_NAME: &str = "repository.full_name";

/// Why a `pull_request` payload could not be normalized.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// One or more identifying fields are absent.
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    /// A field is present but its value is unusable.
    #[error("invalid value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    /// The body does not have the shape of a pull request payload
    /// (not an object, or a field of the wrong JSON type).
    #[error("payload does not match the pull_request schema: {0}")]
    Schema(#[from] serde_json::Error),
}

/// Classifies and normalizes a webhook delivery.
///
/// # Returns
///
/// * `Ok(Normalized::Event(_))` - a pull request snapshot to project
/// * `Ok(Normalized::Skip { .. })` - any other event category
/// * `Err(_)` - a `pull_request` payload that is missing or has invalid
///   identifying fields
///
/// # Examples
///
/// ```
/// use pr_dashboard::webhooks::{normalize, Normalized};
///
/// let body = serde_json::json!({
///     "repository": { "full_name": "acme/widgets", "name": "widgets", "owner": { "login": "acme" } },
///     "pull_request": { "number": 7, "title": "Fix bug", "state": "open" }
/// });
///
/// match normalize("pull_request", &body).unwrap() {
///     Normalized::Event(event) => assert_eq!(event.pull_request.number.0, 7),
///     Normalized::Skip { .. } => unreachable!(),
/// }
///
/// assert!(normalize("issue_comment", &body).unwrap().is_skip());
/// ```
pub fn normalize(event_type: &str, payload: &serde_json::Value) -> Result<Normalized, NormalizeError> {
    if event_type != PULL_REQUEST_EVENT {
        return Ok(Normalized::Skip {
            event_type: event_type.to_string(),
        });
    }

    normalize_pull_request(payload).map(Normalized::Event)
}

// ============================================================================
// Raw payload structures
//
// Everything is optional so that absent fields can be reported precisely
// instead of surfacing as an opaque serde error. Only `pull_request.number`
// and `repository.full_name` are typed strictly; any other field with the
// wrong JSON type is read as unknown.
// ============================================================================

/// Reads an optional field, treating a value of the wrong type as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).ok())
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(default, deserialize_with = "lenient")]
    action: Option<String>,
    pull_request: Option<RawPullRequest>,
    repository: Option<RawRepository>,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    full_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    owner: Option<RawOwner>,
}

/// GitHub sends the owner as an account object; other producers send the
/// bare login.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOwner {
    Login(String),
    Account(RawAccount),
}

impl RawOwner {
    fn login(self) -> Option<String> {
        match self {
            RawOwner::Login(login) => Some(login),
            RawOwner::Account(account) => account.login,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    #[serde(default, deserialize_with = "lenient")]
    login: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    state: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    merged: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    user: Option<RawOwner>,
    #[serde(default, deserialize_with = "lenient")]
    html_url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    created_at: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    updated_at: Option<String>,
}

fn normalize_pull_request(payload: &serde_json::Value) -> Result<NormalizedEvent, NormalizeError> {
    let raw = RawPayload::deserialize(payload)?;

    let pull_request = raw.pull_request;
    let number = pull_request.as_ref().and_then(|pr| pr.number);
    let full_name = raw
        .repository
        .as_ref()
        .and_then(|repo| repo.full_name.clone());

    let mut missing = Vec::new();
    if number.is_none() {
        missing.push(FIELD_PR_NUMBER);
    }
    if full_name.is_none() {
        missing.push(FIELD_REPO_FULL_NAME);
    }
    let (Some(pr), Some(number), Some(full_name)) = (pull_request, number, full_name) else {
        return Err(NormalizeError::MissingFields(missing));
    };

    let full_name = RepoFullName::parse(full_name).map_err(|e| NormalizeError::InvalidField {
        field: FIELD_REPO_FULL_NAME,
        value: e.0,
    })?;

    let repository = build_repository(full_name, raw.repository);

    let state = match pr.state {
        Some(state) => Some(
            PrState::from_github(&state, pr.merged.unwrap_or(false)).ok_or(
                NormalizeError::InvalidField {
                    field: "pull_request.state",
                    value: state,
                },
            )?,
        ),
        None => None,
    };

    let mut snapshot = PullRequestSnapshot::new(repository, PrNumber(number));
    snapshot.title = pr.title;
    snapshot.state = state;
    snapshot.author = pr.user.and_then(RawOwner::login);
    snapshot.url = pr.html_url;
    snapshot.source_created_at = parse_timestamp("pull_request.created_at", pr.created_at)?;
    snapshot.source_updated_at = parse_timestamp("pull_request.updated_at", pr.updated_at)?;

    Ok(NormalizedEvent {
        action: raw.action,
        pull_request: snapshot,
    })
}

/// Fills in `name` and `owner`, falling back to the full name's segments.
fn build_repository(full_name: RepoFullName, raw: Option<RawRepository>) -> RepositoryRef {
    let (name, owner) = match raw {
        Some(raw) => (raw.name, raw.owner.and_then(RawOwner::login)),
        None => (None, None),
    };

    let mut repository = RepositoryRef::from_full_name(full_name);
    if let Some(name) = name {
        repository.name = name;
    }
    if let Some(owner) = owner {
        repository.owner = owner;
    }
    repository
}

fn parse_timestamp(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, NormalizeError> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| NormalizeError::InvalidField { field, value: s })
        })
        .transpose()
}
