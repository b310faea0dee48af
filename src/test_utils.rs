//! Shared test utilities: fixtures, fake stores, and arbitrary generators for
//! property-based testing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use crate::store::{ConflictPolicy, PrStore, PullRequestListing, StoreError};
use crate::types::{
    PrNumber, PrState, PullRequestId, PullRequestSnapshot, RepoFullName, RepositoryId,
    RepositoryRef,
};

pub fn sample_repo(full_name: &str) -> RepositoryRef {
    RepositoryRef::from_full_name(RepoFullName::parse(full_name).unwrap())
}

/// An open PR with every field populated.
pub fn sample_snapshot(full_name: &str, number: u64) -> PullRequestSnapshot {
    let repo = sample_repo(full_name);
    let mut pr = PullRequestSnapshot::new(repo, PrNumber(number));
    pr.title = Some(format!("Change {number}"));
    pr.state = Some(PrState::Open);
    pr.author = Some("dev1".to_string());
    pr.url = Some(format!("https://github.com/{full_name}/pull/{number}"));
    pr.source_created_at = Some(Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap());
    pr.source_updated_at = Some(Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 0).unwrap());
    pr
}

// ─── Fake stores ───

/// Fails every call with the same error.
pub struct FailingStore {
    error: StoreError,
}

impl FailingStore {
    pub fn new(error: StoreError) -> Self {
        FailingStore { error }
    }
}

#[async_trait]
impl PrStore for FailingStore {
    async fn upsert_repository(&self, _: &RepositoryRef) -> Result<RepositoryId, StoreError> {
        Err(self.error.clone())
    }

    async fn upsert_pull_request(
        &self,
        _: RepositoryId,
        _: &PullRequestSnapshot,
        _: ConflictPolicy,
    ) -> Result<PullRequestId, StoreError> {
        Err(self.error.clone())
    }

    async fn list_pull_requests(&self, _: usize) -> Result<Vec<PullRequestListing>, StoreError> {
        Err(self.error.clone())
    }

    async fn get_pull_request(
        &self,
        _: &RepoFullName,
        _: PrNumber,
    ) -> Result<Option<PullRequestListing>, StoreError> {
        Err(self.error.clone())
    }
}

/// Sleeps before every call, then succeeds with fixed identifiers.
pub struct SlowStore {
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        SlowStore { delay }
    }
}

#[async_trait]
impl PrStore for SlowStore {
    async fn upsert_repository(&self, _: &RepositoryRef) -> Result<RepositoryId, StoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(RepositoryId(1))
    }

    async fn upsert_pull_request(
        &self,
        _: RepositoryId,
        _: &PullRequestSnapshot,
        _: ConflictPolicy,
    ) -> Result<PullRequestId, StoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(PullRequestId(1))
    }

    async fn list_pull_requests(&self, _: usize) -> Result<Vec<PullRequestListing>, StoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }

    async fn get_pull_request(
        &self,
        _: &RepoFullName,
        _: PrNumber,
    ) -> Result<Option<PullRequestListing>, StoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(None)
    }
}

/// Counts calls and succeeds with fixed identifiers.
#[derive(Default)]
pub struct CountingStore {
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PrStore for CountingStore {
    async fn upsert_repository(&self, _: &RepositoryRef) -> Result<RepositoryId, StoreError> {
        self.record();
        Ok(RepositoryId(1))
    }

    async fn upsert_pull_request(
        &self,
        _: RepositoryId,
        _: &PullRequestSnapshot,
        _: ConflictPolicy,
    ) -> Result<PullRequestId, StoreError> {
        self.record();
        Ok(PullRequestId(1))
    }

    async fn list_pull_requests(&self, _: usize) -> Result<Vec<PullRequestListing>, StoreError> {
        self.record();
        Ok(Vec::new())
    }

    async fn get_pull_request(
        &self,
        _: &RepoFullName,
        _: PrNumber,
    ) -> Result<Option<PullRequestListing>, StoreError> {
        self.record();
        Ok(None)
    }
}

// ─── Strategies ───

pub fn arb_pr_number() -> impl Strategy<Value = PrNumber> {
    (1u64..100_000).prop_map(PrNumber)
}

pub fn arb_full_name() -> impl Strategy<Value = RepoFullName> {
    ("[a-z][a-z0-9-]{0,15}", "[a-z][a-z0-9._-]{0,20}")
        .prop_map(|(owner, name)| RepoFullName::parse(format!("{owner}/{name}")).unwrap())
}

pub fn arb_pr_state() -> impl Strategy<Value = PrState> {
    prop_oneof![
        Just(PrState::Open),
        Just(PrState::Closed),
        Just(PrState::Merged),
    ]
}

/// Millisecond-precision timestamps, matching what the store keeps.
pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (1_500_000_000_000i64..2_000_000_000_000).prop_map(|ms| {
        DateTime::from_timestamp_millis(ms).unwrap()
    })
}

pub fn arb_snapshot() -> impl Strategy<Value = PullRequestSnapshot> {
    (
        arb_full_name(),
        arb_pr_number(),
        prop::option::of("[a-zA-Z0-9 ]{1,60}"),
        prop::option::of(arb_pr_state()),
        prop::option::of("[a-z][a-z0-9-]{0,15}"),
        prop::option::of(arb_timestamp()),
        prop::option::of(arb_timestamp()),
    )
        .prop_map(|(full_name, number, title, state, author, created, updated)| {
            let url = format!("https://github.com/{full_name}/pull/{}", number.0);
            let mut pr = PullRequestSnapshot::new(RepositoryRef::from_full_name(full_name), number);
            pr.title = title;
            pr.state = state;
            pr.author = author;
            pr.url = Some(url);
            pr.source_created_at = created;
            pr.source_updated_at = updated;
            pr
        })
}
