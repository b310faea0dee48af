//! Core domain types for the dashboard ingestion pipeline.
//!
//! These are the transient in-memory representations of repositories and pull
//! requests; the store owns the persisted rows.

pub mod ids;
pub mod pr;
pub mod repository;

pub use ids::{DeliveryId, InvalidFullName, PrNumber, PullRequestId, RepoFullName, RepositoryId};
pub use pr::{PrState, PullRequestSnapshot};
pub use repository::RepositoryRef;
