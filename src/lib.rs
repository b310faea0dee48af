//! PR Dashboard - ingests GitHub pull request webhooks into a relational store
//! and pushes refresh signals to live dashboards.
//!
//! The pipeline is request-scoped: [`webhooks::normalize`] turns a delivery
//! into a snapshot, [`projector::Projector`] upserts it through a
//! [`store::PrStore`], and [`notify::ChangeNotifier`] tells connected
//! dashboards to refetch. [`ingest::Ingestor`] ties the three together and
//! [`server`] exposes it over HTTP.

pub mod config;
pub mod ingest;
pub mod notify;
pub mod projector;
pub mod server;
pub mod store;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod test_utils;
