//! Webhook handling for GitHub events.
//!
//! This module provides:
//! - Signature verification for webhook payloads (HMAC-SHA256)
//! - Classification and normalization of `pull_request` payloads

pub mod events;
pub mod parser;
pub mod signature;

pub use events::{Normalized, NormalizedEvent, PULL_REQUEST_EVENT};
pub use parser::{NormalizeError, normalize};
pub use signature::{SignatureError, WebhookSecret};
