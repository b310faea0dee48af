//! The ingestion pipeline: normalize, project, notify.
//!
//! [`Ingestor::ingest`] is the single entrypoint used by the webhook gateway.
//! Every call returns exactly one [`IngestOutcome`]; nothing in here panics or
//! returns an untyped error. Observers are notified only after a snapshot has
//! been applied.

use serde_json::Value;
use tracing::{info, warn};

use crate::notify::ChangeNotifier;
use crate::projector::{Applied, ProjectionError, Projector};
use crate::types::DeliveryId;
use crate::webhooks::{Normalized, normalize};

/// The result of ingesting one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// An event category the dashboard does not track.
    Skipped { event_type: String },

    /// A `pull_request` payload without usable identifying fields.
    Malformed { reason: String },

    /// The snapshot is stored and observers were signalled.
    Applied(Applied),

    /// Transient storage failure; the delivery can be retried as-is.
    StorageUnavailable { reason: String },

    /// The store did not return an identifier it should have.
    StorageInvariantViolation { reason: String },

    /// The store rejected the snapshot's values.
    ConstraintViolation { reason: String },
}

impl IngestOutcome {
    /// Short stable name, used as the `outcome` log field.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestOutcome::Skipped { .. } => "skipped",
            IngestOutcome::Malformed { .. } => "malformed",
            IngestOutcome::Applied(_) => "applied",
            IngestOutcome::StorageUnavailable { .. } => "storage_unavailable",
            IngestOutcome::StorageInvariantViolation { .. } => "storage_invariant_violation",
            IngestOutcome::ConstraintViolation { .. } => "constraint_violation",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            IngestOutcome::Skipped { .. } | IngestOutcome::Applied(_)
        )
    }
}

impl From<ProjectionError> for IngestOutcome {
    fn from(err: ProjectionError) -> Self {
        match err {
            ProjectionError::StorageUnavailable(reason) => {
                IngestOutcome::StorageUnavailable { reason }
            }
            ProjectionError::InvariantViolation(reason) => {
                IngestOutcome::StorageInvariantViolation { reason }
            }
            ProjectionError::ConstraintViolation(reason) => {
                IngestOutcome::ConstraintViolation { reason }
            }
        }
    }
}

/// Runs deliveries through normalize, project and notify.
#[derive(Clone)]
pub struct Ingestor {
    projector: Projector,
    notifier: ChangeNotifier,
}

impl Ingestor {
    pub fn new(projector: Projector, notifier: ChangeNotifier) -> Self {
        Ingestor {
            projector,
            notifier,
        }
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Ingests one delivery.
    ///
    /// Skipped and malformed deliveries never reach the store. A failed
    /// projection never notifies.
    pub async fn ingest(
        &self,
        event_type: &str,
        payload: &Value,
        delivery_id: Option<&DeliveryId>,
    ) -> IngestOutcome {
        let delivery = delivery_id.map(DeliveryId::as_str).unwrap_or("-");

        let event = match normalize(event_type, payload) {
            Ok(Normalized::Event(event)) => event,
            Ok(Normalized::Skip { event_type }) => {
                info!(delivery_id = delivery, event_type = %event_type, outcome = "skipped", "Ignoring event");
                return IngestOutcome::Skipped { event_type };
            }
            Err(e) => {
                warn!(
                    delivery_id = delivery,
                    event_type,
                    outcome = "malformed",
                    error = %e,
                    "Rejecting malformed payload"
                );
                return IngestOutcome::Malformed {
                    reason: e.to_string(),
                };
            }
        };

        match self.projector.project(&event).await {
            Ok(applied) => {
                let report = self.notifier.publish();
                info!(
                    delivery_id = delivery,
                    event_type,
                    action = event.action.as_deref().unwrap_or("-"),
                    repo = %applied.full_name,
                    pr = %applied.number,
                    observers = report.delivered + report.coalesced,
                    outcome = "applied",
                    "Applied pull request event"
                );
                IngestOutcome::Applied(applied)
            }
            Err(e) => {
                let outcome = IngestOutcome::from(e);
                warn!(
                    delivery_id = delivery,
                    event_type,
                    repo = %event.repository().full_name,
                    pr = %event.number(),
                    outcome = outcome.kind(),
                    "Pull request event not applied"
                );
                outcome
            }
        }
    }
}
