//! Change notification for live dashboard observers.
//!
//! After a successful projection the ingestor publishes a [`RefreshSignal`].
//! The signal carries no entity data; it tells observers to refetch.
//!
//! The registry keeps only weak references to observer slots. A
//! [`Subscription`] owns its slot, so dropping the subscription is all it
//! takes to leave; dead entries are pruned the next time the registry is
//! touched.
//!
//! Each slot is a channel of capacity one. Publishing uses `try_send`, so a
//! slow observer never blocks ingestion: if a refresh is already pending for
//! it, the new one coalesces into the pending one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// "Data changed, please refetch."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshSignal {
    pub refresh: bool,
}

impl RefreshSignal {
    pub const fn new() -> Self {
        RefreshSignal { refresh: true }
    }
}

impl Default for RefreshSignal {
    fn default() -> Self {
        Self::new()
    }
}

struct Slot {
    tx: mpsc::Sender<RefreshSignal>,
}

/// What happened to one published signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishReport {
    /// Observers that received a new pending signal.
    pub delivered: usize,
    /// Observers that already had one pending.
    pub coalesced: usize,
}

/// Fan-out point shared by the ingestor and the event stream endpoint.
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    observers: Arc<Mutex<Vec<Weak<Slot>>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    // Entries are only pushed and pruned, so a panic mid-update cannot leave
    // the list inconsistent.
    fn lock(&self) -> MutexGuard<'_, Vec<Weak<Slot>>> {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new observer. It only sees signals published from now on.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(1);
        let slot = Arc::new(Slot { tx });

        let mut observers = self.lock();
        observers.retain(|w| w.strong_count() > 0);
        observers.push(Arc::downgrade(&slot));
        debug!(observers = observers.len(), "Observer subscribed");

        Subscription { _slot: slot, rx }
    }

    /// Sends a refresh to every live observer without waiting on any of them.
    pub fn publish(&self) -> PublishReport {
        let mut report = PublishReport::default();
        let mut observers = self.lock();

        observers.retain(|weak| {
            let Some(slot) = weak.upgrade() else {
                return false;
            };
            match slot.tx.try_send(RefreshSignal::new()) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => report.coalesced += 1,
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            }
            true
        });

        trace!(
            delivered = report.delivered,
            coalesced = report.coalesced,
            "Published refresh"
        );
        report
    }

    /// Number of observers still alive.
    pub fn observer_count(&self) -> usize {
        let mut observers = self.lock();
        observers.retain(|w| w.strong_count() > 0);
        observers.len()
    }
}

/// A live observer. Dropping it unsubscribes.
pub struct Subscription {
    _slot: Arc<Slot>,
    rx: mpsc::Receiver<RefreshSignal>,
}

impl Subscription {
    /// Waits for the next refresh.
    pub async fn recv(&mut self) -> Option<RefreshSignal> {
        self.rx.recv().await
    }

    /// Returns a pending refresh without waiting.
    pub fn try_recv(&mut self) -> Option<RefreshSignal> {
        self.rx.try_recv().ok()
    }

    /// Turns the subscription into a stream that ends when `shutdown` is
    /// cancelled. The subscription is dropped as soon as the stream ends.
    pub fn until_cancelled(
        self,
        shutdown: CancellationToken,
    ) -> impl Stream<Item = RefreshSignal> + Send + 'static {
        futures::stream::unfold((self, shutdown), |(mut sub, shutdown)| async move {
            tokio::select! {
                _ = shutdown.cancelled() => None,
                signal = sub.recv() => signal.map(|s| (s, (sub, shutdown))),
            }
        })
    }
}
