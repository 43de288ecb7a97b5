use std::sync::Arc;

use tokio::sync::broadcast;

use fundtracker_types::events::{DonationInserted, NgoUpdated};

/// Realtime change-feed transport. The donation feed and the verification
/// feed are independent channels with no cross-channel ordering guarantee;
/// within one channel events arrive in publish order.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    donations_tx: broadcast::Sender<DonationInserted>,
    ngos_tx: broadcast::Sender<NgoUpdated>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (donations_tx, _) = broadcast::channel(1024);
        let (ngos_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                donations_tx,
                ngos_tx,
            }),
        }
    }

    /// Publish a donation insert. Dropped silently when nobody is listening.
    pub fn publish_donation(&self, event: DonationInserted) {
        let _ = self.inner.donations_tx.send(event);
    }

    /// Publish an NGO row update with before/after images.
    pub fn publish_ngo_update(&self, event: NgoUpdated) {
        let _ = self.inner.ngos_tx.send(event);
    }

    pub fn subscribe_donations(&self) -> broadcast::Receiver<DonationInserted> {
        self.inner.donations_tx.subscribe()
    }

    pub fn subscribe_ngo_updates(&self) -> broadcast::Receiver<NgoUpdated> {
        self.inner.ngos_tx.subscribe()
    }

    /// Live subscription handles on the donation feed.
    pub fn donation_subscriber_count(&self) -> usize {
        self.inner.donations_tx.receiver_count()
    }

    /// Live subscription handles on the verification feed.
    pub fn ngo_subscriber_count(&self) -> usize {
        self.inner.ngos_tx.receiver_count()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
