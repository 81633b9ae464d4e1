// Coalesced wake-up signal between inserts and idle drivers

use std::sync::Arc;
use tokio::sync::Notify;

/// Single-slot, non-blocking notification.
///
/// Any number of `notify` calls between two waits collapse into one pending
/// wake; a wake only means "go re-scan", never "process this exact job".
#[derive(Clone, Default)]
pub struct WakeSignal {
    inner: Arc<Notify>,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never blocks; drops the signal if one is already pending
    pub fn notify(&self) {
        self.inner.notify_one();
    }

    pub async fn notified(&self) {
        self.inner.notified().await;
    }
}
