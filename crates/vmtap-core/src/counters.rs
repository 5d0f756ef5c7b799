//! Traffic accounting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic byte counters for frames that actually hit the wire.
///
/// `sent` counts every frame successfully handed to a peer's write
/// path; `received` counts every frame successfully read from a peer.
/// Updated with relaxed atomics; readers only need eventual totals.
#[derive(Debug, Default)]
pub(crate) struct TrafficCounters {
    sent: AtomicU64,
    received: AtomicU64,
}

impl TrafficCounters {
    pub(crate) fn add_sent(&self, bytes: u64) {
        self.sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn add_received(&self, bytes: u64) {
        self.received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub(crate) fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}
