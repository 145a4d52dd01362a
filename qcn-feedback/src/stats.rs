use std::sync::atomic::{AtomicU64, Ordering};

/// Delivery statistics of a feedback channel.
/// These are shared between the packet path and, if any, the background worker.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    /// Records accepted by the channel
    accepted: AtomicU64,
    /// Records that left the host (datagram or frame written)
    transmitted: AtomicU64,
    /// Attempts refused because a delivery was already in progress
    busy: AtomicU64,
    /// Attempts refused because the worker queue was full
    queue_full: AtomicU64,
    /// Transport failures
    io_errors: AtomicU64,
}

impl DeliveryStats {
    #[inline]
    pub(crate) fn increment_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_transmitted(&self) {
        self.transmitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_busy(&self) {
        self.busy.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_queue_full(&self) {
        self.queue_full.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_io_errors(&self) {
        self.io_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Notifications taken by the channel.
    #[inline]
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Notifications that left the host.
    #[inline]
    pub fn transmitted(&self) -> u64 {
        self.transmitted.load(Ordering::Relaxed)
    }

    /// Deliveries refused because one was already in progress.
    #[inline]
    pub fn busy(&self) -> u64 {
        self.busy.load(Ordering::Relaxed)
    }

    /// Deliveries refused by a full queue.
    #[inline]
    pub fn queue_full(&self) -> u64 {
        self.queue_full.load(Ordering::Relaxed)
    }

    /// Transmissions that failed.
    #[inline]
    pub fn io_errors(&self) -> u64 {
        self.io_errors.load(Ordering::Relaxed)
    }
}
