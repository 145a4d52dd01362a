use std::sync::atomic::{AtomicU64, Ordering};

/// Shaper statistics.
/// These are shared between the shaper and its handles.
#[derive(Debug, Default)]
pub struct ShaperStats {
    /// Packets released
    packets: AtomicU64,
    /// Bytes released
    bytes: AtomicU64,
    /// Packets dropped: backlog full, head drops, reshape failures, explicit drops
    drops: AtomicU64,
    /// Dequeue attempts that found too few tokens
    overlimits: AtomicU64,
    /// Packets that can never be sent at the configured rates
    reshape_fails: AtomicU64,
    /// Feedback records handed to the channel
    feedback_sent: AtomicU64,
    /// Feedback records the channel refused
    feedback_failed: AtomicU64,
}

impl ShaperStats {
    #[inline]
    pub(crate) fn increment_released(&self, bytes: u32) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_drops(&self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_overlimits(&self) {
        self.overlimits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_reshape_fails(&self) {
        self.reshape_fails.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_feedback_sent(&self) {
        self.feedback_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_feedback_failed(&self) {
        self.feedback_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Packets released.
    #[inline]
    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    /// Bytes released.
    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Packets dropped, for any reason.
    #[inline]
    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    /// Dequeue attempts refused for lack of tokens.
    #[inline]
    pub fn overlimits(&self) -> u64 {
        self.overlimits.load(Ordering::Relaxed)
    }

    /// Packets dropped for exceeding the max size.
    #[inline]
    pub fn reshape_fails(&self) -> u64 {
        self.reshape_fails.load(Ordering::Relaxed)
    }

    /// Notifications handed off to the feedback channel.
    #[inline]
    pub fn feedback_sent(&self) -> u64 {
        self.feedback_sent.load(Ordering::Relaxed)
    }

    /// Notifications the feedback channel refused.
    #[inline]
    pub fn feedback_failed(&self) -> u64 {
        self.feedback_failed.load(Ordering::Relaxed)
    }
}

/// A point-in-time copy of the shaper counters and backlog.
///
/// The counters mean the same as the getters of [`ShaperStats`] with the same name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub packets: u64,
    pub bytes: u64,
    pub drops: u64,
    pub overlimits: u64,
    pub reshape_fails: u64,
    pub feedback_sent: u64,
    pub feedback_failed: u64,
    /// Packets in the backlog.
    pub qlen: usize,
    /// Bytes in the backlog.
    pub backlog: u64,
}

impl ShaperStats {
    pub(crate) fn snapshot(&self, qlen: usize, backlog: u64) -> QueueStats {
        QueueStats {
            packets: self.packets(),
            bytes: self.bytes(),
            drops: self.drops(),
            overlimits: self.overlimits(),
            reshape_fails: self.reshape_fails(),
            feedback_sent: self.feedback_sent(),
            feedback_failed: self.feedback_failed(),
            qlen,
            backlog,
        }
    }
}
