use std::{fmt, sync::Arc};

use thiserror::Error;

use qcn_common::{Clock, Ticks, TokioClock};
use qcn_feedback::{Feedback, FeedbackChannel, Strategy};

use crate::{
    Enqueue, Fifo, FifoKind, OccupancySampler, Packet, QueueStats, Release, ShaperConfig,
    ShaperStats, TokenBucket, Watchdog,
};

/// Why a packet was not queued.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ShapeError {
    /// Larger than any bucket can ever hold.
    #[error("Packet of {len} bytes can never be sent (max size {max_size})")]
    ReshapeFail { len: u32, max_size: u32 },
    /// The backlog is at its limit.
    #[error("Backlog full")]
    BacklogFull,
    /// The shaper was torn down.
    #[error("Shaper destroyed")]
    Destroyed,
}

/// A packet refused by [`Shaper::enqueue`], handed back to the caller.
pub struct Rejected<P> {
    /// The packet, returned untouched.
    pub packet: P,
    /// Why it was refused.
    pub error: ShapeError,
}

impl<P> fmt::Debug for Rejected<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected").field("error", &self.error).finish_non_exhaustive()
    }
}

impl<P> fmt::Display for Rejected<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl<P> std::error::Error for Rejected<P> {}

/// Where a shaper is in its life cycle.
///
/// There is no reconfiguring state: [`Shaper::reconfigure`] takes `&mut self`, so no packet
/// operation can observe a half-applied configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaperState {
    /// Releasing packets, or idle with an empty backlog.
    Active,
    /// The head packet is waiting for tokens until the watchdog deadline.
    Throttled { until: Ticks },
    /// Torn down. Every operation fails or does nothing.
    Destroyed,
}

/// The effective configuration and counters of a shaper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dump {
    /// Committed rate in bytes per second.
    pub rate: u64,
    /// Peak rate in bytes per second, if any.
    pub peak_rate: Option<u64>,
    /// Committed bucket depth in bytes.
    pub burst: u32,
    /// Largest packet the rate tables are laid out for.
    pub mtu: u32,
    /// Backlog limit, in the unit of `backlog`.
    pub limit: u32,
    /// Backlog discipline.
    pub backlog: FifoKind,
    /// Committed bucket depth in ticks.
    pub buffer: Ticks,
    /// Largest packet that can ever be released.
    pub max_size: u32,
    /// Counters and backlog occupancy at the time of the dump.
    pub stats: QueueStats,
}

/// A dual token-bucket shaper with a QCN congestion point on its backlog.
///
/// All operations are bounded in time and never wait: a packet that cannot be sent yet stays at
/// the head of the backlog and the watchdog records when to try again.
pub struct Shaper<P, C = TokioClock> {
    config: ShaperConfig,
    bucket: TokenBucket,
    sampler: OccupancySampler,
    backlog: Fifo<P>,
    channel: Option<Arc<dyn FeedbackChannel>>,
    watchdog: Watchdog,
    clock: C,
    stats: Arc<ShaperStats>,
}

impl<P, C> fmt::Debug for Shaper<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shaper")
            .field("config", &self.config)
            .field("channel", &self.channel)
            .field("watchdog", &self.watchdog)
            .finish_non_exhaustive()
    }
}

impl<P: Packet> Shaper<P, TokioClock> {
    /// Creates a shaper on the tokio clock.
    pub fn new(
        config: ShaperConfig,
        channel: Arc<dyn FeedbackChannel>,
    ) -> Result<Self, crate::ConfigError> {
        Self::with_clock(config, channel, TokioClock::new())
    }

    /// Validates `config`, then creates the feedback channel for `strategy` and the shaper.
    pub async fn connect(config: ShaperConfig, strategy: Strategy) -> Result<Self, crate::Error> {
        config.validate()?;
        let channel = qcn_feedback::connect(strategy).await?;

        Ok(Self::new(config, Arc::from(channel))?)
    }
}

impl<P: Packet, C: Clock> Shaper<P, C> {
    /// Creates a shaper on `clock`. Fails if `config` does not validate.
    pub fn with_clock(
        config: ShaperConfig,
        channel: Arc<dyn FeedbackChannel>,
        clock: C,
    ) -> Result<Self, crate::ConfigError> {
        let params = config.validate()?;

        let backlog = Fifo::new(params.backlog, params.limit);
        let bucket = TokenBucket::new(params, clock.now());
        let sampler = OccupancySampler::new(config.qcn.clone());

        tracing::debug!(
            rate = config.rate,
            peak_rate = ?config.peak_rate,
            max_size = bucket.params().max_size,
            "shaper created"
        );

        Ok(Self {
            config,
            bucket,
            sampler,
            backlog,
            channel: Some(channel),
            watchdog: Watchdog::default(),
            clock,
            stats: Arc::default(),
        })
    }

    /// Admits a packet into the backlog.
    ///
    /// Packets that could never be released, and packets over the backlog limit, are dropped
    /// and handed back. An admitted packet may trigger congestion feedback.
    pub fn enqueue(&mut self, packet: P) -> Result<(), Rejected<P>> {
        if self.is_destroyed() {
            return Err(Rejected { packet, error: ShapeError::Destroyed });
        }

        let len = packet.pkt_len();
        if let Err(error) = self.bucket.admit(len) {
            self.stats.increment_reshape_fails();
            self.stats.increment_drops();
            tracing::trace!(len, "packet exceeds max size");
            return Err(Rejected { packet, error });
        }

        let meta = packet.meta();
        match self.backlog.enqueue(packet) {
            Enqueue::Queued => {}
            Enqueue::Displaced(head) => {
                self.sampler.remove(head.pkt_len());
                self.stats.increment_drops();
            }
            Enqueue::Rejected(packet) => {
                self.stats.increment_drops();
                tracing::trace!(len, backlog = self.backlog.bytes(), "backlog full");
                return Err(Rejected { packet, error: ShapeError::BacklogFull });
            }
        }

        if let Some(feedback) = self.sampler.observe(len, &meta) {
            self.notify(feedback);
        }

        Ok(())
    }

    fn notify(&mut self, feedback: Feedback) {
        let Some(channel) = &self.channel else { return };

        match channel.deliver(feedback) {
            Ok(()) => {
                self.sampler.delivered();
                self.stats.increment_feedback_sent();
                tracing::debug!(
                    source = %feedback.record.source,
                    quantized = feedback.record.quantized,
                    qlen = self.sampler.queue_len(),
                    "congestion feedback generated"
                );
            }
            Err(e) => {
                self.stats.increment_feedback_failed();
                tracing::debug!(source = %feedback.record.source, "feedback not delivered: {e}");
            }
        }
    }

    /// Releases the head packet if both buckets allow it.
    ///
    /// When they don't, the watchdog is armed for the time they will and `None` is returned.
    /// The head is never bypassed.
    pub fn dequeue(&mut self) -> Option<P> {
        let Some(head) = self.backlog.peek() else {
            self.watchdog.cancel();
            return None;
        };
        let len = head.pkt_len();

        match self.bucket.try_release(len, self.clock.now()) {
            Release::Ready => {
                let packet = self.backlog.dequeue()?;
                self.sampler.remove(len);
                self.watchdog.cancel();
                self.stats.increment_released(len);
                Some(packet)
            }
            Release::NotReady { retry_at } => {
                self.watchdog.schedule(retry_at);
                self.stats.increment_overlimits();
                tracing::trace!(len, retry_at, "throttled");
                None
            }
        }
    }

    /// The head packet, without releasing it.
    pub fn peek(&self) -> Option<&P> {
        self.backlog.peek()
    }

    /// Drops the most recently queued packet, returning its length.
    pub fn drop_one(&mut self) -> Option<u32> {
        let packet = self.backlog.drop_tail()?;
        let len = packet.pkt_len();

        self.sampler.remove(len);
        self.stats.increment_drops();
        Some(len)
    }

    /// Discards the backlog and returns to the state of a freshly configured shaper.
    pub fn reset(&mut self) {
        let discarded = self.backlog.clear();
        self.sampler.reset();
        self.bucket.reset(self.clock.now());
        self.watchdog.cancel();

        tracing::debug!(discarded, "shaper reset");
    }

    /// Applies a new configuration.
    ///
    /// The configuration is validated first; an invalid one changes nothing. Queued packets
    /// larger than the new max size are dropped, then packets above a reduced backlog limit are
    /// dropped from the tail. The buckets start over full.
    pub fn reconfigure(&mut self, config: ShaperConfig) -> Result<(), crate::Error> {
        if self.is_destroyed() {
            return Err(crate::Error::Destroyed);
        }

        let params = match config.validate() {
            Ok(params) => params,
            Err(e) => {
                tracing::warn!("rejected shaper configuration: {e}");
                return Err(e.into());
            }
        };

        // Packets the new buckets can never release would block the head forever.
        let max_size = params.max_size;
        for packet in self.backlog.drain_oversized(max_size) {
            let len = packet.pkt_len();
            self.sampler.remove(len);
            self.stats.increment_reshape_fails();
            self.stats.increment_drops();
            tracing::debug!(len, max_size, "dropped queued packet above the new max size");
        }

        self.backlog.reconfigure(params.backlog, params.limit);
        while self.backlog.over_limit() {
            if self.drop_one().is_none() {
                break;
            }
        }

        self.bucket.reconfigure(params, self.clock.now());
        self.sampler.reconfigure(config.qcn.clone());
        self.watchdog.cancel();
        self.config = config;

        tracing::debug!(rate = self.config.rate, limit = self.backlog.limit(), "shaper reconfigured");

        Ok(())
    }

    /// Reports the effective configuration and a statistics snapshot.
    pub fn dump(&self) -> Dump {
        let params = self.bucket.params();

        Dump {
            rate: self.config.rate,
            peak_rate: self.config.peak_rate,
            burst: self.config.effective_burst(),
            mtu: self.config.mtu,
            limit: params.limit,
            backlog: params.backlog,
            buffer: params.buffer,
            max_size: params.max_size,
            stats: self.queue_stats(),
        }
    }

    /// Releases the backlog and detaches the feedback channel, which is returned for shutdown.
    ///
    /// Every operation fails or does nothing afterwards.
    pub fn teardown(&mut self) -> Option<Arc<dyn FeedbackChannel>> {
        let channel = self.channel.take()?;

        let discarded = self.backlog.clear();
        self.sampler.reset();
        self.watchdog.cancel();

        tracing::debug!(discarded, "shaper destroyed");
        Some(channel)
    }

    /// Tears the shaper down and stops its feedback channel.
    pub async fn destroy(mut self) {
        if let Some(channel) = self.teardown() {
            channel.shutdown().await;
        }
    }

    /// The current state. A throttled shaper reports its watchdog deadline.
    pub fn state(&self) -> ShaperState {
        if self.is_destroyed() {
            return ShaperState::Destroyed;
        }

        match self.watchdog.deadline() {
            Some(until) => ShaperState::Throttled { until },
            None => ShaperState::Active,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.channel.is_none()
    }

    /// Shared counters, readable while the shaper is in use.
    pub fn stats(&self) -> &Arc<ShaperStats> {
        &self.stats
    }

    /// A snapshot of the counters and the backlog.
    pub fn queue_stats(&self) -> QueueStats {
        self.stats.snapshot(self.backlog.len(), self.backlog.bytes())
    }

    pub fn config(&self) -> &ShaperConfig {
        &self.config
    }

    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }

    pub fn sampler(&self) -> &OccupancySampler {
        &self.sampler
    }

    pub fn backlog(&self) -> &Fifo<P> {
        &self.backlog
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn channel(&self) -> Option<&Arc<dyn FeedbackChannel>> {
        self.channel.as_ref()
    }
}
