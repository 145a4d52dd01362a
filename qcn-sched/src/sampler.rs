//! QCN congestion point: queue occupancy sampling and quantized feedback.
//!
//! Every admitted packet updates the occupancy estimate and the feedback value
//!
//! ```text
//! Fb = (Q_EQ - qlen) - W * (qlen - qlen_old)
//! ```
//!
//! clamped to `[-Q_EQ * (2W + 1), 0]`. A byte countdown decides when the queue is sampled. At a
//! sample the current severity (the quantized `|Fb|`) latches a pending notification and picks
//! the next countdown from the sample table, sampling more often the worse the congestion is.
//! The latch stays set until a notification has been handed off.

use rand::{rngs::StdRng, Rng, SeedableRng};

use qcn_feedback::Feedback;
use qcn_wire::FeedbackRecord;

use crate::{ConfigError, PacketMeta};

/// Equilibrium queue length in bytes.
pub const DEFAULT_Q_EQ: u32 = 33_792;
/// Weight of the queue growth in the feedback value.
pub const DEFAULT_W: u32 = 2;
/// Sample intervals in bytes, from the mildest to the most severe congestion.
pub const DEFAULT_SAMPLE_TABLE: [u32; 8] =
    [153_600, 76_800, 51_200, 38_400, 30_720, 25_600, 22_016, 18_944];

const DEFAULT_BITS: u8 = 6;

/// How `|Fb|` is scaled down before it is masked to the quantization width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shift {
    /// Shift right by this many bits.
    Fixed(u8),
    /// The largest shift that still maps the feedback floor onto the top quantization level.
    #[default]
    Auto,
}

/// Parameters of the congestion point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QcnConfig {
    /// Equilibrium queue length in bytes.
    pub q_eq: u32,
    /// Weight of the queue growth since the last sample.
    pub w: u32,
    /// Width of the quantized feedback in bits, 1 to 8.
    pub bits: u8,
    /// How `|Fb|` is shifted down to the quantized level.
    pub shift: Shift,
    /// Countdown values in bytes, indexed by severity. Must not be empty.
    pub sample_table: Vec<u32>,
    /// Draw each countdown uniformly from `[v / 2, 3v / 2]` around the table value `v`.
    pub randomize: bool,
}

impl Default for QcnConfig {
    fn default() -> Self {
        Self {
            q_eq: DEFAULT_Q_EQ,
            w: DEFAULT_W,
            bits: DEFAULT_BITS,
            shift: Shift::Auto,
            sample_table: DEFAULT_SAMPLE_TABLE.to_vec(),
            randomize: false,
        }
    }
}

impl QcnConfig {
    pub fn with_q_eq(mut self, q_eq: u32) -> Self {
        self.q_eq = q_eq;
        self
    }

    pub fn with_w(mut self, w: u32) -> Self {
        self.w = w;
        self
    }

    pub fn with_bits(mut self, bits: u8) -> Self {
        self.bits = bits;
        self
    }

    pub fn with_shift(mut self, shift: Shift) -> Self {
        self.shift = shift;
        self
    }

    pub fn with_sample_table(mut self, table: Vec<u32>) -> Self {
        self.sample_table = table;
        self
    }

    pub fn with_randomized_sampling(mut self, randomize: bool) -> Self {
        self.randomize = randomize;
        self
    }

    /// Checks ranges. Called by [`ShaperConfig::validate`](crate::ShaperConfig::validate).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.q_eq == 0 {
            return Err(ConfigError::InvalidQcn("Q_EQ must be greater than zero"));
        }
        if !(1..=8).contains(&self.bits) {
            return Err(ConfigError::InvalidQcn("quantization width must be 1 to 8 bits"));
        }
        if let Shift::Fixed(shift) = self.shift {
            if shift >= 63 {
                return Err(ConfigError::InvalidQcn("quantization shift too large"));
            }
        }
        if self.sample_table.is_empty() || self.sample_table.contains(&0) {
            return Err(ConfigError::InvalidQcn("sample table entries must be positive"));
        }

        Ok(())
    }

    /// Magnitude of the feedback floor, `Q_EQ * (2W + 1)`.
    pub fn max_feedback(&self) -> i64 {
        self.q_eq as i64 * (2 * self.w as i64 + 1)
    }

    /// The largest quantized level, `2^bits - 1`.
    pub fn mask(&self) -> u8 {
        ((1u16 << self.bits) - 1) as u8
    }

    /// The effective shift.
    pub fn resolved_shift(&self) -> u32 {
        match self.shift {
            Shift::Fixed(shift) => shift as u32,
            Shift::Auto => {
                let ratio = self.max_feedback() / self.mask() as i64;
                if ratio == 0 {
                    0
                } else {
                    ratio.ilog2()
                }
            }
        }
    }
}

/// Occupancy estimate and sampling state of one congestion point.
#[derive(Debug)]
pub struct OccupancySampler {
    config: QcnConfig,
    shift: u32,
    mask: u8,

    /// Bytes in the backlog.
    qlen: u64,
    /// `qlen` at the last sample.
    qlen_old: u64,
    /// Bytes until the next sample.
    countdown: i64,
    pending: bool,

    /// Last computed feedback and its quantized value.
    fb: i64,
    quantized: u8,

    rng: StdRng,
}

impl OccupancySampler {
    /// Creates a sampler for a validated configuration.
    pub fn new(config: QcnConfig) -> Self {
        let mut sampler = Self {
            shift: config.resolved_shift(),
            mask: config.mask(),
            config,
            qlen: 0,
            qlen_old: 0,
            countdown: 0,
            pending: false,
            fb: 0,
            quantized: 0,
            rng: StdRng::from_entropy(),
        };
        sampler.reset();
        sampler
    }

    /// Accounts an admitted packet of `len` bytes.
    ///
    /// Returns a notification while one is pending and the packet carries IPv4 addresses. The
    /// caller reports a successful hand-off with [`OccupancySampler::delivered`].
    pub fn observe(&mut self, len: u32, meta: &PacketMeta) -> Option<Feedback> {
        self.qlen += len as u64;

        let offset = self.config.q_eq as i64 - self.qlen as i64;
        let delta = self.qlen as i64 - self.qlen_old as i64;
        let fb = offset.saturating_sub((self.config.w as i64).saturating_mul(delta));
        self.fb = fb.clamp(-self.config.max_feedback(), 0);
        self.quantized = ((-self.fb) >> self.shift).min(self.mask as i64) as u8;

        self.countdown -= len as i64;
        if self.countdown < 0 {
            if self.quantized > 0 {
                self.pending = true;
            }
            self.qlen_old = self.qlen;
            self.countdown = self.next_interval();

            tracing::trace!(
                qlen = self.qlen,
                fb = self.fb,
                quantized = self.quantized,
                countdown = self.countdown,
                "queue sampled"
            );
        }

        if !self.pending {
            return None;
        }

        let network = meta.network?;
        // Taken after the sample point, which moves `qlen_old` up to `qlen`.
        let delta = self.qlen as i64 - self.qlen_old as i64;
        Some(Feedback {
            record: FeedbackRecord {
                destination: network.destination,
                source: network.source,
                quantized: self.quantized,
                queue_offset: saturate(offset),
                queue_delta: saturate(delta),
            },
            link: meta.link,
        })
    }

    /// Clears the pending latch after a notification was handed off.
    pub fn delivered(&mut self) {
        self.pending = false;
    }

    /// Accounts `len` bytes leaving the backlog. Never samples.
    pub fn remove(&mut self, len: u32) {
        self.qlen = self.qlen.saturating_sub(len as u64);
    }

    /// Back to the state of a fresh sampler.
    pub fn reset(&mut self) {
        self.qlen = 0;
        self.qlen_old = 0;
        self.pending = false;
        self.fb = 0;
        self.quantized = 0;
        self.countdown = self.config.sample_table[0] as i64;
    }

    /// Replaces the parameters. The occupancy estimate is kept, the countdown restarts.
    pub fn reconfigure(&mut self, config: QcnConfig) {
        self.shift = config.resolved_shift();
        self.mask = config.mask();
        self.countdown = config.sample_table[0] as i64;
        self.config = config;
    }

    fn next_interval(&mut self) -> i64 {
        let table = &self.config.sample_table;
        let index = self.quantized as usize * table.len() / (self.mask as usize + 1);
        let base = table[index.min(table.len() - 1)] as i64;

        if self.config.randomize {
            self.rng.gen_range(base / 2..=base + base / 2)
        } else {
            base
        }
    }

    pub fn config(&self) -> &QcnConfig {
        &self.config
    }

    /// Estimated backlog occupancy in bytes.
    pub fn queue_len(&self) -> u64 {
        self.qlen
    }

    /// Occupancy at the last sample.
    pub fn last_sample_len(&self) -> u64 {
        self.qlen_old
    }

    /// Bytes left until the next sample. Negative only transiently inside `observe`.
    pub fn countdown(&self) -> i64 {
        self.countdown
    }

    /// Whether a notification is waiting to be handed off.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Feedback value computed at the last admission.
    pub fn feedback(&self) -> i64 {
        self.fb
    }

    /// Quantized feedback computed at the last admission.
    pub fn quantized(&self) -> u8 {
        self.quantized
    }

    /// The shift in effect, with [`Shift::Auto`] resolved.
    pub fn shift(&self) -> u32 {
        self.shift
    }
}

fn saturate(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use crate::NetworkAddrs;

    use super::*;

    fn ipv4() -> PacketMeta {
        PacketMeta {
            network: Some(NetworkAddrs {
                source: Ipv4Addr::new(10, 0, 0, 1),
                destination: Ipv4Addr::new(10, 0, 0, 2),
            }),
            link: None,
        }
    }

    #[test]
    fn default_shift_maps_floor_to_top_level() {
        let config = QcnConfig::default();
        assert_eq!(config.max_feedback(), 168_960);
        assert_eq!(config.mask(), 63);
        assert_eq!(config.resolved_shift(), 11);
        assert!(config.max_feedback() >> 11 >= 63);
        assert!(config.max_feedback() >> 12 < 63);
    }

    #[test]
    fn occupancy_tracks_admissions_and_removals() {
        let mut sampler = OccupancySampler::new(QcnConfig::default());

        let mut admitted = 0u64;
        let mut removed = 0u64;
        for len in [60u32, 1500, 576, 1500, 40] {
            sampler.observe(len, &PacketMeta::default());
            admitted += len as u64;
            assert_eq!(sampler.queue_len(), admitted - removed);
        }

        for len in [1500u32, 60] {
            sampler.remove(len);
            removed += len as u64;
            assert_eq!(sampler.queue_len(), admitted - removed);
        }

        sampler.remove(u32::MAX);
        assert_eq!(sampler.queue_len(), 0, "occupancy clamps at zero");
    }

    #[test]
    fn quantized_is_monotonic_above_equilibrium() {
        // A huge sample interval keeps the last sample length fixed at zero.
        let config = QcnConfig::default().with_sample_table(vec![u32::MAX]);
        let mut sampler = OccupancySampler::new(config);

        let mut last = 0;
        while sampler.queue_len() < 400_000 {
            sampler.observe(1000, &PacketMeta::default());
            assert!(sampler.quantized() >= last);
            last = sampler.quantized();
        }
        assert_eq!(last, 63);
    }

    #[test]
    fn zero_feedback_at_equilibrium_with_no_growth() {
        let mut sampler = OccupancySampler::new(QcnConfig::default());

        // Grow to Q_EQ and sample there, then stay put.
        sampler.observe(DEFAULT_Q_EQ, &PacketMeta::default());
        sampler.qlen_old = sampler.queue_len();
        sampler.remove(1);
        sampler.observe(1, &PacketMeta::default());

        assert_eq!(sampler.feedback(), 0);
        assert_eq!(sampler.quantized(), 0);
    }

    #[test]
    fn congestion_scenario() {
        let _ = tracing_subscriber::fmt::try_init();

        let mut sampler = OccupancySampler::new(QcnConfig::default());
        let mut records = Vec::new();

        for _ in 0..200 {
            if let Some(feedback) = sampler.observe(1500, &ipv4()) {
                records.push(feedback);
            }
        }

        assert_eq!(sampler.queue_len(), 300_000);
        assert_eq!(sampler.feedback(), -168_960);
        assert_eq!(sampler.quantized(), 63);

        // The first countdown (153600 bytes) expires on the 103rd packet.
        assert!(!records.is_empty());
        let first = records[0].record;
        assert_eq!(first.quantized, 63);
        assert_eq!(first.queue_offset, 33_792 - 103 * 1500);
        assert_eq!(first.source, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(first.destination, Ipv4Addr::new(10, 0, 0, 2));
        // The sampled packet reports growth since the sample it just took.
        assert_eq!(first.queue_delta, 0);

        // Never delivered, so the next admission reports again, one packet past the sample.
        let second = records[1].record;
        assert_eq!(second.queue_offset, 33_792 - 104 * 1500);
        assert_eq!(second.queue_delta, 1500);
    }

    #[test]
    fn latch_survives_failed_delivery() {
        let config = QcnConfig::default().with_sample_table(vec![1000]);
        let mut sampler = OccupancySampler::new(config);

        // Congest past one sample.
        for _ in 0..40 {
            sampler.observe(1500, &PacketMeta::default());
        }
        assert!(sampler.is_pending());

        // No network header, nothing to send, latch kept.
        assert!(sampler.observe(100, &PacketMeta::default()).is_none());
        assert!(sampler.is_pending());

        // A record is produced, but not handed off: still pending.
        assert!(sampler.observe(100, &ipv4()).is_some());
        assert!(sampler.observe(100, &ipv4()).is_some());

        sampler.delivered();
        assert!(!sampler.is_pending());
    }

    #[test]
    fn severe_congestion_samples_more_often() {
        let mut sampler = OccupancySampler::new(QcnConfig::default());

        for _ in 0..103 {
            sampler.observe(1500, &PacketMeta::default());
        }
        assert_eq!(sampler.quantized(), 63);
        assert_eq!(sampler.countdown(), DEFAULT_SAMPLE_TABLE[7] as i64);
    }

    #[test]
    fn randomized_interval_stays_around_table_value() {
        let config = QcnConfig::default().with_randomized_sampling(true);
        let mut sampler = OccupancySampler::new(config);

        for _ in 0..1000 {
            sampler.observe(1500, &PacketMeta::default());
            let countdown = sampler.countdown();
            assert!((0..=153_600 + 76_800).contains(&countdown));
        }
    }

    #[test]
    fn reset_restores_fresh_state() {
        let mut sampler = OccupancySampler::new(QcnConfig::default());
        for _ in 0..200 {
            sampler.observe(1500, &ipv4());
        }

        sampler.reset();
        let fresh = OccupancySampler::new(QcnConfig::default());
        assert_eq!(sampler.queue_len(), fresh.queue_len());
        assert_eq!(sampler.last_sample_len(), fresh.last_sample_len());
        assert_eq!(sampler.countdown(), fresh.countdown());
        assert_eq!(sampler.is_pending(), fresh.is_pending());
        assert_eq!(sampler.quantized(), fresh.quantized());
    }

    #[test]
    fn invalid_parameters() {
        assert!(QcnConfig::default().with_q_eq(0).validate().is_err());
        assert!(QcnConfig::default().with_bits(0).validate().is_err());
        assert!(QcnConfig::default().with_bits(9).validate().is_err());
        assert!(QcnConfig::default().with_sample_table(vec![]).validate().is_err());
        assert!(QcnConfig::default().with_shift(Shift::Fixed(63)).validate().is_err());
        assert!(QcnConfig::default().with_shift(Shift::Fixed(13)).validate().is_ok());
    }
}
