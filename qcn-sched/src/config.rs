use std::time::Duration;

use thiserror::Error;

use qcn_common::{constants::MTU_ETHERNET, xmit_ticks, Ticks};

use crate::{FifoKind, QcnConfig, RateSpec, RateTable};

/// Invalid shaper configuration. The previous configuration, if any, stays in effect.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Rate must be greater than zero")]
    ZeroRate,
    #[error("Peak rate {peak} must exceed the committed rate {rate}")]
    PeakNotAboveRate { rate: u64, peak: u64 },
    #[error("Burst must be greater than zero")]
    ZeroBurst,
    #[error("Backlog limit must be greater than zero")]
    ZeroLimit,
    #[error("No packet fits in the bucket (max size {max_size})")]
    Unserviceable { max_size: i64 },
    #[error("Invalid QCN parameters: {0}")]
    InvalidQcn(&'static str),
}

/// Shaper configuration.
///
/// Rates are in bytes per second, sizes in bytes. Burst and limit default to values derived
/// from the rate, see [`ShaperConfig::effective_burst`] and [`ShaperConfig::effective_limit`].
#[derive(Debug, Clone)]
pub struct ShaperConfig {
    /// Committed rate.
    pub rate: u64,
    /// Optional peak rate. Must exceed the committed rate.
    pub peak_rate: Option<u64>,
    /// Committed bucket depth.
    pub burst: Option<u32>,
    /// Peak bucket depth, and the largest packet the rate tables are laid out for.
    ///
    /// With a peak rate, packets larger than this (rounded up to a table cell) are never sent.
    pub mtu: u32,
    /// Backlog limit, in bytes for [`FifoKind::Bytes`] and in packets otherwise.
    pub limit: Option<u32>,
    /// Queueing latency used to derive the default byte limit.
    pub queue_latency: Duration,
    /// Backlog discipline.
    pub backlog: FifoKind,
    /// Congestion point parameters.
    pub qcn: QcnConfig,
}

impl ShaperConfig {
    /// A configuration for `rate` bytes per second. Everything else has a default.
    pub fn new(rate: u64) -> Self {
        Self {
            rate,
            peak_rate: None,
            burst: None,
            mtu: MTU_ETHERNET,
            limit: None,
            queue_latency: Duration::from_millis(200),
            backlog: FifoKind::Bytes,
            qcn: QcnConfig::default(),
        }
    }

    pub fn with_peak_rate(mut self, peak_rate: u64) -> Self {
        self.peak_rate = Some(peak_rate);
        self
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = Some(burst);
        self
    }

    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_queue_latency(mut self, latency: Duration) -> Self {
        self.queue_latency = latency;
        self
    }

    pub fn with_backlog(mut self, backlog: FifoKind) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_qcn(mut self, qcn: QcnConfig) -> Self {
        self.qcn = qcn;
        self
    }

    /// The committed bucket depth in bytes.
    ///
    /// Defaults to `max(rate / 8, 10 * mtu)`: an eighth of a second worth of traffic, but at
    /// least ten full packets.
    pub fn effective_burst(&self) -> u32 {
        self.burst.unwrap_or_else(|| {
            let one_eighth_second = (self.rate / 8).min(u32::MAX as u64) as u32;
            one_eighth_second.max(self.mtu.saturating_mul(10))
        })
    }

    /// The backlog limit.
    ///
    /// For byte-limited backlogs the default is `rate * queue_latency + burst`. Packet-limited
    /// backlogs default to that many bytes worth of full-sized packets.
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or_else(|| {
            let per_ms = self.rate / 1000;
            let bytes = per_ms
                .saturating_mul(self.queue_latency.as_millis() as u64)
                .saturating_add(self.effective_burst() as u64)
                .min(u32::MAX as u64) as u32;

            match self.backlog {
                FifoKind::Bytes => bytes,
                FifoKind::Packets | FifoKind::HeadDrop => (bytes / self.mtu.max(1)).max(1),
            }
        })
    }

    /// Validates the configuration and derives the token bucket parameters.
    pub fn validate(&self) -> Result<TbfParams, ConfigError> {
        if self.rate == 0 {
            return Err(ConfigError::ZeroRate);
        }

        if let Some(peak) = self.peak_rate {
            if peak <= self.rate {
                return Err(ConfigError::PeakNotAboveRate { rate: self.rate, peak });
            }
        }

        let burst = self.effective_burst();
        if burst == 0 {
            return Err(ConfigError::ZeroBurst);
        }

        let limit = self.effective_limit();
        if limit == 0 {
            return Err(ConfigError::ZeroLimit);
        }

        self.qcn.validate()?;

        let rtab = RateTable::new(RateSpec::new(self.rate, self.mtu));
        let buffer = xmit_ticks(self.rate, burst as u64);
        let mut max_size = rtab.max_size(buffer);

        let (ptab, mtu) = match self.peak_rate {
            Some(peak) => {
                let ptab = RateTable::new(RateSpec::new(peak, self.mtu));
                // Deep enough for one MTU as the table charges it.
                let mtu = ptab.l2t(self.mtu);
                max_size = max_size.min(ptab.max_size(mtu));
                (Some(ptab), mtu)
            }
            None => (None, 0),
        };

        if max_size < 0 {
            return Err(ConfigError::Unserviceable { max_size });
        }

        Ok(TbfParams {
            rtab,
            ptab,
            buffer,
            mtu,
            max_size: max_size.min(u32::MAX as i64) as u32,
            limit,
            backlog: self.backlog,
        })
    }
}

/// Validated token bucket parameters, derived by [`ShaperConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TbfParams {
    /// Committed rate table.
    pub rtab: RateTable,
    /// Peak rate table, if a peak rate is configured.
    pub ptab: Option<RateTable>,
    /// Committed bucket depth in ticks.
    pub buffer: Ticks,
    /// Peak bucket depth in ticks. Zero without a peak rate.
    pub mtu: Ticks,
    /// Largest packet that can ever be released.
    pub max_size: u32,
    /// Backlog limit, in bytes or packets depending on `backlog`.
    pub limit: u32,
    /// Backlog discipline.
    pub backlog: FifoKind,
}
