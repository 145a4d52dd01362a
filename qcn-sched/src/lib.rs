//! Dual token-bucket shaper with a QCN congestion point.
//!
//! The [`Shaper`] admits packets into a FIFO backlog and releases them at a configured
//! committed rate (and optionally a peak rate) using two token buckets. On every admission an
//! [`OccupancySampler`] tracks the backlog occupancy and, when it detects congestion, produces a
//! quantized feedback record that is handed to a [`FeedbackChannel`](qcn_feedback::FeedbackChannel)
//! for out-of-band delivery to the flow's source.
//!
//! ```text
//!  enqueue ──► admit (max size) ──► Fifo ──► sampler ──► feedback channel
//!                                    │
//!  dequeue ◄── try_release (tokens) ◄┘──► watchdog (retry at)
//! ```

use thiserror::Error;

mod backlog;
mod bucket;
mod config;
mod handle;
mod packet;
mod rate;
mod sampler;
mod shaper;
mod stats;
mod watchdog;

pub use backlog::{Enqueue, Fifo, FifoKind};
pub use bucket::{Release, TokenBucket};
pub use config::{ConfigError, ShaperConfig, TbfParams};
pub use handle::ShaperHandle;
pub use packet::{Frame, Layer, NetworkAddrs, Packet, PacketMeta};
pub use rate::{RateSpec, RateTable, RTAB_SIZE};
pub use sampler::{
    OccupancySampler, QcnConfig, Shift, DEFAULT_Q_EQ, DEFAULT_SAMPLE_TABLE, DEFAULT_W,
};
pub use shaper::{Dump, Rejected, ShapeError, Shaper, ShaperState};
pub use stats::{QueueStats, ShaperStats};
pub use watchdog::Watchdog;

pub use qcn_common::{Clock, ManualClock, Ticks, TokioClock};

/// Errors creating or reconfiguring a shaper.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Feedback channel error: {0}")]
    Feedback(#[from] qcn_feedback::Error),
    #[error("Shaper destroyed")]
    Destroyed,
}
