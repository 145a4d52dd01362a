//! Delivery of congestion feedback to the source of a congested flow.
//!
//! A [`FeedbackChannel`] takes a [`Feedback`] produced on the packet path and gets it to the
//! traffic source out-of-band. Three strategies implement the same contract:
//!
//! - [`InlineSender`]: sends a UDP datagram synchronously during admission.
//! - [`FeedbackWorker`]: pushes into a small bounded queue drained by a background task. This
//!   is the strategy to use on a production fast path: `deliver` is O(1), never blocks and
//!   never allocates.
//! - [`RawFrameInjector`]: writes an Ethernet frame with a reserved ethertype straight to the
//!   device, for shapers running below the network layer.
//!
//! [`connect`] selects one of them from a [`Strategy`] at construction time.

use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
};

use thiserror::Error;

use qcn_wire::{FeedbackRecord, LinkAddrs, FEEDBACK_PORT};

mod collector;
mod inline;
mod raw;
mod stats;
mod worker;

pub use collector::Collector;
pub use inline::{InlineOptions, InlineSender};
pub use raw::{DatalinkSink, FrameSink, RawFrameInjector};
pub use stats::DeliveryStats;
pub use worker::{
    feedback_queue, FeedbackQueue, FeedbackReceiver, FeedbackWorker, Transport, UdpTransport,
    WorkerOptions,
};

/// Reasons a [`FeedbackChannel::deliver`] call did not hand the record off.
///
/// All of them are transient from the shaper's point of view: the notification is dropped,
/// the packet is not.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("A feedback delivery is already in progress")]
    Busy,
    #[error("Feedback queue full")]
    QueueFull,
    #[error("Feedback channel closed")]
    Closed,
    #[error("Sampled packet has no link-layer addresses")]
    NoLinkAddrs,
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
}

/// Errors constructing a feedback channel.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("No Tokio runtime to run the feedback worker: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
    #[error("Network interface not found: {0}")]
    InterfaceNotFound(String),
    #[error("Unsupported datalink channel on interface {0}")]
    UnsupportedChannel(String),
}

/// A feedback record together with the link-layer addresses of the packet it was sampled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feedback {
    /// The record sent on the wire.
    pub record: FeedbackRecord,
    /// Link-layer addresses of the sampled frame, if it had any.
    pub link: Option<LinkAddrs>,
}

impl From<FeedbackRecord> for Feedback {
    fn from(record: FeedbackRecord) -> Self {
        Self { record, link: None }
    }
}

/// Out-of-band delivery of congestion feedback.
///
/// `deliver` is called on the packet path and must not block.
#[async_trait::async_trait]
pub trait FeedbackChannel: fmt::Debug + Send + Sync + 'static {
    /// Hands the feedback off for delivery. `Ok` means the channel took ownership of it.
    fn deliver(&self, feedback: Feedback) -> Result<(), DeliveryError>;

    /// Delivery statistics of this channel.
    fn stats(&self) -> &DeliveryStats;

    /// Stops the channel and releases its resources. Pending feedback may be discarded.
    async fn shutdown(&self) {}
}

/// Where feedback datagrams are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorAddr {
    /// A fixed collector.
    Fixed(SocketAddr),
    /// The sampled source address with `mask` applied, on `port`.
    ///
    /// Useful when sources are virtual machines whose physical host address can be derived
    /// from the guest address, e.g. `255.255.0.255` clears the third octet.
    Masked { mask: Ipv4Addr, port: u16 },
}

impl CollectorAddr {
    /// Resolves the destination for the given record.
    pub fn resolve(&self, record: &FeedbackRecord) -> SocketAddr {
        match *self {
            Self::Fixed(addr) => addr,
            Self::Masked { mask, port } => {
                let ip = u32::from(record.source) & u32::from(mask);
                SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(ip), port))
            }
        }
    }
}

impl Default for CollectorAddr {
    fn default() -> Self {
        Self::Fixed(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, FEEDBACK_PORT)))
    }
}

/// Feedback delivery strategy, chosen when the shaper is created.
#[derive(Debug, Clone)]
pub enum Strategy {
    /// Synchronous datagram send on the packet path.
    Inline(InlineOptions),
    /// Bounded queue drained by a background task sending datagrams to `collector`.
    Worker { options: WorkerOptions, collector: CollectorAddr },
    /// Raw Ethernet frames written to the named interface.
    Raw { interface: String },
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Worker { options: WorkerOptions::default(), collector: CollectorAddr::default() }
    }
}

/// Creates the feedback channel for `strategy`.
///
/// Failing to open the socket or to start the worker is a construction-time error.
pub async fn connect(strategy: Strategy) -> Result<Box<dyn FeedbackChannel>, Error> {
    let channel: Box<dyn FeedbackChannel> = match strategy {
        Strategy::Inline(options) => Box::new(InlineSender::bind(options)?),
        Strategy::Worker { options, collector } => {
            let transport = UdpTransport::bind(collector).await?;
            Box::new(FeedbackWorker::spawn(transport, options)?)
        }
        Strategy::Raw { interface } => {
            Box::new(RawFrameInjector::new(DatalinkSink::open(&interface)?))
        }
    };

    tracing::debug!(?channel, "feedback channel ready");

    Ok(channel)
}
