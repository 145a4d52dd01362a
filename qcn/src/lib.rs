//! Token bucket traffic shaping with quantized congestion notification.
//!
//! ```no_run
//! use qcn::{Frame, Shaper, ShaperConfig, ShaperHandle, Strategy};
//!
//! # async fn run() -> Result<(), qcn::Error> {
//! // 100 Mbit/s, feedback through a background worker to 127.0.0.1:6660.
//! let shaper = Shaper::<Frame>::connect(ShaperConfig::new(12_500_000), Strategy::default()).await?;
//! let handle = ShaperHandle::new(shaper);
//!
//! handle.enqueue(Frame::ethernet(vec![0u8; 1500])).ok();
//! let _next = handle.recv().await;
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use qcn_common::constants;
pub use qcn_feedback::{
    connect, Collector, CollectorAddr, DeliveryError, DeliveryStats, Feedback, FeedbackChannel,
    FeedbackWorker, InlineOptions, InlineSender, RawFrameInjector, Strategy, WorkerOptions,
};
pub use qcn_sched::*;
pub use qcn_wire::{FeedbackRecord, LinkAddrs, MacAddr, ETH_P_QCN, FEEDBACK_PORT};

/// Feedback channels and their building blocks.
pub mod feedback {
    pub use qcn_feedback::*;
}

/// Feedback wire formats.
pub mod wire {
    pub use qcn_wire::*;
}
