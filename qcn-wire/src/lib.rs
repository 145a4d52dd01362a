//! Wire formats for congestion feedback.
//!
//! A feedback record travels either as the payload of a UDP datagram sent to
//! [`FEEDBACK_PORT`], or embedded in a raw Ethernet frame carrying [`ETH_P_QCN`].

use thiserror::Error;

pub mod feedback;
pub mod frame;

pub use feedback::{Codec, FeedbackRecord, FEEDBACK_PORT};
pub use frame::{decode_frame, encode_frame, LinkAddrs, ETH_P_QCN, FRAME_LEN};
pub use pnet::util::MacAddr;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Buffer too short: need {need} bytes, got {got}")]
    Short { need: usize, got: usize },
    #[error("Unexpected ethertype {0:#06x}")]
    EtherType(u16),
}
