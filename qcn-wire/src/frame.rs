//! Raw Ethernet framing of feedback records.
//!
//! Used when the shaper sits below the network layer (e.g. on a bridge) and there is no
//! routable destination for a UDP datagram. The frame is addressed back along the path of the
//! sampled frame: its destination is the sampled frame's source and vice-versa.

use pnet::packet::{
    ethernet::{EtherType, EthernetPacket, MutableEthernetPacket},
    Packet as _,
};
use pnet::util::MacAddr;

use crate::{Error, FeedbackRecord};

/// Reserved ethertype of congestion feedback frames.
pub const ETH_P_QCN: u16 = 0xA9A9;

/// Ethernet header length: two addresses and the ethertype.
const ETH_HEADER_LEN: usize = 14;

/// Link-layer addresses of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkAddrs {
    /// Sender of the sampled frame.
    pub source: MacAddr,
    /// Receiver of the sampled frame.
    pub destination: MacAddr,
}

impl LinkAddrs {
    /// Returns the addresses with source and destination swapped.
    pub fn reversed(self) -> Self {
        Self { source: self.destination, destination: self.source }
    }
}

/// Total length of a feedback frame.
pub const FRAME_LEN: usize = ETH_HEADER_LEN + FeedbackRecord::LEN;

/// Builds a feedback frame in `buf` addressed with `addrs` and returns the written length.
pub fn encode_frame(
    record: &FeedbackRecord,
    addrs: LinkAddrs,
    buf: &mut [u8; FRAME_LEN],
) -> usize {
    let Some(mut eth) = MutableEthernetPacket::new(&mut buf[..]) else {
        unreachable!("frame buffer always holds an ethernet header");
    };

    eth.set_destination(addrs.destination);
    eth.set_source(addrs.source);
    eth.set_ethertype(EtherType(ETH_P_QCN));
    eth.set_payload(&record.to_bytes());

    FRAME_LEN
}

/// Parses a feedback frame, returning its link addresses and the embedded record.
pub fn decode_frame(frame: &[u8]) -> Result<(LinkAddrs, FeedbackRecord), Error> {
    let eth = EthernetPacket::new(frame)
        .ok_or(Error::Short { need: ETH_HEADER_LEN, got: frame.len() })?;

    let ethertype = eth.get_ethertype().0;
    if ethertype != ETH_P_QCN {
        return Err(Error::EtherType(ethertype));
    }

    let addrs = LinkAddrs { source: eth.get_source(), destination: eth.get_destination() };
    let record = FeedbackRecord::decode(&mut eth.payload())?;

    Ok((addrs, record))
}
