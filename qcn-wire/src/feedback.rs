use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::Error;

/// Well-known UDP port feedback collectors listen on.
pub const FEEDBACK_PORT: u16 = 6660;

/// Only the low byte of the feedback word carries the quantized level, the rest is reserved.
const LEVEL_MASK: u32 = 0xFF;

/// A congestion notification for the source of a sampled packet.
///
/// # Wire format
///
/// Five 32-bit words in network byte order:
///
/// ```text
/// 0       4       8            12       16       20
/// +-------+-------+------------+--------+--------+
/// |  DA   |  SA   | rsvd|level |  qoff  | qdelta |
/// +-------+-------+------------+--------+--------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackRecord {
    /// Destination address of the sampled packet.
    pub destination: Ipv4Addr,
    /// Source address of the sampled packet, i.e. the flow that should slow down.
    pub source: Ipv4Addr,
    /// Quantized congestion severity. Larger is worse.
    pub quantized: u8,
    /// Equilibrium occupancy minus current occupancy, in bytes.
    pub queue_offset: i32,
    /// Current occupancy minus the occupancy at the previous sample, in bytes.
    pub queue_delta: i32,
}

impl FeedbackRecord {
    /// Length of an encoded record in bytes.
    pub const LEN: usize = 20;

    /// Writes the record to `dst` in network byte order.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32(u32::from(self.destination));
        dst.put_u32(u32::from(self.source));
        dst.put_u32(u32::from(self.quantized) & LEVEL_MASK);
        dst.put_i32(self.queue_offset);
        dst.put_i32(self.queue_delta);
    }

    /// Encodes the record into a fixed-size array without allocating.
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        self.encode(&mut &mut buf[..]);
        buf
    }

    /// Reads a record from `src`, consuming exactly [`Self::LEN`] bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, Error> {
        if src.remaining() < Self::LEN {
            return Err(Error::Short { need: Self::LEN, got: src.remaining() });
        }

        Ok(Self {
            destination: Ipv4Addr::from(src.get_u32()),
            source: Ipv4Addr::from(src.get_u32()),
            quantized: (src.get_u32() & LEVEL_MASK) as u8,
            queue_offset: src.get_i32(),
            queue_delta: src.get_i32(),
        })
    }
}

/// Datagram codec for [`FeedbackRecord`]s, meant to be used with
/// [`UdpFramed`](tokio_util::udp::UdpFramed).
#[derive(Debug, Default)]
pub struct Codec;

impl Codec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for Codec {
    type Item = FeedbackRecord;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FeedbackRecord::LEN {
            return Ok(None);
        }

        FeedbackRecord::decode(src).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(record) = self.decode(src)? {
            return Ok(Some(record));
        }

        // A datagram is a complete unit: whatever is left over is garbage.
        let got = src.len();
        src.clear();
        if got == 0 {
            Ok(None)
        } else {
            Err(Error::Short { need: FeedbackRecord::LEN, got })
        }
    }
}

impl Encoder<FeedbackRecord> for Codec {
    type Error = Error;

    fn encode(&mut self, item: FeedbackRecord, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(FeedbackRecord::LEN);
        item.encode(dst);

        Ok(())
    }
}
