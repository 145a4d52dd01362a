use std::net::Ipv4Addr;

use bytes::Bytes;
use pnet::packet::{
    ethernet::{EtherTypes, EthernetPacket},
    ipv4::Ipv4Packet,
    Packet as _,
};

use qcn_wire::LinkAddrs;

/// A packet the shaper can queue.
pub trait Packet: Send + 'static {
    /// Length in bytes, as charged against the token buckets and the backlog.
    fn pkt_len(&self) -> u32;

    /// Header addresses used to address congestion feedback.
    fn meta(&self) -> PacketMeta {
        PacketMeta::default()
    }
}

/// Addresses of a sampled packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketMeta {
    /// IPv4 addresses. Packets without them never trigger feedback.
    pub network: Option<NetworkAddrs>,
    /// Ethernet addresses, needed for raw frame feedback.
    pub link: Option<LinkAddrs>,
}

/// IPv4 addresses of a sampled packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkAddrs {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

/// The first header of a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// Starts with an Ethernet header.
    Ethernet,
    /// Starts with the network header.
    Network,
}

/// A packet backed by its raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
    layer: Layer,
}

impl Frame {
    /// A frame starting with an Ethernet header.
    pub fn ethernet(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), layer: Layer::Ethernet }
    }

    /// A packet starting with its IPv4 header.
    pub fn network(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), layer: Layer::Network }
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Consumes the frame, returning its bytes.
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

fn network_addrs(data: &[u8]) -> Option<NetworkAddrs> {
    let ip = Ipv4Packet::new(data)?;
    if ip.get_version() != 4 {
        return None;
    }

    Some(NetworkAddrs { source: ip.get_source(), destination: ip.get_destination() })
}

impl Packet for Frame {
    fn pkt_len(&self) -> u32 {
        u32::try_from(self.data.len()).unwrap_or(u32::MAX)
    }

    fn meta(&self) -> PacketMeta {
        match self.layer {
            Layer::Network => PacketMeta { network: network_addrs(&self.data), link: None },
            Layer::Ethernet => {
                let Some(eth) = EthernetPacket::new(&self.data) else {
                    return PacketMeta::default();
                };

                let link = LinkAddrs { source: eth.get_source(), destination: eth.get_destination() };
                let network = if eth.get_ethertype() == EtherTypes::Ipv4 {
                    network_addrs(eth.payload())
                } else {
                    None
                };

                PacketMeta { network, link: Some(link) }
            }
        }
    }
}
