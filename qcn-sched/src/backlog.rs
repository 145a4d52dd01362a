use std::collections::VecDeque;

use crate::Packet;

/// The FIFO discipline of the backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FifoKind {
    /// Limited in bytes, tail drop.
    #[default]
    Bytes,
    /// Limited in packets, tail drop.
    Packets,
    /// Limited in packets. When full, the oldest packet makes room for the new one.
    HeadDrop,
}

/// Outcome of [`Fifo::enqueue`].
#[derive(Debug)]
pub enum Enqueue<P> {
    /// Queued at the tail.
    Queued,
    /// Queued by evicting the returned head packet.
    Displaced(P),
    /// Over the limit, the packet is handed back.
    Rejected(P),
}

/// The shaper backlog: a bounded FIFO.
#[derive(Debug)]
pub struct Fifo<P> {
    kind: FifoKind,
    limit: u32,
    queue: VecDeque<P>,
    bytes: u64,
}

impl<P: Packet> Fifo<P> {
    pub fn new(kind: FifoKind, limit: u32) -> Self {
        Self { kind, limit, queue: VecDeque::new(), bytes: 0 }
    }

    /// Queues `packet` according to the discipline.
    pub fn enqueue(&mut self, packet: P) -> Enqueue<P> {
        let len = packet.pkt_len() as u64;

        match self.kind {
            FifoKind::Bytes if self.bytes + len > self.limit as u64 => Enqueue::Rejected(packet),
            FifoKind::Packets if self.queue.len() >= self.limit as usize => {
                Enqueue::Rejected(packet)
            }
            FifoKind::HeadDrop if self.queue.len() >= self.limit as usize => {
                let Some(head) = self.dequeue() else {
                    return Enqueue::Rejected(packet);
                };
                self.push(packet);
                Enqueue::Displaced(head)
            }
            _ => {
                self.push(packet);
                Enqueue::Queued
            }
        }
    }

    fn push(&mut self, packet: P) {
        self.bytes += packet.pkt_len() as u64;
        self.queue.push_back(packet);
    }

    pub fn peek(&self) -> Option<&P> {
        self.queue.front()
    }

    pub fn dequeue(&mut self) -> Option<P> {
        let packet = self.queue.pop_front()?;
        self.bytes -= packet.pkt_len() as u64;
        Some(packet)
    }

    /// Removes the most recently queued packet.
    pub fn drop_tail(&mut self) -> Option<P> {
        let packet = self.queue.pop_back()?;
        self.bytes -= packet.pkt_len() as u64;
        Some(packet)
    }

    /// Removes every packet, returning how many bytes were discarded.
    pub fn clear(&mut self) -> u64 {
        self.queue.clear();
        std::mem::take(&mut self.bytes)
    }

    /// Removes every packet longer than `max_len`, returning them in queue order. The rest keep
    /// their order.
    pub fn drain_oversized(&mut self, max_len: u32) -> Vec<P> {
        let (oversized, kept): (Vec<P>, Vec<P>) =
            std::mem::take(&mut self.queue).into_iter().partition(|p| p.pkt_len() > max_len);

        self.queue = VecDeque::from(kept);
        self.bytes -= oversized.iter().map(|p| p.pkt_len() as u64).sum::<u64>();
        oversized
    }

    /// Changes discipline and limit. Packets above the new limit stay queued until
    /// [`Fifo::over_limit`] is resolved by the owner.
    pub fn reconfigure(&mut self, kind: FifoKind, limit: u32) {
        self.kind = kind;
        self.limit = limit;
    }

    /// Whether the backlog holds more than its limit, after a shrinking reconfigure.
    pub fn over_limit(&self) -> bool {
        match self.kind {
            FifoKind::Bytes => self.bytes > self.limit as u64,
            FifoKind::Packets | FifoKind::HeadDrop => self.queue.len() > self.limit as usize,
        }
    }

    pub fn kind(&self) -> FifoKind {
        self.kind
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Number of queued packets.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queued bytes.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}
