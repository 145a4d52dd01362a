use std::{
    net::{SocketAddr, UdpSocket},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{CollectorAddr, DeliveryError, DeliveryStats, Feedback, FeedbackChannel};

/// Options of an [`InlineSender`].
#[derive(Debug, Clone)]
pub struct InlineOptions {
    /// Local address of the sending socket.
    pub bind: SocketAddr,
    /// Destination of the feedback datagrams.
    pub collector: CollectorAddr,
}

impl InlineOptions {
    /// Sets the feedback destination.
    pub fn with_collector(mut self, collector: CollectorAddr) -> Self {
        self.collector = collector;
        self
    }
}

impl Default for InlineOptions {
    fn default() -> Self {
        Self { bind: SocketAddr::from(([0, 0, 0, 0], 0)), collector: CollectorAddr::default() }
    }
}

/// Sends feedback as a UDP datagram on the caller's thread.
///
/// The socket is a plain non-blocking [`UdpSocket`], so a send never depends on the async
/// runtime having polled it: if the socket buffer is full the datagram is reported as an IO
/// error instead of waiting. A `sending` flag rejects nested
/// deliveries with [`DeliveryError::Busy`]. It only guards against re-entry through the same
/// instance; it does not serialize senders in any stronger sense, prefer [`FeedbackWorker`]
/// when that matters.
///
/// [`FeedbackWorker`]: crate::FeedbackWorker
#[derive(Debug)]
pub struct InlineSender {
    socket: UdpSocket,
    collector: CollectorAddr,
    sending: AtomicBool,
    stats: DeliveryStats,
}

/// Releases the `sending` flag when the delivery attempt ends.
struct SendingGuard<'a>(&'a AtomicBool);

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl InlineSender {
    /// Binds the sending socket.
    pub fn bind(options: InlineOptions) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(options.bind)?;

        Self::from_socket(socket, options.collector)
    }

    /// Wraps an already bound socket, switching it to non-blocking mode.
    pub fn from_socket(socket: UdpSocket, collector: CollectorAddr) -> std::io::Result<Self> {
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            collector,
            sending: AtomicBool::new(false),
            stats: DeliveryStats::default(),
        })
    }

    /// The local address of the sending socket.

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn enter(&self) -> Option<SendingGuard<'_>> {
        self.sending
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SendingGuard(&self.sending))
    }
}

impl FeedbackChannel for InlineSender {
    fn deliver(&self, feedback: Feedback) -> Result<(), DeliveryError> {
        let Some(_guard) = self.enter() else {
            self.stats.increment_busy();
            tracing::debug!("feedback send already in progress");
            return Err(DeliveryError::Busy);
        };

        let addr = self.collector.resolve(&feedback.record);
        match self.socket.send_to(&feedback.record.to_bytes(), addr) {
            Ok(_) => {
                self.stats.increment_accepted();
                self.stats.increment_transmitted();
                tracing::trace!(%addr, quantized = feedback.record.quantized, "feedback sent");
                Ok(())
            }
            Err(e) => {
                self.stats.increment_io_errors();
                tracing::warn!(%addr, "could not send feedback: {e}");
                Err(DeliveryError::Io(e))
            }
        }
    }

    fn stats(&self) -> &DeliveryStats {
        &self.stats
    }
}
