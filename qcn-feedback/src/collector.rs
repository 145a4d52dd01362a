use std::{
    fmt,
    net::SocketAddr,
    pin::Pin,
    task::{ready, Context, Poll},
};

use futures::{Stream, StreamExt};
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio_util::udp::UdpFramed;

use qcn_wire::{Codec, FeedbackRecord};

/// Receives feedback datagrams, i.e. the traffic source's side of [`FEEDBACK_PORT`].
///
/// Yields every decoded record together with the address of the shaper that sent it.
/// Malformed datagrams are logged and skipped.
///
/// [`FEEDBACK_PORT`]: qcn_wire::FEEDBACK_PORT
pub struct Collector {
    framed: UdpFramed<Codec>,
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector").field("local_addr", &self.local_addr().ok()).finish()
    }
}

impl Collector {
    /// Binds the listening socket.
    pub async fn bind(addr: impl ToSocketAddrs) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { framed: UdpFramed::new(socket, Codec::new()) })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.framed.get_ref().local_addr()
    }
}

impl Stream for Collector {
    type Item = (FeedbackRecord, SocketAddr);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match ready!(this.framed.poll_next_unpin(cx)) {
                Some(Ok(item)) => return Poll::Ready(Some(item)),
                Some(Err(e)) => {
                    tracing::warn!("dropping malformed feedback datagram: {e}");
                    continue;
                }
                None => return Poll::Ready(None),
            }
        }
    }
}
