use std::{fmt, io};

use parking_lot::Mutex;
use pnet::datalink::{self, Channel, DataLinkSender};

use qcn_wire::{encode_frame, FRAME_LEN};

use crate::{DeliveryError, DeliveryStats, Error, Feedback, FeedbackChannel};

/// Something raw link-layer frames can be written to.
pub trait FrameSink: Send + 'static {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// A [`FrameSink`] writing to a network interface through a `pnet` datalink channel.
pub struct DatalinkSink {
    interface: String,
    tx: Box<dyn DataLinkSender>,
}

impl fmt::Debug for DatalinkSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatalinkSink").field("interface", &self.interface).finish()
    }
}

impl DatalinkSink {
    /// Opens an Ethernet datalink channel on the interface called `name`.
    ///
    /// Requires the privileges to open a packet socket.
    pub fn open(name: &str) -> Result<Self, Error> {
        let interface = datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == name)
            .ok_or_else(|| Error::InterfaceNotFound(name.to_string()))?;

        match datalink::channel(&interface, Default::default())? {
            Channel::Ethernet(tx, _rx) => Ok(Self { interface: interface.name, tx }),
            _ => Err(Error::UnsupportedChannel(interface.name)),
        }
    }
}

impl FrameSink for DatalinkSink {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.tx
            .send_to(frame, None)
            .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::Other, "no room in send buffer")))
    }
}

/// Delivers feedback as raw Ethernet frames on the device the sampled packet came in on.
///
/// The frame is addressed back to the sampled frame's source. Packets without link-layer
/// addresses cannot be answered this way and fail with [`DeliveryError::NoLinkAddrs`].
#[derive(Debug)]
pub struct RawFrameInjector<S> {
    sink: Mutex<S>,
    stats: DeliveryStats,
}

impl<S: FrameSink> RawFrameInjector<S> {
    /// Injects frames through `sink`.
    pub fn new(sink: S) -> Self {
        Self { sink: Mutex::new(sink), stats: DeliveryStats::default() }
    }

    /// Consumes the injector, returning the sink.
    pub fn into_inner(self) -> S {
        self.sink.into_inner()
    }
}

impl<S: FrameSink + fmt::Debug> FeedbackChannel for RawFrameInjector<S> {
    fn deliver(&self, feedback: Feedback) -> Result<(), DeliveryError> {
        let link = feedback.link.ok_or(DeliveryError::NoLinkAddrs)?;

        let mut frame = [0u8; FRAME_LEN];
        let len = encode_frame(&feedback.record, link.reversed(), &mut frame);

        // Never wait for another sender on the packet path.
        let Some(mut sink) = self.sink.try_lock() else {
            self.stats.increment_busy();
            return Err(DeliveryError::Busy);
        };

        match sink.send_frame(&frame[..len]) {
            Ok(()) => {
                self.stats.increment_accepted();
                self.stats.increment_transmitted();
                tracing::trace!(destination = %link.source, "feedback frame injected");
                Ok(())
            }
            Err(e) => {
                self.stats.increment_io_errors();
                tracing::warn!("could not inject feedback frame: {e}");
                Err(DeliveryError::Io(e))
            }
        }
    }

    fn stats(&self) -> &DeliveryStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use qcn_wire::{decode_frame, FeedbackRecord, LinkAddrs, MacAddr};

    use super::*;

    #[derive(Debug, Default)]
    struct Capture {
        frames: Vec<Vec<u8>>,
        fail: bool,
    }

    impl FrameSink for Capture {
        fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::Other, "link down"));
            }
            self.frames.push(frame.to_vec());
            Ok(())
        }
    }

    fn feedback(link: Option<LinkAddrs>) -> Feedback {
        Feedback {
            record: FeedbackRecord {
                destination: Ipv4Addr::new(10, 0, 0, 2),
                source: Ipv4Addr::new(10, 0, 0, 1),
                quantized: 40,
                queue_offset: -70_000,
                queue_delta: 10_000,
            },
            link,
        }
    }

    #[test]
    fn frame_is_addressed_to_sampled_source() {
        let sampled = LinkAddrs {
            source: MacAddr::new(0x52, 0x54, 0, 0, 0, 1),
            destination: MacAddr::new(0x52, 0x54, 0, 0, 0, 2),
        };
        let injector = RawFrameInjector::new(Capture::default());

        injector.deliver(feedback(Some(sampled))).unwrap();
        assert_eq!(injector.stats().transmitted(), 1);

        let capture = injector.into_inner();
        assert_eq!(capture.frames.len(), 1);

        let (addrs, record) = decode_frame(&capture.frames[0]).unwrap();
        assert_eq!(addrs.destination, sampled.source);
        assert_eq!(addrs.source, sampled.destination);
        assert_eq!(record, feedback(None).record);
    }

    #[test]
    fn missing_link_addresses_and_sink_errors_fail_delivery() {
        let injector = RawFrameInjector::new(Capture { fail: true, ..Default::default() });

        assert!(matches!(injector.deliver(feedback(None)), Err(DeliveryError::NoLinkAddrs)));

        let link = LinkAddrs { source: MacAddr::broadcast(), destination: MacAddr::zero() };
        assert!(matches!(injector.deliver(feedback(Some(link))), Err(DeliveryError::Io(_))));
        assert_eq!(injector.stats().io_errors(), 1);
    }
}
