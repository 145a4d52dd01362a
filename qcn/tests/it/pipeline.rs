use std::{net::Ipv4Addr, time::Duration};

use bytes::{BufMut, BytesMut};
use futures::StreamExt;
use qcn::{
    Collector, CollectorAddr, Frame, InlineOptions, Shaper, ShaperConfig, ShaperHandle,
    ShaperState, Strategy, WorkerOptions,
};

const SOURCE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const DESTINATION: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

/// Builds an Ethernet frame with a minimal IPv4 header, padded to `len` bytes.
fn frame(len: usize) -> Frame {
    let mut buf = BytesMut::with_capacity(len);
    buf.put_slice(&[0x52, 0x54, 0, 0, 0, 2]);
    buf.put_slice(&[0x52, 0x54, 0, 0, 0, 1]);
    buf.put_u16(0x0800);

    buf.put_u8(0x45);
    buf.put_bytes(0, 11);
    buf.put_slice(&SOURCE.octets());
    buf.put_slice(&DESTINATION.octets());

    buf.resize(len, 0);
    Frame::ethernet(buf.freeze())
}

fn congest(handle: &ShaperHandle<Frame>) {
    for _ in 0..200 {
        handle.enqueue(frame(1500)).unwrap();
    }
}

#[tokio::test]
async fn worker_feedback_reaches_collector() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut collector = Collector::bind("127.0.0.1:0").await.unwrap();
    let strategy = Strategy::Worker {
        options: WorkerOptions::default(),
        collector: CollectorAddr::Fixed(collector.local_addr().unwrap()),
    };

    let config = ShaperConfig::new(1_250_000).with_burst(1_500_000);
    let handle = ShaperHandle::new(Shaper::<Frame>::connect(config, strategy).await.unwrap());

    congest(&handle);

    let (record, _from) = tokio::time::timeout(Duration::from_secs(5), collector.next())
        .await
        .expect("feedback within 5s")
        .unwrap();
    assert_eq!(record.source, SOURCE);
    assert_eq!(record.destination, DESTINATION);
    assert_eq!(record.quantized, 63);
    assert!(record.queue_offset < 0);

    // The burst covers the whole backlog.
    for _ in 0..200 {
        assert_eq!(handle.recv().await.unwrap().data().len(), 1500);
    }
    let stats = handle.stats();
    assert_eq!(stats.packets(), 200);
    assert!(stats.feedback_sent() >= 1);

    handle.destroy().await;
    assert_eq!(handle.state(), ShaperState::Destroyed);
    assert!(handle.recv().await.is_none());
}

#[tokio::test]
async fn inline_feedback_reaches_collector() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut collector = Collector::bind("127.0.0.1:0").await.unwrap();
    let options = InlineOptions::default()
        .with_collector(CollectorAddr::Fixed(collector.local_addr().unwrap()));

    let config = ShaperConfig::new(1_250_000).with_burst(1_500_000);
    let shaper = Shaper::<Frame>::connect(config, Strategy::Inline(options)).await.unwrap();
    let handle = ShaperHandle::new(shaper);

    congest(&handle);
    // Every sample is sent on the packet path, none is refused by the socket.
    let stats = handle.stats();
    assert!(stats.feedback_sent() >= 1);
    assert_eq!(stats.feedback_failed(), 0);

    let (record, _from) = tokio::time::timeout(Duration::from_secs(5), collector.next())
        .await
        .expect("feedback within 5s")
        .unwrap();
    assert_eq!(record.quantized, 63);

    handle.destroy().await;
}

#[tokio::test]
async fn invalid_configuration_fails_before_connecting() {
    let err = Shaper::<Frame>::connect(ShaperConfig::new(0), Strategy::default()).await.unwrap_err();
    assert!(matches!(err, qcn::Error::Config(qcn::ConfigError::ZeroRate)));
}
