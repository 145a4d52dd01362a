use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use qcn_common::TokioClock;

use crate::{Dump, Error, Packet, Rejected, Shaper, ShaperConfig, ShaperState, ShaperStats};

/// A cloneable handle driving a [`Shaper`] from async code.
///
/// Producers call [`ShaperHandle::enqueue`]; a consumer awaits [`ShaperHandle::recv`], which
/// releases packets as the token buckets allow and sleeps on the watchdog deadline in between.
/// All operations on the shaper are serialized by a lock that is never held across an await.
#[derive(Debug)]
pub struct ShaperHandle<P> {
    shaper: Arc<Mutex<Shaper<P, TokioClock>>>,
    notify: Arc<Notify>,
}

impl<P> Clone for ShaperHandle<P> {
    fn clone(&self) -> Self {
        Self { shaper: Arc::clone(&self.shaper), notify: Arc::clone(&self.notify) }
    }
}

impl<P: Packet> ShaperHandle<P> {
    /// Wraps a shaper for shared use.
    pub fn new(shaper: Shaper<P, TokioClock>) -> Self {
        Self { shaper: Arc::new(Mutex::new(shaper)), notify: Arc::new(Notify::new()) }
    }

    /// Admits a packet and wakes a waiting receiver.
    pub fn enqueue(&self, packet: P) -> Result<(), Rejected<P>> {
        self.shaper.lock().enqueue(packet)?;
        self.notify.notify_one();
        Ok(())
    }

    /// Dequeues without waiting.
    pub fn try_dequeue(&self) -> Option<P> {
        self.shaper.lock().dequeue()
    }

    /// Waits for the next packet the shaper releases.
    ///
    /// Returns `None` once the shaper is destroyed.
    pub async fn recv(&self) -> Option<P> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut shaper = self.shaper.lock();
                if shaper.is_destroyed() {
                    return None;
                }
                if let Some(packet) = shaper.dequeue() {
                    return Some(packet);
                }

                shaper.watchdog().deadline().map(|deadline| shaper.clock().instant(deadline))
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = notified.as_mut() => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// See [`Shaper::reconfigure`].
    pub fn reconfigure(&self, config: ShaperConfig) -> Result<(), Error> {
        self.shaper.lock().reconfigure(config)?;
        // The buckets were refilled, a sleeping receiver may proceed.
        self.notify.notify_one();
        Ok(())
    }

    /// See [`Shaper::reset`].
    pub fn reset(&self) {
        self.shaper.lock().reset();
    }

    /// Drops the most recently queued packet, returning its length.
    pub fn drop_one(&self) -> Option<u32> {
        self.shaper.lock().drop_one()
    }

    pub fn dump(&self) -> Dump {
        self.shaper.lock().dump()
    }

    pub fn state(&self) -> ShaperState {
        self.shaper.lock().state()
    }

    pub fn stats(&self) -> Arc<ShaperStats> {
        Arc::clone(self.shaper.lock().stats())
    }

    /// Destroys the shaper: pending receivers return `None`, the feedback channel is shut down.
    pub async fn destroy(&self) {
        let channel = self.shaper.lock().teardown();
        self.notify.notify_waiters();

        if let Some(channel) = channel {
            channel.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use qcn_feedback::{FeedbackWorker, Transport, WorkerOptions};
    use tokio::time::Instant;

    use super::*;
    use crate::{packet::tests::ipv4_frame, Frame, QcnConfig};

    /// Discards feedback.
    struct Sink;

    #[async_trait::async_trait]
    impl Transport for Sink {
        async fn transmit(&mut self, _: &qcn_feedback::Feedback) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn handle(config: ShaperConfig) -> ShaperHandle<Frame> {
        let worker = FeedbackWorker::spawn(Sink, WorkerOptions::default()).unwrap();
        ShaperHandle::new(Shaper::new(config, Arc::new(worker)).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn recv_paces_packets_at_rate() {
        let _ = tracing_subscriber::fmt::try_init();

        // 1 MB/s, burst of three 1000 byte packets.
        let handle = handle(ShaperConfig::new(1_000_000).with_burst(3_000));
        for _ in 0..10 {
            handle.enqueue(ipv4_frame(1000)).unwrap();
        }

        let start = Instant::now();
        for _ in 0..10 {
            assert_eq!(handle.recv().await.unwrap().data().len(), 1000);
        }

        // Three from the burst, then one per millisecond.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(7) && elapsed < Duration::from_millis(8));
        assert_eq!(handle.stats().packets(), 10);
        assert_eq!(handle.state(), ShaperState::Active);

        handle.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn recv_wakes_on_enqueue() {
        let handle = handle(ShaperConfig::new(1_000_000));

        let receiver = tokio::spawn({
            let handle = handle.clone();
            async move { handle.recv().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        handle.enqueue(ipv4_frame(500)).unwrap();
        let packet = receiver.await.unwrap().unwrap();
        assert_eq!(packet.data().len(), 500);

        handle.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_releases_receivers() {
        let handle = handle(ShaperConfig::new(1_000_000));

        let receiver = tokio::spawn({
            let handle = handle.clone();
            async move { handle.recv().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        handle.destroy().await;
        assert!(receiver.await.unwrap().is_none());
        assert_eq!(handle.state(), ShaperState::Destroyed);
        assert!(handle.enqueue(ipv4_frame(100)).is_err());
    }

    /// Never finishes a send.
    struct Stuck;

    #[async_trait::async_trait]
    impl Transport for Stuck {
        async fn transmit(&mut self, _: &qcn_feedback::Feedback) -> std::io::Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn stuck_worker_does_not_stall_admission() {
        let worker = FeedbackWorker::spawn(Stuck, WorkerOptions::default()).unwrap();
        let config = ShaperConfig::new(1_250_000)
            .with_burst(1_500_000)
            .with_qcn(QcnConfig::default().with_sample_table(vec![1]));
        let handle = ShaperHandle::new(Shaper::new(config, Arc::new(worker)).unwrap());

        // Once congested every admission samples and produces feedback.
        for _ in 0..200 {
            handle.enqueue(ipv4_frame(1500)).unwrap();
            tokio::task::yield_now().await;
        }

        let stats = handle.stats();
        assert!(stats.feedback_sent() <= 17, "one in flight plus a full queue");
        assert!(stats.feedback_failed() > 0);
        assert_eq!(handle.dump().stats.qlen, 200);
    }
}
