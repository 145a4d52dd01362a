use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures::Stream;
use parking_lot::Mutex;
use tokio::{
    net::UdpSocket,
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{CollectorAddr, DeliveryError, DeliveryStats, Error, Feedback, FeedbackChannel};

const DEFAULT_CAPACITY: usize = 16;

/// Options of a [`FeedbackWorker`].
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Capacity of the feedback queue. Pushes beyond it fail with
    /// [`DeliveryError::QueueFull`].
    pub capacity: usize,
    /// How long the worker waits for feedback before checking for shutdown.
    pub poll_interval: Duration,
}

impl WorkerOptions {
    /// Sets the queue capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets how often an idle worker checks for shutdown.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self { capacity: DEFAULT_CAPACITY, poll_interval: Duration::from_millis(100) }
    }
}

/// Creates a bounded feedback queue with the given capacity.
pub fn feedback_queue(capacity: usize) -> (FeedbackQueue, FeedbackReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FeedbackQueue { tx, stats: Arc::default() }, FeedbackReceiver { rx })
}

/// Producer half of the feedback queue, used on the packet path.
#[derive(Debug, Clone)]
pub struct FeedbackQueue {
    tx: mpsc::Sender<Feedback>,
    stats: Arc<DeliveryStats>,
}

impl FeedbackQueue {
    /// Pushes without waiting. Fails with [`DeliveryError::QueueFull`] if the queue is at
    /// capacity, and with [`DeliveryError::Closed`] once the consumer is gone.
    pub fn push(&self, feedback: Feedback) -> Result<(), DeliveryError> {
        match self.tx.try_send(feedback) {
            Ok(()) => {
                self.stats.increment_accepted();
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.stats.increment_queue_full();
                Err(DeliveryError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Counters shared with the worker.
    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }
}

/// Consumer half of the feedback queue.
#[derive(Debug)]
pub struct FeedbackReceiver {
    rx: mpsc::Receiver<Feedback>,
}

impl FeedbackReceiver {
    /// Receives the next feedback, waiting until one is available.
    pub async fn recv(&mut self) -> Option<Feedback> {
        self.rx.recv().await
    }

    /// Receives the next feedback if one is queued.
    pub fn try_recv(&mut self) -> Option<Feedback> {
        self.rx.try_recv().ok()
    }

    /// Number of queued feedback records.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Stream for FeedbackReceiver {
    type Item = Feedback;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// The transport the worker sends feedback with.
#[async_trait::async_trait]
pub trait Transport: Send + 'static {
    async fn transmit(&mut self, feedback: &Feedback) -> std::io::Result<()>;
}

/// Sends feedback as UDP datagrams.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    collector: CollectorAddr,
}

impl UdpTransport {
    /// Binds an ephemeral socket sending to `collector`.
    pub async fn bind(collector: CollectorAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        Ok(Self { socket, collector })
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn transmit(&mut self, feedback: &Feedback) -> std::io::Result<()> {
        let addr = self.collector.resolve(&feedback.record);
        self.socket.send_to(&feedback.record.to_bytes(), addr).await?;
        Ok(())
    }
}

/// Delivers feedback through a bounded queue drained by a background task.
///
/// The packet path only ever calls [`FeedbackQueue::push`]. The task waits on the queue with a
/// timeout so that it notices [`FeedbackChannel::shutdown`] within one poll interval even when
/// no feedback arrives, sends one record per wake-up, and drops the transport when it exits.
#[derive(Debug)]
pub struct FeedbackWorker {
    queue: FeedbackQueue,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FeedbackWorker {
    /// Spawns the worker on the current Tokio runtime.
    pub fn spawn<T: Transport>(transport: T, options: WorkerOptions) -> Result<Self, Error> {
        let runtime = tokio::runtime::Handle::try_current()?;

        let (queue, receiver) = feedback_queue(options.capacity);
        let cancel = CancellationToken::new();

        let task = runtime.spawn(run(
            transport,
            receiver,
            cancel.clone(),
            Arc::clone(&queue.stats),
            options.poll_interval,
        ));

        Ok(Self { queue, cancel, task: Mutex::new(Some(task)) })
    }
}

async fn run<T: Transport>(
    mut transport: T,
    mut receiver: FeedbackReceiver,
    cancel: CancellationToken,
    stats: Arc<DeliveryStats>,
    poll_interval: Duration,
) {
    tracing::debug!("feedback worker started");

    while !cancel.is_cancelled() {
        let feedback = match tokio::time::timeout(poll_interval, receiver.recv()).await {
            Ok(Some(feedback)) => feedback,
            Ok(None) => break,
            Err(_) => continue,
        };

        match transport.transmit(&feedback).await {
            Ok(()) => {
                stats.increment_transmitted();
                tracing::trace!(quantized = feedback.record.quantized, "feedback sent");
            }
            Err(e) => {
                stats.increment_io_errors();
                tracing::error!(source = %feedback.record.source, "failed to send feedback: {e}");
            }
        }
    }

    tracing::debug!(discarded = receiver.len(), "feedback worker stopped");
}

#[async_trait::async_trait]
impl FeedbackChannel for FeedbackWorker {
    fn deliver(&self, feedback: Feedback) -> Result<(), DeliveryError> {
        self.queue.push(feedback)
    }

    fn stats(&self) -> &DeliveryStats {
        self.queue.stats()
    }

    async fn shutdown(&self) {
        self.cancel.cancel();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("feedback worker did not exit cleanly: {e}");
            }
        }
    }
}

impl Drop for FeedbackWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
