//! Data-plane publisher: a handle feeding a task that owns the PUB socket.

use futures::SinkExt;
use hermesproto::socket_config::create_publisher_and_bind;
use hermesproto::{SampleBatch, SampleFrame, SocketError, ZmqContext};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Default outbox depth
pub const DEFAULT_OUTBOX_CAPACITY: usize = 4096;

/// Handle for queueing frames on the data plane.
#[derive(Clone)]
pub struct SamplePublisher {
    tx: mpsc::Sender<SampleFrame>,
}

impl SamplePublisher {
    /// Queue one frame. Fails only after the publisher task has gone away.
    pub async fn publish(&self, frame: SampleFrame) -> Result<(), SampleFrame> {
        self.tx.send(frame).await.map_err(|e| e.0)
    }

    /// Queue one frame per device in `batch`.
    pub async fn publish_batch(&self, time_s: f64, batch: &SampleBatch) -> Result<(), SampleFrame> {
        for frame in SampleFrame::split_batch(time_s, batch) {
            self.publish(frame).await?;
        }
        Ok(())
    }
}

/// PUB socket server.
pub struct PublisherServer {
    endpoint: String,
    socket: tmq::publish::Publish,
    rx: mpsc::Receiver<SampleFrame>,
}

impl PublisherServer {
    /// Bind the PUB socket now so bind failures surface during startup.
    pub fn bind(
        ctx: &ZmqContext,
        endpoint: &str,
        capacity: usize,
    ) -> Result<(Self, SamplePublisher), SocketError> {
        let socket = create_publisher_and_bind(ctx, endpoint, "publish")?;
        info!("PUB socket listening on {}", endpoint);
        let (tx, rx) = mpsc::channel(capacity);
        let server = Self {
            endpoint: endpoint.to_string(),
            socket,
            rx,
        };
        Ok((server, SamplePublisher { tx }))
    }

    /// Publish until every handle is dropped, then close the socket.
    ///
    /// Frames still queued when the handles go away are sent before this
    /// returns. Returns the number of frames handed to the socket.
    pub async fn run(mut self) -> usize {
        let mut sent = 0;
        while let Some(frame) = self.rx.recv().await {
            let mp = match frame.to_multipart() {
                Ok(mp) => mp,
                Err(e) => {
                    error!("Failed to encode frame for {}: {}", frame.device, e);
                    continue;
                }
            };
            debug!("Publishing {} at {:.6}", frame.device, frame.time_s);
            match self.socket.send(mp).await {
                Ok(()) => sent += 1,
                Err(e) => warn!("Failed to publish {}: {}", frame.device, e),
            }
        }

        info!("Publisher on {} shutting down after {} frames", self.endpoint, sent);
        sent
    }
}
