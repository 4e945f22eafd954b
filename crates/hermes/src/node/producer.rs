//! Producer node: device -> local Stream -> data plane.

use std::sync::Arc;
use std::time::Duration;

use hermesproto::{
    ControlError, ControlResponder, KillListener, KillRequest, NodeEndpoints, PauseToggle,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::NodeContext;
use super::error::NodeError;
use super::lifecycle::{Lifecycle, NodeState, NodeStateWatch, StopCause};
use super::publisher::{PublisherServer, SamplePublisher, DEFAULT_OUTBOX_CAPACITY};
use crate::device::{Capture, DeviceAdapter, DeviceError};
use crate::stream::{Stream, StreamReader};

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(1);

/// What a producer did before it terminated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProducerReport {
    pub name: String,
    /// Captures appended to the local Stream
    pub appended: u64,
    /// Captures dropped while paused
    pub paused: u64,
    /// Frames handed to the PUB socket
    pub published: usize,
    /// Whether the run ended with a kill handshake
    pub killed: bool,
}

/// Sockets and tasks that exist from `Initializing` until `Draining`.
struct Running {
    outbox: SamplePublisher,
    publisher: JoinHandle<usize>,
    kill: KillListener,
    pause: Option<(JoinHandle<Result<(), ControlError>>, CancellationToken)>,
}

enum Event {
    Kill(Result<KillRequest, ControlError>),
    Shutdown,
    Ping,
    Captured(Result<Option<Capture>, DeviceError>),
}

/// A node wrapping one device.
///
/// ```text
/// connect device, register streams, bind PUB + kill (+ pause)
///   -> barrier
///   -> capture / append / publish until kill or shutdown
///   -> flush publisher, disconnect device, cleanup hooks
///   -> kill reply
/// ```
pub struct Producer<D: DeviceAdapter> {
    ctx: NodeContext,
    device: D,
    endpoints: NodeEndpoints,
    stream: Stream,
    lifecycle: Lifecycle,
    pause: PauseToggle,
    ping_interval: Duration,
    outbox_capacity: usize,
}

impl<D: DeviceAdapter> Producer<D> {
    pub fn new(ctx: NodeContext, device: D) -> Self {
        let endpoints = NodeEndpoints::from_config(&ctx.config);
        let stream = match ctx.config.session.stream.retention {
            Some(records) => Stream::with_retention(records),
            None => Stream::new(),
        };
        let lifecycle = Lifecycle::new(ctx.node_name());
        Self {
            ctx,
            device,
            endpoints,
            stream,
            lifecycle,
            pause: PauseToggle::new(),
            ping_interval: DEFAULT_PING_INTERVAL,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }

    pub fn with_endpoints(mut self, endpoints: NodeEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Name used for barrier registration and logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.lifecycle.set_name(name);
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Run `hook` at the end of `Draining`, before any kill reply.
    pub fn on_cleanup(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.lifecycle.on_cleanup(Box::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        self.lifecycle.name()
    }

    pub fn state_watch(&self) -> NodeStateWatch {
        self.lifecycle.watch()
    }

    pub fn reader(&self) -> StreamReader {
        self.stream.reader()
    }

    pub fn pause_toggle(&self) -> PauseToggle {
        self.pause.clone()
    }

    /// Drive the node through its whole lifecycle.
    pub async fn run(mut self) -> Result<ProducerReport, NodeError> {
        let mut report = ProducerReport {
            name: self.lifecycle.name().to_string(),
            ..Default::default()
        };

        let cause = match self.initialize().await {
            Err(err) => StopCause::Failed(err),
            Ok(running) => {
                let Running {
                    outbox,
                    publisher,
                    kill,
                    pause,
                } = running;

                let cause = match self
                    .lifecycle
                    .sync_wait(
                        &self.ctx.zmq,
                        &self.endpoints.sync,
                        self.ctx.config.session.sync.timeout(),
                        &self.ctx.shutdown,
                    )
                    .await
                {
                    Ok(true) => {
                        self.lifecycle.transition(NodeState::Running);
                        self.capture_loop(kill, &outbox, &mut report).await
                    }
                    Ok(false) => StopCause::Shutdown,
                    Err(err) => StopCause::Failed(err),
                };

                self.lifecycle.transition(NodeState::Draining);
                drop(outbox);
                report.published = match publisher.await {
                    Ok(sent) => sent,
                    Err(e) => {
                        error!("{}: publisher task failed: {}", report.name, e);
                        0
                    }
                };
                if let Some((task, token)) = pause {
                    token.cancel();
                    match task.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!("{}: pause responder failed: {}", report.name, e),
                        Err(e) => warn!("{}: pause responder panicked: {}", report.name, e),
                    }
                }
                if let Err(e) = self.device.disconnect().await {
                    warn!("{}: {}", report.name, e);
                }
                cause
            }
        };

        if self.lifecycle.state() < NodeState::Draining {
            self.lifecycle.transition(NodeState::Draining);
        }
        report.killed = matches!(cause, StopCause::Kill(_));
        self.lifecycle.finish(cause).await?;
        info!(
            "{}: appended {}, paused {}, published {}",
            report.name, report.appended, report.paused, report.published
        );
        Ok(report)
    }

    async fn initialize(&mut self) -> Result<Running, NodeError> {
        self.device.connect().await.map_err(NodeError::DeviceConnect)?;

        match self.bind() {
            Ok(running) => Ok(running),
            Err(err) => {
                if let Err(e) = self.device.disconnect().await {
                    warn!("{}: {}", self.lifecycle.name(), e);
                }
                Err(err)
            }
        }
    }

    fn bind(&mut self) -> Result<Running, NodeError> {
        for descriptor in self.device.descriptors() {
            self.stream.register(descriptor)?;
        }

        let (server, outbox) =
            PublisherServer::bind(&self.ctx.zmq, &self.endpoints.publish, self.outbox_capacity)?;
        let kill = KillListener::bind(&self.ctx.zmq, &self.endpoints.killsig)?;

        let pause = match &self.endpoints.pause {
            Some(endpoint) => {
                let responder = ControlResponder::bind(&self.ctx.zmq, endpoint, "pause")?;
                let token = self.ctx.shutdown.child_token();
                let task = tokio::spawn(responder.serve(Arc::new(self.pause.clone()), token.clone()));
                Some((task, token))
            }
            None => None,
        };

        let publisher = tokio::spawn(server.run());
        Ok(Running {
            outbox,
            publisher,
            kill,
            pause,
        })
    }

    async fn capture_loop(
        &mut self,
        kill: KillListener,
        outbox: &SamplePublisher,
        report: &mut ProducerReport,
    ) -> StopCause {
        let kill = kill.recv();
        tokio::pin!(kill);

        let mut ping = tokio::time::interval(self.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ping.reset();

        let shutdown = self.ctx.shutdown.clone();
        let mut capturing = true;

        loop {
            let event = tokio::select! {
                biased;
                result = &mut kill => Event::Kill(result),
                _ = shutdown.cancelled() => Event::Shutdown,
                _ = ping.tick() => Event::Ping,
                captured = self.device.capture(), if capturing => Event::Captured(captured),
            };

            match event {
                Event::Kill(Ok(request)) => return StopCause::Kill(request),
                Event::Kill(Err(e)) => return StopCause::Failed(e.into()),
                Event::Shutdown => {
                    info!("{}: local shutdown", self.lifecycle.name());
                    return StopCause::Shutdown;
                }
                Event::Ping => {
                    if let Err(e) = self.device.ping().await {
                        warn!("{}: {}", self.lifecycle.name(), e);
                    }
                }
                Event::Captured(Ok(Some(capture))) => {
                    if let Err(err) = self.accept(capture, outbox, report).await {
                        return StopCause::Failed(err);
                    }
                }
                Event::Captured(Ok(None)) => {
                    info!(
                        "{}: device {} has no more samples, waiting for kill",
                        self.lifecycle.name(),
                        self.device.name()
                    );
                    capturing = false;
                }
                Event::Captured(Err(e)) => return StopCause::Failed(NodeError::Device(e)),
            }
        }
    }

    async fn accept(
        &mut self,
        capture: Capture,
        outbox: &SamplePublisher,
        report: &mut ProducerReport,
    ) -> Result<(), NodeError> {
        if self.pause.state().is_paused() {
            report.paused += 1;
            debug!("{}: paused, dropping capture at {:.6}", report.name, capture.time_s);
            return Ok(());
        }

        if let Err(e) = self.stream.append_data(capture.time_s, &capture.batch) {
            error!("{}: rejected capture: {}", report.name, e);
            return Err(e.into());
        }
        report.appended += 1;

        outbox
            .publish_batch(capture.time_s, &capture.batch)
            .await
            .map_err(|frame| NodeError::Publisher(format!("outbox closed at {}", frame.device)))
    }
}
