//! Consumer node: data plane -> local Stream replica.

use futures::stream::{select_all, SelectAll};
use futures::StreamExt;
use hermesproto::socket_config::create_subscriber_and_connect;
use hermesproto::{
    ControlError, KillListener, KillRequest, Multipart, NodeEndpoints, SampleFrame,
    StreamDescriptor,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::context::NodeContext;
use super::error::NodeError;
use super::lifecycle::{Lifecycle, NodeState, NodeStateWatch, StopCause};
use super::poller::RenderPoller;
use crate::stream::{Stream, StreamReader};

/// What a consumer mirrored before it terminated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerReport {
    pub name: String,
    /// Frames appended to the replica
    pub received: u64,
    /// Frames dropped as malformed or unknown
    pub discarded: u64,
    pub killed: bool,
}

enum Event {
    Kill(Result<KillRequest, ControlError>),
    Shutdown,
    Message(Option<Result<Multipart, tmq::TmqError>>),
}

/// Mirrors one or more producer feeds into a local `Stream`.
///
/// The replica is registered with the same descriptors the producers use,
/// so readers query it exactly like a producer-local Stream.
///
/// A frame is mirrored whole or not at all. If any stream in it is unknown
/// to the replica or does not match its descriptor, the entire frame is
/// discarded and counted once, including the streams that would have fit.
/// The receive loop carries on with the next frame.
pub struct Consumer {
    ctx: NodeContext,
    descriptors: Vec<StreamDescriptor>,
    feeds: Vec<String>,
    endpoints: NodeEndpoints,
    stream: Stream,
    lifecycle: Lifecycle,
    poller: Option<RenderPoller>,
}

impl Consumer {
    /// Feeds default to `session.feeds`, or the `[network]` subscribe
    /// endpoint when none are configured.
    pub fn new(ctx: NodeContext, descriptors: Vec<StreamDescriptor>) -> Self {
        let feeds = if ctx.config.session.feeds.is_empty() {
            vec![ctx.config.infra.network.subscribe_endpoint()]
        } else {
            ctx.config.session.feeds.clone()
        };
        let endpoints = NodeEndpoints::from_config(&ctx.config);
        let stream = match ctx.config.session.stream.retention {
            Some(records) => Stream::with_retention(records),
            None => Stream::new(),
        };
        let lifecycle = Lifecycle::new(ctx.node_name());
        Self {
            ctx,
            descriptors,
            feeds,
            endpoints,
            stream,
            lifecycle,
            poller: None,
        }
    }

    pub fn with_feeds(mut self, feeds: Vec<String>) -> Self {
        self.feeds = feeds;
        self
    }

    pub fn with_endpoints(mut self, endpoints: NodeEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.lifecycle.set_name(name);
        self
    }

    /// Render the replica on a fixed interval while the node runs.
    pub fn with_poller(mut self, poller: RenderPoller) -> Self {
        self.poller = Some(poller);
        self
    }

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

    pub async fn run(mut self) -> Result<ConsumerReport, NodeError> {
        let mut report = ConsumerReport {
            name: self.lifecycle.name().to_string(),
            ..Default::default()
        };

        let cause = match self.initialize() {
            Err(err) => StopCause::Failed(err),
            Ok((feed, kill)) => {
                match self
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
                        let render = self.poller.take().map(|poller| {
                            let token = self.ctx.shutdown.child_token();
                            (poller.spawn(self.stream.reader(), token.clone()), token)
                        });
                        let cause = self.receive_loop(feed, kill, &mut report).await;
                        self.lifecycle.transition(NodeState::Draining);
                        stop_render(render).await;
                        cause
                    }
                    Ok(false) => StopCause::Shutdown,
                    Err(err) => StopCause::Failed(err),
                }
            }
        };

        if self.lifecycle.state() < NodeState::Draining {
            self.lifecycle.transition(NodeState::Draining);
        }
        report.killed = matches!(cause, StopCause::Kill(_));
        self.lifecycle.finish(cause).await?;
        info!(
            "{}: received {}, discarded {}",
            report.name, report.received, report.discarded
        );
        Ok(report)
    }

    fn initialize(&mut self) -> Result<(SelectAll<tmq::subscribe::Subscribe>, KillListener), NodeError> {
        for descriptor in self.descriptors.drain(..) {
            self.stream.register(descriptor)?;
        }

        let mut subscribers = Vec::with_capacity(self.feeds.len());
        for feed in &self.feeds {
            subscribers.push(create_subscriber_and_connect(&self.ctx.zmq, feed, "feed")?);
            info!("{}: subscribed to {}", self.lifecycle.name(), feed);
        }
        let kill = KillListener::bind(&self.ctx.zmq, &self.endpoints.killsig)?;
        Ok((select_all(subscribers), kill))
    }

    /// Mirror frames until kill or shutdown. The SUB sockets are dropped
    /// when this returns.
    async fn receive_loop(
        &mut self,
        mut feed: SelectAll<tmq::subscribe::Subscribe>,
        kill: KillListener,
        report: &mut ConsumerReport,
    ) -> StopCause {
        let kill = kill.recv();
        tokio::pin!(kill);
        let shutdown = self.ctx.shutdown.clone();
        let mut open = !feed.is_empty();

        loop {
            let event = tokio::select! {
                biased;
                result = &mut kill => Event::Kill(result),
                _ = shutdown.cancelled() => Event::Shutdown,
                message = feed.next(), if open => Event::Message(message),
            };

            match event {
                Event::Kill(Ok(request)) => return StopCause::Kill(request),
                Event::Kill(Err(e)) => return StopCause::Failed(e.into()),
                Event::Shutdown => {
                    info!("{}: local shutdown", report.name);
                    return StopCause::Shutdown;
                }
                Event::Message(Some(Ok(mp))) => self.ingest(mp, report),
                Event::Message(Some(Err(e))) => {
                    warn!("{}: feed receive failed: {}", report.name, e);
                    report.discarded += 1;
                }
                Event::Message(None) => {
                    warn!("{}: all feeds closed, waiting for kill", report.name);
                    open = false;
                }
            }
        }
    }

    fn ingest(&self, mp: Multipart, report: &mut ConsumerReport) {
        let frame = match SampleFrame::from_multipart(mp) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("{}: discarding malformed frame: {}", report.name, e);
                report.discarded += 1;
                return;
            }
        };

        let device = frame.device.clone();
        let (time_s, batch) = frame.into_batch();
        match self.stream.append_data(time_s, &batch) {
            Ok(()) => {
                debug!("{}: mirrored {} at {:.6}", report.name, device, time_s);
                report.received += 1;
            }
            Err(e) => {
                warn!("{}: discarding frame from {}: {}", report.name, device, e);
                report.discarded += 1;
            }
        }
    }
}

async fn stop_render(render: Option<(JoinHandle<u64>, CancellationToken)>) {
    if let Some((task, token)) = render {
        token.cancel();
        if let Err(e) = task.await {
            warn!("render poller panicked: {}", e);
        }
    }
}
