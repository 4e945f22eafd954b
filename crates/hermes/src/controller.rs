//! Experiment controller
//!
//! A producer over a `PassthroughDevice` that records operator-marked
//! activity labels, plus the session-wide commands: pause toggles for peers
//! and the ordered kill handshake that ends an experiment.
//!
//! UI events are dispatched through `ControllerHandle::handle_event`, which
//! holds an explicit reference to the controller state.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hermesproto::{
    ControlClient, ControlError, KillSwitch, NodeEndpoints, PauseToggle, PeerEndpoints,
    SampleBatch, SampleData, ToggleState, ZmqContext,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::device::{now_s, Capture, EventSender, PassthroughDevice};
use crate::node::{NodeContext, NodeError, NodeStateWatch, Producer, ProducerReport};
use crate::stream::experiment::{
    activity_descriptor, ACTIVITY_STREAM, ACTIVITY_WIDTH, EXPERIMENT_DEVICE,
};
use crate::stream::StreamReader;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("unknown activity {0:?}")]
    UnknownActivity(String),

    #[error("activity {label:?} is {len} bytes, wider than S{}", ACTIVITY_WIDTH)]
    ActivityTooLong { label: String, len: usize },

    #[error("controller is paused, activity {0:?} not recorded")]
    Paused(String),

    #[error("unknown peer {0:?}")]
    UnknownPeer(String),

    #[error("peer {0:?} has no pause channel")]
    NoPauseChannel(String),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("controller node is no longer accepting events")]
    EventChannelClosed,
}

/// Operator actions coming from a UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    MarkActivity(String),
    TogglePause(String),
    StopExperiment,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Marked { label: String, time_s: f64 },
    Toggled { peer: String, state: ToggleState },
    Stopped(StopReport),
}

/// Result of the ordered kill handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StopReport {
    /// Peers that acknowledged after their cleanup, in kill order
    pub terminated: Vec<String>,
    /// Peers that timed out or answered wrongly, with the error text
    pub failed: Vec<(String, String)>,
}

struct ControllerState {
    activities: Vec<String>,
    events: EventSender,
    pause: PauseToggle,
    peers: Vec<PeerEndpoints>,
    zmq: ZmqContext,
    request_timeout: Duration,
    shutdown: CancellationToken,
    pause_clients: Mutex<HashMap<String, ControlClient>>,
}

/// Builder for the controller node.
pub struct ExperimentController {
    producer: Producer<PassthroughDevice>,
    events: EventSender,
    activities: Vec<String>,
    peers: Vec<PeerEndpoints>,
    ctx: NodeContext,
}

impl ExperimentController {
    /// Activities and peers come from `[session]`.
    pub fn new(ctx: NodeContext) -> Self {
        let activities = ctx.config.session.activities.clone();
        let peers = ctx
            .config
            .session
            .peers
            .iter()
            .map(PeerEndpoints::from)
            .collect();
        let (device, events) =
            PassthroughDevice::new(EXPERIMENT_DEVICE, vec![activity_descriptor(&activities)]);
        Self {
            producer: Producer::new(ctx.clone(), device),
            events,
            activities,
            peers,
            ctx,
        }
    }

    /// Peers are killed in the order given.
    pub fn with_peers(mut self, peers: Vec<PeerEndpoints>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_endpoints(mut self, endpoints: NodeEndpoints) -> Self {
        self.producer = self.producer.with_endpoints(endpoints);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.producer = self.producer.with_name(name);
        self
    }

    pub fn on_cleanup(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.producer = self.producer.on_cleanup(hook);
        self
    }

    pub fn state_watch(&self) -> NodeStateWatch {
        self.producer.state_watch()
    }

    /// The controller's own pause state; marks are refused while paused.
    pub fn pause_toggle(&self) -> PauseToggle {
        self.producer.pause_toggle()
    }

    /// Local view of `experiment/activity`.
    pub fn reader(&self) -> StreamReader {
        self.producer.reader()
    }

    /// Spawn the controller's own node and hand back the event handle.
    pub fn start(self) -> (ControllerHandle, JoinHandle<Result<ProducerReport, NodeError>>) {
        let state = ControllerState {
            activities: self.activities,
            events: self.events,
            pause: self.producer.pause_toggle(),
            peers: self.peers,
            zmq: self.ctx.zmq.clone(),
            request_timeout: self.ctx.config.session.control.request_timeout(),
            shutdown: self.ctx.shutdown.clone(),
            pause_clients: Mutex::new(HashMap::new()),
        };
        let task = tokio::spawn(self.producer.run());
        (ControllerHandle::new(Arc::new(state)), task)
    }
}

/// Cloneable entry point for UI events.
#[derive(Clone)]
pub struct ControllerHandle {
    state: Arc<ControllerState>,
}

impl ControllerHandle {
    fn new(state: Arc<ControllerState>) -> Self {
        Self { state }
    }

    pub fn activities(&self) -> &[String] {
        &self.state.activities
    }

    pub fn peers(&self) -> impl Iterator<Item = &str> {
        self.state.peers.iter().map(|p| p.name.as_str())
    }

    pub async fn handle_event(&self, event: UiEvent) -> Result<EventOutcome, ControllerError> {
        match event {
            UiEvent::MarkActivity(label) => {
                let time_s = self.mark_activity(&label).await?;
                Ok(EventOutcome::Marked { label, time_s })
            }
            UiEvent::TogglePause(peer) => {
                let state = self.toggle_pause(&peer).await?;
                Ok(EventOutcome::Toggled { peer, state })
            }
            UiEvent::StopExperiment => Ok(EventOutcome::Stopped(self.stop_experiment().await)),
        }
    }

    /// Append `label` to `experiment/activity` at the current time.
    ///
    /// The label is checked against the configured list and the stream's
    /// width before it is queued, and refused while this node is paused. A
    /// toggle that lands between the check and the append still drops the
    /// mark; it then shows up in `ProducerReport::paused`.
    pub async fn mark_activity(&self, label: &str) -> Result<f64, ControllerError> {
        if !self.state.activities.iter().any(|a| a == label) {
            return Err(ControllerError::UnknownActivity(label.to_string()));
        }
        if label.len() > ACTIVITY_WIDTH {
            return Err(ControllerError::ActivityTooLong {
                label: label.to_string(),
                len: label.len(),
            });
        }
        if self.state.pause.state().is_paused() {
            return Err(ControllerError::Paused(label.to_string()));
        }

        let time_s = now_s();
        let batch =
            SampleBatch::new().with(EXPERIMENT_DEVICE, ACTIVITY_STREAM, SampleData::text(label));
        self.state
            .events
            .send(Capture::new(time_s, batch))
            .await
            .map_err(|_| ControllerError::EventChannelClosed)?;
        info!("activity {:?} marked at {:.6}", label, time_s);
        Ok(time_s)
    }

    /// Flip a peer's pause toggle and return its new state.
    pub async fn toggle_pause(&self, peer: &str) -> Result<ToggleState, ControllerError> {
        let endpoints = self
            .state
            .peers
            .iter()
            .find(|p| p.name == peer)
            .ok_or_else(|| ControllerError::UnknownPeer(peer.to_string()))?;
        let endpoint = endpoints
            .pause
            .as_deref()
            .ok_or_else(|| ControllerError::NoPauseChannel(peer.to_string()))?;

        let mut clients = self.state.pause_clients.lock().await;
        let client = match clients.entry(peer.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(ControlClient::connect(
                &self.state.zmq,
                endpoint,
                &format!("pause-{}", peer),
            )?),
        };
        let state = client.toggle(self.state.request_timeout).await?;
        info!("{} is now {}", peer, state);
        Ok(state)
    }

    /// Kill every peer in order, each only after the previous one replied
    /// (or timed out), then shut down this node.
    pub async fn stop_experiment(&self) -> StopReport {
        let mut report = StopReport::default();
        for peer in &self.state.peers {
            let result = match KillSwitch::connect(&self.state.zmq, &peer.killsig, &peer.name) {
                Ok(switch) => switch.kill(self.state.request_timeout).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => report.terminated.push(peer.name.clone()),
                Err(e) => {
                    error!("failed to stop {}: {}", peer.name, e);
                    report.failed.push((peer.name.clone(), e.to_string()));
                }
            }
        }

        if !report.failed.is_empty() {
            warn!("{} peer(s) did not confirm shutdown", report.failed.len());
        }
        self.state.shutdown.cancel();
        report
    }
}
