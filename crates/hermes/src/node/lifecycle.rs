//! Node lifecycle shared by producers and consumers.
//!
//! ```text
//! Initializing -> SyncWait -> Running -> Draining -> Terminated
//! ```
//!
//! Any state may skip ahead to `Draining` on a fatal error or local
//! shutdown. The kill reply, when one is owed, is sent only after
//! `Terminated` is reached.

use std::fmt;
use std::time::Duration;

use hermesproto::{register, KillRequest, SyncError, ZmqContext};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::error::NodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeState {
    Initializing,
    SyncWait,
    Running,
    Draining,
    Terminated,
}

impl NodeState {
    pub fn label(&self) -> &'static str {
        match self {
            NodeState::Initializing => "initializing",
            NodeState::SyncWait => "sync_wait",
            NodeState::Running => "running",
            NodeState::Draining => "draining",
            NodeState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Read-only view of a node's state.
#[derive(Clone)]
pub struct NodeStateWatch {
    rx: watch::Receiver<NodeState>,
}

impl NodeStateWatch {
    pub fn current(&self) -> NodeState {
        *self.rx.borrow()
    }

    /// Wait until the node has reached `state` or any later one.
    ///
    /// Returns the state observed. If the node was dropped first, the last
    /// known state is returned instead.
    pub async fn wait_for(&mut self, state: NodeState) -> NodeState {
        let reached = self.rx.wait_for(|s| *s >= state).await.map(|s| *s).ok();
        reached.unwrap_or_else(|| *self.rx.borrow())
    }
}

/// Runs once at the end of `Draining`.
pub type CleanupHook = Box<dyn FnOnce() + Send + 'static>;

/// Why a node left `Running`.
pub(crate) enum StopCause {
    Kill(KillRequest),
    Shutdown,
    Failed(NodeError),
}

pub(crate) struct Lifecycle {
    name: String,
    state: watch::Sender<NodeState>,
    hooks: Vec<CleanupHook>,
}

impl Lifecycle {
    pub fn new(name: impl Into<String>) -> Self {
        let (state, _rx) = watch::channel(NodeState::Initializing);
        Self {
            name: name.into(),
            state,
            hooks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn watch(&self) -> NodeStateWatch {
        NodeStateWatch {
            rx: self.state.subscribe(),
        }
    }

    pub fn state(&self) -> NodeState {
        *self.state.borrow()
    }

    pub fn on_cleanup(&mut self, hook: CleanupHook) {
        self.hooks.push(hook);
    }

    pub fn transition(&self, next: NodeState) {
        let prev = self.state.send_replace(next);
        info!("{}: {} -> {}", self.name, prev, next);
    }

    /// Register with the barrier, or give up early on local shutdown.
    ///
    /// `Ok(false)` means shutdown won and the node should drain without
    /// ever reaching `Running`.
    pub async fn sync_wait(
        &mut self,
        zmq: &ZmqContext,
        endpoint: &str,
        timeout: Duration,
        shutdown: &CancellationToken,
    ) -> Result<bool, NodeError> {
        self.transition(NodeState::SyncWait);
        tokio::select! {
            _ = shutdown.cancelled() => {
                warn!("{}: shutdown during sync wait", self.name);
                Ok(false)
            }
            result = register(zmq, endpoint, &self.name, timeout) => match result {
                Ok(()) => Ok(true),
                Err(e @ SyncError::Timeout { .. }) => {
                    error!("{}: {}", self.name, e);
                    Err(e.into())
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Run cleanup hooks, reach `Terminated`, then reply to the kill request.
    ///
    /// The caller must already have released its sockets and device.
    pub async fn finish(mut self, cause: StopCause) -> Result<(), NodeError> {
        for hook in self.hooks.drain(..) {
            hook();
        }
        self.transition(NodeState::Terminated);

        match cause {
            StopCause::Kill(request) => {
                request.acknowledge().await?;
                Ok(())
            }
            StopCause::Shutdown => Ok(()),
            StopCause::Failed(err) => {
                error!("{}: stopped on error: {}", self.name, err);
                Err(err)
            }
        }
    }
}
