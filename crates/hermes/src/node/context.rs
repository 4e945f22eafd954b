//! Process-scoped node context, built once at startup and passed explicitly.

use std::sync::Arc;

use hermesconf::HermesConfig;
use hermesproto::ZmqContext;
use tokio_util::sync::CancellationToken;

/// Shared by every node task in the process.
///
/// Cloning is cheap: the config is behind an `Arc`, the ZMQ context is
/// reference counted, and clones of the token observe the same cancellation.
#[derive(Clone)]
pub struct NodeContext {
    pub config: Arc<HermesConfig>,
    pub zmq: ZmqContext,
    pub shutdown: CancellationToken,
}

impl NodeContext {
    pub fn new(config: HermesConfig) -> Self {
        Self {
            config: Arc::new(config),
            zmq: ZmqContext::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.config.session.node_name
    }

    /// A context for a second node in the same process: shared config and
    /// ZMQ context, with its own shutdown token.
    pub fn child(&self) -> Self {
        Self {
            config: self.config.clone(),
            zmq: self.zmq.clone(),
            shutdown: self.shutdown.child_token(),
        }
    }
}

impl Default for NodeContext {
    fn default() -> Self {
        Self::new(HermesConfig::default())
    }
}
