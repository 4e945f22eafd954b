use std::time::Duration;

use hermesproto::{ControlError, SocketError, SyncError};
use thiserror::Error;

use crate::device::DeviceError;
use crate::stream::StreamError;

/// Errors that end a node's run.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Device connect failed while `Initializing`.
    #[error("device connect failed: {0}")]
    DeviceConnect(#[source] DeviceError),

    /// The barrier did not release this node in time.
    #[error("sync barrier did not release within {waited:?}")]
    SyncTimeout { waited: Duration },

    #[error("sync barrier failed: {0}")]
    Sync(#[source] SyncError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error("device failed while running: {0}")]
    Device(#[source] DeviceError),

    #[error("publisher task failed: {0}")]
    Publisher(String),
}

impl From<SyncError> for NodeError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Timeout { waited } => NodeError::SyncTimeout { waited },
            other => NodeError::Sync(other),
        }
    }
}

impl NodeError {
    pub fn is_sync_timeout(&self) -> bool {
        matches!(self, NodeError::SyncTimeout { .. })
    }
}
