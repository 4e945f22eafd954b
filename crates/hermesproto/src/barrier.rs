//! SyncBarrier - startup rendezvous
//!
//! The host binds a ROUTER on the sync port. Each node connects a REQ, sends
//! its name, and blocks. Once `quorum` distinct names have registered the
//! host answers every pending request with `OK` at once, so all nodes begin
//! streaming together. Neither side waits forever.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::codes::MSG_OK;
use crate::socket_config::{
    create_request_and_connect, create_router_and_bind, multipart_text, multipart_to_frames,
    text_multipart, SocketError, TmqError, ZmqContext,
};

/// Sync barrier errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync quorum not reached within {waited:?}")]
    Timeout { waited: Duration },

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error("Sync transport failed: {0}")]
    Transport(#[from] TmqError),

    #[error("Unexpected sync reply: {0:?}")]
    UnexpectedReply(String),

    #[error("Sync socket closed")]
    Closed,
}

impl SyncError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::Timeout { .. })
    }
}

/// Who the host released, in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierReport {
    pub released: Vec<String>,
}

/// Host side of the barrier.
#[derive(Debug, Clone)]
pub struct BarrierHost {
    pub endpoint: String,
    pub quorum: usize,
    pub timeout: Duration,
}

impl BarrierHost {
    pub fn new(endpoint: impl Into<String>, quorum: usize, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            quorum,
            timeout,
        }
    }

    /// Collect registrations until quorum, then release everyone.
    pub async fn serve(&self, ctx: &ZmqContext) -> Result<BarrierReport, SyncError> {
        let mut router = create_router_and_bind(ctx, &self.endpoint, "sync")?;
        info!(
            "sync barrier on {} waiting for {} node(s)",
            self.endpoint, self.quorum
        );

        let deadline = Instant::now() + self.timeout;
        // (name, identity) in first-registration order
        let mut pending: Vec<(String, Vec<u8>)> = Vec::new();

        while pending.len() < self.quorum {
            let mp = match tokio::time::timeout_at(deadline, router.next()).await {
                Err(_) => {
                    let names: Vec<&str> = pending.iter().map(|(n, _)| n.as_str()).collect();
                    error!(
                        "sync quorum not reached: {}/{} registered {:?}",
                        pending.len(),
                        self.quorum,
                        names
                    );
                    return Err(SyncError::Timeout {
                        waited: self.timeout,
                    });
                }
                Ok(None) => return Err(SyncError::Closed),
                Ok(Some(result)) => result?,
            };

            let frames = multipart_to_frames(mp);
            // REQ peers arrive as [identity, "", name]
            if frames.len() != 3 || !frames[1].is_empty() {
                warn!("sync: ignoring malformed registration ({} frames)", frames.len());
                continue;
            }
            let identity = frames[0].to_vec();
            let name = String::from_utf8_lossy(&frames[2]).trim().to_string();
            if name.is_empty() {
                warn!("sync: ignoring registration without a node name");
                continue;
            }

            match pending.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) => {
                    debug!("sync: {} re-registered", name);
                    entry.1 = identity;
                }
                None => {
                    pending.push((name.clone(), identity));
                    info!("sync: {} registered ({}/{})", name, pending.len(), self.quorum);
                }
            }
        }

        for (_, identity) in &pending {
            let reply: tmq::Multipart =
                vec![identity.clone(), Vec::new(), MSG_OK.as_bytes().to_vec()].into();
            router.send(reply).await?;
        }

        let released: Vec<String> = pending.into_iter().map(|(name, _)| name).collect();
        info!("sync barrier released {:?}", released);
        Ok(BarrierReport { released })
    }
}

/// Node side: register under `name` and block until released.
pub async fn register(
    ctx: &ZmqContext,
    endpoint: &str,
    name: &str,
    timeout: Duration,
) -> Result<(), SyncError> {
    let sender = create_request_and_connect(ctx, endpoint, "sync")?;
    debug!("{} registering at {}", name, endpoint);

    let exchange = async move {
        let receiver = sender.send(text_multipart(name)).await?;
        receiver.recv().await
    };

    let (reply, _sender) = match tokio::time::timeout(timeout, exchange).await {
        Err(_) => return Err(SyncError::Timeout { waited: timeout }),
        Ok(result) => result?,
    };

    match multipart_text(reply) {
        Some(text) if text == MSG_OK => {
            info!("{} released by sync barrier", name);
            Ok(())
        }
        other => Err(SyncError::UnexpectedReply(other.unwrap_or_default())),
    }
}
