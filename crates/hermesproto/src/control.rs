//! ControlChannel - point-to-point request/reply for imperative commands
//!
//! A REQ socket can hold exactly one request in flight. `ControlClient`
//! makes that a type-level fact (the tmq sender is consumed by `send` and
//! handed back by `recv`) and bounds every exchange with a caller-supplied
//! timeout. A REQ socket that timed out cannot send again, so it is dropped
//! and a fresh one is connected for the next request.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codes::{ToggleState, MSG_OK};
use crate::socket_config::{
    create_reply_and_bind, create_request_and_connect, multipart_text, text_multipart,
    SocketError, TmqError, ZmqContext,
};

/// Control-plane errors.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error("Control transport failed: {0}")]
    Transport(#[from] TmqError),

    #[error("No reply from {endpoint} within {waited:?}")]
    Timeout { endpoint: String, waited: Duration },

    #[error("Unexpected reply from {endpoint}: {reply:?}")]
    UnexpectedReply { endpoint: String, reply: String },

    #[error("Control message is not valid UTF-8")]
    InvalidMessage,
}

impl ControlError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ControlError::Timeout { .. })
    }
}

/// Requesting side of a control channel (REQ).
pub struct ControlClient {
    ctx: ZmqContext,
    endpoint: String,
    name: String,
    socket: Option<tmq::request_reply::RequestSender>,
}

impl ControlClient {
    /// Connect lazily: ZMQ completes the connection whenever the peer binds.
    pub fn connect(ctx: &ZmqContext, endpoint: &str, name: &str) -> Result<Self, ControlError> {
        let socket = create_request_and_connect(ctx, endpoint, name)?;
        Ok(Self {
            ctx: ctx.clone(),
            endpoint: endpoint.to_string(),
            name: name.to_string(),
            socket: Some(socket),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send `code` and wait at most `timeout` for the reply text.
    ///
    /// No retry happens here. After a timeout or transport error the socket
    /// is discarded; the next call connects a fresh one.
    pub async fn request(&mut self, code: &str, timeout: Duration) -> Result<String, ControlError> {
        let sender = match self.socket.take() {
            Some(sender) => sender,
            None => {
                debug!("{}: reconnecting to {}", self.name, self.endpoint);
                create_request_and_connect(&self.ctx, &self.endpoint, &self.name)?
            }
        };

        let exchange = async move {
            let receiver = sender.send(text_multipart(code)).await?;
            receiver.recv().await
        };

        match tokio::time::timeout(timeout, exchange).await {
            Err(_) => {
                warn!(
                    "{}: no reply to {:?} from {} within {:?}",
                    self.name, code, self.endpoint, timeout
                );
                Err(ControlError::Timeout {
                    endpoint: self.endpoint.clone(),
                    waited: timeout,
                })
            }
            Ok(Err(e)) => Err(ControlError::Transport(e)),
            Ok(Ok((reply, sender))) => {
                self.socket = Some(sender);
                let text = multipart_text(reply).ok_or(ControlError::InvalidMessage)?;
                debug!("{}: {:?} -> {:?}", self.name, code, text);
                Ok(text)
            }
        }
    }

    /// Flip the remote toggle and return its new state.
    pub async fn toggle(&mut self, timeout: Duration) -> Result<ToggleState, ControlError> {
        let reply = self.request(MSG_OK, timeout).await?;
        ToggleState::parse(&reply).ok_or_else(|| ControlError::UnexpectedReply {
            endpoint: self.endpoint.clone(),
            reply,
        })
    }
}

/// Handler trait for processing control requests
///
/// Every request gets exactly one reply; REP sockets cannot skip one.
pub trait ControlHandler: Send + Sync + 'static {
    fn handle(&self, request: &str) -> String;
}

/// Responding side of a control channel (REP).
pub struct ControlResponder {
    endpoint: String,
    name: String,
    receiver: tmq::request_reply::RequestReceiver,
}

impl ControlResponder {
    pub fn bind(ctx: &ZmqContext, endpoint: &str, name: &str) -> Result<Self, ControlError> {
        let receiver = create_reply_and_bind(ctx, endpoint, name)?;
        info!("{} control socket bound to {}", name, endpoint);
        Ok(Self {
            endpoint: endpoint.to_string(),
            name: name.to_string(),
            receiver,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Serve requests one at a time until `shutdown` is cancelled.
    ///
    /// Cancellation is only observed while idle; a request already received
    /// is always answered first.
    pub async fn serve<H: ControlHandler>(
        self,
        handler: Arc<H>,
        shutdown: CancellationToken,
    ) -> Result<(), ControlError> {
        let mut receiver = self.receiver;
        loop {
            let (request, sender) = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = receiver.recv() => result?,
            };

            let reply = match multipart_text(request) {
                Some(text) => handler.handle(&text),
                None => {
                    warn!("{}: non-UTF-8 control request", self.name);
                    handler.handle("")
                }
            };
            receiver = sender.send(text_multipart(&reply)).await?;
        }

        debug!("{} control responder stopped", self.name);
        Ok(())
    }
}

/// ON/PAUSED toggle shared between the pause responder and a capture loop.
#[derive(Clone)]
pub struct PauseToggle {
    state: Arc<watch::Sender<ToggleState>>,
}

impl Default for PauseToggle {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseToggle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ToggleState::On);
        Self { state: Arc::new(tx) }
    }

    pub fn state(&self) -> ToggleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ToggleState> {
        self.state.subscribe()
    }

    /// Flip the state and return the new one.
    pub fn toggle(&self) -> ToggleState {
        let mut next = ToggleState::On;
        self.state.send_modify(|state| {
            *state = state.toggled();
            next = *state;
        });
        next
    }
}

impl ControlHandler for PauseToggle {
    fn handle(&self, request: &str) -> String {
        if request != MSG_OK {
            warn!("pause toggle ignoring request {:?}", request);
            return self.state().label().to_string();
        }
        let state = self.toggle();
        info!("pause toggle -> {}", state);
        state.label().to_string()
    }
}
