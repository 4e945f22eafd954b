//! Kill handshake
//!
//! The controller sends `OK` to a node's kill socket. The node drains, runs
//! its cleanup, and only then replies `OK`. Both halves consume themselves:
//!
//! - `KillRequest::acknowledge(self)` is the only way a node can reply, so a
//!   node holds the token through cleanup and gives it up last.
//! - `KillSwitch::kill(self, ..)` owns the controller's socket; it is closed
//!   when the call returns, after the reply (or the timeout).

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::codes::MSG_OK;
use crate::control::ControlError;
use crate::socket_config::{
    create_reply_and_bind, create_request_and_connect, multipart_text, text_multipart, ZmqContext,
};

/// Node side: REP socket waiting for the kill signal.
pub struct KillListener {
    endpoint: String,
    receiver: tmq::request_reply::RequestReceiver,
}

impl KillListener {
    pub fn bind(ctx: &ZmqContext, endpoint: &str) -> Result<Self, ControlError> {
        let receiver = create_reply_and_bind(ctx, endpoint, "killsig")?;
        info!("kill socket bound to {}", endpoint);
        Ok(Self {
            endpoint: endpoint.to_string(),
            receiver,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Wait for the kill signal. Any request counts; the code is kept for logging.
    pub async fn recv(self) -> Result<KillRequest, ControlError> {
        let (request, sender) = self.receiver.recv().await?;
        let code = multipart_text(request).unwrap_or_default();
        if code != MSG_OK {
            warn!("kill signal with unexpected code {:?}, treating as kill", code);
        }
        info!("kill signal received on {}", self.endpoint);
        Ok(KillRequest {
            endpoint: self.endpoint,
            code,
            sender,
        })
    }
}

/// A received kill signal whose reply is still owed.
#[must_use = "the controller blocks until the kill request is acknowledged"]
pub struct KillRequest {
    endpoint: String,
    code: String,
    sender: tmq::request_reply::RequestSender,
}

impl KillRequest {
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Send the post-cleanup reply and close the kill socket.
    pub async fn acknowledge(self) -> Result<(), ControlError> {
        let _receiver = self.sender.send(text_multipart(MSG_OK)).await?;
        debug!("kill acknowledged on {}", self.endpoint);
        Ok(())
    }
}

/// Controller side: REQ socket for one peer's kill channel.
pub struct KillSwitch {
    peer: String,
    endpoint: String,
    sender: tmq::request_reply::RequestSender,
}

impl KillSwitch {
    pub fn connect(ctx: &ZmqContext, endpoint: &str, peer: &str) -> Result<Self, ControlError> {
        let sender = create_request_and_connect(ctx, endpoint, peer)?;
        Ok(Self {
            peer: peer.to_string(),
            endpoint: endpoint.to_string(),
            sender,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Send the kill signal and wait for the peer's post-cleanup reply.
    pub async fn kill(self, timeout: Duration) -> Result<(), ControlError> {
        let KillSwitch {
            peer,
            endpoint,
            sender,
        } = self;

        info!("sending kill to {} at {}", peer, endpoint);
        let exchange = async move {
            let receiver = sender.send(text_multipart(MSG_OK)).await?;
            receiver.recv().await
        };

        let (reply, _sender) = match tokio::time::timeout(timeout, exchange).await {
            Err(_) => {
                warn!("{} did not acknowledge kill within {:?}", peer, timeout);
                return Err(ControlError::Timeout {
                    endpoint,
                    waited: timeout,
                });
            }
            Ok(result) => result?,
        };

        match multipart_text(reply) {
            Some(text) if text == MSG_OK => {
                info!("{} terminated", peer);
                Ok(())
            }
            other => Err(ControlError::UnexpectedReply {
                endpoint,
                reply: other.unwrap_or_default(),
            }),
        }
    }
}
