//! Centralized ZMQ socket configuration for hermes nodes
//!
//! All socket setup goes through these helpers to ensure consistent configuration
//! across producers, consumers, the controller and the barrier host.
//!
//! ## Options Applied
//!
//! - `LINGER` = 0 on connecting sockets for clean shutdown
//! - `LINGER` = 1s on bound sockets whose last message must leave the process
//!   (the final kill acknowledgment, barrier releases, queued samples)
//! - `RECONNECT_IVL` = 1s, `RECONNECT_IVL_MAX` = 60s to cap exponential backoff

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

pub use tmq::{Context as ZmqContext, Multipart, TmqError};

/// Default reconnect interval in milliseconds
pub const DEFAULT_RECONNECT_IVL_MS: i32 = 1000;

/// Maximum reconnect interval in milliseconds (60 seconds)
pub const DEFAULT_RECONNECT_IVL_MAX_MS: i32 = 60_000;

/// Linger for bound sockets; bounds how long a closing socket keeps flushing.
pub const FLUSH_LINGER_MS: i32 = 1000;

/// Socket setup errors, carrying the endpoint and socket role.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("Failed to bind {name} socket to {endpoint}: {source}")]
    Bind {
        name: String,
        endpoint: String,
        source: TmqError,
    },

    #[error("Failed to connect {name} socket to {endpoint}: {source}")]
    Connect {
        name: String,
        endpoint: String,
        source: TmqError,
    },
}

fn bind_err(name: &str, endpoint: &str) -> impl FnOnce(TmqError) -> SocketError {
    let name = name.to_string();
    let endpoint = endpoint.to_string();
    move |source| SocketError::Bind {
        name,
        endpoint,
        source,
    }
}

fn connect_err(name: &str, endpoint: &str) -> impl FnOnce(TmqError) -> SocketError {
    let name = name.to_string();
    let endpoint = endpoint.to_string();
    move |source| SocketError::Connect {
        name,
        endpoint,
        source,
    }
}

/// Create a PUB socket and bind it.
pub fn create_publisher_and_bind(
    ctx: &ZmqContext,
    endpoint: &str,
    name: &str,
) -> Result<tmq::publish::Publish, SocketError> {
    let socket = tmq::publish(ctx)
        .set_linger(FLUSH_LINGER_MS)
        .bind(endpoint)
        .map_err(bind_err(name, endpoint))?;
    debug!("{}: PUB bound to {}", name, endpoint);
    Ok(socket)
}

/// Create a SUB socket, connect it, and subscribe to every topic.
pub fn create_subscriber_and_connect(
    ctx: &ZmqContext,
    endpoint: &str,
    name: &str,
) -> Result<tmq::subscribe::Subscribe, SocketError> {
    // tmq's subscribe() consumes the builder, so the empty prefix is the only topic
    let socket = tmq::subscribe(ctx)
        .set_linger(0)
        .set_reconnect_ivl(DEFAULT_RECONNECT_IVL_MS)
        .set_reconnect_ivl_max(DEFAULT_RECONNECT_IVL_MAX_MS)
        .connect(endpoint)
        .map_err(connect_err(name, endpoint))?
        .subscribe(b"")
        .map_err(connect_err(name, endpoint))?;
    debug!("{}: SUB connected to {}", name, endpoint);
    Ok(socket)
}

/// Create a ROUTER socket and bind it.
pub fn create_router_and_bind(
    ctx: &ZmqContext,
    endpoint: &str,
    name: &str,
) -> Result<tmq::router::Router, SocketError> {
    let socket = tmq::router(ctx)
        .set_linger(FLUSH_LINGER_MS)
        .bind(endpoint)
        .map_err(bind_err(name, endpoint))?;
    debug!("{}: ROUTER bound to {}", name, endpoint);
    Ok(socket)
}

/// Create a REQ socket and connect it. The returned sender is ready to send.
pub fn create_request_and_connect(
    ctx: &ZmqContext,
    endpoint: &str,
    name: &str,
) -> Result<tmq::request_reply::RequestSender, SocketError> {
    let socket = tmq::request(ctx)
        .set_linger(0)
        .set_reconnect_ivl(DEFAULT_RECONNECT_IVL_MS)
        .set_reconnect_ivl_max(DEFAULT_RECONNECT_IVL_MAX_MS)
        .connect(endpoint)
        .map_err(connect_err(name, endpoint))?;
    debug!("{}: REQ connected to {}", name, endpoint);
    Ok(socket)
}

/// Create a REP socket and bind it. The returned receiver is ready to receive.
pub fn create_reply_and_bind(
    ctx: &ZmqContext,
    endpoint: &str,
    name: &str,
) -> Result<tmq::request_reply::RequestReceiver, SocketError> {
    let socket = tmq::reply(ctx)
        .set_linger(FLUSH_LINGER_MS)
        .bind(endpoint)
        .map_err(bind_err(name, endpoint))?;
    debug!("{}: REP bound to {}", name, endpoint);
    Ok(socket)
}

pub fn frames_to_multipart(frames: &[Bytes]) -> Multipart {
    frames
        .iter()
        .map(|f| f.to_vec())
        .collect::<Vec<_>>()
        .into()
}

pub fn multipart_to_frames(mp: Multipart) -> Vec<Bytes> {
    mp.into_iter().map(|m| Bytes::from(m.to_vec())).collect()
}

/// Single-frame text message, the shape of every control-plane payload.
pub fn text_multipart(text: &str) -> Multipart {
    vec![text.as_bytes().to_vec()].into()
}

/// Text of the last frame of a control-plane message.
///
/// REQ/REP strip the envelope, so the body is the only frame; ROUTER
/// peers see `[identity, "", body]` and the body is still last.
pub fn multipart_text(mp: Multipart) -> Option<String> {
    let frames = multipart_to_frames(mp);
    let body = frames.last()?;
    String::from_utf8(body.to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_RECONNECT_IVL_MS, 1000);
        assert_eq!(DEFAULT_RECONNECT_IVL_MAX_MS, 60_000);
        assert!(FLUSH_LINGER_MS > 0);
    }

    #[test]
    fn test_text_roundtrip() {
        assert_eq!(multipart_text(text_multipart("PAUSED")).as_deref(), Some("PAUSED"));
    }

    #[test]
    fn test_text_uses_last_frame() {
        let mp = frames_to_multipart(&[
            Bytes::from_static(b"\x00\x01identity"),
            Bytes::new(),
            Bytes::from_static(b"eye"),
        ]);
        assert_eq!(multipart_text(mp).as_deref(), Some("eye"));
    }

    #[test]
    fn test_text_rejects_invalid_utf8() {
        let mp = frames_to_multipart(&[Bytes::from_static(&[0xff, 0xfe])]);
        assert_eq!(multipart_text(mp), None);
    }
}
