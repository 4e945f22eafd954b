//! Endpoint sets for the fixed channel roles of a node.

use hermesconf::{HermesConfig, PeerConfig};

/// Endpoints a node binds (or, for `sync`, connects to).
///
/// - publish: data plane (PUB, bound by producers)
/// - sync: barrier rendezvous (ROUTER on the host, REQ on nodes)
/// - killsig: kill handshake (REP, bound by every node)
/// - pause: optional toggle channel (REP)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEndpoints {
    pub publish: String,
    pub sync: String,
    pub killsig: String,
    pub pause: Option<String>,
}

impl NodeEndpoints {
    /// TCP endpoints from the `[network]` section.
    pub fn from_config(config: &HermesConfig) -> Self {
        let net = &config.infra.network;
        Self {
            publish: net.publish_endpoint(),
            sync: net.sync_endpoint(),
            killsig: net.killsig_endpoint(),
            pause: net.pause_endpoint(),
        }
    }

    /// IPC endpoints under a path prefix, e.g. `/tmp/hermes-test-1a2b3c4d`.
    pub fn ipc(prefix: &str) -> Self {
        Self {
            publish: format!("ipc://{}-pub", prefix),
            sync: format!("ipc://{}-sync", prefix),
            killsig: format!("ipc://{}-kill", prefix),
            pause: Some(format!("ipc://{}-pause", prefix)),
        }
    }

    /// Same endpoints without a pause channel.
    pub fn without_pause(mut self) -> Self {
        self.pause = None;
        self
    }
}

/// Endpoints the controller connects to for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEndpoints {
    pub name: String,
    pub killsig: String,
    pub pause: Option<String>,
}

impl From<&PeerConfig> for PeerEndpoints {
    fn from(peer: &PeerConfig) -> Self {
        Self {
            name: peer.name.clone(),
            killsig: peer.kill_endpoint(),
            pause: peer.pause_endpoint(),
        }
    }
}

impl PeerEndpoints {
    /// Peer endpoints from a node's own endpoint set (tests, single-host sessions).
    pub fn for_node(name: &str, node: &NodeEndpoints) -> Self {
        Self {
            name: name.to_string(),
            killsig: node.killsig.clone(),
            pause: node.pause.clone(),
        }
    }
}
