//! hermesproto - wire protocol for hermes recording nodes
//!
//! Every node in a session speaks four fixed channel roles over ZMQ:
//!
//! | role      | pattern        | payload                                |
//! |-----------|----------------|----------------------------------------|
//! | data      | PUB / SUB      | `SampleFrame`: topic + JSON samples    |
//! | sync      | ROUTER / REQ   | node name, released with `OK`          |
//! | killsig   | REP / REQ      | `OK`, answered `OK` after cleanup      |
//! | pause     | REP / REQ      | `OK`, answered `ON` or `PAUSED`        |
//!
//! Socket setup is centralized in `socket_config`; fixing an option there
//! fixes it for every role.

pub mod barrier;
pub mod codes;
pub mod control;
pub mod domain;
pub mod endpoints;
pub mod frame;
pub mod kill;
pub mod socket_config;

pub use barrier::{register, BarrierHost, BarrierReport, SyncError};
pub use codes::{ToggleState, MSG_OK, MSG_ON, MSG_PAUSED};
pub use control::{ControlClient, ControlError, ControlHandler, ControlResponder, PauseToggle};
pub use domain::{DataType, PayloadMismatch, SampleBatch, SampleData, StreamDescriptor};
pub use endpoints::{NodeEndpoints, PeerEndpoints};
pub use frame::{FrameError, SampleFrame};
pub use kill::{KillListener, KillRequest, KillSwitch};
pub use socket_config::{Multipart, SocketError, ZmqContext};

/// libzmq version string, for startup logs.
pub fn zmq_version() -> String {
    let (major, minor, patch) = zmq::version();
    format!("{}.{}.{}", major, minor, patch)
}
