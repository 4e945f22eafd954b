//! hermes - streaming buffers and session lifecycle for distributed sensor
//! recording.
//!
//! | Piece                  | Role                                                |
//! |------------------------|-----------------------------------------------------|
//! | [`stream::Stream`]     | time-series buffer per (device, stream)             |
//! | [`node::Producer`]     | device -> Stream -> PUB, with barrier and kill      |
//! | [`node::Consumer`]     | SUB -> Stream replica, same lifecycle               |
//! | [`controller`]         | activity labels, pause toggles, ordered shutdown    |
//! | [`device`]             | the `DeviceAdapter` seam and the bundled adapters   |
//!
//! Wire formats and socket roles live in `hermesproto`; configuration in
//! `hermesconf`.

pub mod controller;
pub mod device;
pub mod node;
pub mod stream;
pub mod telemetry;

pub use controller::{
    ControllerError, ControllerHandle, EventOutcome, ExperimentController, StopReport, UiEvent,
};
pub use device::{Capture, DeviceAdapter, DeviceError, PassthroughDevice, SyntheticDevice};
pub use node::{
    Consumer, ConsumerReport, NodeContext, NodeError, NodeState, NodeStateWatch, Producer,
    ProducerReport, RenderPoller,
};
pub use stream::{Stream, StreamError, StreamReader, StreamSlice};
