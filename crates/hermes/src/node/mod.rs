//! Node runtime: the lifecycle every producer and consumer goes through,
//! plus the tasks that run beside it (publisher, pause responder, render
//! poller).

mod consumer;
mod context;
mod error;
mod lifecycle;
mod poller;
mod producer;
mod publisher;

pub use consumer::{Consumer, ConsumerReport};
pub use context::NodeContext;
pub use error::NodeError;
pub use lifecycle::{CleanupHook, NodeState, NodeStateWatch};
pub use poller::{LogRenderer, RenderPoller, RenderSink};
pub use producer::{Producer, ProducerReport, DEFAULT_PING_INTERVAL};
pub use publisher::{PublisherServer, SamplePublisher, DEFAULT_OUTBOX_CAPACITY};
