//! Device layer
//!
//! A producer is generic over one `DeviceAdapter`. The adapter declares its
//! streams up front, connects during `Initializing`, and yields captures
//! while the node is `Running`.

mod passthrough;
mod synthetic;

pub use passthrough::{EventSender, PassthroughDevice};
pub use synthetic::SyntheticDevice;

use async_trait::async_trait;
use hermesproto::{SampleBatch, StreamDescriptor};
use thiserror::Error;

/// Device errors.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device {device} failed to connect: {reason}")]
    Connect { device: String, reason: String },

    #[error("device {device} did not answer ping: {reason}")]
    Ping { device: String, reason: String },

    #[error("device {device} capture failed: {reason}")]
    Capture { device: String, reason: String },

    #[error("device {0} is not connected")]
    NotConnected(String),
}

/// One timestamp's samples from a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub time_s: f64,
    pub batch: SampleBatch,
}

impl Capture {
    pub fn new(time_s: f64, batch: SampleBatch) -> Self {
        Self { time_s, batch }
    }

    /// Stamped with the current wall-clock time.
    pub fn now(batch: SampleBatch) -> Self {
        Self::new(now_s(), batch)
    }
}

/// Polymorphic device seam injected into `Producer`.
#[async_trait]
pub trait DeviceAdapter: Send + 'static {
    /// Device name used as the data-plane topic.
    fn name(&self) -> &str;

    /// Streams this device produces, registered before the barrier.
    fn descriptors(&self) -> Vec<StreamDescriptor>;

    async fn connect(&mut self) -> Result<(), DeviceError>;

    async fn ping(&mut self) -> Result<(), DeviceError>;

    /// Wait for the next capture. `Ok(None)` means the device has nothing
    /// more to deliver this session.
    ///
    /// Must be cancel-safe: the producer drops this future whenever a kill
    /// or shutdown wins the race, and no sample may be lost half-read.
    async fn capture(&mut self) -> Result<Option<Capture>, DeviceError>;

    async fn disconnect(&mut self) -> Result<(), DeviceError>;
}

/// Wall-clock seconds since the Unix epoch, microsecond resolution.
pub fn now_s() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
