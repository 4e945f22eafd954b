//! Always-connected device fed by external events (UI clicks, stdin).

use async_trait::async_trait;
use hermesproto::StreamDescriptor;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Capture, DeviceAdapter, DeviceError};

/// Default event queue depth
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Handle for pushing captures into a `PassthroughDevice`.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Capture>,
}

impl EventSender {
    /// Queue a capture. Fails once the device has been dropped.
    pub async fn send(&self, capture: Capture) -> Result<(), Capture> {
        self.tx.send(capture).await.map_err(|e| e.0)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Trivial device layer: connect always succeeds, ping is a no-op, and
/// captures are whatever the paired `EventSender` pushes.
pub struct PassthroughDevice {
    name: String,
    descriptors: Vec<StreamDescriptor>,
    rx: mpsc::Receiver<Capture>,
}

impl PassthroughDevice {
    pub fn new(name: impl Into<String>, descriptors: Vec<StreamDescriptor>) -> (Self, EventSender) {
        Self::with_capacity(name, descriptors, DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(
        name: impl Into<String>,
        descriptors: Vec<StreamDescriptor>,
        capacity: usize,
    ) -> (Self, EventSender) {
        let (tx, rx) = mpsc::channel(capacity);
        let device = Self {
            name: name.into(),
            descriptors,
            rx,
        };
        (device, EventSender { tx })
    }
}

#[async_trait]
impl DeviceAdapter for PassthroughDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn descriptors(&self) -> Vec<StreamDescriptor> {
        self.descriptors.clone()
    }

    async fn connect(&mut self) -> Result<(), DeviceError> {
        debug!("{}: passthrough connected", self.name);
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn capture(&mut self) -> Result<Option<Capture>, DeviceError> {
        // mpsc::Receiver::recv is cancel-safe
        Ok(self.rx.recv().await)
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.rx.close();
        Ok(())
    }
}
