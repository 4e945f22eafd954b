//! Fixed-interval render polling over a read-only Stream handle.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::stream::StreamReader;

/// Something that draws from a Stream. It only ever sees a `StreamReader`,
/// so it cannot mutate the buffers it renders.
pub trait RenderSink: Send + 'static {
    fn render(&mut self, reader: &StreamReader);
}

impl<F> RenderSink for F
where
    F: FnMut(&StreamReader) + Send + 'static,
{
    fn render(&mut self, reader: &StreamReader) {
        self(reader)
    }
}

pub struct RenderPoller {
    interval: Duration,
    sink: Box<dyn RenderSink>,
}

impl RenderPoller {
    pub fn new(interval: Duration, sink: impl RenderSink) -> Self {
        Self {
            interval,
            sink: Box::new(sink),
        }
    }

    /// Render every `interval` until `shutdown` fires. Returns the number of
    /// frames rendered.
    pub fn spawn(mut self, reader: StreamReader, shutdown: CancellationToken) -> JoinHandle<u64> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut frames = 0;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sink.render(&reader);
                        frames += 1;
                    }
                }
            }
            debug!("render poller stopped after {} frames", frames);
            frames
        })
    }
}

/// Logs record counts and estimated rates per device whenever they change.
#[derive(Default)]
pub struct LogRenderer {
    last: BTreeMap<String, usize>,
}

impl LogRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderSink for LogRenderer {
    fn render(&mut self, reader: &StreamReader) {
        let fps = reader.get_fps();
        for desc in reader.descriptors() {
            let key = format!("{}/{}", desc.device_name, desc.stream_name);
            let count = reader
                .record_count(&desc.device_name, &desc.stream_name)
                .unwrap_or(0);
            if self.last.get(&key) == Some(&count) {
                continue;
            }
            self.last.insert(key.clone(), count);

            match fps.get(&desc.device_name).copied().flatten() {
                Some(rate) => info!("{}: {} records, {:.1} fps", key, count, rate),
                None => info!("{}: {} records", key, count),
            }
        }
    }
}
