//! Periodic generator device: a sine per channel plus a sample counter.

use std::time::Duration;

use async_trait::async_trait;
use hermesproto::{DataType, SampleBatch, SampleData, StreamDescriptor};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info};

use super::{now_s, Capture, DeviceAdapter, DeviceError};

pub const SIGNAL_STREAM: &str = "signal";
pub const COUNTER_STREAM: &str = "counter";

pub struct SyntheticDevice {
    name: String,
    rate_hz: f64,
    channels: usize,
    limit: Option<u64>,
    produced: u64,
    ticker: Option<Interval>,
}

impl SyntheticDevice {
    pub fn new(name: impl Into<String>, rate_hz: f64, channels: usize) -> Self {
        Self {
            name: name.into(),
            rate_hz,
            channels: channels.max(1),
            limit: None,
            produced: 0,
            ticker: None,
        }
    }

    /// Stop capturing after `samples` captures.
    pub fn with_limit(mut self, samples: u64) -> Self {
        self.limit = Some(samples);
        self
    }

    fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz)
    }

    fn sample(&self, time_s: f64) -> SampleBatch {
        let phase = self.produced as f64 / self.rate_hz;
        let signal = (0..self.channels)
            .map(|ch| (std::f64::consts::TAU * (ch + 1) as f64 * phase).sin())
            .collect();
        debug!("{}: sample {} at {:.6}", self.name, self.produced, time_s);
        SampleBatch::new()
            .with(&self.name, SIGNAL_STREAM, SampleData::Float(signal))
            .with(
                &self.name,
                COUNTER_STREAM,
                SampleData::Int(vec![(self.produced % (u32::MAX as u64 + 1)) as i64]),
            )
    }
}

#[async_trait]
impl DeviceAdapter for SyntheticDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn descriptors(&self) -> Vec<StreamDescriptor> {
        vec![
            StreamDescriptor::new(
                &self.name,
                SIGNAL_STREAM,
                DataType::Float32,
                vec![self.channels],
                self.rate_hz,
            )
            .with_note("Description", "Sine wave per channel, channel k at k Hz"),
            StreamDescriptor::new(&self.name, COUNTER_STREAM, DataType::UInt32, vec![1], self.rate_hz)
                .with_note("Description", "Capture sequence number"),
        ]
    }

    async fn connect(&mut self) -> Result<(), DeviceError> {
        if !(self.rate_hz.is_finite() && self.rate_hz > 0.0) {
            return Err(DeviceError::Connect {
                device: self.name.clone(),
                reason: format!("invalid rate {} Hz", self.rate_hz),
            });
        }
        let mut ticker = interval(self.period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
        info!("{}: synthetic device at {} Hz, {} channel(s)", self.name, self.rate_hz, self.channels);
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), DeviceError> {
        match self.ticker {
            Some(_) => Ok(()),
            None => Err(DeviceError::NotConnected(self.name.clone())),
        }
    }

    async fn capture(&mut self) -> Result<Option<Capture>, DeviceError> {
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return Ok(None);
        }
        let ticker = self
            .ticker
            .as_mut()
            .ok_or_else(|| DeviceError::NotConnected(self.name.clone()))?;
        // Interval::tick is cancel-safe; the sample is built after it resolves
        ticker.tick().await;

        let time_s = now_s();
        let batch = self.sample(time_s);
        self.produced += 1;
        Ok(Some(Capture::new(time_s, batch)))
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.ticker = None;
        info!("{}: synthetic device stopped after {} samples", self.name, self.produced);
        Ok(())
    }
}
