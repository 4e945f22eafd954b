//! Time-series buffer shared by producers, consumers and renderers
//!
//! A `Stream` owns device -> stream -> descriptor and the ordered records of
//! every registered pair. The owning node appends; renderers read through a
//! `StreamReader`. A read takes shared chunk handles under the lock and
//! copies records after releasing it, so a reader never observes a
//! half-applied `append_data` and never holds the writer up for a long copy.

mod buffer;
pub mod experiment;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hermesproto::{DataType, PayloadMismatch, SampleBatch, StreamDescriptor};
use thiserror::Error;
use tracing::debug;

pub use buffer::{StreamSlice, FPS_WINDOW};
use buffer::{BufferWindow, StreamBuffer};

/// Stream contract violations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    #[error("stream {device}/{stream} is already registered")]
    DuplicateStream { device: String, stream: String },

    #[error("stream {device}/{stream} was never registered")]
    UnknownStream { device: String, stream: String },

    #[error("payload for {device}/{stream} does not match its descriptor: {reason}")]
    ShapeMismatch {
        device: String,
        stream: String,
        #[source]
        reason: PayloadMismatch,
    },

    #[error("invalid descriptor for {device}/{stream}: {reason}")]
    InvalidDescriptor {
        device: String,
        stream: String,
        reason: String,
    },
}

impl StreamError {
    fn unknown(device: &str, stream: &str) -> Self {
        StreamError::UnknownStream {
            device: device.to_string(),
            stream: stream.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct StreamState {
    /// Buffers in registration order
    buffers: Vec<StreamBuffer>,
    /// device -> stream -> position in `buffers`
    index: HashMap<String, HashMap<String, usize>>,
    retention: Option<usize>,
}

impl StreamState {
    fn position(&self, device: &str, stream: &str) -> Option<usize> {
        self.index.get(device)?.get(stream).copied()
    }

    fn buffer(&self, device: &str, stream: &str) -> Result<&StreamBuffer, StreamError> {
        self.position(device, stream)
            .map(|i| &self.buffers[i])
            .ok_or_else(|| StreamError::unknown(device, stream))
    }
}

/// Read-only handle over a `Stream`. Cheap to clone; hand this to renderers.
#[derive(Debug, Clone)]
pub struct StreamReader {
    state: Arc<RwLock<StreamState>>,
}

impl StreamReader {
    // Queries only copy records out; a panic elsewhere cannot leave them half-written.
    fn read(&self) -> RwLockReadGuard<'_, StreamState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records from `starting_index` to the end; negative indices count from
    /// the end (-1 is the most recent). `Ok(None)` is "no data".
    pub fn get_data(
        &self,
        device: &str,
        stream: &str,
        starting_index: i64,
    ) -> Result<Option<StreamSlice>, StreamError> {
        self.get_data_range(device, stream, starting_index, None)
    }

    /// Like `get_data`, with an optional exclusive `ending_index`.
    pub fn get_data_range(
        &self,
        device: &str,
        stream: &str,
        starting_index: i64,
        ending_index: Option<i64>,
    ) -> Result<Option<StreamSlice>, StreamError> {
        let window = self
            .read()
            .buffer(device, stream)?
            .window(starting_index, ending_index);
        Ok(window.map(BufferWindow::into_slice))
    }

    /// One result per name, in input order, from a single snapshot.
    pub fn get_data_multiple_streams(
        &self,
        device: &str,
        stream_names: &[&str],
        starting_index: i64,
    ) -> Result<Vec<Option<StreamSlice>>, StreamError> {
        let windows = {
            let state = self.read();
            stream_names
                .iter()
                .map(|stream| Ok(state.buffer(device, stream)?.window(starting_index, None)))
                .collect::<Result<Vec<_>, StreamError>>()?
        };
        Ok(windows
            .into_iter()
            .map(|window| window.map(BufferWindow::into_slice))
            .collect())
    }

    /// Estimated sample rate per device.
    ///
    /// Uses the first periodic stream of each device (registration order)
    /// that has at least two records. Aperiodic devices map to `None`.
    pub fn get_fps(&self) -> BTreeMap<String, Option<f64>> {
        let state = self.read();
        let mut fps: BTreeMap<String, Option<f64>> = BTreeMap::new();
        for buffer in &state.buffers {
            let entry = fps.entry(buffer.descriptor.device_name.clone()).or_insert(None);
            if entry.is_none() && buffer.descriptor.is_periodic() {
                *entry = buffer.fps();
            }
        }
        fps
    }

    pub fn descriptor(&self, device: &str, stream: &str) -> Option<StreamDescriptor> {
        let state = self.read();
        state.buffer(device, stream).ok().map(|b| b.descriptor.clone())
    }

    /// All descriptors in registration order.
    pub fn descriptors(&self) -> Vec<StreamDescriptor> {
        self.read()
            .buffers
            .iter()
            .map(|b| b.descriptor.clone())
            .collect()
    }

    pub fn record_count(&self, device: &str, stream: &str) -> Result<usize, StreamError> {
        Ok(self.read().buffer(device, stream)?.len())
    }

    /// Device names in order of first registration.
    pub fn devices(&self) -> Vec<String> {
        let state = self.read();
        let mut devices: Vec<String> = Vec::new();
        for buffer in &state.buffers {
            if !devices.contains(&buffer.descriptor.device_name) {
                devices.push(buffer.descriptor.device_name.clone());
            }
        }
        devices
    }
}

/// The mutable buffer, owned by exactly one producer or consumer.
#[derive(Debug)]
pub struct Stream {
    reader: StreamReader,
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl Stream {
    /// Unbounded retention (whole session).
    pub fn new() -> Self {
        Self {
            reader: StreamReader {
                state: Arc::new(RwLock::new(StreamState::default())),
            },
        }
    }

    /// Keep at most `records` per stream, evicting the oldest.
    pub fn with_retention(records: usize) -> Self {
        let stream = Self::new();
        stream.write().retention = Some(records.max(1));
        stream
    }

    fn write(&self) -> RwLockWriteGuard<'_, StreamState> {
        self.reader
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reader(&self) -> StreamReader {
        self.reader.clone()
    }

    pub fn add_stream(
        &self,
        device: &str,
        stream: &str,
        data_type: DataType,
        sample_shape: Vec<usize>,
        sampling_rate_hz: f64,
    ) -> Result<(), StreamError> {
        self.register(StreamDescriptor::new(
            device,
            stream,
            data_type,
            sample_shape,
            sampling_rate_hz,
        ))
    }

    /// Register a descriptor. The first registration of a pair wins.
    pub fn register(&self, descriptor: StreamDescriptor) -> Result<(), StreamError> {
        let device = descriptor.device_name.clone();
        let stream = descriptor.stream_name.clone();

        let invalid = |reason: &str| StreamError::InvalidDescriptor {
            device: device.clone(),
            stream: stream.clone(),
            reason: reason.to_string(),
        };
        if device.is_empty() || stream.is_empty() {
            return Err(invalid("device and stream names must be non-empty"));
        }
        if !descriptor.sampling_rate_hz.is_finite() || descriptor.sampling_rate_hz < 0.0 {
            return Err(invalid("sampling rate must be finite and >= 0"));
        }
        if descriptor.sample_shape.contains(&0) {
            return Err(invalid("sample shape dimensions must be non-zero"));
        }

        let mut state = self.write();
        if state.position(&device, &stream).is_some() {
            return Err(StreamError::DuplicateStream { device, stream });
        }

        debug!(
            "registered {}/{} {} {:?} @ {} Hz",
            device, stream, descriptor.data_type, descriptor.sample_shape, descriptor.sampling_rate_hz
        );
        let position = state.buffers.len();
        let retention = state.retention;
        state.buffers.push(StreamBuffer::new(descriptor, retention));
        state
            .index
            .entry(device)
            .or_default()
            .insert(stream, position);
        Ok(())
    }

    /// Append one record per (device, stream) in `data`, all stamped `time_s`.
    ///
    /// Every entry is validated before anything is appended: on error the
    /// buffer is unchanged.
    pub fn append_data(&self, time_s: f64, data: &SampleBatch) -> Result<(), StreamError> {
        let mut state = self.write();

        let mut targets = Vec::with_capacity(data.len());
        for (device, stream, payload) in data.iter() {
            let position = state
                .position(device, stream)
                .ok_or_else(|| StreamError::unknown(device, stream))?;
            state.buffers[position]
                .descriptor
                .validate(payload)
                .map_err(|reason| StreamError::ShapeMismatch {
                    device: device.to_string(),
                    stream: stream.to_string(),
                    reason,
                })?;
            targets.push((position, payload));
        }

        for (position, payload) in targets {
            state.buffers[position].push(time_s, payload.clone());
        }
        Ok(())
    }

    /// Drop every record, keep every descriptor.
    pub fn clear_data(&self) {
        let mut state = self.write();
        for buffer in &mut state.buffers {
            buffer.clear();
        }
    }

    pub fn get_data(
        &self,
        device: &str,
        stream: &str,
        starting_index: i64,
    ) -> Result<Option<StreamSlice>, StreamError> {
        self.reader.get_data(device, stream, starting_index)
    }

    pub fn get_data_range(
        &self,
        device: &str,
        stream: &str,
        starting_index: i64,
        ending_index: Option<i64>,
    ) -> Result<Option<StreamSlice>, StreamError> {
        self.reader
            .get_data_range(device, stream, starting_index, ending_index)
    }

    pub fn get_data_multiple_streams(
        &self,
        device: &str,
        stream_names: &[&str],
        starting_index: i64,
    ) -> Result<Vec<Option<StreamSlice>>, StreamError> {
        self.reader
            .get_data_multiple_streams(device, stream_names, starting_index)
    }

    pub fn get_fps(&self) -> BTreeMap<String, Option<f64>> {
        self.reader.get_fps()
    }

    pub fn descriptor(&self, device: &str, stream: &str) -> Option<StreamDescriptor> {
        self.reader.descriptor(device, stream)
    }

    pub fn descriptors(&self) -> Vec<StreamDescriptor> {
        self.reader.descriptors()
    }

    pub fn record_count(&self, device: &str, stream: &str) -> Result<usize, StreamError> {
        self.reader.record_count(device, stream)
    }

    pub fn devices(&self) -> Vec<String> {
        self.reader.devices()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermesproto::SampleData;
    use pretty_assertions::assert_eq;

    fn imu_stream() -> Stream {
        let stream = Stream::new();
        stream
            .add_stream("imu", "accel", DataType::Float32, vec![3], 100.0)
            .unwrap();
        stream
            .add_stream("imu", "temp", DataType::Int16, vec![1], 1.0)
            .unwrap();
        stream
    }

    #[test]
    fn test_append_then_read_last() {
        let stream = imu_stream();
        let accel = SampleData::Float(vec![0.5, -0.25, 9.75]);
        stream
            .append_data(1.0, &SampleBatch::new().with("imu", "accel", accel.clone()))
            .unwrap();

        let last = stream.get_data("imu", "accel", -1).unwrap().unwrap();
        assert_eq!(last.time_s, vec![1.0]);
        assert_eq!(last.data, vec![accel]);
    }

    #[test]
    fn test_duplicate_registration_keeps_original() {
        let stream = imu_stream();
        let err = stream
            .add_stream("imu", "accel", DataType::Int8, vec![1], 0.0)
            .unwrap_err();
        assert!(matches!(err, StreamError::DuplicateStream { .. }));

        let desc = stream.descriptor("imu", "accel").unwrap();
        assert_eq!(desc.data_type, DataType::Float32);
        assert_eq!(desc.sample_shape, vec![3]);
    }

    #[test]
    fn test_shape_mismatch_does_not_append() {
        let stream = imu_stream();
        let err = stream
            .append_data(1.0, &SampleBatch::new().with("imu", "accel", SampleData::Float(vec![1.0])))
            .unwrap_err();
        assert!(matches!(err, StreamError::ShapeMismatch { .. }));
        assert_eq!(stream.record_count("imu", "accel").unwrap(), 0);
    }

    #[test]
    fn test_append_is_all_or_nothing() {
        let stream = imu_stream();
        let batch = SampleBatch::new()
            .with("imu", "accel", SampleData::Float(vec![0.0, 0.0, 1.0]))
            .with("imu", "temp", SampleData::Int(vec![40_000]));
        let err = stream.append_data(1.0, &batch).unwrap_err();
        assert!(matches!(err, StreamError::ShapeMismatch { ref stream, .. } if stream == "temp"));
        assert_eq!(stream.record_count("imu", "accel").unwrap(), 0);
    }

    #[test]
    fn test_unknown_stream() {
        let stream = imu_stream();
        let err = stream
            .append_data(1.0, &SampleBatch::new().with("eye", "gaze", SampleData::Float(vec![0.0])))
            .unwrap_err();
        assert_eq!(
            err,
            StreamError::UnknownStream {
                device: "eye".to_string(),
                stream: "gaze".to_string()
            }
        );
        assert!(stream.get_data("eye", "gaze", 0).is_err());
    }

    #[test]
    fn test_overlong_negative_index_is_no_data() {
        let stream = imu_stream();
        stream
            .append_data(1.0, &SampleBatch::new().with("imu", "temp", SampleData::Int(vec![20])))
            .unwrap();
        assert_eq!(stream.get_data("imu", "temp", -2).unwrap(), None);
        assert_eq!(stream.get_data("imu", "accel", -1).unwrap(), None);
    }

    #[test]
    fn test_multiple_streams_preserve_order() {
        let stream = imu_stream();
        let batch = SampleBatch::new()
            .with("imu", "accel", SampleData::Float(vec![0.0, 0.0, 1.0]))
            .with("imu", "temp", SampleData::Int(vec![21]));
        stream.append_data(1.0, &batch).unwrap();

        let slices = stream
            .get_data_multiple_streams("imu", &["temp", "accel"], 0)
            .unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].as_ref().unwrap().data, vec![SampleData::Int(vec![21])]);
        assert_eq!(slices[1].as_ref().unwrap().data.len(), 1);
    }

    #[test]
    fn test_fps_per_device() {
        let stream = imu_stream();
        stream
            .add_stream("experiment", "activity", DataType::Text(26), vec![1], 0.0)
            .unwrap();
        for i in 0..11 {
            let batch =
                SampleBatch::new().with("imu", "accel", SampleData::Float(vec![0.0, 0.0, 1.0]));
            stream.append_data(i as f64 * 0.01, &batch).unwrap();
        }
        stream
            .append_data(0.5, &SampleBatch::new().with("experiment", "activity", SampleData::text("walk")))
            .unwrap();

        let fps = stream.get_fps();
        let imu = fps["imu"].unwrap();
        assert!((imu - 100.0).abs() < 1e-6, "imu fps {}", imu);
        assert_eq!(fps["experiment"], None);
    }

    #[test]
    fn test_clear_keeps_descriptors() {
        let stream = imu_stream();
        stream
            .append_data(1.0, &SampleBatch::new().with("imu", "temp", SampleData::Int(vec![20])))
            .unwrap();
        stream.clear_data();
        assert_eq!(stream.record_count("imu", "temp").unwrap(), 0);
        assert_eq!(stream.descriptors().len(), 2);
        assert_eq!(stream.devices(), vec!["imu"]);
    }

    #[test]
    fn test_reader_sees_appends() {
        let stream = Stream::with_retention(2);
        stream
            .add_stream("imu", "temp", DataType::Int16, vec![1], 1.0)
            .unwrap();
        let reader = stream.reader();
        for i in 0..3 {
            stream
                .append_data(i as f64, &SampleBatch::new().with("imu", "temp", SampleData::Int(vec![i])))
                .unwrap();
        }
        let all = reader.get_data("imu", "temp", 0).unwrap().unwrap();
        assert_eq!(all.time_s, vec![1.0, 2.0]);
    }

    #[test]
    fn test_concurrent_reads_see_whole_appends() {
        let stream = imu_stream();
        let reader = stream.reader();

        let handle = std::thread::spawn(move || {
            for _ in 0..1000 {
                let slices = reader
                    .get_data_multiple_streams("imu", &["accel", "temp"], 0)
                    .unwrap();
                let accel = slices[0].as_ref().map_or(0, |s| s.len());
                let temp = slices[1].as_ref().map_or(0, |s| s.len());
                assert_eq!(accel, temp);
            }
        });

        // crosses several chunk boundaries while the reader runs
        for i in 0..3000 {
            let batch = SampleBatch::new()
                .with("imu", "accel", SampleData::Float(vec![0.0, 0.0, 1.0]))
                .with("imu", "temp", SampleData::Int(vec![20]));
            stream.append_data(i as f64, &batch).unwrap();
        }
        handle.join().unwrap();
    }
}
