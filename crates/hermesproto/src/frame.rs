//! Data-plane frames
//!
//! A sample message is a 2-frame ZMQ multipart message:
//!
//! ```text
//! Frame 0: Topic    device name (UTF-8), lets SUB sockets filter by prefix
//! Frame 1: Body     JSON {"device", "time_s", "streams": {stream: SampleData}}
//! ```
//!
//! One message carries every stream of one device for one timestamp.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::{SampleBatch, SampleData};
use crate::socket_config::{frames_to_multipart, multipart_to_frames, Multipart};

/// Number of frames in a sample message
pub const FRAME_COUNT: usize = 2;

/// Errors that can occur when parsing a sample message
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Expected {} frames, got {}", FRAME_COUNT, .0)]
    FrameCount(usize),

    #[error("Topic frame is not valid UTF-8")]
    InvalidTopic,

    #[error("Topic {topic:?} does not match body device {device:?}")]
    TopicMismatch { topic: String, device: String },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(f64),

    #[error("Message carries no streams")]
    NoStreams,

    #[error("Body decode failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Samples of one device at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleFrame {
    pub device: String,
    pub time_s: f64,
    pub streams: BTreeMap<String, SampleData>,
}

impl SampleFrame {
    pub fn new(device: impl Into<String>, time_s: f64) -> Self {
        Self {
            device: device.into(),
            time_s,
            streams: BTreeMap::new(),
        }
    }

    pub fn with_stream(mut self, stream: impl Into<String>, data: SampleData) -> Self {
        self.streams.insert(stream.into(), data);
        self
    }

    /// One frame per device present in the batch.
    pub fn split_batch(time_s: f64, batch: &SampleBatch) -> Vec<SampleFrame> {
        batch
            .by_device()
            .filter(|(_, streams)| !streams.is_empty())
            .map(|(device, streams)| SampleFrame {
                device: device.to_string(),
                time_s,
                streams: streams.clone(),
            })
            .collect()
    }

    /// Turn this frame back into an appendable batch.
    pub fn into_batch(self) -> (f64, SampleBatch) {
        let mut batch = SampleBatch::new();
        batch.extend_device(&self.device, self.streams);
        (self.time_s, batch)
    }

    pub fn to_frames(&self) -> Result<Vec<Bytes>, FrameError> {
        let body = serde_json::to_vec(self)?;
        Ok(vec![
            Bytes::copy_from_slice(self.device.as_bytes()),
            Bytes::from(body),
        ])
    }

    pub fn to_multipart(&self) -> Result<Multipart, FrameError> {
        Ok(frames_to_multipart(&self.to_frames()?))
    }

    pub fn from_frames(frames: &[Bytes]) -> Result<Self, FrameError> {
        if frames.len() != FRAME_COUNT {
            return Err(FrameError::FrameCount(frames.len()));
        }

        let topic = std::str::from_utf8(&frames[0]).map_err(|_| FrameError::InvalidTopic)?;
        let frame: SampleFrame = serde_json::from_slice(&frames[1])?;

        if frame.device != topic {
            return Err(FrameError::TopicMismatch {
                topic: topic.to_string(),
                device: frame.device,
            });
        }
        if !frame.time_s.is_finite() {
            return Err(FrameError::InvalidTimestamp(frame.time_s));
        }
        if frame.streams.is_empty() {
            return Err(FrameError::NoStreams);
        }

        Ok(frame)
    }

    pub fn from_multipart(mp: Multipart) -> Result<Self, FrameError> {
        Self::from_frames(&multipart_to_frames(mp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> SampleFrame {
        SampleFrame::new("imu", 12.5)
            .with_stream("accel", SampleData::Float(vec![0.0, 9.8, 0.1]))
            .with_stream("temp", SampleData::Int(vec![21]))
    }

    #[test]
    fn test_frame_layout() {
        let frames = sample().to_frames().unwrap();
        assert_eq!(frames.len(), FRAME_COUNT);
        assert_eq!(&frames[0][..], b"imu");

        let body: serde_json::Value = serde_json::from_slice(&frames[1]).unwrap();
        assert_eq!(body["device"], "imu");
        assert_eq!(body["time_s"], 12.5);
        assert_eq!(body["streams"]["temp"]["int"][0], 21);
    }

    #[test]
    fn test_parse_frames() {
        let frames = sample().to_frames().unwrap();
        assert_eq!(SampleFrame::from_frames(&frames).unwrap(), sample());
    }

    #[test]
    fn test_wrong_frame_count() {
        let frames = vec![Bytes::from_static(b"imu")];
        assert!(matches!(
            SampleFrame::from_frames(&frames),
            Err(FrameError::FrameCount(1))
        ));
    }

    #[test]
    fn test_garbage_body() {
        let frames = vec![Bytes::from_static(b"imu"), Bytes::from_static(b"not json")];
        assert!(matches!(SampleFrame::from_frames(&frames), Err(FrameError::Json(_))));
    }

    #[test]
    fn test_topic_mismatch() {
        let mut frames = sample().to_frames().unwrap();
        frames[0] = Bytes::from_static(b"eye");
        assert!(matches!(
            SampleFrame::from_frames(&frames),
            Err(FrameError::TopicMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_streams_rejected() {
        let frames = SampleFrame::new("imu", 1.0).to_frames().unwrap();
        assert!(matches!(SampleFrame::from_frames(&frames), Err(FrameError::NoStreams)));
    }

    #[test]
    fn test_split_batch_per_device() {
        let batch = SampleBatch::new()
            .with("imu", "accel", SampleData::Float(vec![1.0, 2.0, 3.0]))
            .with("eye", "blink", SampleData::Bool(vec![false]));
        let frames = SampleFrame::split_batch(3.0, &batch);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].device, "eye");

        let (time_s, rebuilt) = frames[1].clone().into_batch();
        assert_eq!(time_s, 3.0);
        assert_eq!(rebuilt.get("imu", "accel"), batch.get("imu", "accel"));
    }

    #[test]
    fn test_non_finite_floats_survive() {
        let frame = SampleFrame::new("eye", 1.0)
            .with_stream("gaze", SampleData::Float(vec![f64::NAN, 0.5]))
            .with_stream("pupil", SampleData::Float(vec![f64::INFINITY, f64::NEG_INFINITY]));
        let frames = frame.to_frames().unwrap();

        let body: serde_json::Value = serde_json::from_slice(&frames[1]).unwrap();
        assert_eq!(body["streams"]["gaze"]["float"][0], "NaN");
        assert_eq!(body["streams"]["gaze"]["float"][1], 0.5);

        let parsed = SampleFrame::from_frames(&frames).unwrap();
        match &parsed.streams["gaze"] {
            SampleData::Float(values) => {
                assert!(values[0].is_nan());
                assert_eq!(values[1], 0.5);
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(
            parsed.streams["pupil"],
            SampleData::Float(vec![f64::INFINITY, f64::NEG_INFINITY])
        );
    }

    #[test]
    fn test_unknown_float_tag_rejected() {
        let body = br#"{"device":"eye","time_s":1.0,"streams":{"gaze":{"float":["nope"]}}}"#;
        let frames = vec![Bytes::from_static(b"eye"), Bytes::copy_from_slice(body)];
        assert!(matches!(SampleFrame::from_frames(&frames), Err(FrameError::Json(_))));
    }
}
