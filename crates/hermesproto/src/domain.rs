//! Domain types shared by every node: stream descriptors and sample payloads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fixed-width element type of a stream, written as a numpy-style tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    Float32,
    Float64,
    /// UTF-8 text of at most `n` bytes (`S<n>`).
    Text(usize),
}

impl DataType {
    /// Inclusive integer range, for integer types only.
    pub fn int_range(&self) -> Option<(i64, i64)> {
        match self {
            DataType::Int8 => Some((i8::MIN as i64, i8::MAX as i64)),
            DataType::Int16 => Some((i16::MIN as i64, i16::MAX as i64)),
            DataType::Int32 => Some((i32::MIN as i64, i32::MAX as i64)),
            DataType::Int64 => Some((i64::MIN, i64::MAX)),
            DataType::UInt8 => Some((0, u8::MAX as i64)),
            DataType::UInt16 => Some((0, u16::MAX as i64)),
            DataType::UInt32 => Some((0, u32::MAX as i64)),
            _ => None,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Bool => write!(f, "bool"),
            DataType::Int8 => write!(f, "int8"),
            DataType::Int16 => write!(f, "int16"),
            DataType::Int32 => write!(f, "int32"),
            DataType::Int64 => write!(f, "int64"),
            DataType::UInt8 => write!(f, "uint8"),
            DataType::UInt16 => write!(f, "uint16"),
            DataType::UInt32 => write!(f, "uint32"),
            DataType::Float32 => write!(f, "float32"),
            DataType::Float64 => write!(f, "float64"),
            DataType::Text(n) => write!(f, "S{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown data type tag: {0:?}")]
pub struct UnknownDataType(pub String);

impl FromStr for DataType {
    type Err = UnknownDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = match s {
            "bool" => DataType::Bool,
            "int8" => DataType::Int8,
            "int16" => DataType::Int16,
            "int32" => DataType::Int32,
            "int64" => DataType::Int64,
            "uint8" => DataType::UInt8,
            "uint16" => DataType::UInt16,
            "uint32" => DataType::UInt32,
            "float32" => DataType::Float32,
            "float64" => DataType::Float64,
            other => match other.strip_prefix('S').and_then(|n| n.parse::<usize>().ok()) {
                Some(n) if n > 0 => DataType::Text(n),
                _ => return Err(UnknownDataType(s.to_string())),
            },
        };
        Ok(dt)
    }
}

impl TryFrom<String> for DataType {
    type Error = UnknownDataType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.to_string()
    }
}

/// Payload of one sample record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleData {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    #[serde(with = "float_values")]
    Float(Vec<f64>),
    Text(String),
}

/// JSON numbers cannot carry NaN or infinities, and sensors report them
/// (gaze lost, saturated axis). Finite values stay numbers; the others are
/// written as the strings `"NaN"`, `"inf"` and `"-inf"`.
mod float_values {
    use serde::de::{self, Deserializer, Unexpected};
    use serde::ser::{SerializeSeq, Serializer};
    use serde::Deserialize;

    const EXPECTED: &str = "a number, \"NaN\", \"inf\" or \"-inf\"";

    fn non_finite_tag(value: f64) -> Option<&'static str> {
        if value.is_nan() {
            Some("NaN")
        } else if value == f64::INFINITY {
            Some("inf")
        } else if value == f64::NEG_INFINITY {
            Some("-inf")
        } else {
            None
        }
    }

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            match non_finite_tag(*value) {
                Some(tag) => seq.serialize_element(tag)?,
                None => seq.serialize_element(value)?,
            }
        }
        seq.end()
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum WireFloat {
        Number(f64),
        Tag(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        Vec::<WireFloat>::deserialize(deserializer)?
            .into_iter()
            .map(|value| match value {
                WireFloat::Number(n) => Ok(n),
                WireFloat::Tag(tag) => match tag.as_str() {
                    "NaN" => Ok(f64::NAN),
                    "inf" => Ok(f64::INFINITY),
                    "-inf" => Ok(f64::NEG_INFINITY),
                    other => Err(de::Error::invalid_value(Unexpected::Str(other), &EXPECTED)),
                },
            })
            .collect()
    }
}

impl SampleData {
    pub fn text(value: impl Into<String>) -> Self {
        SampleData::Text(value.into())
    }

    /// Number of elements; text counts as one.
    pub fn element_count(&self) -> usize {
        match self {
            SampleData::Bool(v) => v.len(),
            SampleData::Int(v) => v.len(),
            SampleData::Float(v) => v.len(),
            SampleData::Text(_) => 1,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SampleData::Bool(_) => "bool",
            SampleData::Int(_) => "int",
            SampleData::Float(_) => "float",
            SampleData::Text(_) => "text",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SampleData::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Why a payload does not fit its descriptor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PayloadMismatch {
    #[error("{found} payload for {expected} stream")]
    Kind { expected: DataType, found: &'static str },

    #[error("expected {expected} elements, got {found}")]
    ElementCount { expected: usize, found: usize },

    #[error("value {value} out of range for {data_type}")]
    OutOfRange { value: i64, data_type: DataType },

    #[error("text of {len} bytes exceeds {data_type}")]
    TextTooLong { len: usize, data_type: DataType },
}

/// Immutable metadata of one (device, stream) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub device_name: String,
    pub stream_name: String,
    pub data_type: DataType,
    pub sample_shape: Vec<usize>,
    /// Nominal rate; 0 means aperiodic.
    pub sampling_rate_hz: f64,
    /// Ordered human-readable notes as (key, text) pairs.
    #[serde(default)]
    pub notes: Vec<(String, String)>,
}

impl StreamDescriptor {
    pub fn new(
        device_name: impl Into<String>,
        stream_name: impl Into<String>,
        data_type: DataType,
        sample_shape: Vec<usize>,
        sampling_rate_hz: f64,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            stream_name: stream_name.into(),
            data_type,
            sample_shape,
            sampling_rate_hz,
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.notes.push((key.into(), text.into()));
        self
    }

    pub fn note(&self, key: &str) -> Option<&str> {
        self.notes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, text)| text.as_str())
    }

    pub fn is_periodic(&self) -> bool {
        self.sampling_rate_hz > 0.0
    }

    /// Product of `sample_shape`; an empty shape is a scalar.
    pub fn element_count(&self) -> usize {
        self.sample_shape.iter().product()
    }

    /// Check that `data` matches this descriptor's type and shape.
    pub fn validate(&self, data: &SampleData) -> Result<(), PayloadMismatch> {
        let kind_ok = matches!(
            (self.data_type, data),
            (DataType::Bool, SampleData::Bool(_))
                | (DataType::Text(_), SampleData::Text(_))
                | (DataType::Float32 | DataType::Float64, SampleData::Float(_))
        ) || (self.data_type.int_range().is_some() && matches!(data, SampleData::Int(_)));

        if !kind_ok {
            return Err(PayloadMismatch::Kind {
                expected: self.data_type,
                found: data.kind(),
            });
        }

        let expected = self.element_count();
        let found = data.element_count();
        if expected != found {
            return Err(PayloadMismatch::ElementCount { expected, found });
        }

        match (self.data_type, data) {
            (dt, SampleData::Int(values)) => {
                if let Some((lo, hi)) = dt.int_range() {
                    if let Some(&value) = values.iter().find(|v| **v < lo || **v > hi) {
                        return Err(PayloadMismatch::OutOfRange {
                            value,
                            data_type: dt,
                        });
                    }
                }
            }
            (DataType::Text(max), SampleData::Text(s)) if s.len() > max => {
                return Err(PayloadMismatch::TextTooLong {
                    len: s.len(),
                    data_type: self.data_type,
                });
            }
            _ => {}
        }

        Ok(())
    }
}

/// One timestamp's worth of samples: device -> stream -> payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleBatch {
    devices: BTreeMap<String, BTreeMap<String, SampleData>>,
}

impl SampleBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, device: &str, stream: &str, data: SampleData) -> Self {
        self.insert(device, stream, data);
        self
    }

    pub fn insert(&mut self, device: &str, stream: &str, data: SampleData) {
        self.devices
            .entry(device.to_string())
            .or_default()
            .insert(stream.to_string(), data);
    }

    /// Insert every stream of one device.
    pub fn extend_device(&mut self, device: &str, streams: BTreeMap<String, SampleData>) {
        self.devices
            .entry(device.to_string())
            .or_default()
            .extend(streams);
    }

    pub fn is_empty(&self) -> bool {
        self.devices.values().all(|streams| streams.is_empty())
    }

    /// Number of (device, stream) entries.
    pub fn len(&self) -> usize {
        self.devices.values().map(|streams| streams.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &SampleData)> {
        self.devices.iter().flat_map(|(device, streams)| {
            streams
                .iter()
                .map(move |(stream, data)| (device.as_str(), stream.as_str(), data))
        })
    }

    /// Per-device view, used to frame one message per device.
    pub fn by_device(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, SampleData>)> {
        self.devices.iter().map(|(device, streams)| (device.as_str(), streams))
    }

    pub fn get(&self, device: &str, stream: &str) -> Option<&SampleData> {
        self.devices.get(device)?.get(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_data_type_tags() {
        for tag in ["bool", "int8", "uint32", "float64", "S26"] {
            let dt: DataType = tag.parse().unwrap();
            assert_eq!(dt.to_string(), tag);
        }
        assert_eq!("S26".parse::<DataType>().unwrap(), DataType::Text(26));
        assert!("S0".parse::<DataType>().is_err());
        assert!("complex64".parse::<DataType>().is_err());
    }

    #[test]
    fn test_data_type_serializes_as_tag() {
        let json = serde_json::to_string(&DataType::Text(26)).unwrap();
        assert_eq!(json, "\"S26\"");
        let dt: DataType = serde_json::from_str("\"uint16\"").unwrap();
        assert_eq!(dt, DataType::UInt16);
    }

    #[test]
    fn test_validate_shape() {
        let desc = StreamDescriptor::new("imu", "accel", DataType::Float32, vec![3], 100.0);
        assert!(desc.validate(&SampleData::Float(vec![0.1, 0.2, 0.3])).is_ok());
        assert_eq!(
            desc.validate(&SampleData::Float(vec![0.1, 0.2])),
            Err(PayloadMismatch::ElementCount { expected: 3, found: 2 })
        );
        assert!(matches!(
            desc.validate(&SampleData::Int(vec![1, 2, 3])),
            Err(PayloadMismatch::Kind { .. })
        ));
    }

    #[test]
    fn test_validate_multidimensional() {
        let desc = StreamDescriptor::new("cam", "frame", DataType::UInt8, vec![2, 3], 30.0);
        assert_eq!(desc.element_count(), 6);
        assert!(desc.validate(&SampleData::Int(vec![0, 1, 2, 3, 4, 255])).is_ok());
        assert_eq!(
            desc.validate(&SampleData::Int(vec![0, 1, 2, 3, 4, 256])),
            Err(PayloadMismatch::OutOfRange {
                value: 256,
                data_type: DataType::UInt8
            })
        );
    }

    #[test]
    fn test_validate_text() {
        let desc = StreamDescriptor::new("experiment", "activity", DataType::Text(4), vec![1], 0.0);
        assert!(desc.validate(&SampleData::text("walk")).is_ok());
        assert!(matches!(
            desc.validate(&SampleData::text("stand")),
            Err(PayloadMismatch::TextTooLong { len: 5, .. })
        ));
        assert!(!desc.is_periodic());
    }

    #[test]
    fn test_notes_keep_order() {
        let desc = StreamDescriptor::new("eye", "gaze", DataType::Float32, vec![2], 200.0)
            .with_note("Description", "gaze point")
            .with_note("Units", "pixels");
        assert_eq!(desc.note("Units"), Some("pixels"));
        assert_eq!(desc.notes[0].0, "Description");
    }

    #[test]
    fn test_batch_iteration() {
        let batch = SampleBatch::new()
            .with("imu", "gyro", SampleData::Float(vec![0.0; 3]))
            .with("imu", "accel", SampleData::Float(vec![1.0; 3]))
            .with("eye", "blink", SampleData::Bool(vec![true]));
        assert_eq!(batch.len(), 3);
        let keys: Vec<(&str, &str)> = batch.iter().map(|(d, s, _)| (d, s)).collect();
        assert_eq!(keys, vec![("eye", "blink"), ("imu", "accel"), ("imu", "gyro")]);
    }
}
