//! Per-stream record storage.
//!
//! Records live in fixed-size chunks behind `Arc`. Every chunk but the last
//! is full and never changes again, so a query only clones the chunk handles
//! its window touches while the lock is held and copies records afterwards.

use std::collections::VecDeque;
use std::sync::Arc;

use hermesproto::{SampleData, StreamDescriptor};
use serde::{Deserialize, Serialize};

/// Records considered by the rate estimate.
pub const FPS_WINDOW: usize = 64;

/// Records per chunk.
const CHUNK_RECORDS: usize = 1024;

/// Query result: parallel columns in buffer order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSlice {
    pub time_s: Vec<f64>,
    pub data: Vec<SampleData>,
}

impl StreamSlice {
    pub fn len(&self) -> usize {
        self.time_s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_s.is_empty()
    }

    /// Most recent record of the slice.
    pub fn last(&self) -> Option<(f64, &SampleData)> {
        Some((*self.time_s.last()?, self.data.last()?))
    }
}

#[derive(Debug, Clone, Default)]
struct Chunk {
    time_s: Vec<f64>,
    data: Vec<SampleData>,
}

impl Chunk {
    fn new() -> Self {
        Self {
            time_s: Vec::with_capacity(CHUNK_RECORDS),
            data: Vec::with_capacity(CHUNK_RECORDS),
        }
    }

    fn len(&self) -> usize {
        self.time_s.len()
    }
}

/// Chunk handles covering one query window, taken under the read lock.
#[derive(Debug)]
pub(crate) struct BufferWindow {
    chunks: Vec<Arc<Chunk>>,
    skip: usize,
    len: usize,
}

impl BufferWindow {
    /// Copy the window's records out. Call after releasing the lock.
    pub(crate) fn into_slice(self) -> StreamSlice {
        let time_s = self
            .chunks
            .iter()
            .flat_map(|c| c.time_s.iter().copied())
            .skip(self.skip)
            .take(self.len)
            .collect();
        let data = self
            .chunks
            .iter()
            .flat_map(|c| c.data.iter().cloned())
            .skip(self.skip)
            .take(self.len)
            .collect();
        StreamSlice { time_s, data }
    }
}

/// Descriptor plus its records. Oldest records are evicted at capacity.
#[derive(Debug, Clone)]
pub(crate) struct StreamBuffer {
    pub(crate) descriptor: StreamDescriptor,
    chunks: VecDeque<Arc<Chunk>>,
    /// Records of the front chunk already evicted
    head: usize,
    len: usize,
    capacity: Option<usize>,
}

impl StreamBuffer {
    pub(crate) fn new(descriptor: StreamDescriptor, capacity: Option<usize>) -> Self {
        Self {
            descriptor,
            chunks: VecDeque::new(),
            head: 0,
            len: 0,
            capacity,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn push(&mut self, time_s: f64, data: SampleData) {
        if let Some(capacity) = self.capacity {
            while self.len > 0 && self.len >= capacity {
                self.evict_front();
            }
        }

        if self.chunks.back().map_or(true, |c| c.len() >= CHUNK_RECORDS) {
            self.chunks.push_back(Arc::new(Chunk::new()));
        }
        if let Some(tail) = self.chunks.back_mut() {
            // copies the tail only if a reader still holds it
            let tail = Arc::make_mut(tail);
            tail.time_s.push(time_s);
            tail.data.push(data);
            self.len += 1;
        }
    }

    fn evict_front(&mut self) {
        let Some(front) = self.chunks.front() else {
            return;
        };
        self.head += 1;
        self.len -= 1;
        if self.head >= front.len() {
            self.chunks.pop_front();
            self.head = 0;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.chunks.clear();
        self.head = 0;
        self.len = 0;
    }

    /// Position of record `i` counted from the oldest retained one.
    fn locate(&self, i: usize) -> (usize, usize) {
        let absolute = self.head + i;
        (absolute / CHUNK_RECORDS, absolute % CHUNK_RECORDS)
    }

    fn time_at(&self, i: usize) -> Option<f64> {
        let (chunk, offset) = self.locate(i);
        self.chunks.get(chunk)?.time_s.get(offset).copied()
    }

    /// Chunk handles for `[start, end)` with Python-style negative indices.
    /// `None` when the window is empty or `start` reaches past either end.
    pub(crate) fn window(&self, start: i64, end: Option<i64>) -> Option<BufferWindow> {
        let n = self.len();
        let from = resolve_start(start, n)?;
        let to = match end {
            None => n,
            Some(end) => resolve_end(end, n),
        };
        if from >= to {
            return None;
        }

        let (first, skip) = self.locate(from);
        let (last, _) = self.locate(to - 1);
        Some(BufferWindow {
            chunks: self.chunks.range(first..=last).cloned().collect(),
            skip,
            len: to - from,
        })
    }

    /// `(n - 1) / (t_last - t_first)` over the most recent `FPS_WINDOW` records.
    pub(crate) fn fps(&self) -> Option<f64> {
        let n = self.len().min(FPS_WINDOW);
        if n < 2 {
            return None;
        }
        let first = self.time_at(self.len() - n)?;
        let last = self.time_at(self.len() - 1)?;
        let span = last - first;
        if span > 0.0 {
            Some((n - 1) as f64 / span)
        } else {
            None
        }
    }
}

/// A start index past the data is "no data", never an error.
fn resolve_start(start: i64, n: usize) -> Option<usize> {
    if start >= 0 {
        let s = usize::try_from(start).ok()?;
        (s < n).then_some(s)
    } else {
        let back = usize::try_from(start.unsigned_abs()).ok()?;
        n.checked_sub(back)
    }
}

/// End indices clamp into `[0, n]`.
fn resolve_end(end: i64, n: usize) -> usize {
    if end >= 0 {
        usize::try_from(end).map_or(n, |e| e.min(n))
    } else {
        let back = usize::try_from(end.unsigned_abs()).unwrap_or(usize::MAX);
        n.saturating_sub(back)
    }
}
