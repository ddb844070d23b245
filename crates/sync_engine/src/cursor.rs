//! Output cursors.
//!
//! A cursor walks its own tick sequence `t_k = t_0 + k/f` over the shared
//! slot table. Live cursors feed a bounded queue, recording cursors append
//! into a [`SyncedDataBuilder`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use contracts::{DataType, InstanceKey, SyncEngineConfig, SyncPoint, SyncedData};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::SyncError;

/// Cursor parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorSpec {
    pub frequency_hz: f64,
    /// Defaults to one period (`1/f`)
    #[serde(default)]
    pub tolerance_s: Option<f64>,
    /// Defaults to the first pacing instant after the cursor is created
    #[serde(default)]
    pub start_time: Option<f64>,
    /// `None` selects every data type
    #[serde(default)]
    pub data_types: Option<BTreeSet<DataType>>,
}

impl CursorSpec {
    pub fn new(frequency_hz: f64) -> Self {
        Self {
            frequency_hz,
            tolerance_s: None,
            start_time: None,
            data_types: None,
        }
    }

    /// Live-cursor defaults taken from the engine configuration
    pub fn from_config(config: &SyncEngineConfig) -> Self {
        Self::new(config.output_frequency_hz).with_tolerance(config.tolerance_s())
    }

    pub fn with_tolerance(mut self, tolerance_s: f64) -> Self {
        self.tolerance_s = Some(tolerance_s);
        self
    }

    pub fn starting_at(mut self, start_time: f64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Empty input selects every data type
    pub fn only(mut self, data_types: impl IntoIterator<Item = DataType>) -> Self {
        let set: BTreeSet<DataType> = data_types.into_iter().collect();
        self.data_types = (!set.is_empty()).then_some(set);
        self
    }

    pub fn period(&self) -> f64 {
        1.0 / self.frequency_hz
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance_s.unwrap_or_else(|| self.period())
    }

    pub(crate) fn validate(&self) -> Result<(), SyncError> {
        if !(self.frequency_hz.is_finite() && self.frequency_hz > 0.0) {
            return Err(SyncError::invalid_cursor(format!(
                "frequency must be > 0, got {}",
                self.frequency_hz
            )));
        }
        if let Some(w) = self.tolerance_s {
            if !(w.is_finite() && w >= 0.0) {
                return Err(SyncError::invalid_cursor(format!(
                    "tolerance must be >= 0, got {w}"
                )));
            }
        }
        if let Some(t0) = self.start_time {
            if !t0.is_finite() {
                return Err(SyncError::invalid_cursor("start_time must be finite"));
            }
        }
        Ok(())
    }
}

struct QueueInner {
    ring: HeapRb<SyncPoint>,
    closed: bool,
    overwritten: u64,
}

/// Bounded single-consumer queue with overwrite-oldest semantics.
///
/// The producer never waits; a slow consumer loses the oldest points.
pub struct CursorQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl fmt::Debug for CursorQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CursorQueue")
            .field("len", &inner.ring.occupied_len())
            .field("closed", &inner.closed)
            .field("overwritten", &inner.overwritten)
            .finish()
    }
}

impl CursorQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                ring: HeapRb::new(capacity.max(1)),
                closed: false,
                overwritten: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Returns `true` if an older point was overwritten
    pub fn push(&self, point: SyncPoint) -> bool {
        let overwrote = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return false;
            }
            let overwrote = inner.ring.push_overwrite(point).is_some();
            if overwrote {
                inner.overwritten += 1;
            }
            overwrote
        };
        self.notify.notify_one();
        overwrote
    }

    pub fn try_pop(&self) -> Option<SyncPoint> {
        self.inner.lock().ring.try_pop()
    }

    /// Wait for the next point. `None` once closed and drained.
    pub async fn pop(&self) -> Option<SyncPoint> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(point) = inner.ring.try_pop() {
                    return Some(point);
                }
                if inner.closed {
                    return None;
                }
            }
            // notify_one stores a permit, so a push between the check and
            // this await is not lost
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn overwritten(&self) -> u64 {
        self.inner.lock().overwritten
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lazily consumed, ordered sequence of sync points for one subscriber.
///
/// Ends when cancelled or when the instance goes away. Dropping the stream
/// detaches its cursor.
#[derive(Debug)]
pub struct SyncStream {
    key: InstanceKey,
    cursor_id: usize,
    queue: Arc<CursorQueue>,
}

impl SyncStream {
    pub(crate) fn new(key: InstanceKey, cursor_id: usize, queue: Arc<CursorQueue>) -> Self {
        Self {
            key,
            cursor_id,
            queue,
        }
    }

    pub async fn next(&mut self) -> Option<SyncPoint> {
        self.queue.pop().await
    }

    /// Non-waiting variant of [`Self::next`]
    pub fn try_next(&mut self) -> Option<SyncPoint> {
        self.queue.try_pop()
    }

    /// Stop the stream; points already queued are still returned
    pub fn cancel(&self) {
        self.queue.close();
    }

    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    pub fn cursor_id(&self) -> usize {
        self.cursor_id
    }

    /// Points lost because this subscriber fell behind
    pub fn overwritten(&self) -> u64 {
        self.queue.overwritten()
    }
}

/// Append-only recording buffer; sealing consumes it.
#[derive(Debug)]
pub struct SyncedDataBuilder {
    key: InstanceKey,
    start_time: f64,
    frames: Vec<SyncPoint>,
}

impl SyncedDataBuilder {
    pub fn new(key: InstanceKey, start_time: f64) -> Self {
        Self {
            key,
            start_time,
            frames: Vec::new(),
        }
    }

    /// Frames before `start_time` or not after the last frame are ignored.
    pub fn append(&mut self, point: SyncPoint) -> bool {
        if point.timestamp < self.start_time {
            return false;
        }
        if let Some(last) = self.frames.last() {
            if point.timestamp <= last.timestamp {
                return false;
            }
        }
        self.frames.push(point);
        true
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Frames after `end_time` are dropped; `end_time` is clamped to
    /// `start_time`.
    pub fn seal(mut self, end_time: f64) -> SyncedData {
        let end_time = end_time.max(self.start_time);
        self.frames.retain(|f| f.timestamp <= end_time);
        SyncedData {
            frames: self.frames,
            start_time: self.start_time,
            end_time,
            robot_id: self.key.robot_id,
            instance: self.key.instance,
        }
    }
}

/// Where a cursor delivers its points
#[derive(Debug)]
pub(crate) enum CursorSink {
    Live(Arc<CursorQueue>),
    Recording(SyncedDataBuilder),
}

#[derive(Debug)]
pub(crate) struct Cursor {
    pub spec: CursorSpec,
    pub period: f64,
    pub tolerance: f64,
    pub t0: Option<f64>,
    pub k: u64,
    pub sink: CursorSink,
}

impl Cursor {
    pub fn new(spec: CursorSpec, sink: CursorSink) -> Self {
        Self {
            period: spec.period(),
            tolerance: spec.tolerance(),
            t0: spec.start_time,
            k: 0,
            spec,
            sink,
        }
    }

    /// Multiplied rather than accumulated so the sequence never drifts
    pub fn next_tick(&self) -> Option<f64> {
        self.t0.map(|t0| t0 + self.k as f64 * self.period)
    }

    /// Skip ticks so that at most `max_lag` of them are due at `now`.
    ///
    /// Returns how many ticks were skipped.
    pub fn fast_forward(&mut self, now: f64, max_lag: u64) -> u64 {
        let Some(t0) = self.t0 else {
            return 0;
        };
        let behind = (now - self.tolerance - t0) / self.period;
        if !(behind.is_finite() && behind >= 0.0) {
            return 0;
        }
        // Index of the last due tick; the cast saturates for huge gaps
        let last_due = behind.floor() as u64;
        let first_kept = (last_due + 1).saturating_sub(max_lag);
        if first_kept <= self.k {
            return 0;
        }
        let skipped = first_kept - self.k;
        self.k = first_kept;
        skipped
    }

    /// Earliest timestamp any future tick of this cursor can use
    pub fn horizon(&self) -> Option<f64> {
        self.next_tick().map(|t| t - self.period - self.tolerance)
    }

    /// Live cursor whose subscriber is gone
    pub fn is_abandoned(&self) -> bool {
        match &self.sink {
            CursorSink::Live(queue) => queue.is_closed() || Arc::strong_count(queue) == 1,
            CursorSink::Recording(_) => false,
        }
    }

    /// Returns `true` if a queued point was overwritten
    pub fn deliver(&mut self, point: SyncPoint) -> bool {
        match &mut self.sink {
            CursorSink::Live(queue) => queue.push(point),
            CursorSink::Recording(builder) => {
                builder.append(point);
                false
            }
        }
    }
}
