//! Per-instance synchronization engine.
//!
//! Owns the slot table and every cursor of one robot instance. Not
//! thread-safe by itself: [`crate::SyncService`] runs each engine on its own
//! worker task, which makes the worker the single writer of the instance's
//! timeline.

use std::sync::Arc;

use contracts::{InstanceKey, SamplePoint, SyncedData};
use slab::Slab;
use tracing::{debug, instrument, trace};

use crate::cursor::{Cursor, CursorQueue, CursorSink, CursorSpec, SyncedDataBuilder};
use crate::slots::{SlotTable, TickWindow};
use crate::SyncError;

/// Engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub accepted: u64,
    pub rejected_out_of_order: u64,
    pub rejected_invalid: u64,
    pub points_emitted: u64,
    /// Ticks skipped because the cursor fell further behind than history
    pub skipped_ticks: u64,
    /// Points lost to slow live subscribers
    pub overwritten: u64,
    pub cursors: usize,
    pub buffered: usize,
}

#[derive(Debug)]
pub struct SyncEngine {
    key: InstanceKey,
    slots: SlotTable,
    cursors: Slab<Cursor>,
    /// Most ticks one cursor may catch up on; older ones cannot be filled
    max_catch_up: u64,
    stats: EngineStats,
}

impl SyncEngine {
    pub fn new(key: InstanceKey, history_depth: usize) -> Self {
        Self {
            key,
            slots: SlotTable::new(history_depth),
            cursors: Slab::new(),
            max_catch_up: history_depth.max(1) as u64,
            stats: EngineStats::default(),
        }
    }

    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    /// Accept one sample.
    ///
    /// Stale and malformed samples are counted, logged and rejected; they
    /// never affect output.
    pub fn push(&mut self, sample: SamplePoint) -> Result<(), SyncError> {
        let data_type = sample.data_type();
        if let Err(reason) = sample.validate() {
            self.stats.rejected_invalid += 1;
            observability::record_sample_rejected(&self.key, data_type, "invalid");
            debug!(key = %self.key, %data_type, %reason, "invalid sample dropped");
            return Err(SyncError::InvalidSample { data_type, reason });
        }

        let timestamp = sample.timestamp;
        match self.slots.insert(sample) {
            Ok(()) => {
                self.stats.accepted += 1;
                observability::record_sample_received(&self.key, data_type);
                Ok(())
            }
            Err(stale) => {
                self.stats.rejected_out_of_order += 1;
                observability::record_sample_rejected(&self.key, data_type, "out_of_order");
                debug!(
                    key = %self.key,
                    %data_type,
                    timestamp,
                    last_accepted = stale.last_accepted,
                    "out-of-order sample dropped"
                );
                Err(SyncError::OutOfOrderSample {
                    data_type,
                    timestamp,
                    last_accepted: stale.last_accepted,
                })
            }
        }
    }

    /// Attach a live cursor; the returned queue is its only consumer handle.
    pub fn add_live_cursor(
        &mut self,
        spec: CursorSpec,
        queue_capacity: usize,
    ) -> Result<(usize, Arc<CursorQueue>), SyncError> {
        spec.validate()?;
        let queue = Arc::new(CursorQueue::new(queue_capacity));
        let id = self
            .cursors
            .insert(Cursor::new(spec, CursorSink::Live(queue.clone())));
        debug!(key = %self.key, cursor = id, "live cursor attached");
        Ok((id, queue))
    }

    /// Attach a recording cursor starting at `spec.start_time`
    pub fn add_recording_cursor(&mut self, spec: CursorSpec) -> Result<usize, SyncError> {
        spec.validate()?;
        let start = spec
            .start_time
            .ok_or_else(|| SyncError::invalid_cursor("recording cursor needs a start time"))?;
        let builder = SyncedDataBuilder::new(self.key.clone(), start);
        let id = self
            .cursors
            .insert(Cursor::new(spec, CursorSink::Recording(builder)));
        debug!(key = %self.key, cursor = id, start, "recording cursor attached");
        Ok(id)
    }

    pub fn remove_cursor(&mut self, id: usize) -> Result<(), SyncError> {
        let cursor = self
            .cursors
            .try_remove(id)
            .ok_or(SyncError::CursorNotFound(id))?;
        if let CursorSink::Live(queue) = cursor.sink {
            queue.close();
        }
        Ok(())
    }

    /// Emit every tick whose tolerance window has closed by `now`.
    ///
    /// A tick `t` is due once `now >= t + tolerance`, so samples arriving up
    /// to `tolerance` after the tick are still considered. A cursor lagging
    /// more than the history depth skips straight to its last
    /// `history_depth` due ticks.
    #[instrument(name = "sync_advance", level = "trace", skip(self), fields(key = %self.key))]
    pub fn advance_to(&mut self, now: f64) -> usize {
        self.drop_abandoned();

        let Self {
            key,
            slots,
            cursors,
            max_catch_up,
            stats,
        } = self;

        let mut emitted = 0;
        for (id, cursor) in cursors.iter_mut() {
            if cursor.t0.is_none() {
                cursor.t0 = Some(now);
            }
            skip_lagging(key, id, cursor, now, *max_catch_up, stats);
            while let Some(tick) = cursor.next_tick() {
                if now < tick + cursor.tolerance {
                    break;
                }
                emit(key, slots, cursor, tick, stats);
                emitted += 1;
            }
        }

        self.prune(now);
        trace!(emitted, "advanced");
        emitted
    }

    /// Flush a recording cursor up to `end_time` and seal its data.
    ///
    /// Ticks up to `end_time` are emitted even if their tolerance window is
    /// still open.
    pub fn seal_recording(&mut self, id: usize, end_time: f64) -> Result<SyncedData, SyncError> {
        match self.cursors.get(id) {
            None => return Err(SyncError::CursorNotFound(id)),
            Some(cursor) if !matches!(cursor.sink, CursorSink::Recording(_)) => {
                return Err(SyncError::NotRecordingCursor(id))
            }
            Some(_) => {}
        }

        {
            let Self {
                key,
                slots,
                cursors,
                max_catch_up,
                stats,
            } = self;
            if let Some(cursor) = cursors.get_mut(id) {
                skip_lagging(key, id, cursor, end_time + cursor.tolerance, *max_catch_up, stats);
                while let Some(tick) = cursor.next_tick() {
                    if tick > end_time {
                        break;
                    }
                    emit(key, slots, cursor, tick, stats);
                }
            }
        }

        let cursor = self.cursors.remove(id);
        match cursor.sink {
            CursorSink::Recording(builder) => {
                let data = builder.seal(end_time);
                debug!(key = %self.key, frames = data.frames.len(), "recording sealed");
                Ok(data)
            }
            CursorSink::Live(_) => Err(SyncError::NotRecordingCursor(id)),
        }
    }

    /// End every live stream and discard recording cursors
    pub fn close(&mut self) {
        for (_, cursor) in self.cursors.iter() {
            if let CursorSink::Live(queue) = &cursor.sink {
                queue.close();
            }
        }
        self.cursors.clear();
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            cursors: self.cursors.len(),
            buffered: self.slots.buffered(),
            ..self.stats
        }
    }

    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }

    fn drop_abandoned(&mut self) {
        let abandoned: Vec<usize> = self
            .cursors
            .iter()
            .filter(|(_, c)| c.is_abandoned())
            .map(|(id, _)| id)
            .collect();
        for id in abandoned {
            self.cursors.remove(id);
            debug!(key = %self.key, cursor = id, "live cursor detached");
        }
    }

    /// Drop samples no cursor can still select
    fn prune(&mut self, now: f64) {
        let horizon = self
            .cursors
            .iter()
            .map(|(_, c)| {
                c.horizon()
                    .unwrap_or(now - c.period - c.tolerance)
            })
            .fold(f64::INFINITY, f64::min);
        if horizon.is_finite() {
            self.slots.prune_before(horizon);
        }
    }
}

fn skip_lagging(
    key: &InstanceKey,
    id: usize,
    cursor: &mut Cursor,
    now: f64,
    max_catch_up: u64,
    stats: &mut EngineStats,
) {
    let skipped = cursor.fast_forward(now, max_catch_up);
    if skipped > 0 {
        stats.skipped_ticks += skipped;
        debug!(%key, cursor = id, skipped, "cursor lagged past history, ticks skipped");
    }
}

fn emit(
    key: &InstanceKey,
    slots: &SlotTable,
    cursor: &mut Cursor,
    tick: f64,
    stats: &mut EngineStats,
) {
    let window = TickWindow::new(tick, cursor.period, cursor.tolerance);
    let point = slots.snapshot(key, &window, cursor.spec.data_types.as_ref());
    observability::record_sync_point(key, &point);
    if cursor.deliver(point) {
        stats.overwritten += 1;
        observability::record_cursor_overflow(key, 1);
    }
    stats.points_emitted += 1;
    cursor.k += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{DataType, JointData, LanguageData, SamplePayload};
    use std::collections::HashMap;

    fn key() -> InstanceKey {
        InstanceKey::new("robot", 0)
    }

    fn language(ts: f64) -> SamplePoint {
        SamplePoint::new(
            ts,
            SamplePayload::Language(LanguageData {
                text: "pick".into(),
            }),
        )
    }

    fn joints(ts: f64, value: f64) -> SamplePoint {
        let mut values = HashMap::new();
        values.insert("j1".to_string(), value);
        SamplePoint::new(
            ts,
            SamplePayload::JointPositions(JointData {
                values,
                additional_values: None,
            }),
        )
    }

    #[test]
    fn test_language_hold_at_10hz() {
        let mut engine = SyncEngine::new(key(), 64);
        let spec = CursorSpec::new(10.0).with_tolerance(0.1).starting_at(0.05);
        let (_, queue) = engine.add_live_cursor(spec, 16).unwrap();

        engine.push(language(0.0)).unwrap();
        engine.advance_to(0.5);

        let points: Vec<_> = std::iter::from_fn(|| queue.try_pop()).collect();
        let ticks: Vec<f64> = points.iter().map(|p| p.timestamp).collect();
        assert_eq!(ticks.len(), 4);
        assert!(points[0].language_data.is_some());
        assert!(points[1].language_data.is_some());
        assert!(points[2].language_data.is_none());
        assert!(points[3].language_data.is_none());
    }

    #[test]
    fn test_tick_waits_for_tolerance_window() {
        let mut engine = SyncEngine::new(key(), 64);
        let spec = CursorSpec::new(10.0).with_tolerance(0.05).starting_at(1.0);
        let (_, queue) = engine.add_live_cursor(spec, 16).unwrap();

        assert_eq!(engine.advance_to(1.02), 0);
        // Arrives after the tick but within tolerance
        engine.push(joints(1.03, 3.0)).unwrap();
        assert_eq!(engine.advance_to(1.05), 1);

        let p = queue.try_pop().unwrap();
        assert_eq!(p.joint_positions.unwrap().timestamp, 1.03);
    }

    #[test]
    fn test_closest_sample_wins() {
        let mut engine = SyncEngine::new(key(), 64);
        let spec = CursorSpec::new(10.0).with_tolerance(0.05).starting_at(1.0);
        let (_, queue) = engine.add_live_cursor(spec, 16).unwrap();

        for (ts, v) in [(0.91, 1.0), (0.98, 2.0), (1.04, 3.0)] {
            engine.push(joints(ts, v)).unwrap();
        }
        engine.advance_to(1.05);

        let p = queue.try_pop().unwrap();
        assert_eq!(p.joint_positions.unwrap().value.values["j1"], 2.0);
    }

    #[test]
    fn test_out_of_order_rejected_and_counted() {
        let mut engine = SyncEngine::new(key(), 64);
        engine.push(joints(2.0, 1.0)).unwrap();
        let err = engine.push(joints(1.0, 1.0)).unwrap_err();
        assert!(matches!(err, SyncError::OutOfOrderSample { .. }));
        assert_eq!(engine.stats().rejected_out_of_order, 1);
        assert_eq!(engine.stats().accepted, 1);
    }

    #[test]
    fn test_invalid_sample_rejected() {
        let mut engine = SyncEngine::new(key(), 64);
        let err = engine.push(language(f64::INFINITY)).unwrap_err();
        assert!(matches!(err, SyncError::InvalidSample { .. }));
        assert_eq!(engine.stats().rejected_invalid, 1);
    }

    #[test]
    fn test_cursors_have_independent_rates() {
        let mut engine = SyncEngine::new(key(), 64);
        let (_, fast) = engine
            .add_live_cursor(CursorSpec::new(20.0).starting_at(0.0), 64)
            .unwrap();
        let (_, slow) = engine
            .add_live_cursor(CursorSpec::new(5.0).starting_at(0.0), 64)
            .unwrap();

        engine.advance_to(1.225);
        // fast: ticks 0.0..=1.15 (w = 0.05), slow: ticks 0.0..=1.0 (w = 0.2)
        assert_eq!(fast.len(), 24);
        assert_eq!(slow.len(), 6);
    }

    #[test]
    fn test_filter_applies_per_cursor() {
        let mut engine = SyncEngine::new(key(), 64);
        let spec = CursorSpec::new(10.0)
            .starting_at(1.0)
            .only([DataType::Language]);
        let (_, queue) = engine.add_live_cursor(spec, 4).unwrap();
        engine.push(joints(1.0, 1.0)).unwrap();
        engine.push(language(1.0)).unwrap();
        engine.advance_to(1.1);

        let p = queue.try_pop().unwrap();
        assert!(p.language_data.is_some());
        assert!(p.joint_positions.is_none());
    }

    #[test]
    fn test_dropped_subscriber_is_detached() {
        let mut engine = SyncEngine::new(key(), 64);
        let (_, queue) = engine
            .add_live_cursor(CursorSpec::new(10.0), 4)
            .unwrap();
        assert_eq!(engine.cursor_count(), 1);
        drop(queue);
        engine.advance_to(1.0);
        assert_eq!(engine.cursor_count(), 0);
    }

    #[test]
    fn test_slow_subscriber_loses_oldest() {
        let mut engine = SyncEngine::new(key(), 64);
        let (_, queue) = engine
            .add_live_cursor(CursorSpec::new(10.0).starting_at(0.0), 2)
            .unwrap();
        engine.advance_to(1.0);
        assert_eq!(queue.len(), 2);
        assert!(engine.stats().overwritten > 0);
        assert!(queue.try_pop().unwrap().timestamp > 0.5);
    }

    #[test]
    fn test_recording_seal_flushes_and_bounds() {
        let mut engine = SyncEngine::new(key(), 64);
        let spec = CursorSpec::new(10.0).with_tolerance(0.1).starting_at(1.0);
        let id = engine.add_recording_cursor(spec).unwrap();

        for i in 0..20 {
            engine.push(joints(1.0 + i as f64 * 0.05, i as f64)).unwrap();
        }
        engine.advance_to(1.25);
        let data = engine.seal_recording(id, 1.5).unwrap();

        assert_eq!(data.start_time, 1.0);
        assert_eq!(data.end_time, 1.5);
        assert_eq!(data.frames.len(), 6);
        assert!(data
            .frames
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp));
        assert!(data
            .frames
            .iter()
            .all(|f| f.timestamp >= 1.0 && f.timestamp <= 1.5));
        assert_eq!(engine.cursor_count(), 0);
        assert_eq!(
            engine.seal_recording(id, 2.0),
            Err(SyncError::CursorNotFound(id))
        );
    }

    #[test]
    fn test_recording_cursor_requires_start() {
        let mut engine = SyncEngine::new(key(), 8);
        assert!(engine.add_recording_cursor(CursorSpec::new(10.0)).is_err());
    }

    #[test]
    fn test_seal_rejects_live_cursor() {
        let mut engine = SyncEngine::new(key(), 8);
        let (id, _queue) = engine.add_live_cursor(CursorSpec::new(10.0), 2).unwrap();
        assert_eq!(
            engine.seal_recording(id, 1.0),
            Err(SyncError::NotRecordingCursor(id))
        );
    }

    #[test]
    fn test_history_is_pruned_behind_cursors() {
        let mut engine = SyncEngine::new(key(), 256);
        let (_, _queue) = engine
            .add_live_cursor(CursorSpec::new(10.0).with_tolerance(0.1).starting_at(0.0), 4)
            .unwrap();
        for i in 0..100 {
            engine.push(joints(i as f64 * 0.01, 0.0)).unwrap();
        }
        engine.advance_to(1.05);
        // Next tick is 1.0, eligible from 0.8
        assert!(engine.stats().buffered <= 21);
    }

    #[test]
    fn test_catch_up_from_distant_start_is_bounded() {
        let mut engine = SyncEngine::new(key(), 64);
        let spec = CursorSpec::new(10.0).with_tolerance(0.1).starting_at(0.0);
        let id = engine.add_recording_cursor(spec).unwrap();
        engine.push(language(99_999.9)).unwrap();

        let emitted = engine.advance_to(100_000.0);
        assert!(emitted <= 66);
        assert!(engine.stats().skipped_ticks > 999_000);

        let data = engine.seal_recording(id, 100_000.0).unwrap();
        assert!(data.frames.len() <= 66);
        assert!(data.frames.iter().all(|f| f.timestamp > 99_990.0));
        assert!(data.frames.iter().any(|f| f.language_data.is_some()));
    }

    #[test]
    fn test_seal_without_advance_is_bounded() {
        let mut engine = SyncEngine::new(key(), 8);
        let spec = CursorSpec::new(10.0).starting_at(0.0);
        let id = engine.add_recording_cursor(spec).unwrap();
        let data = engine.seal_recording(id, 1.0e9).unwrap();
        assert!(data.frames.len() <= 9);
        assert_eq!(data.end_time, 1.0e9);
    }

    #[test]
    fn test_close_ends_live_streams() {
        let mut engine = SyncEngine::new(key(), 8);
        let (_, queue) = engine.add_live_cursor(CursorSpec::new(10.0), 2).unwrap();
        engine.close();
        assert!(queue.is_closed());
        assert_eq!(engine.cursor_count(), 0);
    }
}
