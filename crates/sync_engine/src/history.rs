//! Per-slot sample history.
//!
//! Uses index-based separation:
//! - HeapRb stores lightweight metadata (timestamp + slab key)
//! - Slab stores the actual stamped values
//!
//! Images and point clouds are never moved while the ring rotates.
//! Accepted timestamps are non-decreasing, so the ring is always sorted.

use std::fmt;

use contracts::Stamped;
use ringbuf::{traits::*, HeapRb};
use slab::Slab;

/// Lightweight metadata stored in ring buffer
#[derive(Debug, Clone, Copy)]
struct SampleMeta {
    timestamp: f64,
    slab_key: usize,
}

/// Returned when a sample is older than the last accepted one
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stale {
    pub last_accepted: f64,
}

/// Bounded, ordered history of one slot
pub struct SampleHistory<T> {
    index: HeapRb<SampleMeta>,
    storage: Slab<Stamped<T>>,
    capacity: usize,
    /// Survives pruning so stale samples are still detected
    last_timestamp: Option<f64>,
    overwritten: u64,
}

impl<T> fmt::Debug for SampleHistory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleHistory")
            .field("len", &self.index.occupied_len())
            .field("capacity", &self.capacity)
            .field("last_timestamp", &self.last_timestamp)
            .finish()
    }
}

impl<T> SampleHistory<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            index: HeapRb::new(capacity),
            storage: Slab::with_capacity(capacity),
            capacity,
            last_timestamp: None,
            overwritten: 0,
        }
    }

    /// Accept a sample.
    ///
    /// A timestamp older than the last accepted one is rejected; an equal
    /// timestamp replaces the previous value. When full, the oldest sample
    /// is overwritten.
    pub fn push(&mut self, timestamp: f64, value: T) -> Result<(), Stale> {
        if let Some(last) = self.last_timestamp {
            if timestamp < last {
                return Err(Stale {
                    last_accepted: last,
                });
            }
            if timestamp == last {
                if let Some(meta) = self.index.iter().last().copied() {
                    if meta.timestamp == timestamp {
                        self.storage[meta.slab_key] = Stamped::new(timestamp, value);
                        return Ok(());
                    }
                }
            }
        }
        self.last_timestamp = Some(timestamp);

        if self.index.is_full() {
            if let Some(old) = self.index.try_pop() {
                self.storage.remove(old.slab_key);
            }
            self.overwritten += 1;
        }

        let slab_key = self.storage.insert(Stamped::new(timestamp, value));
        let _ = self.index.try_push(SampleMeta {
            timestamp,
            slab_key,
        });
        Ok(())
    }

    /// Sample in `[lo, hi]` closest to `target`; ties go to the earlier one.
    pub fn closest_in(&self, lo: f64, hi: f64, target: f64) -> Option<&Stamped<T>> {
        let mut best: Option<(f64, SampleMeta)> = None;
        for meta in self.index.iter() {
            if meta.timestamp < lo {
                continue;
            }
            if meta.timestamp > hi {
                break;
            }
            let distance = (meta.timestamp - target).abs();
            // Strict comparison keeps the earlier sample on ties
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, *meta));
            }
        }
        best.and_then(|(_, meta)| self.storage.get(meta.slab_key))
    }

    /// Drop samples older than `cutoff`. Returns how many were removed.
    pub fn prune_before(&mut self, cutoff: f64) -> usize {
        let mut pruned = 0;
        while let Some(meta) = self.index.iter().next().copied() {
            if meta.timestamp >= cutoff {
                break;
            }
            let _ = self.index.try_pop();
            self.storage.remove(meta.slab_key);
            pruned += 1;
        }
        pruned
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.occupied_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Samples lost to ring overflow
    #[inline]
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(values: &[f64]) -> SampleHistory<u32> {
        let mut h = SampleHistory::new(8);
        for (i, ts) in values.iter().enumerate() {
            h.push(*ts, i as u32).unwrap();
        }
        h
    }

    #[test]
    fn test_rejects_stale_sample() {
        let mut h = history(&[1.0, 2.0]);
        assert_eq!(h.push(1.5, 9), Err(Stale { last_accepted: 2.0 }));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn test_equal_timestamp_replaces() {
        let mut h = history(&[1.0]);
        h.push(1.0, 42).unwrap();
        assert_eq!(h.len(), 1);
        assert_eq!(h.closest_in(0.0, 2.0, 1.0).unwrap().value, 42);
    }

    #[test]
    fn test_capacity_overwrites_oldest() {
        let mut h = SampleHistory::new(3);
        for ts in [1.0, 2.0, 3.0, 4.0] {
            h.push(ts, ()).unwrap();
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.overwritten(), 1);
        assert!(h.closest_in(0.0, 1.5, 1.0).is_none());
    }

    #[test]
    fn test_closest_in_window() {
        let h = history(&[1.0, 1.05, 1.1]);
        let closest = h.closest_in(0.95, 1.2, 1.04).unwrap();
        assert_eq!(closest.timestamp, 1.05);
        assert!(h.closest_in(1.2, 1.3, 1.25).is_none());
    }

    #[test]
    fn test_closest_tie_prefers_earlier() {
        let h = history(&[0.9, 1.1]);
        assert_eq!(h.closest_in(0.0, 2.0, 1.0).unwrap().timestamp, 0.9);
    }

    #[test]
    fn test_prune_keeps_stale_detection() {
        let mut h = history(&[0.0, 0.5, 1.5]);
        assert_eq!(h.prune_before(1.0), 2);
        assert_eq!(h.len(), 1);
        h.prune_before(10.0);
        assert!(h.is_empty());
        assert!(h.push(1.0, 0).is_err());
    }
}
