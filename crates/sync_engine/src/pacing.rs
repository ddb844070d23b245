//! Pacing drivers
//!
//! A worker calls `advance_to(now)` every time its pacing source yields.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use contracts::PacingSource;
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Current wall-clock time in seconds since the Unix epoch
pub fn wall_clock_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Live pacing: yields wall-clock seconds every `period`.
#[derive(Debug)]
pub struct WallClockPacer {
    interval: Interval,
}

impl WallClockPacer {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period.max(Duration::from_millis(1)));
        // A stalled worker catches up through advance_to, not through a burst
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

impl PacingSource for WallClockPacer {
    async fn next_tick(&mut self) -> Option<f64> {
        self.interval.tick().await;
        Some(wall_clock_now())
    }
}

/// Externally fed pacing, e.g. replay of recorded data.
///
/// Exhausted once every [`PacingHandle`] is dropped.
#[derive(Debug)]
pub struct ManualPacer {
    rx: mpsc::Receiver<f64>,
}

/// Feeds pacing instants into a [`ManualPacer`]
#[derive(Debug, Clone)]
pub struct PacingHandle {
    tx: mpsc::Sender<f64>,
}

impl ManualPacer {
    pub fn channel(capacity: usize) -> (ManualPacer, PacingHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (ManualPacer { rx }, PacingHandle { tx })
    }
}

impl PacingSource for ManualPacer {
    async fn next_tick(&mut self) -> Option<f64> {
        self.rx.recv().await
    }
}

impl PacingHandle {
    /// Returns `false` once the pacer is gone
    pub async fn tick(&self, now: f64) -> bool {
        self.tx.send(now).await.is_ok()
    }

    /// Non-waiting variant of [`Self::tick`]
    pub fn try_tick(&self, now: f64) -> bool {
        self.tx.try_send(now).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_pacer_ends_with_handles() {
        let (mut pacer, handle) = ManualPacer::channel(4);
        assert!(handle.tick(1.0).await);
        assert!(handle.try_tick(1.5));
        drop(handle);

        assert_eq!(pacer.next_tick().await, Some(1.0));
        assert_eq!(pacer.next_tick().await, Some(1.5));
        assert_eq!(pacer.next_tick().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_clock_pacer_yields_wall_time() {
        let mut pacer = WallClockPacer::new(Duration::from_millis(10));
        let first = pacer.next_tick().await.unwrap();
        let second = pacer.next_tick().await.unwrap();
        assert!(first > 0.0);
        assert!(second >= first);
    }
}
