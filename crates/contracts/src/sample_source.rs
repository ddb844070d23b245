//! SampleSource trait - Sample data source abstraction
//!
//! Decouples robot adapters from where samples come from (hardware bridge,
//! replay file, mock generator).

use std::sync::Arc;

use crate::{SamplePoint, TrackKind};

/// Sample callback type
///
/// Uses `Arc` to allow callback sharing across multiple contexts.
pub type SampleCallback = Arc<dyn Fn(SamplePoint) + Send + Sync>;

/// Sample data source trait
///
/// A source produces the samples of exactly one published track.
pub trait SampleSource: Send + Sync {
    /// Track kind this source feeds
    fn track_kind(&self) -> TrackKind;

    /// Track label (camera name for RGB/DEPTH)
    fn label(&self) -> &str;

    /// Register data callback
    ///
    /// Repeated calls while listening are ignored.
    fn listen(&self, callback: SampleCallback);

    fn stop(&self);

    fn is_listening(&self) -> bool;
}
