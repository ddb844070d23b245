//! # Contracts
//!
//! Frozen interface contracts (ICD), defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Sample timestamps are seconds (f64) on the robot's clock, the only time
//!   axis used for alignment
//! - Creation times of tracks/requests are wall-clock `DateTime<Utc>`

mod blueprint;
mod collaborator;
mod config;
mod error;
mod gate;
mod handshake;
mod recording;
mod robot_id;
mod sample;
mod sample_source;
mod sync;
mod track;

pub use blueprint::*;
pub use collaborator::*;
pub use config::*;
pub use error::*;
pub use gate::{StateGate, Transition};
pub use handshake::*;
pub use recording::*;
pub use robot_id::{InstanceKey, RobotId};
pub use sample::*;
pub use sample_source::{SampleCallback, SampleSource};
pub use sync::*;
pub use track::*;
