//! # Stream Registry
//!
//! Tracks which robot instances are publishing which tracks and how many
//! consumers are attached to each.
//!
//! ## Guarantees
//!
//! - Publishing is idempotent on `(robot_id, instance, kind, label)`
//! - An instance exists while it has a track, a connection or a reservation
//! - `connections + reserved` never exceeds `max_connections_per_instance`
//! - Every mutation is broadcast; lagging subscribers get a fresh snapshot

mod error;
mod feed;
mod registry;

pub use error::RegistryError;
pub use feed::{CapacityEvent, DiscoveryFeed, DiscoveryUpdate, RegistryChange};
pub use registry::StreamRegistry;
