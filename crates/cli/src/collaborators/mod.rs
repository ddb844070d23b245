//! Collaborator implementations used by the binary
//!
//! Recording storage (LogStorage, JsonFileStorage) and token validation.

mod storage;
mod token;

pub use self::storage::{JsonFileStorage, LogStorage, RunStorage};
pub use self::token::StaticTokenValidator;
