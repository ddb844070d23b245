//! External collaborator interfaces
//!
//! Token validation, recording persistence and pacing are provided by
//! services outside the core. Every call into them goes through
//! [`call_collaborator`].

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::{CollaboratorError, RobotId, SyncedData};

/// Token validation service
#[trait_variant::make(TokenValidator: Send)]
pub trait LocalTokenValidator {
    /// Returns `Ok(false)` when the token is well-formed but not authorised
    /// for this instance.
    async fn validate(
        &self,
        token: &str,
        robot_id: &RobotId,
        instance: u32,
    ) -> Result<bool, CollaboratorError>;
}

/// Persistent recording storage
#[trait_variant::make(RecordingStorage: Send)]
pub trait LocalRecordingStorage {
    /// Storage name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Persist a sealed recording
    ///
    /// # Errors
    /// `Transient` failures are retried once by the caller.
    async fn save_recording(
        &self,
        recording_id: &str,
        data: &SyncedData,
    ) -> Result<(), CollaboratorError>;
}

/// Clock driving the sync engine
///
/// Wall-clock for live operation, replay-driven for offline processing.
#[trait_variant::make(PacingSource: Send)]
pub trait LocalPacingSource {
    /// Next pacing instant in seconds; `None` when the source is exhausted.
    async fn next_tick(&mut self) -> Option<f64>;
}

/// Call a collaborator with a bounded timeout and one retry on a transient
/// failure.
pub async fn call_collaborator<T, F, Fut>(
    name: &str,
    timeout: Duration,
    mut op: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut retried = false;
    loop {
        let result = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(timeout)),
        };
        match result {
            Err(err) if err.is_transient() && !retried => {
                warn!(collaborator = name, error = %err, "collaborator call failed, retrying once");
                retried = true;
            }
            other => return other,
        }
    }
}
