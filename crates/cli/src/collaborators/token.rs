//! Token validation for a standalone deployment

use std::collections::HashSet;

use contracts::{CollaboratorError, RobotId, TokenValidator};
use tracing::debug;

/// Accepts tokens from a fixed list. With an empty list every non-empty
/// token is accepted.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenValidator {
    tokens: HashSet<String>,
}

impl StaticTokenValidator {
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            tokens: tokens.into_iter().filter(|t| !t.is_empty()).collect(),
        }
    }

    /// Comma separated list, as passed through `TELEMETRY_BROKER_TOKENS`
    pub fn from_list(list: &str) -> Self {
        Self::new(list.split(',').map(|t| t.trim().to_string()))
    }

    pub fn is_open(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl TokenValidator for StaticTokenValidator {
    async fn validate(
        &self,
        token: &str,
        robot_id: &RobotId,
        instance: u32,
    ) -> Result<bool, CollaboratorError> {
        let accepted = !token.is_empty() && (self.is_open() || self.tokens.contains(token));
        debug!(%robot_id, instance, accepted, "token checked");
        Ok(accepted)
    }
}
