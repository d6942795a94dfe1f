//! Per-session policy knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ResizePolicy;

/// Session policy, shared by every session a manager runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// What to do with a resize nobody has polled yet.
    pub resize_policy: ResizePolicy,
    /// End the session on the first undecodable client envelope.
    pub terminate_on_protocol_error: bool,
    /// Upper bound on closing the client connection, in milliseconds.
    pub close_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            resize_policy: ResizePolicy::Latest,
            terminate_on_protocol_error: false,
            close_timeout_ms: 1_000,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub const fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"resize_policy":"rendezvous"}"#).unwrap();
        assert_eq!(config.resize_policy, ResizePolicy::Rendezvous);
        assert!(!config.terminate_on_protocol_error);
        assert_eq!(config.close_timeout(), Duration::from_secs(1));
    }
}
