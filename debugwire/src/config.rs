// Session configuration
//
// Every blocking wait in a session is bounded by one of these budgets.

use crate::protocol::{WireError, WireResult};
use crate::registry::DuplicatePolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Environment override for `wait_time_minutes`
pub const WAIT_TIME_ENV: &str = "DEBUGWIRE_WAIT_TIME";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    /// Overall wait budget in minutes, the harness-wide knob
    pub wait_time_minutes: u64,
    /// How long a driver waits for the reply to one command
    pub reply_timeout_ms: u64,
    /// How long a parked debuggee thread waits for `cont` before releasing itself
    pub resume_timeout_ms: u64,
    pub connect_attempts: u32,
    pub connect_retry_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_attempts: u32,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            wait_time_minutes: 1,
            reply_timeout_ms: 10_000,
            resume_timeout_ms: 60_000,
            connect_attempts: 50,
            connect_retry_interval_ms: 100,
            poll_interval_ms: 20,
            poll_attempts: 100,
            duplicate_policy: DuplicatePolicy::Reject,
        }
    }
}

impl WireConfig {
    /// Load from a JSON file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> WireResult<Self> {
        debug!("Loading config from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Apply `DEBUGWIRE_WAIT_TIME` if set
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var(WAIT_TIME_ENV) {
            match value.trim().parse::<u64>() {
                Ok(minutes) => self.wait_time_minutes = minutes,
                Err(_) => warn!("Ignoring invalid {}={:?}", WAIT_TIME_ENV, value),
            }
        }
        self
    }

    pub fn validate(&self) -> WireResult<()> {
        if self.wait_time_minutes == 0 {
            return Err(WireError::Protocol("wait_time_minutes must be positive".to_string()));
        }
        if self.poll_attempts == 0 {
            return Err(WireError::Protocol("poll_attempts must be positive".to_string()));
        }
        Ok(())
    }

    /// `wait_time_minutes * 60000` ms, saturating for absurdly large settings
    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_minutes.saturating_mul(60_000))
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn resume_timeout(&self) -> Duration {
        Duration::from_millis(self.resume_timeout_ms)
    }

    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_millis(self.connect_retry_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
