//! Admission policy and store fallback configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TurnstileError};

/// Default fixed window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
/// Default request ceiling per window.
pub const DEFAULT_MAX_REQUESTS: u64 = 3;
/// Default namespace for counter keys.
pub const DEFAULT_KEY_PREFIX: &str = "rl:";

/// Longest window accepted; Redis TTLs are signed 64-bit milliseconds and
/// `reset_at` must stay representable.
const MAX_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// An immutable fixed-window admission policy.
///
/// Policies are validated on construction and never mutated afterwards, so a
/// `Policy` value is always usable for admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    window: Duration,
    max_requests: u64,
    key_prefix: String,
}

impl Policy {
    /// Create a validated policy.
    pub fn new(window: Duration, max_requests: u64, key_prefix: impl Into<String>) -> Result<Self> {
        let key_prefix = key_prefix.into();

        if window.as_millis() == 0 {
            return Err(TurnstileError::InvalidPolicy(
                "window duration must be at least one millisecond".to_string(),
            ));
        }
        if window > MAX_WINDOW {
            return Err(TurnstileError::InvalidPolicy(format!(
                "window duration {:?} exceeds the maximum of {:?}",
                window, MAX_WINDOW
            )));
        }
        if max_requests == 0 {
            return Err(TurnstileError::InvalidPolicy(
                "max requests must be a positive integer".to_string(),
            ));
        }
        if key_prefix.is_empty() {
            return Err(TurnstileError::InvalidPolicy(
                "key prefix must not be empty".to_string(),
            ));
        }

        Ok(Self {
            window,
            max_requests,
            key_prefix,
        })
    }

    /// Length of each fixed window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Requests admitted per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Namespace for counter keys in the shared store.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// The shared-store key counting attempts for `identity`.
    pub fn counter_key(&self, identity: &str) -> String {
        format!("{}{}", self.key_prefix, identity)
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_requests: DEFAULT_MAX_REQUESTS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

/// What to do with a request when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreFallback {
    /// Admit the request; availability wins over the limit.
    FailOpen,
    /// Reject the request; the limit holds during the outage.
    FailClosed,
}

impl StoreFallback {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreFallback::FailOpen => "fail-open",
            StoreFallback::FailClosed => "fail-closed",
        }
    }
}

impl fmt::Display for StoreFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StoreFallback {
    type Err = TurnstileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "fail-open" => Ok(StoreFallback::FailOpen),
            "fail-closed" => Ok(StoreFallback::FailClosed),
            other => Err(TurnstileError::Config(format!(
                "unknown store fallback '{}', expected 'fail-open' or 'fail-closed'",
                other
            ))),
        }
    }
}
