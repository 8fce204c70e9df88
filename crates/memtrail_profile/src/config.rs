//! # Profiler Configuration
//!
//! Loaded once at startup, usually as the `[profiler]` table of
//! `memtrail.toml`.

use serde::{Deserialize, Serialize};

use crate::error::{ProfileError, ProfileResult};

/// Default bound on events retained for lagging observers.
pub const DEFAULT_MAX_RETAINED_EVENTS: usize = 1 << 20;

/// Profiler settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfilerConfig {
    /// Whether events are queued at all. Totals are tracked either way.
    pub enabled: bool,
    /// Events kept for the slowest observer before the oldest are dropped.
    pub max_retained_events: usize,
}

impl ProfilerConfig {
    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::InvalidConfig`] if `max_retained_events` is zero.
    pub fn validate(&self) -> ProfileResult<()> {
        if self.max_retained_events == 0 {
            return Err(ProfileError::InvalidConfig(
                "max_retained_events must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retained_events: DEFAULT_MAX_RETAINED_EVENTS,
        }
    }
}
