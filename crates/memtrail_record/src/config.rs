//! # Recording Configuration
//!
//! The `[recorder]` and `[track]` tables of `memtrail.toml`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TrackError, TrackResult};
use crate::storage::DEFAULT_SEGMENT_LEN;

/// Background recorder settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecorderConfig {
    /// Time between drains of the observer, in milliseconds.
    pub flush_interval_ms: u64,
    /// Events taken from the observer per lock acquisition.
    pub batch_size: usize,
}

impl RecorderConfig {
    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::InvalidConfig`] if either value is zero.
    pub fn validate(&self) -> TrackResult<()> {
        if self.flush_interval_ms == 0 {
            return Err(TrackError::InvalidConfig(
                "flush_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(TrackError::InvalidConfig(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Flush interval as a [`Duration`].
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 100,
            batch_size: 1024,
        }
    }
}

/// Track storage settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackConfig {
    /// Events per storage segment.
    pub segment_len: usize,
}

impl TrackConfig {
    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::InvalidConfig`] if `segment_len` is zero.
    pub fn validate(&self) -> TrackResult<()> {
        if self.segment_len == 0 {
            return Err(TrackError::InvalidConfig(
                "segment_len must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            segment_len: DEFAULT_SEGMENT_LEN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RecorderConfig::default().validate().is_ok());
        assert!(TrackConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = RecorderConfig {
            flush_interval_ms: 0,
            ..RecorderConfig::default()
        };
        assert!(matches!(config.validate(), Err(TrackError::InvalidConfig(_))));
        let config = RecorderConfig {
            batch_size: 0,
            ..RecorderConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(TrackConfig { segment_len: 0 }.validate().is_err());
    }
}
