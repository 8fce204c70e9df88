//! # Configuration
//!
//! All settings live in one `memtrail.toml`:
//!
//! ```toml
//! [profiler]
//! enabled = true
//! max_retained_events = 1048576
//!
//! [pool]
//! chunk_size = 64
//! chunk_align = 16
//! chunks_per_page = 256
//! max_pages = 1024
//!
//! [stack]
//! capacity = 4194304
//!
//! [recorder]
//! flush_interval_ms = 100
//! batch_size = 1024
//!
//! [track]
//! segment_len = 4096
//! ```
//!
//! Every table and every key is optional. Unknown keys are rejected.

use std::path::Path;

use memtrail_alloc::{PoolConfig, StackConfig};
use memtrail_profile::{Profiler, ProfilerConfig};
use memtrail_record::{RecorderConfig, TrackConfig};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Settings for every MEMTRAIL component.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemtrailConfig {
    /// Profiler backend.
    pub profiler: ProfilerConfig,
    /// Default pool shape.
    pub pool: PoolConfig,
    /// Default stack shape.
    pub stack: StackConfig,
    /// Background recorder.
    pub recorder: RecorderConfig,
    /// Track storage.
    pub track: TrackConfig,
}

impl MemtrailConfig {
    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Parse`] for malformed TOML or unknown keys.
    /// - [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`MemtrailConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialize`] if rendering fails.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks every section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad section.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |section: &str, error: &dyn std::fmt::Display| {
            ConfigError::Invalid(format!("[{section}] {error}"))
        };
        self.profiler.validate().map_err(|e| invalid("profiler", &e))?;
        self.pool.layout().map_err(|e| invalid("pool", &e))?;
        self.stack.validate().map_err(|e| invalid("stack", &e))?;
        self.recorder.validate().map_err(|e| invalid("recorder", &e))?;
        self.track.validate().map_err(|e| invalid("track", &e))?;
        Ok(())
    }

    /// Makes the `[profiler]` section the global profiler's configuration.
    ///
    /// Returns false if the global profiler was already in use, in which
    /// case its configuration is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an invalid profiler section.
    pub fn install_profiler(&self) -> ConfigResult<bool> {
        Profiler::install_global(self.profiler.clone())
            .map_err(|error| ConfigError::Invalid(format!("[profiler] {error}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_gives_defaults() {
        assert_eq!(MemtrailConfig::from_toml_str("").unwrap(), MemtrailConfig::default());
    }

    #[test]
    fn test_partial_tables_fill_defaults() {
        let config = MemtrailConfig::from_toml_str(
            r#"
            [pool]
            chunk_size = 32
            max_pages = 8

            [recorder]
            flush_interval_ms = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.pool.chunk_size, 32);
        assert_eq!(config.pool.max_pages, Some(8));
        assert_eq!(config.pool.chunk_align, PoolConfig::default().chunk_align);
        assert_eq!(config.recorder.flush_interval_ms, 10);
        assert_eq!(config.recorder.batch_size, RecorderConfig::default().batch_size);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(matches!(
            MemtrailConfig::from_toml_str("[pool]\nchunk_sise = 32\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            MemtrailConfig::from_toml_str("[allocator]\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_out_of_range_values_name_their_section() {
        let error = MemtrailConfig::from_toml_str("[pool]\nchunk_align = 12\n").unwrap_err();
        assert!(matches!(&error, ConfigError::Invalid(message) if message.starts_with("[pool]")));

        let error = MemtrailConfig::from_toml_str("[stack]\ncapacity = 0\n").unwrap_err();
        assert!(matches!(&error, ConfigError::Invalid(message) if message.starts_with("[stack]")));

        let error = MemtrailConfig::from_toml_str("[profiler]\nmax_retained_events = 0\n").unwrap_err();
        assert!(matches!(&error, ConfigError::Invalid(message) if message.starts_with("[profiler]")));
    }

    #[test]
    fn test_rendered_toml_loads_back() {
        let mut config = MemtrailConfig::default();
        config.stack.capacity = 4096;
        config.pool.max_pages = Some(3);
        let text = config.to_toml().unwrap();
        assert_eq!(MemtrailConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let path = std::env::temp_dir().join("memtrail-config-does-not-exist.toml");
        assert!(matches!(
            MemtrailConfig::load(&path),
            Err(ConfigError::Io { path: missing, .. }) if missing == path
        ));
    }

    #[test]
    fn test_load_reads_file() {
        let path = std::env::temp_dir().join(format!("memtrail-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[track]\nsegment_len = 16\n").unwrap();
        let config = MemtrailConfig::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.unwrap().track.segment_len, 16);
    }
}
