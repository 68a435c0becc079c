//! Pipeline configuration loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! [cache]
//! max_size = 1000              # 0 = unbounded
//! default_ttl_secs = 300       # 0 = never expire
//! cleanup_interval_secs = 60   # 0 = no background sweep
//! key_prefix = "toolpipe"
//! middleware_ttl_secs = 300
//!
//! [logging]
//! level = "info"               # debug | info | warn | error
//!
//! [timing]
//! slow_request_threshold_ms = 1000
//!
//! [recovery]
//! panic_stack_trace = false
//!
//! [remote]
//! url = "redis://localhost:6379"
//! pool_max = 16
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use toolpipe_cache::{CacheMiddlewareConfig, MemoryCacheConfig, RemoteCacheConfig};
use toolpipe_core::middleware::{LogLevel, LoggingConfig, RecoveryConfig, TimingConfig};

/// Errors from loading or validating a [`PipelineConfig`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The TOML could not be parsed into a configuration.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is out of range.
    #[error("invalid config value for {field}: {message}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSection {
    /// Maximum in-memory entries. Zero means unbounded.
    pub max_size: usize,
    /// TTL used when a caller passes zero. Zero means never expire.
    pub default_ttl_secs: u64,
    /// Sweep interval for expired entries. Zero disables the sweeper.
    pub cleanup_interval_secs: u64,
    /// Namespace for cache keys.
    pub key_prefix: String,
    /// TTL the cache middleware stores results with. Zero defers to
    /// `default_ttl_secs`.
    pub middleware_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl_secs: 300,
            cleanup_interval_secs: 60,
            key_prefix: "toolpipe".to_string(),
            middleware_ttl_secs: 300,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    /// Minimum level the logging middleware emits.
    pub level: LogLevel,
}

/// `[timing]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingSection {
    /// Requests slower than this are logged as slow.
    pub slow_request_threshold_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            slow_request_threshold_ms: 1000,
        }
    }
}

/// `[recovery]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoverySection {
    /// Log a backtrace with every recovered panic.
    pub panic_stack_trace: bool,
}

/// `[remote]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteSection {
    /// Store URL. Absent means no remote cache.
    pub url: Option<String>,
    /// Connection pool max size.
    pub pool_max: usize,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            url: None,
            pool_max: 16,
        }
    }
}

/// Every configuration knob of the pipeline and cache layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Cache settings.
    pub cache: CacheSection,
    /// Logging middleware settings.
    pub logging: LoggingSection,
    /// Timing middleware settings.
    pub timing: TimingSection,
    /// Recovery middleware settings.
    pub recovery: RecoverySection,
    /// Remote store settings.
    pub remote: RemoteSection,
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&input)?;
        tracing::debug!(path = %path.display(), "loaded pipeline config");
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timing.slow_request_threshold_ms == 0 {
            return Err(ConfigError::invalid(
                "timing.slow_request_threshold_ms",
                "must be greater than zero",
            ));
        }
        if self.cache.key_prefix.ends_with(':') {
            return Err(ConfigError::invalid(
                "cache.key_prefix",
                "must not end with ':' (the separator is added automatically)",
            ));
        }
        if self.cache.key_prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::invalid(
                "cache.key_prefix",
                "must not contain whitespace",
            ));
        }
        if let Some(url) = &self.remote.url {
            if url.trim().is_empty() {
                return Err(ConfigError::invalid("remote.url", "must not be empty"));
            }
        }
        if self.remote.pool_max == 0 {
            return Err(ConfigError::invalid("remote.pool_max", "must be at least 1"));
        }
        Ok(())
    }

    /// Settings for a [`MemoryCache`](toolpipe_cache::MemoryCache).
    pub fn memory_cache(&self) -> MemoryCacheConfig {
        MemoryCacheConfig {
            max_size: self.cache.max_size,
            default_ttl: Duration::from_secs(self.cache.default_ttl_secs),
            cleanup_interval: Duration::from_secs(self.cache.cleanup_interval_secs),
        }
    }

    /// Settings for a [`RemoteCache`](toolpipe_cache::RemoteCache).
    pub fn remote_cache(&self) -> RemoteCacheConfig {
        RemoteCacheConfig {
            prefix: self.cache.key_prefix.clone(),
            default_ttl: Duration::from_secs(self.cache.default_ttl_secs),
        }
    }

    /// Settings for a [`CacheMiddleware`](toolpipe_cache::CacheMiddleware).
    pub fn cache_middleware(&self) -> CacheMiddlewareConfig {
        CacheMiddlewareConfig {
            key_prefix: self.cache.key_prefix.clone(),
            ttl: Duration::from_secs(self.cache.middleware_ttl_secs),
        }
    }

    /// Settings for the logging middleware.
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.logging.level,
        }
    }

    /// Settings for the timing middleware.
    pub fn timing(&self) -> TimingConfig {
        TimingConfig {
            slow_request_threshold: Duration::from_millis(self.timing.slow_request_threshold_ms),
        }
    }

    /// Settings for the recovery middleware.
    pub fn recovery(&self) -> RecoveryConfig {
        RecoveryConfig {
            panic_stack_trace: self.recovery.panic_stack_trace,
        }
    }

    /// Redis settings, if a remote URL is configured.
    #[cfg(feature = "redis")]
    pub fn redis(&self) -> Option<toolpipe_cache::RedisConfig> {
        self.remote.url.as_ref().map(|url| toolpipe_cache::RedisConfig {
            url: url.clone(),
            pool_max: self.remote.pool_max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.timing().slow_request_threshold, Duration::from_secs(1));
        assert_eq!(config.memory_cache().cleanup_interval, Duration::from_secs(60));
        assert!(config.remote.url.is_none());
    }

    #[test]
    fn full_document() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [cache]
            max_size = 2
            default_ttl_secs = 0
            cleanup_interval_secs = 5
            key_prefix = "firefly"
            middleware_ttl_secs = 30

            [logging]
            level = "debug"

            [timing]
            slow_request_threshold_ms = 250

            [recovery]
            panic_stack_trace = true

            [remote]
            url = "redis://cache:6379/1"
            pool_max = 4
            "#,
        )
        .unwrap();

        let memory = config.memory_cache();
        assert_eq!(memory.max_size, 2);
        assert_eq!(memory.default_ttl, Duration::ZERO);
        assert_eq!(memory.cleanup_interval, Duration::from_secs(5));
        assert_eq!(config.remote_cache().prefix, "firefly");
        assert_eq!(config.cache_middleware().ttl, Duration::from_secs(30));
        assert_eq!(config.logging().level, LogLevel::Debug);
        assert_eq!(config.timing().slow_request_threshold, Duration::from_millis(250));
        assert!(config.recovery().panic_stack_trace);
        assert_eq!(config.remote.pool_max, 4);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = PipelineConfig::from_toml_str("[cache]\nmax_size = 10\n").unwrap();
        assert_eq!(config.cache.max_size, 10);
        assert_eq!(config.cache.default_ttl_secs, 300);
        assert_eq!(config.cache.key_prefix, "toolpipe");
    }

    #[test]
    fn rejects_unknown_keys_and_levels() {
        assert!(matches!(
            PipelineConfig::from_toml_str("[cache]\nmax_entries = 1\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str("[logging]\nlevel = \"verbose\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = PipelineConfig::from_toml_str("[timing]\nslow_request_threshold_ms = 0\n")
            .unwrap_err();
        assert!(err.to_string().contains("timing.slow_request_threshold_ms"));

        let err = PipelineConfig::from_toml_str("[cache]\nkey_prefix = \"app:\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "cache.key_prefix", .. }));

        let err = PipelineConfig::from_toml_str("[remote]\nurl = \" \"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "remote.url", .. }));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"warn\"").unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.logging.level, LogLevel::Warn);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("absent.toml"));
    }
}
