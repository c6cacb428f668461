//! Resolver and version-store settings
//!
//! Settings load from TOML; every field has a default, so an empty file (or no file)
//! yields a working configuration.
//!
//! ```toml
//! [resolver]
//! max_depth = 25
//! batch_size = 50
//! parallel_fetch = true
//! marker_key = "template"
//!
//! [versions]
//! max_commit_retries = 8
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub resolver: ResolverConfig,
    pub versions: VersionConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_versions(mut self, versions: VersionConfig) -> Self {
        self.versions = versions;
        self
    }
}

/// Reference resolution settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Deepest template nesting allowed before `RecursionLimitExceeded`
    pub max_depth: usize,
    /// Most identities requested from the repository in one batch
    pub batch_size: usize,
    /// Fetch batches of one discovery level concurrently
    pub parallel_fetch: bool,
    /// Field that marks a referencing object
    pub marker_key: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: 25,
            batch_size: 50,
            parallel_fetch: true,
            marker_key: "template".to_string(),
        }
    }
}

impl ResolverConfig {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_parallel_fetch(mut self, parallel: bool) -> Self {
        self.parallel_fetch = parallel;
        self
    }

    pub fn with_marker_key(mut self, marker: impl Into<String>) -> Self {
        self.marker_key = marker.into();
        self
    }
}

/// Version state machine settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VersionConfig {
    /// Attempts at a transition when the family changed underneath it
    pub max_commit_retries: usize,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            max_commit_retries: 8,
        }
    }
}

impl VersionConfig {
    pub fn with_max_commit_retries(mut self, retries: usize) -> Self {
        self.max_commit_retries = retries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.resolver.max_depth, 25);
        assert_eq!(config.resolver.marker_key, "template");
        assert_eq!(config.versions.max_commit_retries, 8);
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_str(
            r#"
[resolver]
max_depth = 4
parallel_fetch = false
"#,
        )
        .unwrap();
        assert_eq!(config.resolver.max_depth, 4);
        assert!(!config.resolver.parallel_fetch);
        assert_eq!(config.resolver.batch_size, 50);
    }

    #[test]
    fn test_invalid_toml() {
        let result = Config::from_str("[resolver\nmax_depth = 1");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_builders() {
        let resolver = ResolverConfig::default()
            .with_max_depth(3)
            .with_batch_size(7)
            .with_marker_key("ref");
        assert_eq!(resolver.max_depth, 3);
        assert_eq!(resolver.batch_size, 7);
        assert_eq!(resolver.marker_key, "ref");
    }
}
