//! Runtime settings, layered from defaults, settings files and environment.

use crate::error::{Result, WatchError};
use crate::notify::TRUNCATION_MARKER;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything the watch daemon can be tuned with.
///
/// Every field has a default, so an empty settings source is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Root of the persisted tables and the content cache.
    pub data_dir: PathBuf,
    /// Seconds between poll passes.
    pub poll_interval_secs: u64,
    /// Per-probe timeout in seconds.
    pub request_timeout_secs: u64,
    /// Longest notification the host accepts, in characters.
    pub message_limit: usize,
    /// `User-Agent` sent with every probe.
    pub user_agent: String,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            poll_interval_secs: 300,
            request_timeout_secs: 10,
            message_limit: 2000,
            user_agent: concat!("sitewatch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl WatchSettings {
    /// Start building settings from sources.
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::new()
    }

    /// Time between poll passes.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Per-probe timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check the settings are usable.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::InvalidSettings`] for a zero interval or timeout,
    /// or a message limit too small to hold the truncation marker.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(WatchError::InvalidSettings(
                "poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(WatchError::InvalidSettings(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        let marker = TRUNCATION_MARKER.chars().count();
        if self.message_limit <= marker {
            return Err(WatchError::InvalidSettings(format!(
                "message_limit must be greater than {}",
                marker
            )));
        }
        Ok(())
    }
}

/// Layers settings sources: defaults, then files in order, then environment.
///
/// # Examples
///
/// ```rust,no_run
/// use sitewatch::settings::WatchSettings;
///
/// # fn example() -> sitewatch::error::Result<()> {
/// // SITEWATCH_POLL_INTERVAL_SECS=60 -> poll_interval_secs = 60
/// let settings = WatchSettings::builder()
///     .with_file("sitewatch.yaml")
///     .with_env_overrides("SITEWATCH", "__")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    file_paths: Vec<PathBuf>,
    env_prefix: Option<String>,
    env_separator: Option<String>,
}

impl SettingsBuilder {
    /// Create a builder with no sources beyond the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a settings file. Later files override earlier ones.
    ///
    /// Supported formats: YAML (.yaml, .yml), TOML (.toml), JSON (.json)
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_paths.push(path.into());
        self
    }

    /// Read overrides from environment variables named `<prefix>_<KEY>`.
    ///
    /// `separator` splits nested keys.
    pub fn with_env_overrides(mut self, prefix: &str, separator: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self.env_separator = Some(separator.to_string());
        self
    }

    /// Load, merge and validate.
    ///
    /// # Errors
    ///
    /// Returns an error if a file is missing or unreadable, a value has the
    /// wrong type, or validation fails.
    pub fn build(self) -> Result<WatchSettings> {
        let mut builder = Config::builder();

        for path in &self.file_paths {
            validate_extension(path)?;
            if !path.exists() {
                return Err(WatchError::Settings(format!(
                    "settings file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path.clone()).required(true));
        }

        if let (Some(prefix), Some(separator)) = (self.env_prefix, self.env_separator) {
            builder = builder.add_source(
                Environment::with_prefix(&prefix)
                    .prefix_separator("_")
                    .separator(&separator)
                    .try_parsing(true),
            );
        }

        let settings: WatchSettings = builder
            .build()
            .map_err(|e| WatchError::Settings(format!("failed to build settings: {}", e)))?
            .try_deserialize()
            .map_err(|e| WatchError::Settings(format!("failed to deserialize settings: {}", e)))?;

        settings.validate()?;
        Ok(settings)
    }
}

fn validate_extension(path: &Path) -> Result<()> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml" | "yml" | "toml" | "json") => Ok(()),
        Some(ext) => Err(WatchError::Settings(format!(
            "unsupported settings format '.{}': {}",
            ext,
            path.display()
        ))),
        None => Err(WatchError::Settings(format!(
            "settings file has no extension: {}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = WatchSettings::builder().build().unwrap();
        assert_eq!(settings, WatchSettings::default());
        assert_eq!(settings.poll_interval(), Duration::from_secs(300));
        assert_eq!(settings.request_timeout(), Duration::from_secs(10));
        assert_eq!(settings.message_limit, 2000);
        assert!(settings.user_agent.starts_with("sitewatch/"));
    }

    #[test]
    fn test_files_layer_in_order() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("base.yaml");
        let local = dir.path().join("local.toml");
        fs::write(&base, "data_dir: /srv/watch\npoll_interval_secs: 60\n").unwrap();
        fs::write(&local, "poll_interval_secs = 30\n").unwrap();

        let settings = WatchSettings::builder()
            .with_file(&base)
            .with_file(&local)
            .build()
            .unwrap();

        assert_eq!(settings.data_dir, PathBuf::from("/srv/watch"));
        assert_eq!(settings.poll_interval_secs, 30);
        assert_eq!(settings.request_timeout_secs, 10);
    }

    #[test]
    fn test_missing_file() {
        let result = WatchSettings::builder()
            .with_file("/nonexistent/sitewatch.yaml")
            .build();
        assert!(matches!(result, Err(WatchError::Settings(_))));
    }

    #[test]
    fn test_unsupported_extension() {
        let result = WatchSettings::builder().with_file("sitewatch.ini").build();
        assert!(matches!(result, Err(WatchError::Settings(_))));
    }

    #[test]
    fn test_wrong_type() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"poll_interval_secs": "often"}"#).unwrap();

        let result = WatchSettings::builder().with_file(&path).build();
        assert!(matches!(result, Err(WatchError::Settings(_))));
    }

    #[test]
    fn test_validation() {
        let zero_interval = WatchSettings {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_interval.validate(),
            Err(WatchError::InvalidSettings(_))
        ));

        let zero_timeout = WatchSettings {
            request_timeout_secs: 0,
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());

        let tiny_limit = WatchSettings {
            message_limit: 10,
            ..Default::default()
        };
        assert!(tiny_limit.validate().is_err());
    }

    #[test]
    fn test_builder_accumulates() {
        let builder = SettingsBuilder::new()
            .with_file("a.yaml")
            .with_file("b.yaml")
            .with_env_overrides("SITEWATCH", "__");

        assert_eq!(builder.file_paths.len(), 2);
        assert_eq!(builder.env_prefix.as_deref(), Some("SITEWATCH"));
        assert_eq!(builder.env_separator.as_deref(), Some("__"));
    }
}
