//! Runtime configuration.
//!
//! Loaded from an optional TOML file, then overridden from the environment.
//!
//! ```toml
//! close_timeout_ms = 5000
//!
//! [app]
//! uri = "msgpack://127.0.0.1:8001/"
//! base_dir = "/opt/ten/app"
//!
//! [log]
//! level = "debug"
//! json = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default values
pub mod defaults {
    pub const APP_URI: &str = "localhost";
    pub const APP_BASE_DIR: &str = ".";
    pub const LOG_LEVEL: &str = "info";
}

/// Environment variable names
pub mod env_vars {
    pub const APP_URI: &str = "TEN_APP_URI";
    pub const APP_BASE_DIR: &str = "TEN_APP_BASE_DIR";
    pub const LOG_JSON: &str = "TEN_LOG_JSON";
    pub const LOG_LEVEL: &str = "TEN_LOG_LEVEL";
    pub const CLOSE_TIMEOUT_MS: &str = "TEN_CLOSE_TIMEOUT_MS";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub uri: String,
    pub base_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            uri: defaults::APP_URI.to_string(),
            base_dir: defaults::APP_BASE_DIR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub app: AppConfig,
    pub log: LogConfig,
    /// How long callers wait for a graph to close. Unset waits forever.
    pub close_timeout_ms: Option<u64>,
}

impl RuntimeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// File (if any) plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key/value source.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup(env_vars::APP_URI) {
            self.app.uri = uri;
        }
        if let Some(dir) = lookup(env_vars::APP_BASE_DIR) {
            self.app.base_dir = dir;
        }
        if let Some(level) = lookup(env_vars::LOG_LEVEL) {
            self.log.level = level;
        }
        if let Some(json) = lookup(env_vars::LOG_JSON) {
            self.log.json = json.parse().map_err(|_| {
                Error::Config(format!("{} must be true or false, got '{}'", env_vars::LOG_JSON, json))
            })?;
        }
        if let Some(ms) = lookup(env_vars::CLOSE_TIMEOUT_MS) {
            let ms = ms.parse().map_err(|_| {
                Error::Config(format!("{} must be milliseconds, got '{}'", env_vars::CLOSE_TIMEOUT_MS, ms))
            })?;
            self.close_timeout_ms = Some(ms);
        }
        Ok(())
    }

    pub fn close_timeout(&self) -> Option<Duration> {
        self.close_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.app.uri, defaults::APP_URI);
        assert_eq!(config.log.level, "info");
        assert!(config.close_timeout().is_none());
    }

    #[test]
    fn test_partial_toml() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            close_timeout_ms = 250

            [app]
            uri = "msgpack://127.0.0.1:8001/"
            "#,
        )
        .unwrap();
        assert_eq!(config.app.uri, "msgpack://127.0.0.1:8001/");
        assert_eq!(config.app.base_dir, defaults::APP_BASE_DIR);
        assert_eq!(config.close_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (env_vars::APP_URI, "msgpack://10.0.0.1:8001/"),
            (env_vars::LOG_JSON, "true"),
            (env_vars::CLOSE_TIMEOUT_MS, "1000"),
        ]
        .into_iter()
        .collect();

        let mut config = RuntimeConfig::default();
        config
            .apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.app.uri, "msgpack://10.0.0.1:8001/");
        assert!(config.log.json);
        assert_eq!(config.close_timeout_ms, Some(1000));
    }

    #[test]
    fn test_bad_override() {
        let mut config = RuntimeConfig::default();
        let err = config
            .apply_overrides_from(|key| (key == env_vars::LOG_JSON).then(|| "yes".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
