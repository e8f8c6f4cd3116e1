use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings file looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "reloader.toml";

/// Top-level configuration loaded from reloader.toml.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReloaderConfig {
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Cause-chain entries shown per error line.
    pub tb_limit: u32,
    /// Faulted restarts allowed before exiting.
    pub retries: u32,
    pub retry_delay_secs: u64,
    /// Poll interval for finish and change detection.
    pub rate_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tb_limit: 3,
            retries: 5,
            retry_delay_secs: 5,
            rate_secs: 2,
        }
    }
}

impl MonitorConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn rate(&self) -> Duration {
        Duration::from_secs(self.rate_secs)
    }

    /// Replace file values with any values given on the command line.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(tb_limit) = overrides.tb_limit {
            self.tb_limit = tb_limit;
        }
        if let Some(retries) = overrides.retries {
            self.retries = retries;
        }
        if let Some(retry_delay) = overrides.retry_delay_secs {
            self.retry_delay_secs = retry_delay;
        }
        if let Some(rate) = overrides.rate_secs {
            self.rate_secs = rate;
        }
    }
}

/// Command-line values that take precedence over the settings file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub tb_limit: Option<u32>,
    pub retries: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub rate_secs: Option<u64>,
}

/// Errors that can occur while loading the settings file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ReloaderConfig {
    /// Load settings from `explicit`, or from `reloader.toml` if it exists.
    ///
    /// An explicit path must exist; the implicit file is optional and its
    /// absence yields the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let implicit = Path::new(DEFAULT_CONFIG_FILE);
                if implicit.exists() {
                    Self::from_file(implicit)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
