//! Front-end configuration file.
//!
//! Read from `<config dir>/cyclehost/config.toml` (or `--config`). Every
//! field is optional; command-line flags override what the file sets.
//!
//! ```toml
//! [run]
//! seconds = 5.0
//! trace_lines = 64
//!
//! [scheduler]
//! pause_poll_ms = 16
//! join_timeout_ms = 1000
//! capture_attempts = 3
//!
//! [scheduler.clock]
//! max_lag_ms = 250
//! ```

use std::path::{Path, PathBuf};

use cyclehost_core::scheduler::SchedulerConfig;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub run: RunDefaults,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunDefaults {
    /// Wall-clock seconds to run when `--seconds` is not given.
    pub seconds: f64,
    /// Overrides the machine's master clock.
    pub hz: Option<u64>,
    /// Trace lines kept and printed with `--trace`.
    pub trace_lines: usize,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            seconds: 2.0,
            hz: None,
            trace_lines: 32,
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cyclehost").join("config.toml"))
    }

    /// Load `explicit`, or the default path if it exists, or defaults.
    ///
    /// A missing explicit file is an error; a missing default file is not.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigFileError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigFileError::Io {
            path: path.clone(),
            source,
        })?;
        let config = Self::parse(&text).map_err(|source| ConfigFileError::Parse {
            path: path.clone(),
            source,
        })?;
        log::debug!("config: loaded {}", path.display());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}
