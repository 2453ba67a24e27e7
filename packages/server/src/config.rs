//! Server settings.
//!
//! Read from the TOML file named by `GEOTRACK_CONFIG` when set, then
//! overridden by the `BIND_ADDR` and `PORT` environment variables. Every
//! field has a default, so an empty or missing file is valid.

use std::path::{Path, PathBuf};

use geotrack_geofence_models::GeofenceConfig;
use geotrack_navigation_models::NavigationConfig;
use geotrack_tracking_models::TrackingConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid PORT value: {0:?}")]
    Port(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,
    pub port: u16,
    /// Seconds between cleanup passes.
    pub cleanup_interval_secs: u64,
    /// Per-channel buffer of the event hub.
    pub stream_buffer: usize,
    pub tracking: TrackingConfig,
    pub geofence: GeofenceConfig,
    pub navigation: NavigationConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 8080,
            cleanup_interval_secs: 3600,
            stream_buffer: 64,
            tracking: TrackingConfig::default(),
            geofence: GeofenceConfig::default(),
            navigation: NavigationConfig::default(),
        }
    }
}

impl Settings {
    /// Loads settings from `GEOTRACK_CONFIG` (if set) and the environment.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Io`] if the config file cannot be read.
    /// * [`ConfigError::Parse`] if it is not valid TOML for [`Settings`].
    /// * [`ConfigError::Port`] if `PORT` is not a port number.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = match std::env::var_os("GEOTRACK_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        settings.apply_overrides(
            std::env::var("BIND_ADDR").ok(),
            std::env::var("PORT").ok(),
        )?;
        Ok(settings)
    }

    /// # Errors
    ///
    /// * [`ConfigError::Io`] if the file cannot be read.
    /// * [`ConfigError::Parse`] if the contents are invalid.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        log::debug!("Reading config from {}", path.display());
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// # Errors
    ///
    /// * [`ConfigError::Parse`] if `contents` is not valid TOML for
    ///   [`Settings`].
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// # Errors
    ///
    /// * [`ConfigError::Port`] if `port` is set but not a valid port.
    pub fn apply_overrides(
        &mut self,
        bind_addr: Option<String>,
        port: Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(bind_addr) = bind_addr {
            self.bind_addr = bind_addr;
        }
        if let Some(port) = port {
            self.port = port.trim().parse().map_err(|_| ConfigError::Port(port))?;
        }
        Ok(())
    }
}
