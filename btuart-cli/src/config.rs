//! Configuration file support for btuart.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (BTUART_*)
//! 3. Local config file (./btuart.toml)
//! 4. Global config file (~/.config/btuart/config.toml)

use btuart::FlowControl;
use directories::ProjectDirs;
use log::{debug, warn};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Local configuration file name.
pub const LOCAL_CONFIG: &str = "btuart.toml";

/// Serial connection defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
    /// Flow control name ("none", "hardware", "software").
    pub flow_control: Option<String>,
}

impl ConnectionConfig {
    /// Parsed flow control, ignoring unknown names with a warning.
    pub fn flow_control(&self) -> Option<FlowControl> {
        let name = self.flow_control.as_deref()?;
        let flow = FlowControl::from_name(name);
        if flow.is_none() {
            warn!("Unknown flow control '{name}' in config, ignoring");
        }
        flow
    }
}

/// Default firmware locations.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FirmwareConfig {
    /// Baseband service pack (packed image or `.bts`).
    pub baseband: Option<PathBuf>,
    /// BLE add-on script (packed image or `.bts`).
    pub extension: Option<PathBuf>,
    /// Consecutive no-progress transfers tolerated before giving up.
    pub max_stalls: Option<u32>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Firmware settings.
    #[serde(default)]
    pub firmware: FirmwareConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "btuart").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Set values in `other` win.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        if other.connection.flow_control.is_some() {
            self.connection.flow_control = other.connection.flow_control;
        }

        if other.firmware.baseband.is_some() {
            self.firmware.baseband = other.firmware.baseband;
        }
        if other.firmware.extension.is_some() {
            self.firmware.extension = other.firmware.extension;
        }
        if other.firmware.max_stalls.is_some() {
            self.firmware.max_stalls = other.firmware.max_stalls;
        }
    }
}
