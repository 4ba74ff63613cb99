//! Configuration file support for romflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (ROMFLASH_*)
//! 3. Local config file (./romflash.toml, then ./romflash_ports.toml)
//! 4. Global config file (~/.config/romflash/config.toml and ports.toml)

use {
    anyhow::{Context, Result},
    directories::ProjectDirs,
    log::{debug, info, warn},
    romflash::{ChipFamily, PortFilter, ResetTiming, SessionConfig},
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Local configuration file name.
pub const LOCAL_CONFIG: &str = "romflash.toml";

/// Local file holding remembered ports.
pub const LOCAL_PORTS: &str = "romflash_ports.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Flash configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Default chip type ("esp8266", "esp32" or "auto").
    pub chip: Option<String>,
    /// Default flash offset.
    pub offset: Option<u32>,
    /// Reboot into the new firmware after writing.
    pub reboot: Option<bool>,
    /// Number of sync attempts before giving up.
    pub sync_attempts: Option<u32>,
}

/// Reset line configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetConfig {
    /// Delay between DTR/RTS transitions in milliseconds.
    pub delay_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Known USB devices for auto-detection.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usb_device: Vec<UsbDevice>,
    /// Flash settings.
    #[serde(default)]
    pub flash: FlashConfig,
    /// Reset settings.
    #[serde(default)]
    pub reset: ResetConfig,
}

impl Config {
    /// Load configuration from all available sources.
    ///
    /// Unreadable or malformed files are reported and skipped.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_dir) = Self::global_config_dir() {
            for path in [global_dir.join("config.toml"), global_dir.join("ports.toml")] {
                if let Some(global) = Self::load_optional(&path) {
                    config.merge(global);
                }
            }
        }

        // Local files override global ones
        for name in [LOCAL_CONFIG, LOCAL_PORTS] {
            if let Some(local) = Self::load_optional(Path::new(name)) {
                config.merge(local);
            }
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Unlike [`Config::load`], a missing or malformed file is an error.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn load_optional(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    debug!("Loaded config from {}", path.display());
                    Some(config)
                },
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
        ProjectDirs::from("", "", "romflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        for device in other.usb_device {
            if !self.usb_device.contains(&device) {
                self.usb_device.push(device);
            }
        }

        if other.flash.chip.is_some() {
            self.flash.chip = other.flash.chip;
        }
        if other.flash.offset.is_some() {
            self.flash.offset = other.flash.offset;
        }
        if other.flash.reboot.is_some() {
            self.flash.reboot = other.flash.reboot;
        }
        if other.flash.sync_attempts.is_some() {
            self.flash.sync_attempts = other.flash.sync_attempts;
        }

        if other.reset.delay_ms.is_some() {
            self.reset.delay_ms = other.reset.delay_ms;
        }
    }

    /// Chip family named in `[flash] chip`, if any.
    pub fn chip(&self) -> Result<Option<ChipFamily>> {
        self.flash
            .chip
            .as_deref()
            .map(|name| {
                ChipFamily::from_name(name)
                    .ok_or_else(|| anyhow::anyhow!("Unknown chip '{name}' in [flash] chip"))
            })
            .transpose()
    }

    /// Whether a USB device is listed in `[[usb_device]]`.
    pub fn is_known_usb(&self, vid: u16, pid: u16) -> bool {
        self.usb_device
            .iter()
            .any(|device| device.matches(vid, pid))
    }

    /// Port filter accepting the built-in bridges and every configured device.
    pub fn port_filter(&self, include_all: bool) -> PortFilter {
        let filter = self
            .usb_device
            .iter()
            .fold(PortFilter::default(), |filter, device| {
                filter.with_usb_device(device.vid, device.pid)
            });
        PortFilter {
            include_all,
            ..filter
        }
    }

    /// Reset line timing, uniform when `[reset] delay_ms` is set.
    pub fn reset_timing(&self) -> ResetTiming {
        self.reset
            .delay_ms
            .map(|ms| ResetTiming::uniform(Duration::from_millis(ms)))
            .unwrap_or_default()
    }

    /// Protocol session settings.
    pub fn session(&self) -> Result<SessionConfig> {
        let defaults = SessionConfig::default();
        match self.flash.sync_attempts {
            Some(0) => anyhow::bail!("[flash] sync_attempts must be at least 1"),
            Some(attempts) => Ok(defaults.with_sync(attempts, defaults.sync_timeout)),
            None => Ok(defaults),
        }
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> Result<()> {
        let device = UsbDevice { vid, pid };

        // Don't add duplicates
        if self.usb_device.contains(&device) {
            return Ok(());
        }

        // Try to save to local file first, fall back to global
        let path = if Path::new(LOCAL_PORTS).exists() || Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_PORTS)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("ports.toml")
        } else {
            PathBuf::from(LOCAL_PORTS)
        };

        self.usb_device.push(device);
        Self::save_ports(&path, &self.usb_device)?;
        info!("Saved USB device to {}", path.display());

        Ok(())
    }

    fn save_ports(path: &Path, devices: &[UsbDevice]) -> Result<()> {
        let ports = Self {
            usb_device: devices.to_vec(),
            ..Self::default()
        };
        let content = toml::to_string_pretty(&ports)?;
        fs::write(path, content)?;
        Ok(())
    }
}
