//! Chip families and per-run flashing configuration.

use {
    crate::{protocol::SessionConfig, target::esp::ResetTiming},
    std::fmt,
};

/// Register holding the ROM magic value that identifies the chip.
pub const CHIP_MAGIC_REG: u32 = 0x4000_1000;

/// Supported chip families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChipFamily {
    /// ESP8266.
    Esp8266,
    /// ESP32.
    Esp32,
    /// Detect from the magic register after sync.
    #[default]
    Auto,
}

impl ChipFamily {
    /// ROM magic value, `None` for [`ChipFamily::Auto`].
    #[must_use]
    pub fn magic(self) -> Option<u32> {
        match self {
            Self::Esp8266 => Some(0xFFF0_C101),
            Self::Esp32 => Some(0x00F0_1D83),
            Self::Auto => None,
        }
    }

    /// Map a magic register value to a family.
    pub fn from_magic(magic: u32) -> Option<Self> {
        [Self::Esp8266, Self::Esp32]
            .into_iter()
            .find(|family| family.magic() == Some(magic))
    }

    /// Get the chip family from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name
            .to_lowercase()
            .as_str()
        {
            "esp8266" => Some(Self::Esp8266),
            "esp32" => Some(Self::Esp32),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }

    /// Whether the ROM needs SpiAttach before flash commands.
    #[must_use]
    pub fn needs_spi_attach(self) -> bool {
        matches!(self, Self::Esp32)
    }
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Esp8266 => write!(f, "ESP8266"),
            Self::Esp32 => write!(f, "ESP32"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// Settings for one flashing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipConfig {
    /// Chip family; `Auto` reads the magic register after sync.
    pub family: ChipFamily,
    /// Protocol timeouts and retry limits.
    pub session: SessionConfig,
    /// Bootloader entry timing.
    pub reset: ResetTiming,
    /// Flash address the image is written to.
    pub offset: u32,
    /// Reboot into the application after FlashEnd.
    pub reboot: bool,
    /// Also report `Erasing` and `Verifying` stages.
    pub stage_events: bool,
}

impl ChipConfig {
    /// Create a new chip configuration for the given family.
    pub fn new(family: ChipFamily) -> Self {
        Self {
            family,
            session: SessionConfig::default(),
            reset: ResetTiming::default(),
            offset: 0,
            reboot: true,
            stage_events: false,
        }
    }

    /// Set the protocol timeouts.
    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Set the bootloader entry timing.
    #[must_use]
    pub fn with_reset(mut self, reset: ResetTiming) -> Self {
        self.reset = reset;
        self
    }

    /// Set the flash offset.
    #[must_use]
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Choose whether the target reboots after flashing.
    #[must_use]
    pub fn with_reboot(mut self, reboot: bool) -> Self {
        self.reboot = reboot;
        self
    }

    /// Report `Erasing` and `Verifying` progress stages.
    #[must_use]
    pub fn with_stage_events(mut self, enabled: bool) -> Self {
        self.stage_events = enabled;
        self
    }
}

impl Default for ChipConfig {
    fn default() -> Self {
        Self::new(ChipFamily::default())
    }
}
