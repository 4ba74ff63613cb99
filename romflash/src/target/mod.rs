//! Chip targets.
//!
//! [`chip`] describes the supported families and run settings; [`esp`] drives
//! the ESP8266/ESP32 ROM bootloader.

pub mod chip;
pub mod esp;

pub use {
    chip::{CHIP_MAGIC_REG, ChipConfig, ChipFamily},
    esp::{EspFlasher, FlashState, ResetTiming},
};
