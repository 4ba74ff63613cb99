//! ESP8266/ESP32 ROM bootloader support.

pub mod flasher;
pub mod reset;

pub use {
    flasher::{EspFlasher, FlashSession, FlashState},
    reset::ResetTiming,
};
