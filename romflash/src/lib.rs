//! # romflash
//!
//! A library for flashing ESP8266 and ESP32 chips through their ROM
//! bootloader over a serial port.
//!
//! The crate is layered bottom-up:
//!
//! - [`port`]: the byte transport (`serialport` on native platforms)
//! - [`protocol`]: frame codec, typed commands and request/response sessions
//! - [`target`]: the flash orchestrator and its state machine
//! - [`device`]/[`host`]: port discovery and classification
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use romflash::{
//!     ChipConfig, ChipFamily, EspFlasher, NativePort, SerialConfig, auto_detect_port, progress,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = auto_detect_port()?;
//!     let firmware = std::fs::read("firmware.bin")?;
//!
//!     let (tx, rx) = progress::channel();
//!     let worker = std::thread::spawn(move || -> romflash::Result<()> {
//!         let mut flasher = EspFlasher::<NativePort>::new(ChipConfig::new(ChipFamily::Auto))
//!             .with_progress(tx);
//!         flasher.connect(&SerialConfig::new(&port.name, 115_200))?;
//!         flasher.enter_bootloader()?;
//!         flasher.flash(&firmware)
//!     });
//!
//!     for event in rx {
//!         println!("{}: {}% {}", event.stage, event.percent, event.message);
//!     }
//!     worker.join().expect("flasher thread panicked")?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod device;
pub mod error;
pub mod host;
pub mod port;
pub mod progress;
pub mod protocol;
pub mod target;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    cancel::CancelHandle,
    device::{DetectedPort, DeviceKind, PortFilter},
    error::{Error, FailureKind, Rejection, Result},
    host::{auto_detect_port, discover_ports, list_candidate_ports},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    progress::{ProgressEvent, ProgressReceiver, ProgressSender, Stage},
    protocol::{Command, CommandType, Session, SessionConfig},
    target::{ChipConfig, ChipFamily, EspFlasher, FlashState, ResetTiming},
};
