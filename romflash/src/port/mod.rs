//! Port abstraction for serial communication.
//!
//! The `Port` trait is the only seam between the protocol layers and the
//! host interface:
//!
//! ```text
//! +--------------------+
//! |   EspFlasher       |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |   Session / Frame  |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+     +--------------------+
//! |    Port trait      +---->+ NativePort         |
//! +--------------------+     |   (serialport)     |
//!                            +--------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use romflash::port::Port;
//! use std::time::Duration;
//!
//! fn example<P: Port>(port: &mut P) -> romflash::Result<()> {
//!     port.write_all_bytes(b"\xC0")?;
//!     let reply = port.read_timeout(Duration::from_millis(100))?;
//!     println!("Received: {reply:02X?}");
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use {
    crate::error::{Error, Result},
    log::trace,
    std::{
        collections::HashSet,
        io::{Read, Write},
        sync::{Mutex, OnceLock},
        time::Duration,
    },
};

/// Default ROM bootloader baud rate.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Serial port configuration.
///
/// Framing is fixed at 8N1 without flow control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Initial read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information from enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Port enumeration.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

/// Size of the scratch buffer used by [`Port::read_timeout`].
const READ_CHUNK: usize = 512;

/// Byte-stream transport to the target.
///
/// Implementors provide raw `Read`/`Write` plus line control; the provided
/// methods turn those into the bounded read and full write the protocol
/// layers rely on.
pub trait Port: Read + Write + Send {
    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Set the baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Whether DTR/RTS can be driven on this transport.
    fn supports_control_lines(&self) -> bool {
        true
    }

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Close the port and release resources. Safe to call more than once.
    fn close(&mut self) -> Result<()>;

    /// Drive both control lines.
    fn set_control_lines(&mut self, dtr: bool, rts: bool) -> Result<()> {
        trace!("Control lines: DTR={dtr} RTS={rts}");
        self.set_dtr(dtr)?;
        self.set_rts(rts)
    }

    /// Read whatever arrives within `timeout`.
    ///
    /// Returns [`Error::Timeout`] when no byte arrived.
    fn read_timeout(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        if self.timeout() != timeout {
            self.set_timeout(timeout)?;
        }

        let mut buf = [0u8; READ_CHUNK];
        match self.read(&mut buf) {
            Ok(0) => Err(Error::Timeout(format!("no data within {timeout:?}"))),
            Ok(n) => {
                trace!("RX {n} bytes: {:02X?}", &buf[..n]);
                Ok(buf[..n].to_vec())
            },
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                Err(Error::Timeout(format!("no data within {timeout:?}")))
            },
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        trace!("TX {} bytes", buf.len());
        self.write_all(buf)
            .map_err(Error::WriteFailed)?;
        self.flush()
            .map_err(Error::WriteFailed)
    }
}

fn open_ports() -> &'static Mutex<HashSet<String>> {
    static OPEN_PORTS: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    OPEN_PORTS.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Process-wide claim on a port name.
///
/// Only one lease per name can exist at a time; the claim is released when
/// the lease is dropped.
#[derive(Debug)]
pub struct PortLease {
    name: String,
}

impl PortLease {
    /// Claim `name`, failing with [`Error::PortBusy`] if it is already held.
    pub fn acquire(name: &str) -> Result<Self> {
        let mut ports = open_ports()
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !ports.insert(name.to_string()) {
            return Err(Error::PortBusy(name.to_string()));
        }
        trace!("Acquired lease on {name}");
        Ok(Self {
            name: name.to_string(),
        })
    }

    /// Name of the leased port.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        let mut ports = open_ports()
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        ports.remove(&self.name);
        trace!("Released lease on {}", self.name);
    }
}

// Re-export the native implementation
#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
