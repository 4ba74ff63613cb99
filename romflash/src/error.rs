//! Error types for romflash.

use std::{fmt, io};
use thiserror::Error;

/// Result type for romflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of a failure, reported on terminal `Failed` progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FailureKind {
    /// Opening, reading from or writing to the transport failed.
    Transport,
    /// A command's response never arrived.
    ProtocolTimeout,
    /// The target answered but rejected the command.
    ProtocolNack,
    /// Bytes received from the target could not be framed.
    Frame,
    /// The caller aborted the run.
    Cancelled,
    /// The request itself was invalid (bad state, empty firmware, oversized payload).
    InvalidRequest,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "transport error"),
            Self::ProtocolTimeout => write!(f, "protocol timeout"),
            Self::ProtocolNack => write!(f, "rejected by target"),
            Self::Frame => write!(f, "frame error"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::InvalidRequest => write!(f, "invalid request"),
        }
    }
}

/// Why the target did not accept a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No response frame arrived before the command's timeout.
    Timeout,
    /// The target answered with a non-zero status.
    Nack {
        /// Status byte (non-zero).
        status: u8,
        /// ROM error code accompanying the status.
        error: u8,
    },
}

impl Rejection {
    fn kind(self) -> FailureKind {
        match self {
            Self::Timeout => FailureKind::ProtocolTimeout,
            Self::Nack { .. } => FailureKind::ProtocolNack,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "no response"),
            Self::Nack { status, error } => {
                write!(f, "status {status:#04x}, error {error:#04x}")
            },
        }
    }
}

/// Error type for romflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port reads, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The caller aborted port selection.
    #[error("No device selected")]
    NoDeviceSelected,

    /// No serial port matched the request.
    #[error("Device not found")]
    DeviceNotFound,

    /// The port could not be opened or configured.
    #[error("Failed to open {port}: {reason}")]
    OpenFailed {
        /// Port name.
        port: String,
        /// Underlying failure.
        reason: String,
    },

    /// The port is already held by another run in this process.
    #[error("Port {0} is already in use")]
    PortBusy(String),

    /// Writing to the port failed.
    #[error("Write failed: {0}")]
    WriteFailed(#[source] io::Error),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Payload does not fit the 16-bit length field.
    #[error("Payload too large: {0} bytes (maximum 65535)")]
    PayloadTooLarge(usize),

    /// Malformed bytes received from the target.
    #[error("Malformed frame: {0}")]
    Frame(String),

    /// The bootloader never answered the sync burst.
    #[error("Failed to sync with bootloader after {attempts} attempts")]
    SyncFailed {
        /// Number of sync attempts made.
        attempts: u32,
    },

    /// FlashBegin (erase) was not acknowledged.
    #[error("Flash begin failed: {0}")]
    FlashBeginFailed(Rejection),

    /// A FlashData block was not acknowledged.
    #[error("Writing block {sequence} failed: {reason}")]
    FlashDataFailed {
        /// Sequence number of the failing block.
        sequence: u32,
        /// Why the block failed.
        reason: Rejection,
    },

    /// FlashEnd was not acknowledged.
    #[error("Flash end failed: {0}")]
    FlashEndFailed(Rejection),

    /// Any other command was not acknowledged.
    #[error("{command} failed: {reason}")]
    CommandFailed {
        /// Command name.
        command: &'static str,
        /// Why the command failed.
        reason: Rejection,
    },

    /// A data block has the wrong size.
    #[error("Block must be {expected} bytes, got {actual}")]
    BlockSize {
        /// Required block size.
        expected: usize,
        /// Actual block size.
        actual: usize,
    },

    /// Operation not valid in the current flasher state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Firmware buffer rejected before any transfer.
    #[error("Invalid firmware: {0}")]
    InvalidFirmware(String),

    /// The run was cancelled by the caller.
    #[error("Cancelled")]
    Cancelled,

    /// Unsupported chip or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Classify this error for progress reporting.
    pub fn kind(&self) -> FailureKind {
        match self {
            #[cfg(feature = "native")]
            Self::Serial(_) => FailureKind::Transport,
            Self::Io(_)
            | Self::NoDeviceSelected
            | Self::DeviceNotFound
            | Self::OpenFailed { .. }
            | Self::PortBusy(_)
            | Self::WriteFailed(_)
            | Self::Unsupported(_) => FailureKind::Transport,
            Self::Timeout(_) | Self::SyncFailed { .. } => FailureKind::ProtocolTimeout,
            Self::Frame(_) => FailureKind::Frame,
            Self::FlashBeginFailed(reason)
            | Self::FlashDataFailed { reason, .. }
            | Self::FlashEndFailed(reason)
            | Self::CommandFailed { reason, .. } => reason.kind(),
            Self::Cancelled => FailureKind::Cancelled,
            Self::PayloadTooLarge(_)
            | Self::BlockSize { .. }
            | Self::InvalidState(_)
            | Self::InvalidFirmware(_)
            | Self::Config(_) => FailureKind::InvalidRequest,
        }
    }
}
