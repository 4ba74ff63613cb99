//! ROM bootloader protocol implementation.
//!
//! Layered bottom-up: [`checksum`] and [`frame`] are pure byte codecs,
//! [`command`] builds typed command payloads, and [`session`] pairs each
//! command with its response over a [`Port`](crate::port::Port).

pub mod checksum;
pub mod command;
pub mod frame;
pub mod session;

// Re-export common types
pub use {
    command::{BeginParams, Command, CommandType, FLASH_BLOCK_SIZE},
    frame::{Decoded, Frame, FrameError, decode, encode},
    session::{Response, Session, SessionConfig},
};
