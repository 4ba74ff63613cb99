//! ROM bootloader commands.
//!
//! Every command is a variant of [`Command`] carrying its own typed parameters,
//! so a payload can only be built in the shape the ROM expects for it.

use {
    crate::protocol::frame::Frame,
    byteorder::{LittleEndian, WriteBytesExt},
    std::fmt,
};

/// Flash block size used by FlashData.
pub const FLASH_BLOCK_SIZE: usize = 1024;

/// Length of the sub-header in front of FlashData/MemData blocks.
pub const DATA_HEADER_LEN: usize = 16;

/// Sync payload: `07 07 12 20` followed by 32 x `55`.
pub const SYNC_PAYLOAD: [u8; 36] = [
    0x07, 0x07, 0x12, 0x20, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55,
    0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55,
    0x55, 0x55, 0x55, 0x55,
];

/// Command identifiers understood by the ROM bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandType {
    /// Start a flash write session (erases the target region).
    FlashBegin = 0x02,
    /// Write one flash block.
    FlashData = 0x03,
    /// Finish a flash write session.
    FlashEnd = 0x04,
    /// Start a RAM download.
    MemBegin = 0x05,
    /// Finish a RAM download, optionally jumping to an entry point.
    MemEnd = 0x06,
    /// Write one RAM block.
    MemData = 0x07,
    /// Synchronize with the bootloader.
    Sync = 0x08,
    /// Write a 32-bit register.
    WriteRegister = 0x09,
    /// Read a 32-bit register.
    ReadRegister = 0x0A,
    /// Attach the SPI flash (ESP32 ROM).
    SpiAttach = 0x0D,
    /// Switch the UART baud rate.
    ChangeBaudRate = 0x0F,
}

impl CommandType {
    /// Map a raw command id back to its type.
    pub fn from_u8(id: u8) -> Option<Self> {
        Some(match id {
            0x02 => Self::FlashBegin,
            0x03 => Self::FlashData,
            0x04 => Self::FlashEnd,
            0x05 => Self::MemBegin,
            0x06 => Self::MemEnd,
            0x07 => Self::MemData,
            0x08 => Self::Sync,
            0x09 => Self::WriteRegister,
            0x0A => Self::ReadRegister,
            0x0D => Self::SpiAttach,
            0x0F => Self::ChangeBaudRate,
            _ => return None,
        })
    }

    /// Human-readable command name.
    pub fn name(self) -> &'static str {
        match self {
            Self::FlashBegin => "FLASH_BEGIN",
            Self::FlashData => "FLASH_DATA",
            Self::FlashEnd => "FLASH_END",
            Self::MemBegin => "MEM_BEGIN",
            Self::MemEnd => "MEM_END",
            Self::MemData => "MEM_DATA",
            Self::Sync => "SYNC",
            Self::WriteRegister => "WRITE_REG",
            Self::ReadRegister => "READ_REG",
            Self::SpiAttach => "SPI_ATTACH",
            Self::ChangeBaudRate => "CHANGE_BAUDRATE",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters shared by FlashBegin and MemBegin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginParams {
    /// Total bytes to be written.
    pub size: u32,
    /// Number of data blocks that will follow.
    pub blocks: u32,
    /// Size of each block.
    pub block_size: u32,
    /// Target address.
    pub offset: u32,
}

impl BeginParams {
    /// Parameters for writing `size` bytes at `offset` in blocks of `block_size`.
    pub fn for_size(size: u32, block_size: u32, offset: u32) -> Self {
        Self {
            size,
            blocks: size.div_ceil(block_size),
            block_size,
            offset,
        }
    }
}

/// A bootloader command with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Sync burst.
    Sync,
    /// Begin a flash session.
    FlashBegin(BeginParams),
    /// One flash block.
    FlashData {
        /// Block bytes, already padded by the caller.
        data: &'a [u8],
        /// Block sequence number.
        sequence: u32,
    },
    /// Finish a flash session.
    FlashEnd {
        /// Reboot into the application afterwards.
        reboot: bool,
    },
    /// Begin a RAM download.
    MemBegin(BeginParams),
    /// One RAM block.
    MemData {
        /// Block bytes.
        data: &'a [u8],
        /// Block sequence number.
        sequence: u32,
    },
    /// Finish a RAM download.
    MemEnd {
        /// Jump to `entry` when true.
        execute: bool,
        /// Entry point address.
        entry: u32,
    },
    /// Read a register.
    ReadRegister {
        /// Register address.
        address: u32,
    },
    /// Write a register.
    WriteRegister {
        /// Register address.
        address: u32,
        /// Value to write.
        value: u32,
        /// Bit mask applied to `value`.
        mask: u32,
        /// Delay after the write, in microseconds.
        delay_us: u32,
    },
    /// Attach the SPI flash.
    SpiAttach {
        /// HSPI pin configuration word; 0 selects the default pins.
        config: u32,
    },
    /// Switch baud rate.
    ChangeBaudRate {
        /// New baud rate.
        new_baud: u32,
        /// Current baud rate (0 when talking to the ROM).
        prior_baud: u32,
    },
}

impl Command<'_> {
    /// Command identifier for this command.
    pub fn command_type(&self) -> CommandType {
        match self {
            Self::Sync => CommandType::Sync,
            Self::FlashBegin(_) => CommandType::FlashBegin,
            Self::FlashData { .. } => CommandType::FlashData,
            Self::FlashEnd { .. } => CommandType::FlashEnd,
            Self::MemBegin(_) => CommandType::MemBegin,
            Self::MemData { .. } => CommandType::MemData,
            Self::MemEnd { .. } => CommandType::MemEnd,
            Self::ReadRegister { .. } => CommandType::ReadRegister,
            Self::WriteRegister { .. } => CommandType::WriteRegister,
            Self::SpiAttach { .. } => CommandType::SpiAttach,
            Self::ChangeBaudRate { .. } => CommandType::ChangeBaudRate,
        }
    }

    /// Build the command payload.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    #[allow(clippy::cast_possible_truncation)] // Blocks are far below 4 GiB
    pub fn payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match *self {
            Self::Sync => buf.extend_from_slice(&SYNC_PAYLOAD),
            Self::FlashBegin(params) | Self::MemBegin(params) => {
                for word in [params.size, params.blocks, params.block_size, params.offset] {
                    buf.write_u32::<LittleEndian>(word).unwrap();
                }
            },
            Self::FlashData { data, sequence } | Self::MemData { data, sequence } => {
                buf.reserve(DATA_HEADER_LEN + data.len());
                for word in [data.len() as u32, sequence, 0, 0] {
                    buf.write_u32::<LittleEndian>(word).unwrap();
                }
                buf.extend_from_slice(data);
            },
            Self::FlashEnd { reboot } => {
                // Non-zero means "stay in the bootloader".
                buf.write_u32::<LittleEndian>(u32::from(!reboot))
                    .unwrap();
            },
            Self::MemEnd { execute, entry } => {
                buf.write_u32::<LittleEndian>(u32::from(!execute))
                    .unwrap();
                buf.write_u32::<LittleEndian>(entry).unwrap();
            },
            Self::ReadRegister { address } => {
                buf.write_u32::<LittleEndian>(address).unwrap();
            },
            Self::WriteRegister {
                address,
                value,
                mask,
                delay_us,
            } => {
                for word in [address, value, mask, delay_us] {
                    buf.write_u32::<LittleEndian>(word).unwrap();
                }
            },
            Self::SpiAttach { config } => {
                buf.write_u32::<LittleEndian>(config).unwrap();
                buf.write_u32::<LittleEndian>(0).unwrap();
            },
            Self::ChangeBaudRate {
                new_baud,
                prior_baud,
            } => {
                buf.write_u32::<LittleEndian>(new_baud).unwrap();
                buf.write_u32::<LittleEndian>(prior_baud).unwrap();
            },
        }
        buf
    }

    /// Build the frame for this command.
    pub fn to_frame(&self) -> Frame {
        Frame::new(self.command_type() as u8, self.payload())
    }
}
