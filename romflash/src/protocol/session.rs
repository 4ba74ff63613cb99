//! Request/response pairing over a [`Port`].
//!
//! Every call writes one encoded frame, then reads until a valid response for
//! the same command arrives or the command's timeout elapses. Leading noise,
//! malformed frames and responses to other commands are dropped on the way.

use {
    crate::{
        error::{Error, Rejection, Result},
        port::Port,
        protocol::{
            command::{BeginParams, Command, CommandType, FLASH_BLOCK_SIZE},
            frame::{Decoded, Frame, decode, noise_len, resync_offset},
        },
        target::{CHIP_MAGIC_REG, ChipFamily},
    },
    byteorder::{ByteOrder, LittleEndian},
    log::{debug, info, trace, warn},
    std::{
        thread,
        time::{Duration, Instant},
    },
};

/// Pause after a successful sync so the remaining sync replies arrive before
/// the buffers are flushed.
const SYNC_SETTLE: Duration = Duration::from_millis(50);

/// Timeouts and retry limits for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Number of sync bursts sent before giving up.
    pub sync_attempts: u32,
    /// Wait per sync burst.
    pub sync_timeout: Duration,
    /// Wait for the FlashBegin response (covers the erase).
    pub begin_timeout: Duration,
    /// Wait for each FlashData response.
    pub data_timeout: Duration,
    /// Wait for the FlashEnd response.
    pub end_timeout: Duration,
    /// Wait for register, SPI attach and baud rate commands.
    pub command_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sync_attempts: 10,
            sync_timeout: Duration::from_secs(1),
            begin_timeout: Duration::from_secs(5),
            data_timeout: Duration::from_secs(5),
            end_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(3),
        }
    }
}

impl SessionConfig {
    /// Set the sync retry bound and per-attempt wait.
    #[must_use]
    pub fn with_sync(mut self, attempts: u32, timeout: Duration) -> Self {
        self.sync_attempts = attempts;
        self.sync_timeout = timeout;
        self
    }

    /// Set the FlashBegin timeout.
    #[must_use]
    pub fn with_begin_timeout(mut self, timeout: Duration) -> Self {
        self.begin_timeout = timeout;
        self
    }

    /// Set the FlashData timeout.
    #[must_use]
    pub fn with_data_timeout(mut self, timeout: Duration) -> Self {
        self.data_timeout = timeout;
        self
    }

    /// Set the FlashEnd timeout.
    #[must_use]
    pub fn with_end_timeout(mut self, timeout: Duration) -> Self {
        self.end_timeout = timeout;
        self
    }

    /// Set the timeout for auxiliary commands.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// A decoded response frame.
///
/// The payload ends with `[status, error]`. Payloads of at least six bytes
/// start with a 32-bit little-endian value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Echoed command id.
    pub command: u8,
    /// Leading 32-bit value, 0 when the payload is too short to carry one.
    pub value: u32,
    /// Status byte; 0 is an acknowledgement.
    pub status: u8,
    /// ROM error code.
    pub error: u8,
    /// Payload without the trailing status bytes.
    pub data: Vec<u8>,
}

impl Response {
    /// Interpret a frame as a response. Returns `None` when the payload is
    /// too short to hold the status bytes.
    pub fn from_frame(frame: Frame) -> Option<Self> {
        let command = frame.command();
        let mut data = frame.into_payload();
        if data.len() < 2 {
            return None;
        }
        let error = data.pop()?;
        let status = data.pop()?;
        let value = if data.len() >= 4 {
            LittleEndian::read_u32(&data[..4])
        } else {
            0
        };
        Some(Self {
            command,
            value,
            status,
            error,
            data,
        })
    }

    /// Whether the target accepted the command.
    pub fn is_ack(&self) -> bool {
        self.status == 0
    }

    fn rejection(&self) -> Option<Rejection> {
        (!self.is_ack()).then_some(Rejection::Nack {
            status: self.status,
            error: self.error,
        })
    }
}

/// A protocol session borrowing an open port.
pub struct Session<'a, P: Port> {
    port: &'a mut P,
    config: SessionConfig,
    rx: Vec<u8>,
}

impl<'a, P: Port> Session<'a, P> {
    /// Create a session over `port`.
    pub fn new(port: &'a mut P, config: SessionConfig) -> Self {
        Self {
            port,
            config,
            rx: Vec::new(),
        }
    }

    /// Session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Synchronize with the bootloader.
    ///
    /// Any bytes received after a sync burst count as an answer. Fails with
    /// [`Error::SyncFailed`] once `sync_attempts` bursts went unanswered.
    pub fn sync(&mut self) -> Result<()> {
        let frame = Command::Sync.to_frame().encode()?;
        let attempts = self.config.sync_attempts;

        for attempt in 1..=attempts {
            debug!("Sync attempt {attempt}/{attempts}");
            self.port.write_all_bytes(&frame)?;

            match self.port.read_timeout(self.config.sync_timeout) {
                Ok(bytes) if !bytes.is_empty() => {
                    info!("Bootloader answered sync after {attempt} attempt(s)");
                    thread::sleep(SYNC_SETTLE);
                    self.port.clear_buffers()?;
                    self.rx.clear();
                    return Ok(());
                },
                Ok(_) | Err(Error::Timeout(_)) => {
                    warn!("No sync response (attempt {attempt}/{attempts})");
                },
                Err(e) => return Err(e),
            }
        }

        Err(Error::SyncFailed { attempts })
    }

    /// Start a flash write of `total` bytes at `offset`.
    ///
    /// Returns the number of 1024-byte blocks that must follow.
    #[allow(clippy::cast_possible_truncation)] // FLASH_BLOCK_SIZE is 1024
    pub fn flash_begin(&mut self, total: usize, offset: u32) -> Result<u32> {
        let size = u32::try_from(total)
            .map_err(|_| Error::InvalidFirmware(format!("{total} bytes exceeds 4 GiB")))?;
        let params = BeginParams::for_size(size, FLASH_BLOCK_SIZE as u32, offset);
        debug!(
            "FlashBegin: size={} blocks={} offset={:#x}",
            params.size, params.blocks, params.offset
        );

        self.execute(&Command::FlashBegin(params), self.config.begin_timeout)?
            .map_err(Error::FlashBeginFailed)?;
        Ok(params.blocks)
    }

    /// Write one block. The block must be exactly 1024 bytes.
    pub fn flash_data(&mut self, block: &[u8], sequence: u32) -> Result<()> {
        if block.len() != FLASH_BLOCK_SIZE {
            return Err(Error::BlockSize {
                expected: FLASH_BLOCK_SIZE,
                actual: block.len(),
            });
        }

        trace!("FlashData: sequence={sequence}");
        let command = Command::FlashData {
            data: block,
            sequence,
        };
        self.execute(&command, self.config.data_timeout)?
            .map_err(|reason| Error::FlashDataFailed { sequence, reason })?;
        Ok(())
    }

    /// Finish the flash write; the target reboots into the application when
    /// `reboot` is set.
    pub fn flash_end(&mut self, reboot: bool) -> Result<()> {
        debug!("FlashEnd: reboot={reboot}");
        self.execute(&Command::FlashEnd { reboot }, self.config.end_timeout)?
            .map_err(Error::FlashEndFailed)?;
        Ok(())
    }

    /// Read a 32-bit register.
    pub fn read_register(&mut self, address: u32) -> Result<u32> {
        let response = self.checked(&Command::ReadRegister { address })?;
        debug!("ReadRegister {address:#010x} = {:#010x}", response.value);
        Ok(response.value)
    }

    /// Write a 32-bit register.
    pub fn write_register(&mut self, address: u32, value: u32, mask: u32, delay_us: u32) -> Result<()> {
        debug!("WriteRegister {address:#010x} = {value:#010x} (mask {mask:#010x})");
        self.checked(&Command::WriteRegister {
            address,
            value,
            mask,
            delay_us,
        })?;
        Ok(())
    }

    /// Attach the SPI flash; `config` 0 selects the default pins.
    pub fn spi_attach(&mut self, config: u32) -> Result<()> {
        debug!("SpiAttach: config={config:#x}");
        self.checked(&Command::SpiAttach { config })?;
        Ok(())
    }

    /// Ask the target to switch baud rate, then follow on the host side.
    pub fn change_baud_rate(&mut self, new_baud: u32, prior_baud: u32) -> Result<()> {
        info!("Changing baud rate to {new_baud}");
        self.checked(&Command::ChangeBaudRate {
            new_baud,
            prior_baud,
        })?;
        self.port.set_baud_rate(new_baud)?;
        self.port.clear_buffers()?;
        self.rx.clear();
        Ok(())
    }

    /// Identify the chip from its ROM magic register.
    pub fn detect_chip(&mut self) -> Result<ChipFamily> {
        let magic = self.read_register(CHIP_MAGIC_REG)?;
        ChipFamily::from_magic(magic)
            .ok_or_else(|| Error::Unsupported(format!("unknown chip magic {magic:#010x}")))
    }

    fn checked(&mut self, command: &Command<'_>) -> Result<Response> {
        let name = command.command_type().name();
        self.execute(command, self.config.command_timeout)?
            .map_err(|reason| Error::CommandFailed {
                command: name,
                reason,
            })
    }

    /// Send `command` and wait for its response.
    ///
    /// The outer error is a transport failure; the inner one is the target
    /// not accepting the command.
    fn execute(
        &mut self,
        command: &Command<'_>,
        timeout: Duration,
    ) -> Result<std::result::Result<Response, Rejection>> {
        let wire = command.to_frame().encode()?;
        self.port.write_all_bytes(&wire)?;

        let Some(response) = self.wait_response(command.command_type(), timeout)? else {
            warn!("{} timed out after {timeout:?}", command.command_type());
            return Ok(Err(Rejection::Timeout));
        };
        match response.rejection() {
            Some(rejection) => {
                warn!("{} rejected: {rejection}", command.command_type());
                Ok(Err(rejection))
            },
            None => Ok(Ok(response)),
        }
    }

    fn wait_response(&mut self, expected: CommandType, timeout: Duration) -> Result<Option<Response>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(response) = self.take_response(expected) {
                return Ok(Some(response));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            match self.port.read_timeout(remaining) {
                Ok(bytes) => self.rx.extend_from_slice(&bytes),
                Err(Error::Timeout(_)) => {},
                Err(e) => return Err(e),
            }
        }
    }

    /// Pull the next response for `expected` out of the receive buffer.
    fn take_response(&mut self, expected: CommandType) -> Option<Response> {
        loop {
            let noise = noise_len(&self.rx);
            if noise > 0 {
                trace!("Dropping {noise} noise bytes");
                self.rx.drain(..noise);
            }

            match decode(&self.rx) {
                Decoded::Incomplete => match resync_offset(&self.rx) {
                    Some(skip) => {
                        debug!("Dropping {skip} bytes of a truncated frame");
                        self.rx.drain(..skip);
                    },
                    None => return None,
                },
                Decoded::Malformed { error, consumed } => {
                    debug!("Dropping malformed frame: {error}");
                    self.rx.drain(..consumed);
                },
                Decoded::Frame { frame, consumed } => {
                    self.rx.drain(..consumed);
                    if frame.command() != expected as u8 {
                        debug!(
                            "Ignoring response for {:#04x} while waiting for {expected}",
                            frame.command()
                        );
                        continue;
                    }
                    match Response::from_frame(frame) {
                        Some(response) => return Some(response),
                        None => debug!("Dropping {expected} response without status bytes"),
                    }
                },
            }
        }
    }
}
