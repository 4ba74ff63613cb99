//! ESP flash orchestrator.
//!
//! [`EspFlasher`] drives one run at a time through
//! `Idle → Connecting → EnteringBootloader → Syncing → Erasing → Writing →
//! Finalizing → Complete`, or into `Failed` from any step. It owns the port,
//! reports progress through an optional [`ProgressSender`] and checks a
//! [`CancelHandle`] between protocol steps.
//!
//! ## Example
//!
//! ```rust,no_run
//! use romflash::{ChipConfig, ChipFamily, EspFlasher, NativePort, SerialConfig, progress};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (tx, rx) = progress::channel();
//!     let mut flasher =
//!         EspFlasher::<NativePort>::new(ChipConfig::new(ChipFamily::Esp32)).with_progress(tx);
//!
//!     flasher.connect(&SerialConfig::new("/dev/ttyUSB0", 115_200))?;
//!     flasher.enter_bootloader()?;
//!     flasher.flash(&std::fs::read("firmware.bin")?)?;
//!     flasher.disconnect()?;
//!
//!     for event in rx.drain() {
//!         println!("{}: {}%", event.stage, event.percent);
//!     }
//!     Ok(())
//! }
//! ```

use crate::cancel::CancelHandle;
use crate::error::{Error, FailureKind, Result};
#[cfg(feature = "native")]
use crate::port::{NativePort, SerialConfig};
use crate::port::Port;
use crate::progress::{ProgressEvent, ProgressSender, Stage};
use crate::protocol::{FLASH_BLOCK_SIZE, Session};
use crate::target::chip::{ChipConfig, ChipFamily};
use crate::target::esp::reset;
use log::{debug, error, info};
use std::borrow::Cow;
use std::fmt;

/// Where a flasher is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashState {
    /// No port held.
    Idle,
    /// Port open, nothing sent yet.
    Connecting,
    /// Control lines toggled into the ROM bootloader.
    EnteringBootloader,
    /// Waiting for the sync handshake.
    Syncing,
    /// FlashBegin sent; the ROM erases the region.
    Erasing,
    /// Sending blocks.
    Writing,
    /// FlashEnd sent.
    Finalizing,
    /// Run finished.
    Complete,
    /// Run aborted.
    Failed(FailureKind),
}

impl FlashState {
    /// Whether `flash` may start from this state.
    pub fn can_flash(self) -> bool {
        matches!(self, Self::Connecting | Self::EnteringBootloader)
    }
}

impl fmt::Display for FlashState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::EnteringBootloader => write!(f, "entering bootloader"),
            Self::Syncing => write!(f, "syncing"),
            Self::Erasing => write!(f, "erasing"),
            Self::Writing => write!(f, "writing"),
            Self::Finalizing => write!(f, "finalizing"),
            Self::Complete => write!(f, "complete"),
            Self::Failed(kind) => write!(f, "failed ({kind})"),
        }
    }
}

/// Bookkeeping for the blocks of one image.
///
/// `sequence` always equals the number of acknowledged blocks, and
/// `bytes_written` never exceeds `total`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashSession {
    total: usize,
    block_size: usize,
    sequence: u32,
    bytes_written: usize,
}

impl FlashSession {
    /// Start tracking an image of `total` bytes.
    pub fn new(total: usize) -> Self {
        Self {
            total,
            block_size: FLASH_BLOCK_SIZE,
            sequence: 0,
            bytes_written: 0,
        }
    }

    /// Image length.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Block size on the wire.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Sequence number of the next block.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Image bytes acknowledged so far, padding excluded.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Number of blocks the image splits into.
    pub fn blocks(&self) -> usize {
        self.total
            .div_ceil(self.block_size)
    }

    /// Whether every block was acknowledged.
    pub fn is_complete(&self) -> bool {
        self.bytes_written == self.total
    }

    /// Record an acknowledged block holding `len` image bytes.
    fn advance(&mut self, len: usize) {
        debug_assert!(len <= self.block_size);
        self.sequence += 1;
        self.bytes_written += len;
        debug_assert!(self.bytes_written <= self.total);
    }
}

/// Pad a trailing short block with zeros.
fn pad_block(chunk: &[u8]) -> Cow<'_, [u8]> {
    if chunk.len() == FLASH_BLOCK_SIZE {
        Cow::Borrowed(chunk)
    } else {
        let mut block = chunk.to_vec();
        block.resize(FLASH_BLOCK_SIZE, 0);
        Cow::Owned(block)
    }
}

fn notify(progress: Option<&ProgressSender>, event: ProgressEvent) {
    if let Some(tx) = progress {
        tx.send(event);
    }
}

/// ESP8266/ESP32 ROM bootloader flasher.
///
/// Generic over the port type `P`, so tests and other transports can stand in
/// for a serial port.
pub struct EspFlasher<P: Port> {
    port: Option<P>,
    config: ChipConfig,
    state: FlashState,
    chip: Option<ChipFamily>,
    progress: Option<ProgressSender>,
    cancel: CancelHandle,
}

impl<P: Port> EspFlasher<P> {
    /// Create an idle flasher.
    pub fn new(config: ChipConfig) -> Self {
        Self {
            port: None,
            config,
            state: FlashState::Idle,
            chip: None,
            progress: None,
            cancel: CancelHandle::new(),
        }
    }

    /// Report progress through `sender`.
    #[must_use]
    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Observe an externally owned cancellation handle.
    #[must_use]
    pub fn with_cancel(mut self, handle: CancelHandle) -> Self {
        self.cancel = handle;
        self
    }

    /// A handle that cancels this flasher from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel
            .clone()
    }

    /// Current state.
    pub fn state(&self) -> FlashState {
        self.state
    }

    /// Run settings.
    pub fn config(&self) -> &ChipConfig {
        &self.config
    }

    /// Chip family confirmed by the last sync, if any.
    pub fn chip(&self) -> Option<ChipFamily> {
        self.chip
    }

    /// Name of the connected port.
    pub fn port_name(&self) -> Option<&str> {
        self.port
            .as_ref()
            .map(Port::name)
    }

    /// Take ownership of an already open port.
    pub fn connect_port(&mut self, port: P) -> Result<()> {
        self.ensure_idle()?;
        info!("Connected to {}", port.name());
        let message = format!("Connected to {}", port.name());
        self.port = Some(port);
        self.state = FlashState::Connecting;
        self.emit(ProgressEvent::new(Stage::Connecting, 100, message));
        Ok(())
    }

    /// Reset the target into its ROM bootloader.
    ///
    /// Only valid right after connecting. A finished or failed run has to
    /// disconnect and connect again first.
    pub fn enter_bootloader(&mut self) -> Result<()> {
        if self.state != FlashState::Connecting {
            return Err(Error::InvalidState(format!(
                "cannot enter the bootloader while {}",
                self.state
            )));
        }
        let timing = self.config.reset;
        let port = self.port_mut()?;
        if !port.supports_control_lines() {
            let err = Error::Unsupported(format!("{} has no DTR/RTS control", port.name()));
            self.fail(&err);
            return Err(err);
        }

        self.state = FlashState::EnteringBootloader;
        let result = self
            .port_mut()
            .and_then(|port| reset::enter_bootloader(port, &timing));
        if let Err(ref err) = result {
            self.fail(err);
        }
        result
    }

    /// Write `firmware` to flash.
    ///
    /// Valid right after connecting or entering the bootloader. Any failure
    /// ends the run in [`FlashState::Failed`] with a single `Failed` event.
    pub fn flash(&mut self, firmware: &[u8]) -> Result<()> {
        if !self
            .state
            .can_flash()
        {
            return Err(Error::InvalidState(format!(
                "cannot start flashing while {}",
                self.state
            )));
        }

        match self.write_image(firmware) {
            Ok(()) => {
                self.state = FlashState::Complete;
                info!("Flashed {} bytes", firmware.len());
                self.emit(ProgressEvent::new(
                    Stage::Complete,
                    100,
                    format!("Wrote {} bytes", firmware.len()),
                ));
                Ok(())
            },
            Err(err) => {
                self.fail(&err);
                Err(err)
            },
        }
    }

    /// Request cancellation of the current run.
    ///
    /// A connected run that has not started flashing fails right away with
    /// `Failed(Cancelled)`. Use [`cancel_handle`](Self::cancel_handle) to stop
    /// a `flash` call from another thread.
    pub fn cancel(&mut self) {
        self.cancel
            .cancel();
        if matches!(
            self.state,
            FlashState::Connecting | FlashState::EnteringBootloader
        ) {
            info!("Cancelled");
            self.fail(&Error::Cancelled);
        }
    }

    /// Close the port and return to `Idle`.
    ///
    /// Safe in any state, including when nothing is connected. A pending
    /// cancellation is cleared so the next run starts fresh.
    pub fn disconnect(&mut self) -> Result<()> {
        self.state = FlashState::Idle;
        self.chip = None;
        self.cancel
            .reset();
        match self
            .port
            .take()
        {
            Some(mut port) => {
                debug!("Disconnecting from {}", port.name());
                port.close()
            },
            None => Ok(()),
        }
    }

    /// Pulse EN so the target boots its application.
    pub fn hard_reset(&mut self) -> Result<()> {
        let timing = self.config.reset;
        let port = self.port_mut()?;
        if !port.supports_control_lines() {
            return Err(Error::Unsupported(format!(
                "{} has no DTR/RTS control",
                port.name()
            )));
        }
        info!("Resetting target");
        reset::hard_reset(port, &timing)
    }

    /// Sync and read the chip magic register.
    ///
    /// The state is restored afterwards, so a flash can still follow.
    pub fn detect_chip(&mut self) -> Result<ChipFamily> {
        let Self {
            port,
            config,
            state,
            chip,
            ..
        } = self;
        let port = port
            .as_mut()
            .ok_or_else(|| Error::InvalidState("not connected".into()))?;

        let previous = *state;
        *state = FlashState::Syncing;
        let mut session = Session::new(port, config.session);
        let result = session
            .sync()
            .and_then(|()| session.detect_chip());
        *state = previous;

        let family = result?;
        info!("Detected {family}");
        *chip = Some(family);
        Ok(family)
    }

    fn write_image(&mut self, firmware: &[u8]) -> Result<()> {
        if firmware.is_empty() {
            return Err(Error::InvalidFirmware("firmware is empty".into()));
        }

        let Self {
            port,
            config,
            state,
            chip,
            progress,
            cancel,
        } = self;
        let port = port
            .as_mut()
            .ok_or_else(|| Error::InvalidState("not connected".into()))?;
        let progress = progress.as_ref();
        let check_cancel = || {
            if cancel.is_cancelled() {
                info!("Cancelled");
                Err(Error::Cancelled)
            } else {
                Ok(())
            }
        };

        let mut session = Session::new(port, config.session);

        check_cancel()?;
        *state = FlashState::Syncing;
        session.sync()?;

        let family = match config.family {
            ChipFamily::Auto => session.detect_chip()?,
            family => family,
        };
        *chip = Some(family);
        debug!("Flashing {family} at {:#x}", config.offset);

        check_cancel()?;
        *state = FlashState::Erasing;
        if family.needs_spi_attach() {
            session.spi_attach(0)?;
        }
        if config.stage_events {
            notify(progress, ProgressEvent::new(Stage::Erasing, 0, "Erasing flash"));
        }
        let blocks = session.flash_begin(firmware.len(), config.offset)?;
        if config.stage_events {
            notify(progress, ProgressEvent::new(Stage::Erasing, 100, "Erase complete"));
        }

        *state = FlashState::Writing;
        let mut tracker = FlashSession::new(firmware.len());
        debug!("Writing {blocks} blocks");
        for chunk in firmware.chunks(tracker.block_size()) {
            check_cancel()?;
            session.flash_data(&pad_block(chunk), tracker.sequence())?;
            tracker.advance(chunk.len());
            notify(
                progress,
                ProgressEvent::writing(tracker.bytes_written(), tracker.total()),
            );
        }
        debug_assert!(tracker.is_complete());

        check_cancel()?;
        *state = FlashState::Finalizing;
        if config.stage_events {
            notify(progress, ProgressEvent::new(Stage::Verifying, 0, "Finishing"));
        }
        session.flash_end(config.reboot)?;
        if config.stage_events {
            notify(progress, ProgressEvent::new(Stage::Verifying, 100, "Finished"));
        }
        Ok(())
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.port {
            Some(ref port) => Err(Error::InvalidState(format!(
                "already connected to {}",
                port.name()
            ))),
            None => Ok(()),
        }
    }

    fn port_mut(&mut self) -> Result<&mut P> {
        self.port
            .as_mut()
            .ok_or_else(|| Error::InvalidState("not connected".into()))
    }

    fn emit(&self, event: ProgressEvent) {
        notify(self.progress.as_ref(), event);
    }

    fn fail(&mut self, err: &Error) {
        error!("Flashing failed: {err}");
        self.state = FlashState::Failed(err.kind());
        self.emit(ProgressEvent::failed(err));
    }
}

#[cfg(feature = "native")]
impl EspFlasher<NativePort> {
    /// Open a serial port and take ownership of it.
    pub fn connect(&mut self, config: &SerialConfig) -> Result<()> {
        self.ensure_idle()?;
        match NativePort::open(config) {
            Ok(port) => self.connect_port(port),
            Err(err) => {
                self.fail(&err);
                Err(err)
            },
        }
    }
}

impl<P: Port> Drop for EspFlasher<P> {
    fn drop(&mut self) {
        if let Some(mut port) = self
            .port
            .take()
        {
            let _ = port.close();
        }
    }
}
