//! Control-line sequences that reset the target.
//!
//! On the usual auto-reset circuit DTR drives GPIO0 (boot mode) and RTS
//! drives EN (chip enable), both inverted.

use {
    crate::{error::Result, port::Port},
    log::debug,
    std::{thread, time::Duration},
};

/// Delays of the bootloader entry sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetTiming {
    /// Hold time with the chip in reset.
    pub reset_hold: Duration,
    /// Hold time after release with GPIO0 low.
    pub boot_hold: Duration,
    /// Settle time after both lines are released.
    pub settle: Duration,
}

impl Default for ResetTiming {
    fn default() -> Self {
        Self::uniform(Duration::from_millis(100))
    }
}

impl ResetTiming {
    /// Use the same delay for all three steps.
    pub fn uniform(delay: Duration) -> Self {
        Self {
            reset_hold: delay,
            boot_hold: delay,
            settle: delay,
        }
    }
}

/// Reset the target into the ROM bootloader.
///
/// Drives (DTR, RTS) through `(false, true)`, `(true, false)`, `(false, false)`
/// with the configured delay after each step.
pub fn enter_bootloader<P: Port + ?Sized>(port: &mut P, timing: &ResetTiming) -> Result<()> {
    debug!("Entering bootloader on {}", port.name());

    port.set_control_lines(false, true)?;
    thread::sleep(timing.reset_hold);

    port.set_control_lines(true, false)?;
    thread::sleep(timing.boot_hold);

    port.set_control_lines(false, false)?;
    thread::sleep(timing.settle);

    Ok(())
}

/// Pulse EN with GPIO0 released, booting the application.
pub fn hard_reset<P: Port + ?Sized>(port: &mut P, timing: &ResetTiming) -> Result<()> {
    debug!("Hard reset on {}", port.name());

    port.set_control_lines(false, true)?;
    thread::sleep(timing.reset_hold);

    port.set_control_lines(false, false)?;
    Ok(())
}
