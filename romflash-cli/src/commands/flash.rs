//! Flash command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use romflash::{
    CancelHandle, ChipConfig, ChipFamily, EspFlasher, NativePort, ProgressEvent, SerialConfig,
    Stage, progress,
};
use std::fs;
use std::path::Path;
use std::thread;

use crate::config::Config;
use crate::{
    Cli, CliError, get_port, resolve_baud, resolve_chip, resolve_session, use_fancy_output,
    was_interrupted,
};

/// Arguments of the `flash` subcommand.
pub(crate) struct FlashArgs<'a> {
    pub firmware: &'a Path,
    pub offset: Option<u32>,
    pub no_reset: bool,
    pub no_reboot: bool,
}

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Reflect one flasher event on the progress bar.
fn render(pb: &ProgressBar, event: &ProgressEvent) {
    debug!("{}: {}% {}", event.stage, event.percent, event.message);
    match event.stage {
        Stage::Connecting | Stage::Erasing | Stage::Verifying => {
            pb.set_message(event.message.clone());
        },
        Stage::Writing => {
            pb.set_message("Writing");
            pb.set_position(u64::from(event.percent));
        },
        Stage::Complete => pb.finish_with_message("Complete"),
        Stage::Failed(_) => pb.abandon_with_message(event.message.clone()),
    }
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &mut Config,
    args: &FlashArgs<'_>,
    cancel: &CancelHandle,
) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware {}",
            style("📦").cyan(),
            args.firmware.display()
        );
    }

    let firmware = fs::read(args.firmware)
        .with_context(|| format!("Failed to read firmware {}", args.firmware.display()))?;
    if firmware.is_empty() {
        return Err(CliError::Usage(format!(
            "firmware {} is empty",
            args.firmware.display()
        ))
        .into());
    }

    let chip_config = ChipConfig::new(resolve_chip(cli, config)?)
        .with_session(resolve_session(config)?)
        .with_reset(config.reset_timing())
        .with_offset(
            args.offset
                .or(config.flash.offset)
                .unwrap_or(0),
        )
        .with_reboot(!args.no_reboot && config.flash.reboot.unwrap_or(true));

    if !cli.quiet {
        eprintln!(
            "{} {} bytes for {} at 0x{:08X}",
            style("ℹ").blue(),
            firmware.len(),
            chip_config.family,
            chip_config.offset
        );
    }

    let port = get_port(cli, config)?;
    let baud = resolve_baud(cli, config);
    ensure_not_interrupted()?;
    if !cli.quiet {
        eprintln!("{} Using {port} at {baud} baud", style("🔌").cyan());
    }

    let pb = progress_bar(cli.quiet);
    let (tx, rx) = progress::channel();
    let serial = SerialConfig::new(&port, baud);
    let no_reset = args.no_reset;
    let reboot = chip_config.reboot;
    let cancel = cancel.clone();
    let size = firmware.len();

    let worker = thread::Builder::new()
        .name("flasher".to_string())
        .spawn(move || -> romflash::Result<Option<ChipFamily>> {
            let mut flasher = EspFlasher::<NativePort>::new(chip_config)
                .with_progress(tx)
                .with_cancel(cancel);
            flasher.connect(&serial)?;
            if !no_reset {
                flasher.enter_bootloader()?;
            }
            flasher.flash(&firmware)?;
            let chip = flasher.chip();
            flasher.disconnect()?;
            Ok(chip)
        })
        .context("Failed to start flasher thread")?;

    // Ends once the worker drops its sender
    for event in rx {
        render(&pb, &event);
    }

    let result = worker
        .join()
        .map_err(|_| anyhow::anyhow!("flasher thread panicked"))?;

    match result {
        Ok(chip) => {
            if !cli.quiet {
                let chip = chip.map_or_else(String::new, |c| format!(" on {c}"));
                eprintln!(
                    "\n{} Flashed {size} bytes{chip}",
                    style("🎉").green().bold()
                );
                if !reboot {
                    eprintln!("{}", style("Target left in bootloader mode").dim());
                }
            }
            Ok(())
        },
        Err(romflash::Error::Cancelled) => {
            Err(CliError::Cancelled("flashing cancelled".to_string()).into())
        },
        Err(err) if was_interrupted() => {
            debug!("Run ended after interrupt: {err}");
            Err(CliError::Cancelled("flashing cancelled".to_string()).into())
        },
        Err(err) => Err(anyhow::Error::new(err).context("Flashing failed")),
    }
}
