//! romflash CLI - Command-line tool for flashing ESP8266/ESP32 chips.
//!
//! ## Features
//!
//! - Write raw firmware images through the ROM bootloader
//! - Identify the attached chip
//! - Interactive serial port selection
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use env_logger::Env;
use log::{debug, warn};
use romflash::{CancelHandle, ChipFamily, SessionConfig};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// romflash - Flash ESP8266/ESP32 chips through their ROM bootloader.
///
/// Environment variables:
///   ROMFLASH_PORT              - Default serial port
///   ROMFLASH_BAUD              - Default baud rate (default: 115200)
///   ROMFLASH_CHIP              - Default chip type (esp8266, esp32, auto)
///   ROMFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "romflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "ROMFLASH_PORT")]
    port: Option<String>,

    /// Baud rate for the serial link [default: 115200].
    #[arg(short, long, global = true, env = "ROMFLASH_BAUD")]
    baud: Option<u32>,

    /// Target chip type [default: auto].
    #[arg(short, long, global = true, env = "ROMFLASH_CHIP")]
    chip: Option<Chip>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "ROMFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// Offer all available ports (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Supported chip types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Chip {
    /// ESP8266.
    Esp8266,
    /// ESP32.
    Esp32,
    /// Detect the chip after syncing.
    Auto,
}

impl From<Chip> for ChipFamily {
    fn from(chip: Chip) -> Self {
        match chip {
            Chip::Esp8266 => ChipFamily::Esp8266,
            Chip::Esp32 => ChipFamily::Esp32,
            Chip::Auto => ChipFamily::Auto,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Write a firmware image to flash.
    Flash {
        /// Raw firmware image.
        firmware: PathBuf,

        /// Flash address to write at (e.g. 0x1000).
        #[arg(long, value_parser = parse_hex_u32)]
        offset: Option<u32>,

        /// Do not toggle DTR/RTS; the target is already in its bootloader.
        #[arg(long)]
        no_reset: bool,

        /// Stay in the bootloader after writing.
        #[arg(long)]
        no_reboot: bool,
    },

    /// Identify the attached chip.
    ChipId,

    /// Reset the target into its application.
    Reset,

    /// List available serial ports.
    ListPorts {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,

        /// Include ports that do not look like a known USB bridge.
        #[arg(long)]
        all: bool,
    },
}

/// Errors raised by the CLI itself, each with its own exit code.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Bad arguments or an ambiguous environment.
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration.
    #[error("{0}")]
    Config(String),
    /// Interrupted by the user.
    #[error("{0}")]
    Cancelled(String),
}

/// Map an error onto the process exit code.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Config(_) => 3,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<romflash::Error>() {
        Some(romflash::Error::DeviceNotFound | romflash::Error::NoDeviceSelected) => 4,
        Some(romflash::Error::Cancelled) => 130,
        Some(romflash::Error::Config(_)) => 3,
        _ => 1,
    }
}

/// Parse a u32 written in decimal or `0x` hex, with optional `_` separators.
fn parse_hex_u32(value: &str) -> Result<u32, String> {
    let cleaned = value.trim().replace('_', "");
    let parsed = if let Some(hex) = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16)
    } else {
        cleaned.parse()
    };
    parsed.map_err(|e| format!("invalid address '{value}': {e}"))
}

fn main() {
    let cli = Cli::parse();

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "romflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = match cli.config_path {
        Some(ref path) => Config::load_from_path(path).map_err(|e| CliError::Config(format!("{e:#}")))?,
        None => Config::load(),
    };

    let cancel = CancelHandle::new();
    let handler_cancel = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        INTERRUPTED.store(true, Ordering::Relaxed);
        handler_cancel.cancel();
    }) {
        warn!("Failed to install Ctrl-C handler: {e}");
    }

    match &cli.command {
        Commands::Flash {
            firmware,
            offset,
            no_reset,
            no_reboot,
        } => commands::flash::cmd_flash(
            cli,
            &mut config,
            &commands::flash::FlashArgs {
                firmware,
                offset: *offset,
                no_reset: *no_reset,
                no_reboot: *no_reboot,
            },
            &cancel,
        ),
        Commands::ChipId => commands::info::cmd_chip_id(cli, &mut config),
        Commands::Reset => commands::info::cmd_reset(cli, &mut config),
        Commands::ListPorts { json, all } => {
            commands::info::cmd_list_ports(&config, *json, *all || cli.list_all_ports)
        },
    }
}

/// Get serial port from CLI args or interactive selection.
fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    // Ask to remember if not a known device and interactive mode
    if !selected.is_known && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

/// Baud rate from CLI/env, then config, then the ROM default.
fn resolve_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config.connection.baud)
        .unwrap_or(romflash::port::DEFAULT_BAUD)
}

/// Chip family from CLI/env, then config, then auto-detection.
fn resolve_chip(cli: &Cli, config: &Config) -> Result<ChipFamily> {
    match cli.chip {
        Some(chip) => Ok(chip.into()),
        None => Ok(config
            .chip()
            .map_err(|e| CliError::Config(e.to_string()))?
            .unwrap_or_default()),
    }
}

fn resolve_session(config: &Config) -> Result<SessionConfig> {
    Ok(config
        .session()
        .map_err(|e| CliError::Config(e.to_string()))?)
}
