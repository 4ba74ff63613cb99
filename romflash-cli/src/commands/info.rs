//! Port listing, chip identification and reset command implementations.

use {
    crate::{Cli, config::Config, get_port, resolve_baud, resolve_chip, resolve_session},
    anyhow::{Context, Result},
    console::style,
    romflash::{
        ChipConfig, DetectedPort, EspFlasher, NativePort, SerialConfig, auto_detect_port,
        list_candidate_ports,
    },
};

fn port_json(port: &DetectedPort) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "device": port.device.name(),
        "known": port.device.is_known(),
        "likely_esp": port.is_likely_esp(),
        "chip": port.chip_hint().map(|chip| chip.to_string()),
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
        "serial": port.serial,
    })
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(config: &Config, json: bool, all: bool) -> Result<()> {
    let detected = list_candidate_ports(&config.port_filter(all));

    if json {
        let ports: Vec<serde_json::Value> = detected
            .iter()
            .map(port_json)
            .collect();
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!("{}", style("Serial ports").bold().underlined());

    if detected.is_empty() {
        let hint = if all { "" } else { " (use --all to include unknown devices)" };
        eprintln!("  {}", style(format!("No ports found{hint}")).dim());
        return Ok(());
    }

    for port in &detected {
        let device_type = if port.device.is_known() {
            format!(" [{}]", style(port.device.name()).yellow())
        } else {
            String::new()
        };
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();
        let chip = port
            .chip_hint()
            .map(|chip| format!(" {}", style(format!("<{chip}?>")).magenta()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{device_type}{vid_pid}{product}{chip}",
            style("•").green(),
            style(&port.name).cyan()
        );
    }

    if let Ok(auto_port) = auto_detect_port() {
        eprintln!(
            "\n{} Auto-detected: {}",
            style("→").green().bold(),
            style(&auto_port.name).cyan().bold()
        );
    }

    Ok(())
}

fn open_flasher(cli: &Cli, config: &mut Config) -> Result<EspFlasher<NativePort>> {
    let chip_config = ChipConfig::new(resolve_chip(cli, config)?)
        .with_session(resolve_session(config)?)
        .with_reset(config.reset_timing());
    let port = get_port(cli, config)?;
    let baud = resolve_baud(cli, config);

    let mut flasher = EspFlasher::<NativePort>::new(chip_config);
    flasher
        .connect(&SerialConfig::new(&port, baud))
        .with_context(|| format!("Failed to connect to {port}"))?;
    Ok(flasher)
}

/// Chip identification command implementation.
///
/// Prints the chip name on stdout and resets the target afterwards.
pub(crate) fn cmd_chip_id(cli: &Cli, config: &mut Config) -> Result<()> {
    let mut flasher = open_flasher(cli, config)?;

    flasher.enter_bootloader()?;
    let chip = flasher
        .detect_chip()
        .context("Failed to identify chip")?;
    println!("{chip}");

    flasher.hard_reset()?;
    flasher.disconnect()?;
    Ok(())
}

/// Reset command implementation.
pub(crate) fn cmd_reset(cli: &Cli, config: &mut Config) -> Result<()> {
    let mut flasher = open_flasher(cli, config)?;
    flasher.hard_reset()?;
    if !cli.quiet {
        eprintln!(
            "{} Reset {}",
            style("✓").green(),
            flasher.port_name().unwrap_or_default()
        );
    }
    flasher.disconnect()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, romflash::DeviceKind};

    #[test]
    fn test_port_json_carries_esp_hints() {
        let port = DetectedPort {
            name: "/dev/ttyACM0".to_string(),
            device: DeviceKind::Espressif,
            vid: Some(0x303A),
            pid: Some(0x1001),
            manufacturer: Some("Espressif".to_string()),
            product: Some("ESP32-S3 USB JTAG/serial debug unit".to_string()),
            serial: None,
        };

        let json = port_json(&port);
        assert_eq!(json["likely_esp"], true);
        assert_eq!(json["chip"], "ESP32");
        assert_eq!(json["vid"], 0x303A);
    }

    #[test]
    fn test_port_json_without_hint() {
        let port = DetectedPort {
            name: "/dev/ttyS0".to_string(),
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        };

        let json = port_json(&port);
        assert_eq!(json["likely_esp"], false);
        assert!(json["chip"].is_null());
        assert!(json["vid"].is_null());
    }
}
