//! Serial port discovery and classification.
//!
//! Ports are classified by USB VID/PID first. When the bridge is unknown,
//! the manufacturer and product strings are searched for common bridge and
//! chip names.

use crate::error::{Error, Result};
use crate::port::PortInfo;
use crate::target::ChipFamily;

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// Known USB bridge/device kinds found on ESP boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceKind {
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Espressif native USB serial/JTAG.
    Espressif,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches any product.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        DeviceKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], DeviceKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        DeviceKind::Ftdi,
    ),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], DeviceKind::Prolific),
    (0x303A, &[], DeviceKind::Espressif),
];

/// Lower-case substrings of manufacturer/product strings.
const KNOWN_DESCRIPTIONS: &[(&str, DeviceKind)] = &[
    ("cp210", DeviceKind::Cp210x),
    ("silicon labs", DeviceKind::Cp210x),
    ("ch340", DeviceKind::Ch340),
    ("ch341", DeviceKind::Ch340),
    ("qinheng", DeviceKind::Ch340),
    ("ftdi", DeviceKind::Ftdi),
    ("pl2303", DeviceKind::Prolific),
    ("prolific", DeviceKind::Prolific),
    ("espressif", DeviceKind::Espressif),
    ("esp32", DeviceKind::Espressif),
    ("esp8266", DeviceKind::Espressif),
];

impl DeviceKind {
    /// Classify a VID/PID combination.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, device) in KNOWN_USB_DEVICES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *device;
            }
        }
        Self::Unknown
    }

    /// Classify from a manufacturer or product string.
    #[must_use]
    pub fn from_description(text: &str) -> Self {
        let text = text.to_lowercase();
        KNOWN_DESCRIPTIONS
            .iter()
            .find(|(needle, _)| text.contains(*needle))
            .map_or(Self::Unknown, |(_, device)| *device)
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Espressif => "Espressif USB",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Selection priority; lower sorts first.
    fn rank(self) -> u8 {
        match self {
            Self::Espressif => 0,
            Self::Cp210x | Self::Ch340 => 1,
            Self::Ftdi | Self::Prolific => 2,
            Self::Unknown => 3,
        }
    }
}

/// Discovered serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Classify an enumerated port.
    pub fn from_info(info: PortInfo) -> Self {
        let mut device = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => DeviceKind::from_vid_pid(vid, pid),
            _ => DeviceKind::Unknown,
        };
        if !device.is_known() {
            device = [info.manufacturer.as_deref(), info.product.as_deref()]
                .into_iter()
                .flatten()
                .map(DeviceKind::from_description)
                .find(DeviceKind::is_known)
                .unwrap_or(DeviceKind::Unknown);
        }

        Self {
            name: info.name,
            device,
            vid: info.vid,
            pid: info.pid,
            manufacturer: info.manufacturer,
            product: info.product,
            serial: info.serial_number,
        }
    }

    /// Check if this port is likely attached to an ESP board.
    pub fn is_likely_esp(&self) -> bool {
        self.device
            .is_known()
    }

    /// Chip named in the product or manufacturer string, if any.
    ///
    /// Only a guess from USB descriptors; the bootloader's magic register is
    /// the authority.
    pub fn chip_hint(&self) -> Option<ChipFamily> {
        [self.product.as_deref(), self.manufacturer.as_deref()]
            .into_iter()
            .flatten()
            .find_map(|text| {
                let text = text.to_lowercase();
                if text.contains("esp32") {
                    Some(ChipFamily::Esp32)
                } else if text.contains("esp8266") {
                    Some(ChipFamily::Esp8266)
                } else {
                    None
                }
            })
    }
}

/// Which discovered ports count as flashing candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortFilter {
    /// Extra VID/PID pairs to accept.
    pub usb_devices: Vec<(u16, u16)>,
    /// Accept every port, known or not.
    pub include_all: bool,
    /// Only ports whose name contains this text.
    pub name_contains: Option<String>,
}

impl PortFilter {
    /// Accept every port.
    pub fn all() -> Self {
        Self {
            include_all: true,
            ..Self::default()
        }
    }

    /// Also accept this VID/PID pair.
    #[must_use]
    pub fn with_usb_device(mut self, vid: u16, pid: u16) -> Self {
        self.usb_devices
            .push((vid, pid));
        self
    }

    /// Only accept ports whose name contains `pattern`.
    #[must_use]
    pub fn with_name(mut self, pattern: impl Into<String>) -> Self {
        self.name_contains = Some(pattern.into());
        self
    }

    /// Whether `port` passes the filter.
    pub fn matches(&self, port: &DetectedPort) -> bool {
        if let Some(ref pattern) = self.name_contains {
            if !port
                .name
                .contains(pattern.as_str())
            {
                return false;
            }
        }

        self.include_all
            || port.is_likely_esp()
            || matches!((port.vid, port.pid), (Some(vid), Some(pid)) if self.usb_devices.contains(&(vid, pid)))
    }
}

/// Filter `ports` and order them by preference, known bridges first.
pub fn select_candidates(ports: Vec<DetectedPort>, filter: &PortFilter) -> Vec<DetectedPort> {
    let mut candidates: Vec<_> = ports
        .into_iter()
        .filter(|p| filter.matches(p))
        .collect();
    candidates.sort_by_key(|p| p.device.rank());
    candidates
}

/// Detect all available ports with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    use crate::port::{NativePortEnumerator, PortEnumerator};

    match NativePortEnumerator::list_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|info| {
                let detected = DetectedPort::from_info(info);
                trace!("Found port: {} ({:?})", detected.name, detected.device);
                detected
            })
            .collect(),
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// Detect all available ports (no native transport - always empty).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Ports that pass `filter`, best candidates first.
pub fn list_candidate_ports(filter: &PortFilter) -> Vec<DetectedPort> {
    select_candidates(detect_ports(), filter)
}

/// Pick the single best port.
///
/// Falls back to the first available port when no known bridge is present.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let ports = detect_ports();

    if let Some(port) = select_candidates(ports.clone(), &PortFilter::default())
        .into_iter()
        .next()
    {
        info!("Auto-detected {} on {}", port.device.name(), port.name);
        return Ok(port);
    }

    if let Some(port) = ports
        .into_iter()
        .next()
    {
        info!("Using first available port: {}", port.name);
        return Ok(port);
    }

    Err(Error::DeviceNotFound)
}

/// Pick the single best port (no native transport - not supported).
#[cfg(not(feature = "native"))]
pub fn auto_detect_port() -> Result<DetectedPort> {
    Err(Error::Unsupported(
        "Port enumeration needs the `native` feature".to_string(),
    ))
}

/// Find a port by name pattern.
pub fn find_port_by_pattern(pattern: &str) -> Result<DetectedPort> {
    list_candidate_ports(&PortFilter::all().with_name(pattern))
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound)
}

/// Format a list of detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    let mut result = Vec::new();

    for port in ports {
        let device_info = if port.device.is_known() {
            format!(" [{}]", port.device.name())
        } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" [VID:{vid:04X} PID:{pid:04X}]")
        } else {
            String::new()
        };

        let product_info = port
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();

        result.push(format!("{}{}{}", port.name, device_info, product_info));
    }

    result
}
