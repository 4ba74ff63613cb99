//! Host-side utilities for serial port discovery.

use crate::device::{DetectedPort, PortFilter};

/// Discover all available serial ports.
#[must_use]
pub fn discover_ports() -> Vec<DetectedPort> {
    crate::device::detect_ports()
}

/// Discover serial ports accepted by `filter`, best candidates first.
#[must_use]
pub fn list_candidate_ports(filter: &PortFilter) -> Vec<DetectedPort> {
    crate::device::list_candidate_ports(filter)
}

/// Auto-detect a single best serial port candidate.
pub fn auto_detect_port() -> crate::Result<DetectedPort> {
    crate::device::auto_detect_port()
}
