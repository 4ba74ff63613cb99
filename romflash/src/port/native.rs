//! [`Port`] over the `serialport` crate for desktop hosts.

use {
    crate::{
        error::{Error, Result},
        port::{Port, PortEnumerator, PortInfo, PortLease, SerialConfig},
    },
    log::{debug, trace},
    serialport::{
        ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortInfo, SerialPortType,
        StopBits,
    },
    std::{
        io::{self, Read, Write},
        time::Duration,
    },
};

/// An open OS handle together with the claim on its name.
///
/// Fields drop in declaration order, so the handle is closed before the name
/// becomes available again.
struct Link {
    serial: Box<dyn SerialPort>,
    _lease: PortLease,
}

/// Serial port opened at 8N1 without flow control, the only framing the ROM
/// bootloader speaks.
///
/// Only one `NativePort` per port name can be open in a process. Every
/// operation after [`close`](Port::close) fails with `NotConnected`.
pub struct NativePort {
    link: Option<Link>,
    name: String,
    timeout: Duration,
    baud_rate: u32,
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "port closed")
}

impl NativePort {
    /// Claim and open the port named in `config`.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let name = config
            .port_name
            .as_str();
        let lease = PortLease::acquire(name)?;

        let serial = serialport::new(name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| Error::OpenFailed {
                port: name.to_string(),
                reason: e.to_string(),
            })?;
        debug!("Opened {name} at {} baud", config.baud_rate);

        Ok(Self {
            link: Some(Link {
                serial,
                _lease: lease,
            }),
            name: name.to_string(),
            timeout: config.timeout,
            baud_rate: config.baud_rate,
        })
    }

    fn serial(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.link
            .as_mut()
            .map(|link| &mut link.serial)
            .ok_or_else(closed)
    }
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.serial()?
            .set_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.serial()?
            .set_baud_rate(baud_rate)?;
        debug!("{} now at {baud_rate} baud", self.name);
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.serial()?
            .clear(ClearBuffer::All)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.serial()?
            .write_data_terminal_ready(level)?;
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.serial()?
            .write_request_to_send(level)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(link) = self
            .link
            .take()
        {
            drop(link);
            debug!("Closed {}", self.name);
        }
        Ok(())
    }
}

impl Drop for NativePort {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.serial()?
            .read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.serial()?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.serial()?
            .flush()
    }
}

fn port_info(port: SerialPortInfo) -> PortInfo {
    let SerialPortType::UsbPort(usb) = port.port_type else {
        trace!("{} is not a USB port", port.port_name);
        return PortInfo {
            name: port.port_name,
            ..PortInfo::default()
        };
    };
    PortInfo {
        name: port.port_name,
        vid: Some(usb.vid),
        pid: Some(usb.pid),
        manufacturer: usb.manufacturer,
        product: usb.product,
        serial_number: usb.serial_number,
    }
}

/// Lists the host's serial ports through `serialport`.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        Ok(serialport::available_ports()?
            .into_iter()
            .map(port_info)
            .collect())
    }
}
