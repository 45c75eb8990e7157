//! Blocking line I/O over a serial port
//!
//! The link manager never touches the OS directly; it goes through
//! [`PortOpener`] so tests can substitute scripted ports.

use std::io;
use std::time::Duration;

use crate::error::TransportError;
use crate::types::PortInfo;

/// An open, line-oriented serial handle
pub trait LinePort: Send {
    /// Write `line` followed by `\n` and flush
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Read one line, without its terminator.
    ///
    /// Returns `Ok(None)` when nothing complete arrived within `timeout`.
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>>;

    /// Discard whatever the board sent that nobody read, such as a reply
    /// that arrived after its command timed out
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Enumerates and opens serial endpoints
pub trait PortOpener: Send + Sync {
    fn list_ports(&self) -> Result<Vec<PortInfo>, TransportError>;

    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn LinePort>, TransportError>;
}

#[cfg(feature = "native")]
pub use native::NativePorts;

#[cfg(feature = "native")]
mod native {
    use std::io::{self, Read, Write};
    use std::time::{Duration, Instant};

    use serialport::{ClearBuffer, SerialPort, SerialPortType};

    use super::{LinePort, PortOpener};
    use crate::error::TransportError;
    use crate::types::PortInfo;

    /// OS serial ports via the `serialport` crate
    #[derive(Debug, Default, Clone, Copy)]
    pub struct NativePorts;

    impl PortOpener for NativePorts {
        fn list_ports(&self) -> Result<Vec<PortInfo>, TransportError> {
            let ports = serialport::available_ports()
                .map_err(|e| TransportError::Internal(format!("port enumeration failed: {e}")))?;

            let mut infos: Vec<PortInfo> = ports.into_iter().map(port_info).collect();
            infos.sort_by(|a, b| a.device.cmp(&b.device));
            Ok(infos)
        }

        fn open(
            &self,
            port: &str,
            baud_rate: u32,
            timeout: Duration,
        ) -> Result<Box<dyn LinePort>, TransportError> {
            let inner = serialport::new(port, baud_rate)
                .timeout(timeout)
                .open()
                .map_err(|e| TransportError::PortUnavailable {
                    port: port.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(Box::new(NativeLinePort { inner }))
        }
    }

    fn port_info(info: serialport::SerialPortInfo) -> PortInfo {
        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                let mut hwid = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);
                if let Some(serial) = &usb.serial_number {
                    hwid.push_str(&format!(" SER={serial}"));
                }
                PortInfo {
                    description: usb
                        .product
                        .clone()
                        .unwrap_or_else(|| info.port_name.clone()),
                    device: info.port_name,
                    hwid,
                    manufacturer: usb.manufacturer,
                    product: usb.product,
                    serial_number: usb.serial_number,
                }
            }
            other => {
                let kind = match other {
                    SerialPortType::PciPort => "PCI",
                    SerialPortType::BluetoothPort => "Bluetooth",
                    _ => "n/a",
                };
                PortInfo {
                    description: info.port_name.clone(),
                    device: info.port_name,
                    hwid: kind.to_string(),
                    manufacturer: None,
                    product: None,
                    serial_number: None,
                }
            }
        }
    }

    struct NativeLinePort {
        inner: Box<dyn SerialPort>,
    }

    impl LinePort for NativeLinePort {
        fn write_line(&mut self, line: &str) -> io::Result<()> {
            self.inner.write_all(line.as_bytes())?;
            self.inner.write_all(b"\n")?;
            self.inner.flush()
        }

        fn clear_input(&mut self) -> io::Result<()> {
            self.inner.clear(ClearBuffer::Input).map_err(io::Error::from)
        }

        fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
            let deadline = Instant::now() + timeout;
            let mut line = Vec::new();
            let mut byte = [0u8; 1];

            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(None);
                }
                self.inner.set_timeout(remaining).map_err(io::Error::from)?;

                match self.inner.read(&mut byte) {
                    Ok(0) => std::thread::sleep(Duration::from_millis(1)),
                    Ok(_) if byte[0] == b'\n' => {
                        let text = String::from_utf8_lossy(&line).trim().to_string();
                        return Ok(Some(text));
                    }
                    Ok(_) => line.push(byte[0]),
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
        }
    }
}
