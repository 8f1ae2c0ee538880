//! Serial port communication implementation
//!
//! Provides port enumeration, a blocking probe used by the scanner, and
//! [`SerialLink`], which runs the blocking `serialport` I/O on tokio's
//! blocking pool so the engine's tasks stay responsive.

use super::Link;
use async_trait::async_trait;
use fdmlink_core::{CommunicationError, ConnectionError, Error, Result};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-read timeout on the underlying port
const READ_SLICE: Duration = Duration::from_millis(50);

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB 1a86 USB Serial")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set serial number
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }
}

/// List serial ports that look like USB-attached printers.
///
/// - Windows: COM*
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        Error::other(format!("Failed to enumerate ports: {}", e))
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_usb_serial_port(&port.port_name))
        .map(|port| {
            let info = SerialPortInfo::new(&port.port_name, port_description(port));
            match &port.port_type {
                serialport::SerialPortType::UsbPort(usb) => {
                    let mut info = info.with_usb_ids(usb.vid, usb.pid);
                    if let Some(ref mfg) = usb.manufacturer {
                        info = info.with_manufacturer(mfg);
                    }
                    if let Some(ref serial) = usb.serial_number {
                        info = info.with_serial_number(serial);
                    }
                    info
                }
                _ => info,
            }
        })
        .collect())
}

/// Whether a port name matches the USB-serial naming patterns
pub fn is_usb_serial_port(port_name: &str) -> bool {
    if let Some(digits) = port_name.strip_prefix("COM") {
        return !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit());
    }
    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

fn open_port(port: &str, baud_rate: u32) -> Result<Box<dyn serialport::SerialPort>> {
    serialport::new(port, baud_rate)
        .timeout(READ_SLICE)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .flow_control(serialport::FlowControl::None)
        .open()
        .map_err(|e| {
            let err = match e.kind() {
                serialport::ErrorKind::NoDevice => ConnectionError::PortNotFound {
                    port: port.to_string(),
                },
                _ => ConnectionError::FailedToOpen {
                    port: port.to_string(),
                    reason: e.to_string(),
                },
            };
            tracing::warn!("{}", err);
            err.into()
        })
}

/// Open `port`, write each probe line, and collect whatever arrives within
/// `wait`. Blocking; the scanner runs it on the blocking pool.
///
/// Returns `None` when the port cannot be opened or stays silent.
pub fn probe_port(port: &str, baud_rate: u32, probes: &[&str], wait: Duration) -> Option<String> {
    let mut handle = open_port(port, baud_rate).ok()?;
    let _ = handle.clear(serialport::ClearBuffer::Input);
    for probe in probes {
        let line = format!("{}\n", probe);
        if handle.write_all(line.as_bytes()).is_err() {
            return None;
        }
    }
    let _ = handle.flush();

    let deadline = Instant::now() + wait;
    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    while Instant::now() < deadline {
        match handle.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => received.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(_) => break,
        }
    }

    let text = String::from_utf8_lossy(&received).trim().to_string();
    tracing::debug!("Probe {}@{} -> {:?}", port, baud_rate, text);
    (!text.is_empty()).then_some(text)
}

struct PortState {
    port: Option<Box<dyn serialport::SerialPort>>,
    buffer: Vec<u8>,
}

/// A real serial connection
pub struct SerialLink {
    name: String,
    baud_rate: u32,
    state: Arc<Mutex<PortState>>,
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("name", &self.name)
            .field("baud_rate", &self.baud_rate)
            .finish_non_exhaustive()
    }
}

impl SerialLink {
    /// Open `port` at `baud_rate` (8N1, no flow control)
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        let name = port.to_string();
        let handle = tokio::task::spawn_blocking(move || open_port(&name, baud_rate))
            .await
            .map_err(|e| Error::other(format!("serial open task failed: {}", e)))??;
        tracing::info!("Opened {} at {} baud", port, baud_rate);
        Ok(Self {
            name: port.to_string(),
            baud_rate,
            state: Arc::new(Mutex::new(PortState {
                port: Some(handle),
                buffer: Vec::new(),
            })),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PortState) -> Result<T> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || op(&mut state.lock()))
            .await
            .map_err(|e| Error::other(format!("serial I/O task failed: {}", e)))?
    }
}

fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=pos).collect();
    Some(String::from_utf8_lossy(&line).trim_end().to_string())
}

#[async_trait]
impl Link for SerialLink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let data = format!("{}\n", line).into_bytes();
        self.blocking(move |state| {
            let port = state.port.as_mut().ok_or(CommunicationError::LinkClosed)?;
            port.write_all(&data)
                .and_then(|_| port.flush())
                .map_err(|e| {
                    CommunicationError::WriteFailed {
                        reason: e.to_string(),
                    }
                    .into()
                })
        })
        .await
    }

    async fn read_line(&self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            let line = self
                .blocking(|state| {
                    if let Some(line) = take_line(&mut state.buffer) {
                        return Ok(Some(line));
                    }
                    let port = state.port.as_mut().ok_or(CommunicationError::LinkClosed)?;
                    let mut buf = [0u8; 256];
                    match port.read(&mut buf) {
                        Ok(0) => Err(ConnectionError::ConnectionLost {
                            reason: "port returned end of stream".to_string(),
                        }
                        .into()),
                        Ok(n) => {
                            state.buffer.extend_from_slice(&buf[..n]);
                            Ok(take_line(&mut state.buffer))
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
                        Err(e) => Err(CommunicationError::ReadFailed {
                            reason: e.to_string(),
                        }
                        .into()),
                    }
                })
                .await?;
            if line.is_some() || Instant::now() >= deadline {
                return Ok(line);
            }
        }
    }

    async fn discard_input(&self) -> Result<()> {
        self.blocking(|state| {
            state.buffer.clear();
            if let Some(port) = state.port.as_mut() {
                port.clear(serialport::ClearBuffer::Input).map_err(|e| {
                    Error::from(CommunicationError::ReadFailed {
                        reason: e.to_string(),
                    })
                })?;
            }
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.blocking(|state| {
            state.port = None;
            state.buffer.clear();
            Ok(())
        })
        .await?;
        tracing::info!("Closed {} ({} baud)", self.name, self.baud_rate);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usb_serial_port_filter() {
        assert!(is_usb_serial_port("/dev/ttyUSB0"));
        assert!(is_usb_serial_port("/dev/ttyACM1"));
        assert!(is_usb_serial_port("/dev/cu.usbmodem14101"));
        assert!(is_usb_serial_port("COM3"));
        assert!(!is_usb_serial_port("COM"));
        assert!(!is_usb_serial_port("/dev/ttyS0"));
        assert!(!is_usb_serial_port("/dev/cu.Bluetooth-Incoming-Port"));
    }

    #[test]
    fn test_take_line_splits_on_newline() {
        let mut buffer = b"ok T:20.0\r\nok".to_vec();
        assert_eq!(take_line(&mut buffer).as_deref(), Some("ok T:20.0"));
        assert_eq!(take_line(&mut buffer), None);
        assert_eq!(buffer, b"ok");
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let result = SerialLink::open("/dev/ttyUSB-fdmlink-missing", 115200).await;
        let err = result.unwrap_err();
        assert!(err.is_connection_error(), "{}", err);
    }

    #[test]
    fn test_debug_names_the_port() {
        let link = SerialLink {
            name: "/dev/ttyUSB0".to_string(),
            baud_rate: 250000,
            state: Arc::new(Mutex::new(PortState {
                port: None,
                buffer: Vec::new(),
            })),
        };
        let text = format!("{:?}", link);
        assert!(text.contains("/dev/ttyUSB0"));
        assert!(text.contains("250000"));
    }
}
