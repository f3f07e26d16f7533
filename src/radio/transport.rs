//! Line-oriented serial transport for the LoStik.
//!
//! The RN2903 speaks CRLF-terminated ASCII lines at 57600 baud over a
//! CH340 USB-serial bridge. Exactly one command may be outstanding at a
//! time; there is no pipelining. Reads are bounded by the configured
//! timeout, and a timeout is reported as `Ok(None)` because the gateway
//! loop polls on it.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use log::{debug, info};
use serialport::{SerialPort, SerialPortType};

use super::RadioError;

/// The LoStik's CH340 USB-serial bridge, VID:PID 1A86:7523. Stable
/// across units, which lets us find the device without guessing ports.
const LOSTIK_VID: u16 = 0x1A86;
const LOSTIK_PID: u16 = 0x7523;

/// Synchronous command/response exchange over the serial link.
///
/// `read_line` returns `Ok(None)` when no complete line arrived within
/// the timeout; callers treat that as "no data yet", not as a failure.
pub trait LineTransport {
    /// Write one ASCII line, terminated with CRLF.
    fn send_line(&mut self, line: &str) -> Result<(), RadioError>;

    /// Read one line, blocking up to the configured timeout.
    fn read_line(&mut self) -> Result<Option<String>, RadioError>;

    /// The bounded read interval.
    fn timeout(&self) -> Duration;
}

/// [`LineTransport`] over a physical serial port.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    timeout: Duration,
    /// Bytes read past the last complete line, kept for the next call.
    pending: Vec<u8>,
}

impl SerialTransport {
    /// Open a serial port in the RN2903's line mode: 8N1 at the
    /// configured baud rate.
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, RadioError> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .open()
            .map_err(|source| RadioError::ConnectionFailure {
                port: port_name.to_string(),
                source,
            })?;
        info!("Opened serial port {} at {} baud", port_name, baud_rate);
        Ok(Self {
            port,
            timeout,
            pending: Vec::new(),
        })
    }

    /// Find the LoStik by enumerating USB serial ports and matching its
    /// VID:PID. Errors with [`RadioError::DeviceNotFound`] when no port
    /// matches.
    pub fn detect_port() -> Result<String, RadioError> {
        let ports = serialport::available_ports().map_err(|e| {
            RadioError::Io(std::io::Error::new(ErrorKind::Other, e.to_string()))
        })?;
        for p in ports {
            if let SerialPortType::UsbPort(usb) = &p.port_type {
                if usb.vid == LOSTIK_VID && usb.pid == LOSTIK_PID {
                    info!("LoStik detected on port: {}", p.port_name);
                    return Ok(p.port_name);
                }
            }
        }
        Err(RadioError::DeviceNotFound)
    }
}

impl LineTransport for SerialTransport {
    fn send_line(&mut self, line: &str) -> Result<(), RadioError> {
        debug!("serial >> {}", line);
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\r\n")?;
        self.port.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>, RadioError> {
        let mut byte = [0u8; 1];
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                debug!("serial << {}", crate::logutil::escape_log(&line));
                return Ok(Some(line));
            }
            match self.port.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(n) => self.pending.extend_from_slice(&byte[..n]),
                // A timed-out read with a partial line keeps the bytes
                // for the next call; either way there is no line yet.
                Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(None),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(RadioError::Io(e)),
            }
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
