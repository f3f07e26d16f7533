//! Radio session lifecycle: port ownership, firmware verification, and
//! the ordered power-on configuration sequence.
//!
//! The session must reach [`SessionStatus::Ready`] before any traffic
//! flows. Every configuration step requires its exact expected response;
//! the first mismatch faults the session and aborts the remaining steps.
//! A faulted session stays faulted for the life of the process.

use std::time::{Duration, Instant};

use log::{debug, info};

use crate::config::RadioConfig;

use super::transport::LineTransport;
use super::RadioError;

/// Watchdog value of zero disables the radio-side timer; transmit
/// terminal waits are then capped here so no wait is unbounded.
const DISABLED_WDT_CAP: Duration = Duration::from_secs(60);

/// Lifecycle state of the radio session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Initializing,
    Ready,
    Faulted,
}

/// The LoStik's two indicator LEDs and their GPIO pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    /// Blue receive LED (GPIO10).
    Rx,
    /// Red transmit LED (GPIO11).
    Tx,
}

impl Indicator {
    fn pin(self) -> &'static str {
        match self {
            Indicator::Rx => "GPIO10",
            Indicator::Tx => "GPIO11",
        }
    }
}

/// Owns the transport and tracks session state. Mutated only here;
/// the arbiter borrows it for traffic.
pub struct RadioSession<T: LineTransport> {
    transport: T,
    config: RadioConfig,
    status: SessionStatus,
    firmware: Option<String>,
}

impl<T: LineTransport> RadioSession<T> {
    pub fn new(transport: T, config: RadioConfig) -> Self {
        Self {
            transport,
            config,
            status: SessionStatus::Disconnected,
            firmware: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Firmware string reported by the device, once verified.
    pub fn firmware(&self) -> Option<&str> {
        self.firmware.as_deref()
    }

    /// Fail-fast guard used by the arbiter before any operation.
    pub fn ensure_ready(&self) -> Result<(), RadioError> {
        if self.status != SessionStatus::Ready {
            return Err(RadioError::NotReady {
                status: self.status,
            });
        }
        Ok(())
    }

    /// Mark the session faulted. Terminal for the process lifetime.
    pub fn fault(&mut self) {
        self.status = SessionStatus::Faulted;
    }

    /// Run the full power-on sequence: verify firmware, pause the
    /// LoRaWAN stack, then push all network and node parameters in
    /// order. Ends Ready, or Faulted with the failing step's error.
    pub fn initialize(&mut self) -> Result<(), RadioError> {
        self.status = SessionStatus::Initializing;
        match self.run_init_sequence() {
            Ok(()) => {
                self.status = SessionStatus::Ready;
                info!(
                    "Radio initialized: freq={} sf=sf{} bw={} pwr={} cr=4/{} wdt={}ms",
                    self.config.frequency,
                    self.config.spreading_factor,
                    self.config.bandwidth,
                    self.config.power,
                    self.config.coding_rate,
                    self.config.watchdog_timeout_secs * 1000,
                );
                Ok(())
            }
            Err(e) => {
                self.status = SessionStatus::Faulted;
                Err(e)
            }
        }
    }

    fn run_init_sequence(&mut self) -> Result<(), RadioError> {
        // Step 1: the driver is only verified against one firmware build.
        let version = self.command("sys get ver")?;
        if version != self.config.firmware_version {
            return Err(RadioError::FirmwareMismatch {
                expected: self.config.firmware_version.clone(),
                found: version,
            });
        }
        self.firmware = Some(version);

        // Step 2: pause the LoRaWAN MAC to issue raw radio commands.
        // The reply is the pause duration in ms; it varies with device
        // uptime, so any non-zero number is acceptance.
        let pause = self.command("mac pause")?;
        if pause.parse::<u64>().map(|ms| ms == 0).unwrap_or(true) {
            return Err(RadioError::ConfigurationFailure {
                command: "mac pause".to_string(),
                response: pause,
            });
        }

        // Both LEDs on for the parameter writes: "do not disturb".
        self.set_indicator(Indicator::Rx, true)?;
        self.set_indicator(Indicator::Tx, true)?;

        let configured = self.configure_parameters();

        // Indicators are cleared even when a step failed; a partially
        // configured device still answers pin commands.
        let rx_off = self.set_indicator(Indicator::Rx, false);
        let tx_off = self.set_indicator(Indicator::Tx, false);
        configured?;
        rx_off?;
        tx_off?;
        Ok(())
    }

    fn configure_parameters(&mut self) -> Result<(), RadioError> {
        // Steps 3-9: network parameters, identical on every mesh node.
        self.expect_ok(&format!("radio set freq {}", self.config.frequency))?;
        self.expect_ok("radio set mod lora")?;
        self.expect_ok(&format!(
            "radio set crc {}",
            on_off(self.config.crc_header)
        ))?;
        self.expect_ok(&format!(
            "radio set iqi {}",
            on_off(self.config.iq_inversion)
        ))?;
        self.expect_ok(&format!("radio set sync {}", self.config.sync_word))?;
        self.expect_ok(&format!(
            "radio set sf sf{}",
            self.config.spreading_factor
        ))?;
        self.expect_ok(&format!("radio set bw {}", self.config.bandwidth))?;

        // Steps 10-12: node parameters.
        self.expect_ok(&format!("radio set pwr {}", self.config.power))?;
        self.expect_ok(&format!("radio set cr 4/{}", self.config.coding_rate))?;
        self.expect_ok(&format!(
            "radio set wdt {}",
            self.config.watchdog_timeout_secs * 1000
        ))?;
        Ok(())
    }

    /// Switch an indicator LED.
    pub fn set_indicator(&mut self, which: Indicator, on: bool) -> Result<(), RadioError> {
        let cmd = format!("sys set pindig {} {}", which.pin(), u8::from(on));
        self.expect_ok(&cmd)
    }

    /// Signal quality of the most recent reception. The radio only
    /// holds one reading, so rssi and snr are queried back-to-back
    /// before any other command can overwrite them.
    pub fn signal_quality(&mut self) -> Result<(i32, i32), RadioError> {
        let rssi = self.command("radio get rssi")?;
        let rssi: i32 = rssi.trim().parse().map_err(|_| RadioError::Desync {
            context: "radio get rssi",
            line: rssi,
        })?;
        let snr = self.command("radio get snr")?;
        let snr: i32 = snr.trim().parse().map_err(|_| RadioError::Desync {
            context: "radio get snr",
            line: snr,
        })?;
        Ok((rssi, snr))
    }

    /// Send a command and require the literal `ok` acknowledgement.
    pub fn expect_ok(&mut self, cmd: &str) -> Result<(), RadioError> {
        let response = self.command(cmd)?;
        if response != "ok" {
            return Err(RadioError::ConfigurationFailure {
                command: cmd.to_string(),
                response,
            });
        }
        Ok(())
    }

    /// Send one command and wait for its one response line. The wait is
    /// a few transport timeouts long; commands answer promptly and a
    /// silent device is a failed step, not a hang.
    pub fn command(&mut self, cmd: &str) -> Result<String, RadioError> {
        self.transport.send_line(cmd)?;
        let deadline = Instant::now() + self.transport.timeout() * 3;
        loop {
            if let Some(line) = self.transport.read_line()? {
                debug!("{} -> {}", cmd, crate::logutil::escape_log(&line));
                return Ok(line);
            }
            if Instant::now() >= deadline {
                return Err(RadioError::ConfigurationFailure {
                    command: cmd.to_string(),
                    response: "(no response)".to_string(),
                });
            }
        }
    }

    /// One bounded transport read, used by the arbiter while listening
    /// or waiting out a transmit.
    pub(super) fn read_line(&mut self) -> Result<Option<String>, RadioError> {
        self.transport.read_line()
    }

    #[cfg(test)]
    pub(crate) fn transport_ref(&self) -> &T {
        &self.transport
    }

    /// Window the arbiter waits for a transmit terminal response: the
    /// radio-side watchdog plus slack for the serial exchange.
    pub fn terminal_window(&self) -> Duration {
        if self.config.watchdog_timeout_secs == 0 {
            DISABLED_WDT_CAP
        } else {
            Duration::from_secs(u64::from(self.config.watchdog_timeout_secs))
                + self.transport.timeout() * 2
        }
    }
}

fn on_off(v: bool) -> &'static str {
    if v {
        "on"
    } else {
        "off"
    }
}
