//! # Radio Driver Module
//!
//! Driver for the Ronoth LoStik (RN2903) over its line-oriented serial
//! command protocol. Split into three layers, leaves first:
//!
//! - [`transport`] - one CRLF-terminated command line out, one bounded
//!   read back; a read timeout is a valid "no data" outcome, not an error
//! - [`session`] - port lifecycle, firmware verification, the ordered
//!   power-on configuration sequence, indicator LEDs, signal-quality
//!   queries
//! - [`arbiter`] - half-duplex arbitration between continuous receive
//!   and on-demand transmit; never both, never concurrently
//!
//! The protocol is strictly request/response with exactly one command
//! outstanding. Any line the driver cannot account for means the driver
//! and the device disagree about state; that is fatal for the session
//! and never silently recovered from.

pub mod arbiter;
pub mod session;
pub mod transport;

pub use arbiter::{Arbiter, ArbiterState, RxEvent, TxOutcome};
pub use session::{Indicator, RadioSession, SessionStatus};
pub use transport::{LineTransport, SerialTransport};

use thiserror::Error;

/// Errors that can arise while driving the radio.
///
/// Everything here is fatal to the session except where noted; transmit
/// failures and watchdog timeouts are *not* errors and surface as
/// [`TxOutcome::Failed`] and [`RxEvent::Watchdog`] instead.
#[derive(Debug, Error)]
pub enum RadioError {
    /// No LoStik found while enumerating serial ports.
    #[error("LoStik not detected on any serial port (check device connection)")]
    DeviceNotFound,

    /// A port was found but could not be opened.
    #[error("unable to open serial port {port}: {source}")]
    ConnectionFailure {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// Serial I/O failed mid-exchange.
    #[error("serial io error: {0}")]
    Io(#[from] std::io::Error),

    /// The device reported a firmware version other than the one this
    /// driver was verified against. Unverified hardware behavior is
    /// unsafe to proceed with.
    #[error("firmware mismatch: expected '{expected}', device reported '{found}'")]
    FirmwareMismatch { expected: String, found: String },

    /// A command did not return its expected response. During the init
    /// sequence the remaining steps are aborted; a partially configured
    /// node is worse than none because every node on the mesh must
    /// share identical network parameters.
    #[error("command '{command}' failed: {response}")]
    ConfigurationFailure { command: String, response: String },

    /// An unexpected line arrived where a specific response was
    /// required. The driver and device no longer agree on state.
    #[error("protocol desynchronization during {context}: got '{line}'")]
    Desync { context: &'static str, line: String },

    /// An arbiter operation was requested before the session reached
    /// Ready, or after it faulted.
    #[error("radio session is {status:?}, not Ready")]
    NotReady { status: SessionStatus },

    /// A transmit was requested while one is already in progress.
    #[error("transmit rejected: arbiter is {state:?}")]
    Busy { state: ArbiterState },
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Scripted transport double for exercising the session and arbiter
    //! state machines without hardware.

    use std::collections::VecDeque;
    use std::time::Duration;

    use super::transport::LineTransport;
    use super::RadioError;

    /// A [`LineTransport`] that replays a script of read results and
    /// records every line sent. `None` entries simulate read timeouts.
    pub struct ScriptedTransport {
        replies: VecDeque<Option<String>>,
        pub sent: Vec<String>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self {
                replies: VecDeque::new(),
                sent: Vec::new(),
            }
        }

        /// Queue a reply line for the next read.
        pub fn reply(mut self, line: &str) -> Self {
            self.replies.push_back(Some(line.to_string()));
            self
        }

        /// Queue a read timeout.
        pub fn timeout(mut self) -> Self {
            self.replies.push_back(None);
            self
        }

        /// Replies queued for the standard 12-step init ladder.
        pub fn scripted_init(firmware: &str) -> Self {
            let mut t = Self::new().reply(firmware).reply("4294967245");
            // Two indicator-on writes, ten config writes, two indicator-off.
            for _ in 0..14 {
                t = t.reply("ok");
            }
            t
        }
    }

    impl LineTransport for ScriptedTransport {
        fn send_line(&mut self, line: &str) -> Result<(), RadioError> {
            self.sent.push(line.to_string());
            Ok(())
        }

        fn read_line(&mut self) -> Result<Option<String>, RadioError> {
            Ok(self.replies.pop_front().flatten())
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(10)
        }
    }
}
