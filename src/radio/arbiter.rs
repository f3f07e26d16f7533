//! RX/TX arbitration for the single half-duplex transceiver.
//!
//! The radio can listen or transmit, never both. The arbiter is the
//! only component that issues `radio rx`, `radio rxstop`, and
//! `radio tx`, and it drives the indicator LEDs as a side effect of its
//! state transitions. The gateway loop guarantees single-flight use, so
//! the state needs no locking.

use std::time::Instant;

use log::{debug, warn};

use super::session::{Indicator, RadioSession};
use super::transport::LineTransport;
use super::RadioError;

/// What the transceiver is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterState {
    /// Powered, neither receiving nor transmitting.
    Idle,
    /// Continuous receive engaged, receive LED on.
    Listening,
    /// Receive disengaged, transmit LED on.
    Transmitting,
}

/// Outcome of one polling read while Listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxEvent {
    /// A `radio_rx <hex>` line: one received frame.
    Frame { payload_hex: String },
    /// A `radio_err` line: the radio-side watchdog fired.
    Watchdog,
}

/// Terminal result of a transmit exchange. Failure here is a
/// message-level event, not a session error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// `radio_tx_ok`: the frame went out.
    Sent,
    /// `radio_err`: the radio aborted the transmission.
    Failed,
}

/// Enforces mutual exclusion between listening and transmitting.
pub struct Arbiter<T: LineTransport> {
    session: RadioSession<T>,
    state: ArbiterState,
}

impl<T: LineTransport> Arbiter<T> {
    /// Wrap a session that has already reached Ready.
    pub fn new(session: RadioSession<T>) -> Self {
        Self {
            session,
            state: ArbiterState::Idle,
        }
    }

    pub fn state(&self) -> ArbiterState {
        self.state
    }

    pub fn session(&self) -> &RadioSession<T> {
        &self.session
    }

    /// Engage continuous receive. No-op when already listening.
    pub fn listen(&mut self) -> Result<(), RadioError> {
        self.session.ensure_ready()?;
        match self.state {
            ArbiterState::Listening => Ok(()),
            ArbiterState::Transmitting => Err(RadioError::Busy { state: self.state }),
            ArbiterState::Idle => {
                self.session.expect_ok("radio rx 0")?;
                self.session.set_indicator(Indicator::Rx, true)?;
                self.state = ArbiterState::Listening;
                debug!("Arbiter: listening");
                Ok(())
            }
        }
    }

    /// Disengage continuous receive. No-op when not listening.
    pub fn stop_listening(&mut self) -> Result<(), RadioError> {
        self.session.ensure_ready()?;
        match self.state {
            ArbiterState::Idle => Ok(()),
            ArbiterState::Transmitting => Err(RadioError::Busy { state: self.state }),
            ArbiterState::Listening => {
                self.session.expect_ok("radio rxstop")?;
                self.session.set_indicator(Indicator::Rx, false)?;
                self.state = ArbiterState::Idle;
                debug!("Arbiter: receive stopped");
                Ok(())
            }
        }
    }

    /// One bounded read while Listening. `Ok(None)` means the timeout
    /// elapsed with no traffic; the caller re-enters its loop, which is
    /// what gives queued outbound work a chance to preempt listening.
    ///
    /// A `radio_rx` or `radio_err` line terminates the receive
    /// operation on the radio side, so either event drops the arbiter
    /// back to Idle; the caller re-arms with [`listen`](Self::listen)
    /// when it wants to keep receiving.
    pub fn poll(&mut self) -> Result<Option<RxEvent>, RadioError> {
        self.session.ensure_ready()?;
        debug_assert_eq!(self.state, ArbiterState::Listening);
        let Some(line) = self.session.read_line()? else {
            return Ok(None);
        };
        if line.is_empty() {
            return Ok(None);
        }
        if let Some(hex) = line.strip_prefix("radio_rx ") {
            self.state = ArbiterState::Idle;
            return Ok(Some(RxEvent::Frame {
                payload_hex: hex.trim().to_string(),
            }));
        }
        if line == "radio_err" {
            warn!("Radio watchdog timer timeout while listening");
            self.state = ArbiterState::Idle;
            return Ok(Some(RxEvent::Watchdog));
        }
        self.session.fault();
        Err(RadioError::Desync {
            context: "continuous receive",
            line,
        })
    }

    /// Transmit a hex payload. Stops receive first when necessary,
    /// then waits out the terminal response inside the watchdog window.
    ///
    /// `radio_err` is an expected, recoverable outcome reported as
    /// [`TxOutcome::Failed`]; anything else unexpected faults the
    /// session.
    pub fn transmit(&mut self, payload_hex: &str) -> Result<TxOutcome, RadioError> {
        self.session.ensure_ready()?;
        if self.state == ArbiterState::Transmitting {
            return Err(RadioError::Busy { state: self.state });
        }
        if self.state == ArbiterState::Listening {
            self.stop_listening()?;
        }

        // Command acceptance: the first response must be "ok".
        let cmd = format!("radio tx {}", payload_hex);
        let accepted = self.session.command(&cmd)?;
        if accepted != "ok" {
            self.session.fault();
            return Err(RadioError::Desync {
                context: "radio tx acceptance",
                line: accepted,
            });
        }

        self.state = ArbiterState::Transmitting;
        self.session.set_indicator(Indicator::Tx, true)?;

        let result = self.wait_terminal();

        // Terminal event, success or not: transmit LED off, back to Idle.
        let _ = self.session.set_indicator(Indicator::Tx, false);
        self.state = ArbiterState::Idle;
        result
    }

    /// Stop receive and clear the indicators on the way out. Best
    /// effort: teardown runs on failure paths where the radio may no
    /// longer answer.
    pub fn shutdown(&mut self) {
        if self.state == ArbiterState::Listening {
            if let Err(e) = self.stop_listening() {
                warn!("Teardown: failed to stop receive: {}", e);
            }
        }
        if let Err(e) = self.session.set_indicator(Indicator::Rx, false) {
            warn!("Teardown: rx indicator: {}", e);
        }
        if let Err(e) = self.session.set_indicator(Indicator::Tx, false) {
            warn!("Teardown: tx indicator: {}", e);
        }
    }

    /// Signal quality of the last reception, queried back-to-back so a
    /// later command cannot overwrite the radio's single reading.
    pub fn signal_quality(&mut self) -> Result<(i32, i32), RadioError> {
        self.session.ensure_ready()?;
        self.session.signal_quality()
    }

    fn wait_terminal(&mut self) -> Result<TxOutcome, RadioError> {
        let deadline = Instant::now() + self.session.terminal_window();
        loop {
            match self.session.read_line()? {
                Some(line) if line == "radio_tx_ok" => return Ok(TxOutcome::Sent),
                Some(line) if line == "radio_err" => {
                    warn!("Transmit failure: radio error");
                    return Ok(TxOutcome::Failed);
                }
                Some(line) if line.is_empty() => {}
                Some(line) => {
                    self.session.fault();
                    return Err(RadioError::Desync {
                        context: "radio tx terminal",
                        line,
                    });
                }
                None => {}
            }
            if Instant::now() >= deadline {
                self.session.fault();
                return Err(RadioError::Desync {
                    context: "radio tx terminal",
                    line: "(no terminal response)".to_string(),
                });
            }
        }
    }
}
