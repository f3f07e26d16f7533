//! # Inbound Message Handler
//!
//! Turns a raw received frame into a mailbox record. Malformed frames
//! are logged and dropped; the air is a shared medium and carries
//! traffic that was never ours. Well-formed frames get their signal
//! quality sampled immediately after receipt, while the modem still
//! holds the readings for that frame, then land in the mailbox with
//! the duplicate flag computed by the store.

use log::{info, warn};

use crate::logutil::escape_log;
use crate::radio::{Arbiter, LineTransport};
use crate::storage::{InboundMessage, MailboxStore};
use crate::validation;

use super::PollError;

/// Decode, sample signal quality, and persist one received frame.
/// Returns `None` when the frame was not a parseable chat payload.
pub fn handle_frame<T: LineTransport>(
    arbiter: &mut Arbiter<T>,
    store: &MailboxStore,
    payload_hex: &str,
) -> Result<Option<InboundMessage>, PollError> {
    let decoded = match validation::parse_payload(payload_hex) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(
                "Dropping unparseable frame {}: {}",
                escape_log(payload_hex),
                e
            );
            return Ok(None);
        }
    };

    let (rssi, snr) = arbiter.signal_quality()?;
    let msg = store.append_inbound(payload_hex, &decoded, rssi, snr)?;
    if msg.duplicate {
        info!(
            "Received duplicate from station {} (rssi {}, snr {}): {}",
            msg.origin_station,
            rssi,
            snr,
            escape_log(&msg.text)
        );
    } else {
        info!(
            "Received message from station {} (rssi {}, snr {}): {}",
            msg.origin_station,
            rssi,
            snr,
            escape_log(&msg.text)
        );
    }
    Ok(Some(msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::radio::testutil::ScriptedTransport;
    use crate::radio::RadioSession;
    use tempfile::TempDir;

    fn ready_arbiter(
        extend: impl FnOnce(ScriptedTransport) -> ScriptedTransport,
    ) -> Arbiter<ScriptedTransport> {
        let config = Config::default();
        let transport = extend(ScriptedTransport::scripted_init(
            &config.radio.firmware_version,
        ));
        let mut session = RadioSession::new(transport, config.radio);
        session.initialize().expect("scripted init");
        Arbiter::new(session)
    }

    fn temp_store() -> (TempDir, MailboxStore) {
        let dir = TempDir::new().unwrap();
        let store = MailboxStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn well_formed_frame_is_stored_with_signal_quality() {
        let (_dir, store) = temp_store();
        // "1,5,Hello"
        let mut arbiter = ready_arbiter(|t| t.reply("-42").reply("7"));
        let msg = handle_frame(&mut arbiter, &store, "312c352c48656c6c6f")
            .unwrap()
            .unwrap();
        assert_eq!(msg.origin_station, 5);
        assert_eq!(msg.text, "Hello");
        assert_eq!(msg.rssi, -42);
        assert_eq!(msg.snr, 7);
        assert!(!msg.duplicate);
        let sent = &arbiter.session().transport_ref().sent;
        assert!(sent.iter().any(|l| l == "radio get rssi"));
        assert!(sent.iter().any(|l| l == "radio get snr"));
    }

    #[test]
    fn unparseable_frame_is_dropped_without_touching_the_radio() {
        let (_dir, store) = temp_store();
        let mut arbiter = ready_arbiter(|t| t);
        let result = handle_frame(&mut arbiter, &store, "zz-not-hex").unwrap();
        assert!(result.is_none());
        assert!(store.latest_fresh_inbound().unwrap().is_none());
        let sent = &arbiter.session().transport_ref().sent;
        assert!(!sent.iter().any(|l| l.starts_with("radio get ")));
    }

    #[test]
    fn repeated_frame_is_flagged_duplicate() {
        let (_dir, store) = temp_store();
        let mut arbiter = ready_arbiter(|t| t.reply("-42").reply("7").reply("-80").reply("2"));
        let first = handle_frame(&mut arbiter, &store, "312c352c48656c6c6f")
            .unwrap()
            .unwrap();
        let second = handle_frame(&mut arbiter, &store, "312c352c48656c6c6f")
            .unwrap()
            .unwrap();
        assert!(!first.duplicate);
        assert!(second.duplicate);
        // Signal readings belong to each reception, not the first one.
        assert_eq!(second.rssi, -80);
        assert_eq!(second.snr, 2);
    }
}
