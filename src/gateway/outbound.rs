//! # Outbound Queue Consumer
//!
//! Drains the pending side of the mailbox one message per poll. Oldest
//! pending first, attempts counted per transmission, messages retired
//! as failed once the attempt budget is spent. A message whose airtime
//! window ends in `radio_err` stays pending so later polls retry it;
//! only radio-session faults abort the loop.

use chrono::Utc;
use log::{info, warn};

use crate::logutil::escape_log;
use crate::radio::{Arbiter, LineTransport, TxOutcome};
use crate::storage::{MailboxStore, OutboundStatus};

use super::PollError;

/// What one outbound poll accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No pending message in the mailbox.
    Idle,
    /// A message went out and was confirmed on the air.
    Sent,
    /// The attempt failed; the message stays pending.
    Retrying,
    /// The attempt failed and the budget is spent; message retired.
    Failed,
}

/// Take the oldest pending message, transmit it, and record the
/// outcome. Exactly one store update per attempt.
pub fn poll_once<T: LineTransport>(
    arbiter: &mut Arbiter<T>,
    store: &MailboxStore,
    max_attempts: u32,
) -> Result<PollOutcome, PollError> {
    let mut message = match store.next_pending()? {
        Some(message) => message,
        None => return Ok(PollOutcome::Idle),
    };

    let outcome = arbiter.transmit(&message.payload_hex)?;
    message.attempts += 1;

    let result = match outcome {
        TxOutcome::Sent => {
            message.status = OutboundStatus::Sent;
            message.sent_at = Some(Utc::now());
            info!(
                "Sent message {} to the air (attempt {}): {}",
                message.id,
                message.attempts,
                escape_log(&message.text)
            );
            PollOutcome::Sent
        }
        TxOutcome::Failed if message.attempts >= max_attempts => {
            message.status = OutboundStatus::Failed;
            warn!(
                "Message {} failed after {} attempts, giving up",
                message.id, message.attempts
            );
            PollOutcome::Failed
        }
        TxOutcome::Failed => {
            warn!(
                "Transmit attempt {}/{} for message {} failed, will retry",
                message.attempts, max_attempts, message.id
            );
            PollOutcome::Retrying
        }
    };

    store.update_outbound(&message)?;
    Ok(result)
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
    fn empty_queue_is_idle() {
        let (_dir, store) = temp_store();
        let mut arbiter = ready_arbiter(|t| t);
        let outcome = poll_once(&mut arbiter, &store, 3).unwrap();
        assert_eq!(outcome, PollOutcome::Idle);
        // No radio tx was attempted.
        let sent = &arbiter.session().transport_ref().sent;
        assert!(!sent.iter().any(|l| l.starts_with("radio tx ")));
    }

    #[test]
    fn confirmed_transmit_marks_sent() {
        let (_dir, store) = temp_store();
        let queued = store.enqueue_outbound(7, "Testing").unwrap();
        let mut arbiter = ready_arbiter(|t| {
            t.reply("ok")
                .reply("ok")
                .reply("radio_tx_ok")
                .reply("ok")
        });
        let outcome = poll_once(&mut arbiter, &store, 3).unwrap();
        assert_eq!(outcome, PollOutcome::Sent);
        let sent = &arbiter.session().transport_ref().sent;
        assert!(sent
            .iter()
            .any(|l| l == &format!("radio tx {}", queued.payload_hex)));
        let summary = store.summary().unwrap();
        assert_eq!(summary.sent, 1);
        assert!(store.next_pending().unwrap().is_none());
    }

    #[test]
    fn failed_attempt_stays_pending_with_attempt_counted() {
        let (_dir, store) = temp_store();
        store.enqueue_outbound(7, "Testing").unwrap();
        let mut arbiter = ready_arbiter(|t| {
            t.reply("ok").reply("ok").reply("radio_err").reply("ok")
        });
        let outcome = poll_once(&mut arbiter, &store, 3).unwrap();
        assert_eq!(outcome, PollOutcome::Retrying);
        let pending = store.next_pending().unwrap().unwrap();
        assert_eq!(pending.attempts, 1);
        assert_eq!(pending.status, OutboundStatus::Pending);
        assert!(pending.sent_at.is_none());
    }

    #[test]
    fn attempt_budget_retires_the_message() {
        let (_dir, store) = temp_store();
        store.enqueue_outbound(7, "Testing").unwrap();
        let mut arbiter = ready_arbiter(|t| {
            t.reply("ok").reply("ok").reply("radio_err").reply("ok")
        });
        // Two attempts already burned in earlier polls.
        let mut msg = store.next_pending().unwrap().unwrap();
        msg.attempts = 2;
        store.update_outbound(&msg).unwrap();
        let outcome = poll_once(&mut arbiter, &store, 3).unwrap();
        assert_eq!(outcome, PollOutcome::Failed);
        assert!(store.next_pending().unwrap().is_none());
        assert_eq!(store.summary().unwrap().failed, 1);
    }

    #[test]
    fn oldest_pending_goes_first() {
        let (_dir, store) = temp_store();
        let first = store.enqueue_outbound(1, "first in line").unwrap();
        store.enqueue_outbound(2, "second in line").unwrap();
        let mut arbiter = ready_arbiter(|t| {
            t.reply("ok")
                .reply("ok")
                .reply("radio_tx_ok")
                .reply("ok")
        });
        poll_once(&mut arbiter, &store, 3).unwrap();
        let sent = &arbiter.session().transport_ref().sent;
        assert!(sent
            .iter()
            .any(|l| l == &format!("radio tx {}", first.payload_hex)));
        // The second message is still waiting its turn.
        let remaining = store.next_pending().unwrap().unwrap();
        assert_eq!(remaining.text, "second in line");
    }
}
