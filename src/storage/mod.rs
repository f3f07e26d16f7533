//! # Storage Module - Mailbox Persistence Layer
//!
//! Sled-backed durable mailbox shared between the gateway and external
//! message producers/viewers. Three trees:
//!
//! ```text
//! outbound  ← every queued chat message and its final status (FIFO by queue time)
//! queue     ← index of still-pending outbound keys, so polling never
//!             scans retired records
//! inbound   ← append-only log of received messages with signal metadata
//! seen      ← dedup index keyed by (origin station, payload hex)
//! ```
//!
//! The gateway's contract with the mailbox is deliberately narrow:
//! read the oldest pending outbound message, write back a status
//! transition, and append inbound records. Outbound records are never
//! deleted here; `Pending → Sent` and `Pending → Failed` transitions are
//! owned exclusively by the outbound consumer.
//!
//! Keys embed a zero-padded nanosecond timestamp so sled's lexicographic
//! iteration order is chronological.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::IVec;
use thiserror::Error;
use uuid::Uuid;

use crate::validation::{self, DecodedPayload};

const TREE_OUTBOUND: &str = "mailbox_outbound";
const TREE_QUEUE: &str = "mailbox_queue";
const TREE_INBOUND: &str = "mailbox_inbound";
const TREE_SEEN: &str = "mailbox_seen";

/// Errors that can arise while interacting with the mailbox store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when updating a record that is not present.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Returned when a message fails validation at enqueue time.
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] validation::MessageError),
}

/// Delivery state of a queued outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundStatus {
    Pending,
    Sent,
    Failed,
}

/// A chat message queued for transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: Uuid,
    /// Originating station id stamped into the payload.
    pub station_id: u8,
    pub text: String,
    /// Raw over-the-air payload: `<type>,<station>,<text>`.
    pub payload_raw: String,
    /// Hex encoding of `payload_raw`, as passed to `radio tx`.
    pub payload_hex: String,
    pub queued_at: DateTime<Utc>,
    pub attempts: u32,
    pub sent_at: Option<DateTime<Utc>>,
    pub status: OutboundStatus,
}

/// A received message, recorded exactly once per reception.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: Uuid,
    pub payload_hex: String,
    pub packet_type: u8,
    pub origin_station: u8,
    pub text: String,
    pub received_at: DateTime<Utc>,
    /// Received signal strength in dBm, as reported by `radio get rssi`.
    pub rssi: i32,
    /// Signal-to-noise ratio in dB, as reported by `radio get snr`.
    pub snr: i32,
    /// True when a prior record with the same origin and payload exists.
    pub duplicate: bool,
}

/// Counts for the `status` command and tests.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MailboxSummary {
    pub pending: u64,
    pub sent: u64,
    pub failed: u64,
    pub received: u64,
    pub duplicates: u64,
}

fn timestamp_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt()
        .unwrap_or_else(|| ts.timestamp_micros() * 1000)
}

/// Sled-backed mailbox shared with external producer/viewer processes.
pub struct MailboxStore {
    _db: sled::Db,
    outbound: sled::Tree,
    queue: sled::Tree,
    inbound: sled::Tree,
    seen: sled::Tree,
}

impl MailboxStore {
    /// Open (or create) the mailbox rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref: &Path = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let outbound = db.open_tree(TREE_OUTBOUND)?;
        let queue = db.open_tree(TREE_QUEUE)?;
        let inbound = db.open_tree(TREE_INBOUND)?;
        let seen = db.open_tree(TREE_SEEN)?;
        Ok(Self {
            _db: db,
            outbound,
            queue,
            inbound,
            seen,
        })
    }

    /// Mailbox path under a data directory.
    pub fn path_under(data_dir: &str) -> PathBuf {
        Path::new(data_dir).join("mailbox")
    }

    fn outbound_key(msg: &OutboundMessage) -> Vec<u8> {
        format!("{:020}:{}", timestamp_nanos(msg.queued_at), msg.id).into_bytes()
    }

    fn inbound_key(msg: &InboundMessage) -> Vec<u8> {
        format!("{:020}:{}", timestamp_nanos(msg.received_at), msg.id).into_bytes()
    }

    fn seen_key(origin_station: u8, payload_hex: &str) -> Vec<u8> {
        format!("{}:{}", origin_station, payload_hex).into_bytes()
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(bytes: IVec) -> Result<T, StorageError> {
        Ok(bincode::deserialize::<T>(&bytes)?)
    }

    /// Queue a new chat message for transmission. Validates the text and
    /// builds the over-the-air payload.
    pub fn enqueue_outbound(
        &self,
        station_id: u8,
        text: &str,
    ) -> Result<OutboundMessage, StorageError> {
        validation::validate_message_text(text)?;
        let payload_raw = validation::build_payload(station_id, text);
        let payload_hex = validation::encode_hex(payload_raw.as_bytes());
        let msg = OutboundMessage {
            id: Uuid::new_v4(),
            station_id,
            text: text.to_string(),
            payload_raw,
            payload_hex,
            queued_at: Utc::now(),
            attempts: 0,
            sent_at: None,
            status: OutboundStatus::Pending,
        };
        let key = Self::outbound_key(&msg);
        self.outbound.insert(&key, Self::serialize(&msg)?)?;
        self.queue.insert(&key, &[])?;
        self.outbound.flush()?;
        self.queue.flush()?;
        Ok(msg)
    }

    /// Oldest Pending outbound message, or `None` when the queue is
    /// drained. Only the pending index is scanned, so poll cost does
    /// not grow with all-time mailbox history.
    pub fn next_pending(&self) -> Result<Option<OutboundMessage>, StorageError> {
        for entry in self.queue.iter() {
            let (key, _) = entry?;
            match self.outbound.get(&key)? {
                Some(value) => return Ok(Some(Self::deserialize(value)?)),
                // Index entry without a record; repair and move on.
                None => {
                    self.queue.remove(&key)?;
                }
            }
        }
        Ok(None)
    }

    /// Persist a status/attempt transition for an existing outbound
    /// message. The record must already exist; the queue key never
    /// changes because `queued_at` and `id` are immutable. Messages
    /// leaving Pending are dropped from the pending index.
    pub fn update_outbound(&self, msg: &OutboundMessage) -> Result<(), StorageError> {
        let key = Self::outbound_key(msg);
        if self.outbound.get(&key)?.is_none() {
            return Err(StorageError::NotFound(format!("outbound: {}", msg.id)));
        }
        self.outbound.insert(&key, Self::serialize(msg)?)?;
        if msg.status == OutboundStatus::Pending {
            self.queue.insert(&key, &[])?;
        } else {
            self.queue.remove(&key)?;
        }
        self.outbound.flush()?;
        self.queue.flush()?;
        Ok(())
    }

    /// Append a received message, computing its duplicate flag against
    /// the full mailbox history. Duplicates are recorded too; only the
    /// flag differs.
    pub fn append_inbound(
        &self,
        payload_hex: &str,
        decoded: &DecodedPayload,
        rssi: i32,
        snr: i32,
    ) -> Result<InboundMessage, StorageError> {
        let seen_key = Self::seen_key(decoded.origin_station, payload_hex);
        let duplicate = self.seen.get(&seen_key)?.is_some();
        let msg = InboundMessage {
            id: Uuid::new_v4(),
            payload_hex: payload_hex.to_string(),
            packet_type: decoded.packet_type,
            origin_station: decoded.origin_station,
            text: decoded.text.clone(),
            received_at: Utc::now(),
            rssi,
            snr,
            duplicate,
        };
        self.inbound
            .insert(Self::inbound_key(&msg), Self::serialize(&msg)?)?;
        if !duplicate {
            self.seen.insert(seen_key, &[])?;
        }
        self.inbound.flush()?;
        self.seen.flush()?;
        Ok(msg)
    }

    /// Most recent inbound message that is not a duplicate, for consumer
    /// views that only care about fresh traffic.
    pub fn latest_fresh_inbound(&self) -> Result<Option<InboundMessage>, StorageError> {
        for entry in self.inbound.iter().rev() {
            let (_, value) = entry?;
            let msg: InboundMessage = Self::deserialize(value)?;
            if !msg.duplicate {
                return Ok(Some(msg));
            }
        }
        Ok(None)
    }

    /// Aggregate counts over both directions.
    pub fn summary(&self) -> Result<MailboxSummary, StorageError> {
        let mut summary = MailboxSummary::default();
        for entry in self.outbound.iter() {
            let (_, value) = entry?;
            let msg: OutboundMessage = Self::deserialize(value)?;
            match msg.status {
                OutboundStatus::Pending => summary.pending += 1,
                OutboundStatus::Sent => summary.sent += 1,
                OutboundStatus::Failed => summary.failed += 1,
            }
        }
        for entry in self.inbound.iter() {
            let (_, value) = entry?;
            let msg: InboundMessage = Self::deserialize(value)?;
            summary.received += 1;
            if msg.duplicate {
                summary.duplicates += 1;
            }
        }
        Ok(summary)
    }

    #[cfg(test)]
    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }
}
