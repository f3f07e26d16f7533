//! Payload validation and wire-format helpers.
//!
//! The over-the-air payload is plain ASCII: comma-delimited fields
//! `<packet-type>,<station-id>,<message-text>`, hex-encoded before it is
//! handed to the radio. Message text is restricted to a small character
//! set so every node can render it without surprises.

use std::fmt;

/// Maximum message text length in characters.
pub const MAX_MESSAGE_LEN: usize = 50;

/// Packet type identifier for chat messages.
pub const PACKET_TYPE_SMS: u8 = 1;

/// Message text validation errors with helpful messages
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("Message is empty")]
    Empty,

    #[error("Message is too long (maximum {max} characters)")]
    TooLong { max: usize },

    #[error("Message contains invalid characters: {chars}")]
    InvalidCharacters { chars: String },
}

/// Errors produced while decoding a received payload.
#[derive(Debug, PartialEq, Eq)]
pub enum PayloadError {
    /// The hex string had odd length or a non-hex digit.
    InvalidHex,
    /// The decoded bytes were not ASCII text.
    NotAscii,
    /// Fewer than two comma-delimited fields.
    MissingFields,
    /// The packet-type or station-id field was not a number.
    BadField { field: &'static str },
    /// The station-id field was outside 1..=99.
    StationOutOfRange { station: u8 },
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadError::InvalidHex => write!(f, "payload is not valid hex"),
            PayloadError::NotAscii => write!(f, "payload decodes to non-ASCII bytes"),
            PayloadError::MissingFields => write!(f, "payload has fewer than two fields"),
            PayloadError::BadField { field } => write!(f, "payload field '{}' is not numeric", field),
            PayloadError::StationOutOfRange { station } => {
                write!(f, "payload station id {} out of range (1-99)", station)
            }
        }
    }
}

impl std::error::Error for PayloadError {}

/// Validate message text against the allowed character set:
/// ASCII letters, digits, space, and `.?!`, 1..=50 characters.
pub fn validate_message_text(text: &str) -> Result<(), MessageError> {
    if text.is_empty() {
        return Err(MessageError::Empty);
    }
    if text.chars().count() > MAX_MESSAGE_LEN {
        return Err(MessageError::TooLong {
            max: MAX_MESSAGE_LEN,
        });
    }
    let bad: String = text.chars().filter(|c| !is_allowed_char(*c)).collect();
    if !bad.is_empty() {
        return Err(MessageError::InvalidCharacters { chars: bad });
    }
    Ok(())
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == ' ' || c == '.' || c == '?' || c == '!'
}

/// Hex-encode an ASCII payload for the `radio tx` command.
pub fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Decode a hex string as received in a `radio_rx` line.
pub fn decode_hex(hex: &str) -> Result<Vec<u8>, PayloadError> {
    if hex.len() % 2 != 0 {
        return Err(PayloadError::InvalidHex);
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    for pair in hex.as_bytes().chunks(2) {
        let hi = hex_digit(pair[0]).ok_or(PayloadError::InvalidHex)?;
        let lo = hex_digit(pair[1]).ok_or(PayloadError::InvalidHex)?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Build the raw over-the-air payload for an outbound chat message.
pub fn build_payload(station_id: u8, text: &str) -> String {
    format!("{},{},{}", PACKET_TYPE_SMS, station_id, text)
}

/// A decoded inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    pub packet_type: u8,
    pub origin_station: u8,
    pub text: String,
}

/// Decode and split a received hex payload.
///
/// The first two comma-delimited fields are the packet type and origin
/// station id; the remainder is rejoined because message text may itself
/// contain commas.
pub fn parse_payload(hex: &str) -> Result<DecodedPayload, PayloadError> {
    let bytes = decode_hex(hex)?;
    let raw = String::from_utf8(bytes).map_err(|_| PayloadError::NotAscii)?;
    if !raw.is_ascii() {
        return Err(PayloadError::NotAscii);
    }
    let mut fields = raw.splitn(3, ',');
    let packet_type = fields
        .next()
        .filter(|s| !s.is_empty())
        .ok_or(PayloadError::MissingFields)?;
    let origin = fields.next().ok_or(PayloadError::MissingFields)?;
    let text = fields.next().unwrap_or("").to_string();
    let packet_type: u8 = packet_type.parse().map_err(|_| PayloadError::BadField {
        field: "packet-type",
    })?;
    let origin_station: u8 = origin.parse().map_err(|_| PayloadError::BadField {
        field: "station-id",
    })?;
    if !(1..=99).contains(&origin_station) {
        return Err(PayloadError::StationOutOfRange {
            station: origin_station,
        });
    }
    Ok(DecodedPayload {
        packet_type,
        origin_station,
        text,
    })
}
