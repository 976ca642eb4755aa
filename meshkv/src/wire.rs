//! Wire format for mesh messages.
//!
//! Packet format: `[length:4][checksum:4][body:N]`
//!
//! - **length**: Total packet size including header (little-endian u32)
//! - **checksum**: CRC32C of the body for integrity verification
//! - **body**: a fixed-size message header followed by key and value bytes
//!
//! Body layout (all integers little-endian):
//!
//! ```text
//! command:u8 status:u8 id:u32 source:u32 dest:u32 elapsed_us:u32
//! key_type:u8 value_type:u8 key_size:u16 value_size:u32
//! key_bytes[key_size] value_bytes[value_size]
//! ```
//!
//! The transport underneath is lossy and unordered but never splits or merges
//! packets, so one packet carries exactly one [`Message`].

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::types::{Command, Datum, NodeId, RequestId, Status, TypeTag};

/// Packet header size: 4 (length) + 4 (checksum).
pub const HEADER_SIZE: usize = 8;

/// Fixed part of the message body, before key and value bytes.
pub const BODY_FIXED_SIZE: usize = 26;

/// Maximum key size carried in a message.
pub const MAX_KEY_SIZE: usize = 1024;

/// Maximum value size carried in a message.
pub const MAX_VALUE_SIZE: usize = 8192;

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Not enough data to parse the packet.
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData {
        /// Minimum bytes required to parse.
        needed: usize,
        /// Actual bytes available.
        have: usize,
    },

    /// Checksum verification failed - data was corrupted.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Expected checksum from header.
        expected: u32,
        /// Computed checksum from data.
        actual: u32,
    },

    /// Length field disagrees with the packet or body contents.
    #[error("invalid packet length: {length}")]
    InvalidLength {
        /// The invalid length value.
        length: u32,
    },

    /// Key or value exceeds the wire limits.
    #[error("{what} too large: {size} bytes (max {max})")]
    TooLarge {
        /// Which field overflowed ("key" or "value").
        what: &'static str,
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Unknown command tag.
    #[error("unknown command tag {0}")]
    UnknownCommand(u8),

    /// Unknown status tag.
    #[error("unknown status tag {0}")]
    UnknownStatus(u8),
}

/// A single message exchanged between nodes (or with the host).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// What the message asks for or answers.
    pub command: Command,
    /// Outcome of the operation (always `Ok` on requests).
    pub status: Status,
    /// Correlation id.
    pub id: RequestId,
    /// Node that produced the message.
    pub source: NodeId,
    /// Final destination of the message.
    pub dest: NodeId,
    /// Round-trip time reported to clients; zero elsewhere.
    pub elapsed: Duration,
    /// Key (empty for `Clear` and most replies).
    pub key: Datum,
    /// Value (set on `Put` and successful `PullReply`).
    pub value: Datum,
}

impl Message {
    /// Build a request message.
    pub fn request(
        command: Command,
        id: RequestId,
        source: NodeId,
        dest: NodeId,
        key: Datum,
        value: Datum,
    ) -> Self {
        Self {
            command,
            status: Status::Ok,
            id,
            source,
            dest,
            elapsed: Duration::ZERO,
            key,
            value,
        }
    }

    /// Build the reply to this request, addressed back to its source.
    ///
    /// Returns `None` when `self` is not a request.
    pub fn reply(&self, from: NodeId, status: Status, value: Datum) -> Option<Self> {
        let command = self.command.reply()?;
        Some(Self {
            command,
            status,
            id: self.id,
            source: from,
            dest: self.source,
            elapsed: Duration::ZERO,
            key: self.key.clone(),
            value,
        })
    }

    /// Size of the encoded packet for this message.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + BODY_FIXED_SIZE + self.key.len() + self.value.len()
    }
}

fn check_limits(msg: &Message) -> Result<(), WireError> {
    if msg.key.len() > MAX_KEY_SIZE {
        return Err(WireError::TooLarge {
            what: "key",
            size: msg.key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    if msg.value.len() > MAX_VALUE_SIZE {
        return Err(WireError::TooLarge {
            what: "value",
            size: msg.value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

/// Serialize a message into a checksummed packet.
///
/// # Errors
///
/// Returns `TooLarge` if the key or value exceeds the wire limits.
///
/// # Examples
///
/// ```
/// use meshkv::wire::{decode, encode, Message};
/// use meshkv::{Command, Datum, NodeId, RequestId};
///
/// let msg = Message::request(
///     Command::Put,
///     RequestId(1),
///     NodeId::HOST,
///     NodeId::new(0, 0, 0),
///     Datum::text("k"),
///     Datum::text("v"),
/// );
/// let packet = encode(&msg).expect("encode");
/// assert_eq!(decode(&packet).expect("decode"), msg);
/// ```
pub fn encode(msg: &Message) -> Result<Bytes, WireError> {
    check_limits(msg)?;

    let total = msg.encoded_len();
    let mut buf = BytesMut::with_capacity(total);
    buf.put_u32_le(total as u32);
    buf.put_u32_le(0); // checksum, patched below

    buf.put_u8(msg.command as u8);
    buf.put_u8(msg.status as u8);
    buf.put_u32_le(msg.id.0);
    buf.put_u32_le(msg.source.0);
    buf.put_u32_le(msg.dest.0);
    buf.put_u32_le(u32::try_from(msg.elapsed.as_micros()).unwrap_or(u32::MAX));
    buf.put_u8(msg.key.tag.0);
    buf.put_u8(msg.value.tag.0);
    buf.put_u16_le(msg.key.len() as u16);
    buf.put_u32_le(msg.value.len() as u32);
    buf.put_slice(&msg.key.bytes);
    buf.put_slice(&msg.value.bytes);

    let checksum = crc32c::crc32c(&buf[HEADER_SIZE..]);
    buf[4..8].copy_from_slice(&checksum.to_le_bytes());

    Ok(buf.freeze())
}

/// Deserialize a packet, validating length and checksum.
///
/// # Errors
///
/// - `InsufficientData`: fewer bytes than the header or length field claim
/// - `InvalidLength`: length field or key/value sizes disagree with the packet,
///   including trailing bytes past the length field
/// - `ChecksumMismatch`: data was corrupted
/// - `UnknownCommand` / `UnknownStatus`: unrecognised tags
/// - `TooLarge`: key or value sizes beyond the wire limits
pub fn decode(data: &[u8]) -> Result<Message, WireError> {
    if data.len() < HEADER_SIZE {
        return Err(WireError::InsufficientData {
            needed: HEADER_SIZE,
            have: data.len(),
        });
    }

    let mut header = &data[..HEADER_SIZE];
    let length = header.get_u32_le();
    let checksum = header.get_u32_le();

    let expected_len = length as usize;
    if expected_len < HEADER_SIZE + BODY_FIXED_SIZE {
        return Err(WireError::InvalidLength { length });
    }
    if data.len() < expected_len {
        return Err(WireError::InsufficientData {
            needed: expected_len,
            have: data.len(),
        });
    }
    if data.len() > expected_len {
        return Err(WireError::InvalidLength { length });
    }

    let body = &data[HEADER_SIZE..];
    let computed = crc32c::crc32c(body);
    if computed != checksum {
        return Err(WireError::ChecksumMismatch {
            expected: checksum,
            actual: computed,
        });
    }

    let mut cursor = body;
    let command = Command::try_from(cursor.get_u8()).map_err(WireError::UnknownCommand)?;
    let status = Status::try_from(cursor.get_u8()).map_err(WireError::UnknownStatus)?;
    let id = RequestId(cursor.get_u32_le());
    let source = NodeId(cursor.get_u32_le());
    let dest = NodeId(cursor.get_u32_le());
    let elapsed = Duration::from_micros(u64::from(cursor.get_u32_le()));
    let key_type = TypeTag(cursor.get_u8());
    let value_type = TypeTag(cursor.get_u8());
    let key_size = cursor.get_u16_le() as usize;
    let value_size = cursor.get_u32_le() as usize;

    if key_size > MAX_KEY_SIZE {
        return Err(WireError::TooLarge {
            what: "key",
            size: key_size,
            max: MAX_KEY_SIZE,
        });
    }
    if value_size > MAX_VALUE_SIZE {
        return Err(WireError::TooLarge {
            what: "value",
            size: value_size,
            max: MAX_VALUE_SIZE,
        });
    }
    if cursor.remaining() != key_size + value_size {
        return Err(WireError::InvalidLength { length });
    }

    let key = Datum::new(key_type, cursor.copy_to_bytes(key_size).to_vec());
    let value = Datum::new(value_type, cursor.copy_to_bytes(value_size).to_vec());

    Ok(Message {
        command,
        status,
        id,
        source,
        dest,
        elapsed,
        key,
        value,
    })
}
