//! Core types shared by every node role.
//!
//! - [`NodeId`]: flattened `(region, sub_region, slot)` address of a node
//! - [`RequestId`]: identifier correlating a request with its replies
//! - [`TypeTag`] and [`Datum`]: typed byte strings used for keys and values
//! - [`Command`] and [`Status`]: what a message asks for and how it went

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of a node in the mesh.
///
/// Nodes are laid out as `(region, sub_region, slot)` triples and flattened
/// into a single `u32`: `region` in the top byte, `sub_region` in the next
/// byte, `slot` in the low 16 bits.
///
/// [`NodeId::HOST`] is reserved for the external controlling host. It never
/// names a node inside the mesh.
///
/// # Examples
///
/// ```
/// use meshkv::NodeId;
///
/// let id = NodeId::new(1, 2, 3);
/// assert_eq!(id.region(), 1);
/// assert_eq!(id.sub_region(), 2);
/// assert_eq!(id.slot(), 3);
/// assert_eq!(id.to_string(), "1.2.3");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Reserved source marker for requests coming from outside the mesh.
    pub const HOST: Self = Self(u32::MAX);

    /// Build a node id from its coordinates.
    pub const fn new(region: u8, sub_region: u8, slot: u16) -> Self {
        let id = ((region as u32) << 24) | ((sub_region as u32) << 16) | slot as u32;
        Self(id)
    }

    /// Region coordinate.
    pub const fn region(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Sub-region coordinate.
    pub const fn sub_region(self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// Slot coordinate.
    pub const fn slot(self) -> u16 {
        self.0 as u16
    }

    /// Whether this id is the external host marker.
    pub const fn is_host(self) -> bool {
        self.0 == Self::HOST.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_host() {
            write!(f, "host")
        } else {
            let (region, sub_region) = (self.region(), self.sub_region());
            write!(f, "{region}.{sub_region}.{}", self.slot())
        }
    }
}

/// Identifier correlating a request with its replies.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct RequestId(pub u32);

impl RequestId {
    /// The id following this one, wrapping at `u32::MAX`.
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Application-level type tag carried next to key and value bytes.
///
/// The store never interprets tags; they travel with the bytes so readers can
/// decode values the way writers meant them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TypeTag(pub u8);

impl TypeTag {
    /// Opaque bytes.
    pub const BYTES: Self = Self(0);
    /// UTF-8 text.
    pub const UTF8: Self = Self(1);
    /// Little-endian unsigned 32-bit integer.
    pub const U32: Self = Self(2);
    /// Little-endian unsigned 64-bit integer.
    pub const U64: Self = Self(3);
}

/// A tagged byte string: the unit stored as a key or a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Datum {
    /// How the bytes should be interpreted.
    pub tag: TypeTag,
    /// The raw bytes.
    pub bytes: Vec<u8>,
}

impl Datum {
    /// Create a datum from a tag and bytes.
    pub fn new(tag: TypeTag, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            bytes: bytes.into(),
        }
    }

    /// UTF-8 text datum.
    pub fn text(s: &str) -> Self {
        Self::new(TypeTag::UTF8, s.as_bytes())
    }

    /// Little-endian `u32` datum.
    pub fn u32(v: u32) -> Self {
        Self::new(TypeTag::U32, v.to_le_bytes())
    }

    /// Empty datum, used where a message carries no key or value.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Length of the raw bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the byte string is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The bytes as UTF-8, if they are valid text.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

/// Alias used where a datum plays the key role.
pub type Key = Datum;

/// Alias used where a datum plays the value role.
pub type Value = Datum;

/// What a message asks for, or what it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    /// Append a key/value record.
    Put = 1,
    /// Look up the first record for a key.
    Pull = 2,
    /// Drop every record on the shard.
    Clear = 3,
    /// Answer to a `Put`.
    PutReply = 4,
    /// Answer to a `Pull`.
    PullReply = 5,
    /// Answer to a `Clear`.
    ClearReply = 6,
    /// The dispatcher gave up on a request.
    Failure = 7,
}

impl Command {
    /// Whether this command is a client request (as opposed to a reply).
    pub const fn is_request(self) -> bool {
        matches!(self, Command::Put | Command::Pull | Command::Clear)
    }

    /// The reply command matching a request command.
    pub const fn reply(self) -> Option<Self> {
        match self {
            Command::Put => Some(Command::PutReply),
            Command::Pull => Some(Command::PullReply),
            Command::Clear => Some(Command::ClearReply),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            1 => Command::Put,
            2 => Command::Pull,
            3 => Command::Clear,
            4 => Command::PutReply,
            5 => Command::PullReply,
            6 => Command::ClearReply,
            7 => Command::Failure,
            other => return Err(other),
        })
    }
}

/// Outcome carried by replies and client responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Status {
    /// The operation succeeded (or the message is a request).
    #[default]
    Ok = 0,
    /// A pull found no record for the key.
    NotFound = 1,
    /// The shard region had no room for the record.
    OutOfSpace = 2,
    /// The dispatcher exhausted its retries.
    RetryExhausted = 3,
    /// The shard refused the record (empty or oversize key/value).
    Rejected = 4,
}

impl TryFrom<u8> for Status {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => Status::Ok,
            1 => Status::NotFound,
            2 => Status::OutOfSpace,
            3 => Status::RetryExhausted,
            4 => Status::Rejected,
            other => return Err(other),
        })
    }
}
