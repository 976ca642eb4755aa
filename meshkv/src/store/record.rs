//! Binary record schema for the shard log.
//!
//! ```text
//! ┌──────────┬────────────┬───────────┬──────────────┬─────────┬─────┬───────────┬─────┐
//! │ key_type │ value_type │ key_size  │ value_size   │ key     │ pad │ value     │ pad │
//! │ u8       │ u8         │ u16 LE    │ u32 LE       │ N bytes │     │ M bytes   │     │
//! └──────────┴────────────┴───────────┴──────────────┴─────────┴─────┴───────────┴─────┘
//!   word 0                             word 1
//! ```
//!
//! Key and value are each zero-padded to the region alignment so every header
//! starts on an aligned offset. A header with `key_size == 0` is the end
//! sentinel.
//!
//! Reading goes through [`RecordReader`], which checks every length against
//! the readable window before slicing.

use bytes::{Buf, BufMut};

use crate::types::{Datum, TypeTag};

/// Size of the record header (two 32-bit words).
pub const HEADER_LEN: usize = 8;

/// Largest key the header can describe.
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

/// Largest value the header can describe.
pub const MAX_VALUE_LEN: usize = u32::MAX as usize;

/// Round `n` up to a multiple of `alignment` (a power of two).
pub const fn align_up(n: usize, alignment: usize) -> usize {
    (n + alignment - 1) & !(alignment - 1)
}

/// Encoded size of a record with the given key and value lengths.
///
/// The dispatcher uses this to keep its load estimates in the same unit the
/// shards consume.
pub const fn encoded_len(key_len: usize, value_len: usize, alignment: usize) -> usize {
    HEADER_LEN + align_up(key_len, alignment) + align_up(value_len, alignment)
}

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Type tag of the key.
    pub key_type: TypeTag,
    /// Type tag of the value.
    pub value_type: TypeTag,
    /// Key length in bytes; zero marks the end of the log.
    pub key_size: u16,
    /// Value length in bytes.
    pub value_size: u32,
}

impl RecordHeader {
    /// The all-zero end-of-log header.
    pub const SENTINEL: Self = Self {
        key_type: TypeTag(0),
        value_type: TypeTag(0),
        key_size: 0,
        value_size: 0,
    };

    /// Whether this header terminates the log.
    pub fn is_sentinel(&self) -> bool {
        self.key_size == 0
    }

    /// Total record size including padding.
    pub fn record_len(&self, alignment: usize) -> usize {
        encoded_len(self.key_size as usize, self.value_size as usize, alignment)
    }

    /// Decode a header from the start of `buf`.
    ///
    /// Returns `None` if fewer than [`HEADER_LEN`] bytes are available.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let mut buf = buf.get(..HEADER_LEN)?;
        Some(Self {
            key_type: TypeTag(buf.get_u8()),
            value_type: TypeTag(buf.get_u8()),
            key_size: buf.get_u16_le(),
            value_size: buf.get_u32_le(),
        })
    }

    /// Encode the header into the start of `out`.
    ///
    /// Returns `false` (writing nothing) if `out` is shorter than [`HEADER_LEN`].
    pub fn encode_into(&self, out: &mut [u8]) -> bool {
        let Some(mut out) = out.get_mut(..HEADER_LEN) else {
            return false;
        };
        out.put_u8(self.key_type.0);
        out.put_u8(self.value_type.0);
        out.put_u16_le(self.key_size);
        out.put_u32_le(self.value_size);
        true
    }
}

/// Write a full record (header, padded key, padded value) into `out`.
///
/// `out` must be exactly [`encoded_len`] bytes long; returns `false` and writes
/// nothing otherwise.
pub fn write_record(out: &mut [u8], key: &Datum, value: &Datum, alignment: usize) -> bool {
    let len = encoded_len(key.len(), value.len(), alignment);
    if out.len() != len || key.len() > MAX_KEY_LEN || value.len() > MAX_VALUE_LEN {
        return false;
    }

    let header = RecordHeader {
        key_type: key.tag,
        value_type: value.tag,
        key_size: key.len() as u16,
        value_size: value.len() as u32,
    };
    if !header.encode_into(out) {
        return false;
    }

    let mut body = &mut out[HEADER_LEN..];
    let key_pad = align_up(key.len(), alignment) - key.len();
    let value_pad = align_up(value.len(), alignment) - value.len();
    body.put_slice(&key.bytes);
    body.put_bytes(0, key_pad);
    body.put_slice(&value.bytes);
    body.put_bytes(0, value_pad);
    true
}

/// A borrowed view of one stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordView<'a> {
    /// Offset of the record header in the region.
    pub offset: usize,
    /// The decoded header.
    pub header: RecordHeader,
    /// Key bytes, without padding.
    pub key: &'a [u8],
    /// Value bytes, without padding.
    pub value: &'a [u8],
}

impl RecordView<'_> {
    /// Owned copy of the key.
    pub fn key_datum(&self) -> Datum {
        Datum::new(self.header.key_type, self.key)
    }

    /// Owned copy of the value.
    pub fn value_datum(&self) -> Datum {
        Datum::new(self.header.value_type, self.value)
    }
}

/// Forward iterator over the records of a region.
///
/// Iteration ends at the sentinel, at the end of the readable window, or at
/// the first header whose sizes run past the window. The last case is
/// reported through [`RecordReader::hit_corruption`].
pub struct RecordReader<'a> {
    window: &'a [u8],
    pos: usize,
    alignment: usize,
    corrupt: bool,
    done: bool,
}

impl<'a> RecordReader<'a> {
    /// Read records from `window` (the written part of a region).
    pub fn new(window: &'a [u8], alignment: usize) -> Self {
        Self {
            window,
            pos: 0,
            alignment,
            corrupt: false,
            done: false,
        }
    }

    /// Whether iteration stopped on a malformed header.
    pub fn hit_corruption(&self) -> bool {
        self.corrupt
    }
}

impl<'a> Iterator for RecordReader<'a> {
    type Item = RecordView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let Some(header) = self.window.get(self.pos..).and_then(RecordHeader::decode) else {
            self.done = true;
            return None;
        };
        if header.is_sentinel() {
            self.done = true;
            return None;
        }

        let record_len = header.record_len(self.alignment);
        let key_start = self.pos + HEADER_LEN;
        let key_end = key_start + header.key_size as usize;
        let value_start = key_start + align_up(header.key_size as usize, self.alignment);
        let value_end = value_start + header.value_size as usize;

        let (Some(key), Some(value)) = (
            self.window.get(key_start..key_end),
            self.window.get(value_start..value_end),
        ) else {
            tracing::warn!(
                offset = self.pos,
                key_size = header.key_size,
                value_size = header.value_size,
                "record runs past the written region, stopping scan"
            );
            self.corrupt = true;
            self.done = true;
            return None;
        };

        let view = RecordView {
            offset: self.pos,
            header,
            key,
            value,
        };
        self.pos += record_len;
        Some(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(4, 4), 4);
        assert_eq!(align_up(5, 8), 8);
    }

    #[test]
    fn test_encoded_len_pads_key_and_value_separately() {
        // 8 header + 4 (1-byte key) + 4 (1-byte value)
        assert_eq!(encoded_len(1, 1, 4), 16);
        // 8 header + 8 (5-byte key) + 0 (empty value)
        assert_eq!(encoded_len(5, 0, 4), 16);
        assert_eq!(encoded_len(1, 1, 8), 24);
    }

    #[test]
    fn test_header_layout() {
        let header = RecordHeader {
            key_type: TypeTag::UTF8,
            value_type: TypeTag::U32,
            key_size: 0x0102,
            value_size: 0x0A0B_0C0D,
        };
        let mut buf = [0u8; HEADER_LEN];
        assert!(header.encode_into(&mut buf));
        assert_eq!(buf, [1, 2, 0x02, 0x01, 0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(RecordHeader::decode(&buf), Some(header));
    }

    #[test]
    fn test_header_needs_full_word_pair() {
        assert_eq!(RecordHeader::decode(&[1, 2, 3]), None);
        let mut short = [0u8; 4];
        assert!(!RecordHeader::SENTINEL.encode_into(&mut short));
    }

    #[test]
    fn test_write_and_read_back() {
        let key = Datum::text("abc");
        let value = Datum::text("hello");
        let len = encoded_len(3, 5, 4);
        let mut region = vec![0xFFu8; len + HEADER_LEN];
        assert!(write_record(&mut region[..len], &key, &value, 4));
        assert!(RecordHeader::SENTINEL.encode_into(&mut region[len..]));

        let mut reader = RecordReader::new(&region, 4);
        let record = reader.next().expect("one record");
        assert_eq!(record.offset, 0);
        assert_eq!(record.key_datum(), key);
        assert_eq!(record.value_datum(), value);
        // padding is zeroed
        assert_eq!(region[HEADER_LEN + 3], 0);
        assert!(reader.next().is_none());
        assert!(!reader.hit_corruption());
    }

    #[test]
    fn test_write_rejects_wrong_slot_size() {
        let mut buf = [0u8; 12];
        assert!(!write_record(
            &mut buf,
            &Datum::text("a"),
            &Datum::text("b"),
            4
        ));
    }

    #[test]
    fn test_reader_stops_on_truncated_record() {
        let header = RecordHeader {
            key_type: TypeTag::BYTES,
            value_type: TypeTag::BYTES,
            key_size: 4,
            value_size: 100,
        };
        let mut region = vec![0u8; 16];
        assert!(header.encode_into(&mut region));

        let mut reader = RecordReader::new(&region, 4);
        assert!(reader.next().is_none());
        assert!(reader.hit_corruption());
    }
}
