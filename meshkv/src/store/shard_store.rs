//! Append-only key/value log over a fixed memory region.

use crate::error::StoreError;
use crate::types::Datum;

use super::record::{
    self, encoded_len, RecordHeader, RecordReader, HEADER_LEN, MAX_KEY_LEN, MAX_VALUE_LEN,
};

/// Default region alignment in bytes.
pub const DEFAULT_ALIGNMENT: usize = 4;

/// A shard's storage engine.
///
/// Records are appended at a write cursor and never modified. Lookups scan
/// the log from the start and return the **first** record whose key matches,
/// so a later `put` with a duplicate key stays invisible until `clear`.
///
/// # Examples
///
/// ```
/// use meshkv::store::ShardStore;
/// use meshkv::Datum;
///
/// let mut store = ShardStore::new(256, 4);
/// store.put(&Datum::text("k"), &Datum::text("v1")).expect("room");
/// store.put(&Datum::text("k"), &Datum::text("v2")).expect("room");
/// assert_eq!(store.pull(&Datum::text("k")), Some(Datum::text("v1")));
///
/// store.clear();
/// assert_eq!(store.pull(&Datum::text("k")), None);
/// ```
#[derive(Debug)]
pub struct ShardStore {
    region: Box<[u8]>,
    cursor: usize,
    alignment: usize,
    records: usize,
}

impl ShardStore {
    /// Create a store over a zeroed region of `capacity` bytes.
    ///
    /// `alignment` must be a power of two of at least 4; configuration
    /// validation enforces this before nodes are built.
    pub fn new(capacity: usize, alignment: usize) -> Self {
        debug_assert!(alignment.is_power_of_two() && alignment >= 4);
        Self {
            region: vec![0u8; capacity].into_boxed_slice(),
            cursor: 0,
            alignment,
            records: 0,
        }
    }

    /// Append a record.
    ///
    /// Returns the number of bytes written (header plus padded key and value).
    ///
    /// # Errors
    ///
    /// - `EmptyKey` if the key is empty
    /// - `TooLarge` if the key or value cannot be described by the header
    /// - `OutOfSpace` if the record does not fit; the store is left unchanged
    pub fn put(&mut self, key: &Datum, value: &Datum) -> Result<usize, StoreError> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        if key.len() > MAX_KEY_LEN {
            return Err(StoreError::TooLarge {
                what: "key",
                len: key.len(),
                max: MAX_KEY_LEN,
            });
        }
        if value.len() > MAX_VALUE_LEN {
            return Err(StoreError::TooLarge {
                what: "value",
                len: value.len(),
                max: MAX_VALUE_LEN,
            });
        }

        let len = encoded_len(key.len(), value.len(), self.alignment);
        let remaining = self.remaining();
        if len > remaining {
            return Err(StoreError::OutOfSpace {
                needed: len,
                remaining,
            });
        }

        let start = self.cursor;
        let slot = &mut self.region[start..start + len];
        if !record::write_record(slot, key, value, self.alignment) {
            // Sizes were checked above; a refusal here leaves the cursor untouched.
            return Err(StoreError::OutOfSpace {
                needed: len,
                remaining,
            });
        }

        self.cursor += len;
        self.records += 1;
        self.write_sentinel();

        tracing::trace!(
            offset = start,
            len,
            used = self.cursor,
            capacity = self.capacity(),
            "record appended"
        );
        Ok(len)
    }

    /// Value of the first record whose key bytes equal `key`'s bytes.
    ///
    /// Key type tags are not compared; two keys with identical bytes are the
    /// same key.
    pub fn pull(&self, key: &Datum) -> Option<Datum> {
        let mut reader = self.records();
        let found = reader
            .by_ref()
            .find(|record| record.key == key.bytes.as_slice())
            .map(|record| record.value_datum());

        if found.is_none() && reader.hit_corruption() {
            tracing::warn!(used = self.cursor, "pull scan stopped on a corrupt record");
        }
        found
    }

    /// Drop every record by rewinding the cursor to the region start.
    ///
    /// Old bytes are not zeroed; a sentinel at offset 0 hides them.
    pub fn clear(&mut self) {
        self.cursor = 0;
        self.records = 0;
        self.write_sentinel();
    }

    /// Iterate over stored records in log order.
    pub fn records(&self) -> RecordReader<'_> {
        RecordReader::new(&self.region[..self.cursor], self.alignment)
    }

    /// Number of records appended since creation or the last `clear`.
    pub fn record_count(&self) -> usize {
        self.records
    }

    /// Bytes written since creation or the last `clear`.
    pub fn used(&self) -> usize {
        self.cursor
    }

    /// Bytes left for new records.
    pub fn remaining(&self) -> usize {
        self.region.len() - self.cursor
    }

    /// Region size in bytes.
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Region alignment in bytes.
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    fn write_sentinel(&mut self) {
        // The region end is an implicit sentinel when there is no room for one.
        if let Some(tail) = self.region.get_mut(self.cursor..self.cursor + HEADER_LEN) {
            RecordHeader::SENTINEL.encode_into(tail);
        }
    }
}
