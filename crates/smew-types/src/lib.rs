//! Core value types shared across the Smew storage engine.
//!
//! This crate carries the vocabulary the subsystems agree on: page numbers,
//! record identifiers, key and traversal flags, duplicate-chain entries, and
//! the engine limits. It has no I/O and no engine logic.

pub mod limits;

use std::fmt;
use std::num::NonZeroU32;

use bitflags::bitflags;

// ---------------------------------------------------------------------------
// Page numbers
// ---------------------------------------------------------------------------

/// A page number in the store.
///
/// Page numbers are 1-based; 0 is reserved to mean "no page" (an absent
/// root, a missing sibling). The `NonZeroU32` representation makes
/// `Option<PageNumber>` pointer-width and rules the sentinel out of the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PageNumber(NonZeroU32);

impl PageNumber {
    /// Create a new page number from a raw u32.
    ///
    /// Returns `None` if `n` is 0.
    #[inline]
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Get the raw u32 value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Record identifiers
// ---------------------------------------------------------------------------

/// A record identifier: the address of a record blob, or — for the packed
/// size classes — the record bytes themselves.
///
/// For [`KeyFlags::BLOB_SIZE_TINY`] records the payload occupies the low
/// bytes and the most significant byte carries the payload length. For
/// [`KeyFlags::BLOB_SIZE_SMALL`] records the full 8-byte word is the payload.
/// Otherwise the value addresses an out-of-line blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct RecordId(u64);

impl RecordId {
    /// A zero record id (no record attached yet).
    pub const ZERO: Self = Self(0);

    /// Create a record id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The payload length encoded in the most significant byte, for tiny
    /// records packed directly into the id.
    #[inline]
    #[must_use]
    pub const fn tiny_len(self) -> u8 {
        (self.0 >> 56) as u8
    }

    /// The payload bytes of a packed record, in memory order.
    #[inline]
    #[must_use]
    pub const fn payload_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Pack a payload of fewer than 8 bytes into a tiny record id.
    #[must_use]
    pub fn pack_tiny(payload: &[u8]) -> Self {
        debug_assert!(payload.len() < 8);
        let mut bytes = [0u8; 8];
        bytes[..payload.len()].copy_from_slice(payload);
        bytes[7] = payload.len() as u8;
        Self(u64::from_le_bytes(bytes))
    }

    /// Pack an exactly 8-byte payload into a small record id.
    #[must_use]
    pub fn pack_small(payload: &[u8; 8]) -> Self {
        Self(u64::from_le_bytes(*payload))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

bitflags! {
    /// Flags carried by a key entry in a leaf node.
    ///
    /// The blob-size classes are mutually exclusive; `HAS_DUPLICATES` may be
    /// combined with any of them on the key itself, in which case the rid
    /// addresses the duplicate table and the size classes live on the
    /// individual duplicate entries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyFlags: u32 {
        /// The key has a duplicate chain stored out of line.
        const HAS_DUPLICATES  = 0b0001;
        /// The record is shorter than a machine word and packed into the rid.
        const BLOB_SIZE_TINY  = 0b0010;
        /// The record is exactly one machine word and stored as the rid.
        const BLOB_SIZE_SMALL = 0b0100;
        /// The record is empty.
        const BLOB_SIZE_EMPTY = 0b1000;
    }
}

bitflags! {
    /// Flags accepted by cursor traversal.
    ///
    /// At most one direction flag may be set. Omitting a direction means
    /// "read the current position".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MoveFlags: u32 {
        /// Position on the first key of the tree.
        const FIRST           = 0b0000_0001;
        /// Position on the last key of the tree.
        const LAST            = 0b0000_0010;
        /// Step to the next duplicate or key.
        const NEXT            = 0b0000_0100;
        /// Step to the previous duplicate or key.
        const PREVIOUS        = 0b0000_1000;
        /// Treat each key as a single logical position.
        const SKIP_DUPLICATES = 0b0001_0000;
        /// Step within the current duplicate chain only.
        const ONLY_DUPLICATES = 0b0010_0000;
    }
}

bitflags! {
    /// Flags accepted by cursor insert.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InsertFlags: u32 {
        /// Replace the record if the key already exists.
        const OVERWRITE = 0b01;
        /// Append the record to the key's duplicate chain.
        const DUPLICATE = 0b10;
    }
}

// ---------------------------------------------------------------------------
// Duplicate chains
// ---------------------------------------------------------------------------

/// One entry of a duplicate chain: the record flags and identifier of a
/// single value attached to a duplicated key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DupeEntry {
    /// Blob-size class of this duplicate's record.
    pub flags: KeyFlags,
    /// Record identifier (or packed payload) of this duplicate.
    pub rid: RecordId,
}

/// A duplicate table: the ordered entries of one key's duplicate chain.
///
/// The authoritative copy lives in the blob store; values of this type are
/// owned snapshots handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DupeTable {
    entries: Vec<DupeEntry>,
}

impl DupeTable {
    /// Create a table from its entries.
    #[must_use]
    pub fn new(entries: Vec<DupeEntry>) -> Self {
        Self { entries }
    }

    /// Create a single-entry table.
    #[must_use]
    pub fn single(entry: DupeEntry) -> Self {
        Self {
            entries: vec![entry],
        }
    }

    /// Number of entries in the table.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Entry at `index`, if present.
    #[must_use]
    pub fn entry(&self, index: u32) -> Option<&DupeEntry> {
        self.entries.get(index as usize)
    }

    /// Mutable entry at `index`, if present.
    pub fn entry_mut(&mut self, index: u32) -> Option<&mut DupeEntry> {
        self.entries.get_mut(index as usize)
    }

    /// All entries in chain order.
    #[must_use]
    pub fn entries(&self) -> &[DupeEntry] {
        &self.entries
    }

    /// Append an entry to the chain.
    pub fn push(&mut self, entry: DupeEntry) {
        self.entries.push(entry);
    }

    /// Remove and return the entry at `index`, if present.
    pub fn remove(&mut self, index: u32) -> Option<DupeEntry> {
        if (index as usize) < self.entries.len() {
            Some(self.entries.remove(index as usize))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_number_rejects_zero() {
        assert!(PageNumber::new(0).is_none());
        assert_eq!(PageNumber::new(7).unwrap().get(), 7);
    }

    #[test]
    fn option_page_number_is_word_sized() {
        assert_eq!(
            std::mem::size_of::<Option<PageNumber>>(),
            std::mem::size_of::<u32>()
        );
    }

    #[test]
    fn tiny_record_packing_round_trip() {
        let rid = RecordId::pack_tiny(b"abc");
        assert_eq!(rid.tiny_len(), 3);
        assert_eq!(&rid.payload_bytes()[..3], b"abc");
    }

    #[test]
    fn small_record_packing_round_trip() {
        let rid = RecordId::pack_small(b"12345678");
        assert_eq!(&rid.payload_bytes(), b"12345678");
    }

    #[test]
    fn blob_size_classes_are_distinct_bits() {
        let all = KeyFlags::BLOB_SIZE_TINY | KeyFlags::BLOB_SIZE_SMALL | KeyFlags::BLOB_SIZE_EMPTY;
        assert_eq!(all.bits().count_ones(), 3);
        assert!(!all.contains(KeyFlags::HAS_DUPLICATES));
    }

    #[test]
    fn dupe_table_indexing() {
        let mut table = DupeTable::default();
        table.push(DupeEntry {
            flags: KeyFlags::BLOB_SIZE_EMPTY,
            rid: RecordId::ZERO,
        });
        table.push(DupeEntry {
            flags: KeyFlags::empty(),
            rid: RecordId::new(42),
        });
        assert_eq!(table.count(), 2);
        assert_eq!(table.entry(1).unwrap().rid, RecordId::new(42));
        assert!(table.entry(2).is_none());
        assert_eq!(table.remove(0).unwrap().flags, KeyFlags::BLOB_SIZE_EMPTY);
        assert_eq!(table.count(), 1);
    }
}
