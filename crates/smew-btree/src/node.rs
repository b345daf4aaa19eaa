//! In-memory representation of B-tree nodes and key entries.
//!
//! The on-store binary layout belongs to the paging layer; the cursor
//! subsystem only ever sees parsed nodes. A node is an ordered array of
//! [`KeyEntry`] values plus the child and sibling links the traversal engine
//! follows.

use smew_error::{Result, SmewError};
use smew_types::{KeyFlags, PageNumber, RecordId};

/// One key entry inside a node.
///
/// On leaves, `rid` addresses the record (or packs it, per the blob-size
/// class in `flags`), or addresses the duplicate table when
/// [`KeyFlags::HAS_DUPLICATES`] is set. On internal nodes, `rid` carries the
/// right child page of the separator key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    flags: KeyFlags,
    rid: RecordId,
    data: Vec<u8>,
}

impl KeyEntry {
    /// Create a leaf entry.
    #[must_use]
    pub fn new(data: Vec<u8>, flags: KeyFlags, rid: RecordId) -> Self {
        Self { flags, rid, data }
    }

    /// Create an internal-node separator entry pointing at `child`.
    #[must_use]
    pub fn separator(data: Vec<u8>, child: PageNumber) -> Self {
        Self {
            flags: KeyFlags::empty(),
            rid: RecordId::new(u64::from(child.get())),
            data,
        }
    }

    /// Key flags.
    #[must_use]
    pub fn flags(&self) -> KeyFlags {
        self.flags
    }

    /// Replace the key flags.
    pub fn set_flags(&mut self, flags: KeyFlags) {
        self.flags = flags;
    }

    /// Record identifier (or duplicate-table address, or packed payload).
    #[must_use]
    pub fn rid(&self) -> RecordId {
        self.rid
    }

    /// Replace the record identifier.
    pub fn set_rid(&mut self, rid: RecordId) {
        self.rid = rid;
    }

    /// Raw key bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The child page this separator points at (internal nodes only).
    #[must_use]
    pub fn child(&self) -> Option<PageNumber> {
        PageNumber::new(self.rid.get() as u32)
    }
}

/// A parsed B-tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtreeNode {
    leaf: bool,
    /// Leftmost child of an internal node.
    ptr_left: Option<PageNumber>,
    /// Left sibling of a leaf.
    left: Option<PageNumber>,
    /// Right sibling of a leaf.
    right: Option<PageNumber>,
    keys: Vec<KeyEntry>,
}

impl BtreeNode {
    /// Create an empty leaf.
    #[must_use]
    pub fn new_leaf() -> Self {
        Self {
            leaf: true,
            ptr_left: None,
            left: None,
            right: None,
            keys: Vec::new(),
        }
    }

    /// Create an empty internal node whose leftmost child is `ptr_left`.
    #[must_use]
    pub fn new_internal(ptr_left: PageNumber) -> Self {
        Self {
            leaf: false,
            ptr_left: Some(ptr_left),
            left: None,
            right: None,
            keys: Vec::new(),
        }
    }

    /// Whether this node is a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.leaf
    }

    /// Number of key entries.
    #[must_use]
    pub fn count(&self) -> u16 {
        self.keys.len() as u16
    }

    /// Leftmost child of an internal node.
    #[must_use]
    pub fn ptr_left(&self) -> Option<PageNumber> {
        self.ptr_left
    }

    /// Replace the leftmost-child link of an internal node.
    pub fn set_ptr_left(&mut self, ptr_left: Option<PageNumber>) {
        self.ptr_left = ptr_left;
    }

    /// Left sibling of a leaf.
    #[must_use]
    pub fn left(&self) -> Option<PageNumber> {
        self.left
    }

    /// Right sibling of a leaf.
    #[must_use]
    pub fn right(&self) -> Option<PageNumber> {
        self.right
    }

    /// Set the left sibling link.
    pub fn set_left(&mut self, left: Option<PageNumber>) {
        self.left = left;
    }

    /// Set the right sibling link.
    pub fn set_right(&mut self, right: Option<PageNumber>) {
        self.right = right;
    }

    /// Entry at `slot`, if in range.
    #[must_use]
    pub fn key(&self, slot: u16) -> Option<&KeyEntry> {
        self.keys.get(slot as usize)
    }

    /// Entry at `slot`, or a corruption error naming the slot.
    pub fn try_key(&self, slot: u16) -> Result<&KeyEntry> {
        self.keys
            .get(slot as usize)
            .ok_or_else(|| SmewError::corrupt(format!("slot {slot} out of range")))
    }

    /// Mutable entry at `slot`, or a corruption error naming the slot.
    pub fn try_key_mut(&mut self, slot: u16) -> Result<&mut KeyEntry> {
        self.keys
            .get_mut(slot as usize)
            .ok_or_else(|| SmewError::corrupt(format!("slot {slot} out of range")))
    }

    /// All entries in slot order.
    #[must_use]
    pub fn keys(&self) -> &[KeyEntry] {
        &self.keys
    }

    /// Binary-search the node for `key`.
    ///
    /// `Ok(slot)` if the key is present, `Err(slot)` with the insertion
    /// position otherwise.
    pub fn search(&self, key: &[u8]) -> std::result::Result<u16, u16> {
        match self.keys.binary_search_by(|e| e.data.as_slice().cmp(key)) {
            Ok(i) => Ok(i as u16),
            Err(i) => Err(i as u16),
        }
    }

    /// Which child of an internal node covers `key`.
    pub fn child_for(&self, key: &[u8]) -> Result<PageNumber> {
        debug_assert!(!self.leaf);
        let slot = match self.search(key) {
            Ok(i) => Some(i),
            Err(0) => None,
            Err(i) => Some(i - 1),
        };
        match slot {
            None => self
                .ptr_left
                .ok_or_else(|| SmewError::corrupt("internal node has no leftmost child")),
            Some(i) => self
                .try_key(i)?
                .child()
                .ok_or_else(|| SmewError::corrupt("separator has no child page")),
        }
    }

    /// Insert `entry` at `slot`, shifting later entries right.
    pub fn insert_key(&mut self, slot: u16, entry: KeyEntry) {
        self.keys.insert(slot as usize, entry);
    }

    /// Remove and return the entry at `slot`, shifting later entries left.
    pub fn remove_key(&mut self, slot: u16) -> KeyEntry {
        self.keys.remove(slot as usize)
    }

    /// Split off the entries at `slot` and above, leaving the rest in place.
    pub fn split_off(&mut self, slot: u16) -> Vec<KeyEntry> {
        self.keys.split_off(slot as usize)
    }

    /// Append `entries` in order. The caller is responsible for keeping the
    /// node sorted.
    pub fn extend_keys(&mut self, entries: Vec<KeyEntry>) {
        self.keys.extend(entries);
    }
}
