//! In-memory tree backend.
//!
//! [`MemTree`] implements the structural, paging, and blob contracts over
//! plain maps, enough to drive the cursor subsystem end-to-end without the
//! durable engine underneath: multi-leaf trees with sibling links, leaf
//! splits (couplings are broken first, as any page manager must), erase
//! with empty-leaf retirement, and out-of-line duplicate chains using the
//! packed record encoding, so every blob-size class is exercised.
//!
//! Internal nodes grow without splitting; only leaves are capacity-bound.
//! That keeps the structural code small while still producing the
//! multi-page sibling chains traversal needs.

use std::collections::HashMap;

use smew_error::{Result, SmewError};
use smew_types::{
    DupeEntry, DupeTable, InsertFlags, KeyFlags, MoveFlags, PageNumber, RecordId, limits,
};
use tracing::debug;

use crate::cursor::{self, CursorId, CursorPool};
use crate::node::{BtreeNode, KeyEntry};
use crate::pool::BufferPool;
use crate::traits::{DuplicateStore, NodeBacking, TreeOps};

/// Default number of keys a leaf holds before it splits.
pub const DEFAULT_LEAF_CAPACITY: u16 = 16;

/// In-memory backend: node store, blob store, and structural operations.
#[derive(Debug)]
pub struct MemTree {
    nodes: HashMap<PageNumber, BtreeNode>,
    root: Option<PageNumber>,
    next_page: u32,
    blobs: HashMap<u64, Vec<u8>>,
    dupes: HashMap<u64, DupeTable>,
    next_rid: u64,
    leaf_capacity: u16,
}

impl MemTree {
    /// Create an empty tree with the default leaf capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_leaf_capacity(DEFAULT_LEAF_CAPACITY)
    }

    /// Create an empty tree whose leaves split at `leaf_capacity` keys.
    #[must_use]
    pub fn with_leaf_capacity(leaf_capacity: u16) -> Self {
        assert!(leaf_capacity >= 2, "a leaf must hold at least two keys");
        Self {
            nodes: HashMap::new(),
            root: None,
            next_page: 1,
            blobs: HashMap::new(),
            dupes: HashMap::new(),
            next_rid: 1,
            leaf_capacity,
        }
    }

    fn alloc_page(&mut self) -> PageNumber {
        let id = PageNumber::new(self.next_page).expect("page counter starts at 1");
        self.next_page += 1;
        id
    }

    fn alloc_rid(&mut self) -> u64 {
        let rid = self.next_rid;
        self.next_rid += 1;
        rid
    }

    /// Encode a record into its blob-size class.
    fn encode_record(&mut self, data: &[u8]) -> (KeyFlags, RecordId) {
        if data.is_empty() {
            (KeyFlags::BLOB_SIZE_EMPTY, RecordId::ZERO)
        } else if data.len() < 8 {
            (KeyFlags::BLOB_SIZE_TINY, RecordId::pack_tiny(data))
        } else if data.len() == 8 {
            let mut word = [0u8; 8];
            word.copy_from_slice(data);
            (KeyFlags::BLOB_SIZE_SMALL, RecordId::pack_small(&word))
        } else {
            let rid = self.alloc_rid();
            self.blobs.insert(rid, data.to_vec());
            (KeyFlags::empty(), RecordId::new(rid))
        }
    }

    /// Release whatever `(flags, rid)` addresses: an out-of-line blob, or a
    /// whole duplicate chain including each entry's blob.
    fn free_record(&mut self, flags: KeyFlags, rid: RecordId) {
        if flags.contains(KeyFlags::HAS_DUPLICATES) {
            if let Some(table) = self.dupes.remove(&rid.get()) {
                for entry in table.entries() {
                    self.free_record(entry.flags, entry.rid);
                }
            }
        } else if !flags.intersects(
            KeyFlags::BLOB_SIZE_TINY | KeyFlags::BLOB_SIZE_SMALL | KeyFlags::BLOB_SIZE_EMPTY,
        ) {
            self.blobs.remove(&rid.get());
        }
    }

    /// Walk from the root to the leaf covering `key`. Returns the leaf and
    /// the internal pages visited, root first.
    fn descend(
        &mut self,
        pool: &mut BufferPool,
        key: &[u8],
    ) -> Result<(PageNumber, Vec<PageNumber>)> {
        let mut current = self.root.ok_or(SmewError::KeyNotFound)?;
        let mut path = Vec::new();
        for _ in 0..limits::MAX_BTREE_DEPTH {
            let node = pool.fetch(self, current)?.node();
            if node.is_leaf() {
                return Ok((current, path));
            }
            let child = node.child_for(key)?;
            path.push(current);
            current = child;
        }
        Err(SmewError::corrupt("tree deeper than maximum depth"))
    }

    /// Split `leaf`, moving its upper half to a fresh right sibling.
    /// Returns `(left, right, separator)`.
    fn split_leaf(
        &mut self,
        pool: &mut BufferPool,
        cursors: &mut CursorPool,
        leaf: PageNumber,
        path: &[PageNumber],
    ) -> Result<(PageNumber, PageNumber, Vec<u8>)> {
        // No coupling survives the slot reshuffle.
        cursor::uncouple_all_cursors(self, pool, cursors, leaf, 0)?;

        let right_id = self.alloc_page();
        let pivot = self.leaf_capacity / 2;

        let (moved, old_right) = {
            let page = pool.page_mut(leaf)?;
            let old_right = page.node().right();
            let moved = page.node_mut().split_off(pivot);
            page.node_mut().set_right(Some(right_id));
            page.set_dirty(true);
            (moved, old_right)
        };

        let separator = moved
            .first()
            .map(|e| e.data().to_vec())
            .ok_or_else(|| SmewError::corrupt("split produced an empty right node"))?;

        let mut right = BtreeNode::new_leaf();
        right.set_left(Some(leaf));
        right.set_right(old_right);
        right.extend_keys(moved);
        self.nodes.insert(right_id, right);

        if let Some(neighbor) = old_right {
            let page = pool.fetch(self, neighbor)?;
            page.node_mut().set_left(Some(right_id));
            page.set_dirty(true);
        }

        self.insert_separator(pool, path, leaf, right_id, separator.clone())?;
        debug!(left = leaf.get(), right = right_id.get(), "leaf split");
        Ok((leaf, right_id, separator))
    }

    fn insert_separator(
        &mut self,
        pool: &mut BufferPool,
        path: &[PageNumber],
        left: PageNumber,
        right: PageNumber,
        separator: Vec<u8>,
    ) -> Result<()> {
        match path.last() {
            Some(&parent) => {
                let page = pool.page_mut(parent)?;
                let pos = match page.node().search(&separator) {
                    Ok(_) => return Err(SmewError::corrupt("separator already present")),
                    Err(pos) => pos,
                };
                page.node_mut()
                    .insert_key(pos, KeyEntry::separator(separator, right));
                page.set_dirty(true);
                Ok(())
            }
            None => {
                // The leaf was the root: grow the tree by one level.
                let new_root = self.alloc_page();
                let mut node = BtreeNode::new_internal(left);
                node.insert_key(0, KeyEntry::separator(separator, right));
                self.nodes.insert(new_root, node);
                self.root = Some(new_root);
                Ok(())
            }
        }
    }

    /// Append `record` to the duplicate chain of the key at `(leaf, slot)`,
    /// starting a chain if the key had a single value. Returns the new
    /// entry's duplicate index.
    fn append_duplicate(
        &mut self,
        pool: &mut BufferPool,
        leaf: PageNumber,
        slot: u16,
        record: &[u8],
    ) -> Result<u32> {
        let (entry_flags, entry_rid) = {
            let entry = pool.page(leaf)?.node().try_key(slot)?;
            (entry.flags(), entry.rid())
        };
        let (new_flags, new_rid) = self.encode_record(record);

        if entry_flags.contains(KeyFlags::HAS_DUPLICATES) {
            let table = self
                .dupes
                .get_mut(&entry_rid.get())
                .ok_or_else(|| SmewError::corrupt("missing duplicate table"))?;
            table.push(DupeEntry {
                flags: new_flags,
                rid: new_rid,
            });
            Ok(table.count() - 1)
        } else {
            // Second value for this key: the existing record becomes
            // duplicate 0 and the key now addresses the chain.
            let chain = self.alloc_rid();
            let mut table = DupeTable::default();
            table.push(DupeEntry {
                flags: entry_flags,
                rid: entry_rid,
            });
            table.push(DupeEntry {
                flags: new_flags,
                rid: new_rid,
            });
            self.dupes.insert(chain, table);

            let page = pool.page_mut(leaf)?;
            let entry = page.node_mut().try_key_mut(slot)?;
            entry.set_flags(KeyFlags::HAS_DUPLICATES);
            entry.set_rid(RecordId::new(chain));
            Ok(1)
        }
    }

    /// Remove one duplicate from the chain of the key at `(leaf, slot)`,
    /// folding the last survivor back into the key entry.
    fn erase_duplicate(
        &mut self,
        pool: &mut BufferPool,
        leaf: PageNumber,
        slot: u16,
        chain: RecordId,
        dup_index: u32,
    ) -> Result<()> {
        let (removed, survivor) = {
            let table = self
                .dupes
                .get_mut(&chain.get())
                .ok_or_else(|| SmewError::corrupt("missing duplicate table"))?;
            let removed = table.remove(dup_index).ok_or(SmewError::KeyNotFound)?;
            let survivor = if table.count() == 1 {
                table.entry(0).copied()
            } else {
                None
            };
            (removed, survivor)
        };
        self.free_record(removed.flags, removed.rid);

        if let Some(survivor) = survivor {
            self.dupes.remove(&chain.get());
            let page = pool.page_mut(leaf)?;
            let entry = page.node_mut().try_key_mut(slot)?;
            entry.set_flags(survivor.flags);
            entry.set_rid(survivor.rid);
        }
        Ok(())
    }

    /// Empty the duplicate chain addressed by `chain`, leaving the owning
    /// key's `HAS_DUPLICATES` flag behind. Test hook for the corruption
    /// branches that guard against a drained chain.
    #[cfg(test)]
    pub(crate) fn drain_duplicates(&mut self, chain: RecordId) {
        if let Some(table) = self.dupes.get_mut(&chain.get()) {
            *table = DupeTable::default();
        }
    }

    /// Unlink an emptied leaf from the sibling chain and its parent, then
    /// drop it from the stores.
    fn retire_empty_leaf(
        &mut self,
        pool: &mut BufferPool,
        cursors: &mut CursorPool,
        leaf: PageNumber,
        path: &[PageNumber],
    ) -> Result<()> {
        let (left, right) = {
            let node = pool.page(leaf)?.node();
            (node.left(), node.right())
        };
        if let Some(neighbor) = left {
            let page = pool.fetch(self, neighbor)?;
            page.node_mut().set_right(right);
            page.set_dirty(true);
        }
        if let Some(neighbor) = right {
            let page = pool.fetch(self, neighbor)?;
            page.node_mut().set_left(left);
            page.set_dirty(true);
        }

        if let Some(&parent) = path.last() {
            let page = pool.page_mut(parent)?;
            let node = page.node_mut();
            if node.ptr_left() == Some(leaf) {
                // Promote the first separator's child to the leftmost link.
                if node.count() > 0 {
                    let first = node.remove_key(0);
                    node.set_ptr_left(first.child());
                }
            } else if let Some(pos) =
                (0..node.count()).find(|&i| node.key(i).and_then(KeyEntry::child) == Some(leaf))
            {
                node.remove_key(pos);
            }
            page.set_dirty(true);
        }

        cursor::uncouple_all_cursors(self, pool, cursors, leaf, 0)?;
        pool.page_mut(leaf)?.set_dirty(false);
        pool.evict(self, leaf)?;
        self.nodes.remove(&leaf);
        debug!(page = leaf.get(), "empty leaf retired");
        Ok(())
    }
}

impl Default for MemTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeBacking for MemTree {
    fn load_node(&mut self, page: PageNumber) -> Result<BtreeNode> {
        self.nodes
            .get(&page)
            .cloned()
            .ok_or(SmewError::PageNotFound { page: page.get() })
    }

    fn store_node(&mut self, page: PageNumber, node: &BtreeNode) -> Result<()> {
        self.nodes.insert(page, node.clone());
        Ok(())
    }
}

impl TreeOps for MemTree {
    fn root_page(&self) -> Option<PageNumber> {
        self.root
    }

    fn find_cursor(
        &mut self,
        pool: &mut BufferPool,
        cursors: &mut CursorPool,
        cursor: CursorId,
        key: &[u8],
        _flags: MoveFlags,
    ) -> Result<()> {
        cursor::set_to_nil(pool, cursors, cursor)?;
        if self.root.is_none() {
            return Err(SmewError::KeyNotFound);
        }
        let (leaf, _path) = self.descend(pool, key)?;
        match pool.page(leaf)?.node().search(key) {
            Ok(slot) => cursor::couple_to(pool, cursors, cursor, leaf, slot, 0),
            Err(_) => Err(SmewError::KeyNotFound),
        }
    }

    fn insert_cursor(
        &mut self,
        pool: &mut BufferPool,
        cursors: &mut CursorPool,
        cursor: CursorId,
        key: &[u8],
        record: &[u8],
        flags: InsertFlags,
    ) -> Result<()> {
        cursor::set_to_nil(pool, cursors, cursor)?;

        if self.root.is_none() {
            let id = self.alloc_page();
            self.nodes.insert(id, BtreeNode::new_leaf());
            self.root = Some(id);
        }

        let (leaf, path) = self.descend(pool, key)?;
        match pool.page(leaf)?.node().search(key) {
            Ok(slot) => {
                let dup_index = if flags.contains(InsertFlags::DUPLICATE) {
                    self.append_duplicate(pool, leaf, slot, record)?
                } else if flags.contains(InsertFlags::OVERWRITE) {
                    self.set_record(pool, leaf, slot, 0, record)?;
                    0
                } else {
                    return Err(SmewError::DuplicateKey);
                };
                pool.page_mut(leaf)?.set_dirty(true);
                cursor::couple_to(pool, cursors, cursor, leaf, slot, dup_index)
            }
            Err(pos) => {
                let count = pool.page(leaf)?.node().count();
                let (target, target_pos) = if count >= self.leaf_capacity {
                    let (left, right, separator) = self.split_leaf(pool, cursors, leaf, &path)?;
                    let target = if key < separator.as_slice() { left } else { right };
                    match pool.page(target)?.node().search(key) {
                        Ok(_) => return Err(SmewError::corrupt("key appeared during split")),
                        Err(pos) => (target, pos),
                    }
                } else {
                    // Slots at and past the insertion point shift right.
                    cursor::uncouple_all_cursors(self, pool, cursors, leaf, pos)?;
                    (leaf, pos)
                };

                let (record_flags, rid) = self.encode_record(record);
                let page = pool.page_mut(target)?;
                page.node_mut()
                    .insert_key(target_pos, KeyEntry::new(key.to_vec(), record_flags, rid));
                page.set_dirty(true);
                cursor::couple_to(pool, cursors, cursor, target, target_pos, 0)
            }
        }
    }

    fn erase_cursor(
        &mut self,
        pool: &mut BufferPool,
        cursors: &mut CursorPool,
        cursor: CursorId,
        key: &[u8],
    ) -> Result<()> {
        if self.root.is_none() {
            return Err(SmewError::KeyNotFound);
        }
        let (leaf, path) = self.descend(pool, key)?;
        let slot = match pool.page(leaf)?.node().search(key) {
            Ok(slot) => slot,
            Err(_) => return Err(SmewError::KeyNotFound),
        };
        let (entry_flags, entry_rid) = {
            let entry = pool.page(leaf)?.node().try_key(slot)?;
            (entry.flags(), entry.rid())
        };

        if entry_flags.contains(KeyFlags::HAS_DUPLICATES) {
            let dup_index = cursors.get(cursor)?.dup_index();
            self.erase_duplicate(pool, leaf, slot, entry_rid, dup_index)?;
            pool.page_mut(leaf)?.set_dirty(true);
            return Ok(());
        }

        // Slots at and past the erased one shift left.
        cursor::uncouple_all_cursors(self, pool, cursors, leaf, slot)?;
        let removed = pool.page_mut(leaf)?.node_mut().remove_key(slot);
        pool.page_mut(leaf)?.set_dirty(true);
        self.free_record(removed.flags(), removed.rid());

        if pool.page(leaf)?.node().count() == 0 && self.root != Some(leaf) {
            self.retire_empty_leaf(pool, cursors, leaf, &path)?;
        }
        Ok(())
    }

    fn set_record(
        &mut self,
        pool: &mut BufferPool,
        page: PageNumber,
        slot: u16,
        dup_index: u32,
        record: &[u8],
    ) -> Result<()> {
        let (entry_flags, entry_rid) = {
            let entry = pool.page(page)?.node().try_key(slot)?;
            (entry.flags(), entry.rid())
        };

        if entry_flags.contains(KeyFlags::HAS_DUPLICATES) {
            let old = {
                let table = self
                    .dupes
                    .get(&entry_rid.get())
                    .ok_or_else(|| SmewError::corrupt("missing duplicate table"))?;
                *table.entry(dup_index).ok_or(SmewError::KeyNotFound)?
            };
            self.free_record(old.flags, old.rid);
            let (new_flags, new_rid) = self.encode_record(record);
            let table = self
                .dupes
                .get_mut(&entry_rid.get())
                .ok_or_else(|| SmewError::corrupt("missing duplicate table"))?;
            let entry = table
                .entry_mut(dup_index)
                .ok_or(SmewError::KeyNotFound)?;
            entry.flags = new_flags;
            entry.rid = new_rid;
        } else {
            self.free_record(entry_flags, entry_rid);
            let (new_flags, new_rid) = self.encode_record(record);
            let resident = pool.page_mut(page)?;
            let entry = resident.node_mut().try_key_mut(slot)?;
            entry.set_flags(new_flags);
            entry.set_rid(new_rid);
        }
        Ok(())
    }

    fn read_key(&mut self, entry: &KeyEntry) -> Result<Vec<u8>> {
        Ok(entry.data().to_vec())
    }

    fn read_record(
        &mut self,
        pool: &mut BufferPool,
        flags: KeyFlags,
        rid: RecordId,
    ) -> Result<Vec<u8>> {
        if flags.contains(KeyFlags::HAS_DUPLICATES) {
            // A chain address stands in for its first duplicate.
            let first = {
                let table = self
                    .dupes
                    .get(&rid.get())
                    .ok_or_else(|| SmewError::corrupt("missing duplicate table"))?;
                *table
                    .entry(0)
                    .ok_or_else(|| SmewError::corrupt("empty duplicate chain"))?
            };
            return self.read_record(pool, first.flags, first.rid);
        }
        if flags.contains(KeyFlags::BLOB_SIZE_EMPTY) {
            return Ok(Vec::new());
        }
        if flags.contains(KeyFlags::BLOB_SIZE_TINY) {
            let len = rid.tiny_len() as usize;
            return Ok(rid.payload_bytes()[..len].to_vec());
        }
        if flags.contains(KeyFlags::BLOB_SIZE_SMALL) {
            return Ok(rid.payload_bytes().to_vec());
        }
        self.blobs
            .get(&rid.get())
            .cloned()
            .ok_or_else(|| SmewError::corrupt("missing record blob"))
    }
}

impl DuplicateStore for MemTree {
    fn duplicate_get(&mut self, chain: RecordId, index: u32) -> Result<DupeEntry> {
        let table = self
            .dupes
            .get(&chain.get())
            .ok_or_else(|| SmewError::corrupt("missing duplicate table"))?;
        table.entry(index).copied().ok_or(SmewError::KeyNotFound)
    }

    fn duplicate_get_count(&mut self, chain: RecordId) -> Result<u32> {
        let table = self
            .dupes
            .get(&chain.get())
            .ok_or_else(|| SmewError::corrupt("missing duplicate table"))?;
        Ok(table.count())
    }

    fn duplicate_get_table(&mut self, chain: RecordId) -> Result<DupeTable> {
        self.dupes
            .get(&chain.get())
            .cloned()
            .ok_or_else(|| SmewError::corrupt("missing duplicate table"))
    }

    fn datasize(&mut self, rid: RecordId) -> Result<u64> {
        self.blobs
            .get(&rid.get())
            .map(|blob| blob.len() as u64)
            .ok_or_else(|| SmewError::corrupt("missing record blob"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::TreeEnv;

    fn env() -> TreeEnv<MemTree> {
        TreeEnv::new(MemTree::with_leaf_capacity(4))
    }

    #[test]
    fn insert_builds_a_root_leaf() {
        let mut env = env();
        let c = env.create_cursor();
        env.insert(c, b"k1", b"v1", InsertFlags::empty()).unwrap();
        assert!(env.backend().unwrap().root_page().is_some());
        assert!(env.cursor(c).unwrap().is_coupled());
    }

    #[test]
    fn duplicate_insert_without_flags_is_rejected() {
        let mut env = env();
        let c = env.create_cursor();
        env.insert(c, b"k", b"v", InsertFlags::empty()).unwrap();
        assert!(matches!(
            env.insert(c, b"k", b"w", InsertFlags::empty()),
            Err(SmewError::DuplicateKey)
        ));
    }

    #[test]
    fn split_links_siblings_both_ways() {
        let mut env = env();
        let c = env.create_cursor();
        for i in 0u8..9 {
            env.insert(c, &[i], &[i], InsertFlags::empty()).unwrap();
        }
        env.close_cursor(c).unwrap();

        // Walk the leaf chain forward and backward through a fresh cursor.
        let c = env.create_cursor();
        let mut forward = Vec::new();
        let mut key = Vec::new();
        env.move_cursor(c, Some(&mut key), None, MoveFlags::FIRST).unwrap();
        forward.push(key.clone());
        while env
            .move_cursor(c, Some(&mut key), None, MoveFlags::NEXT)
            .is_ok()
        {
            forward.push(key.clone());
        }
        assert_eq!(forward.len(), 9);
        assert!(forward.windows(2).all(|w| w[0] < w[1]));

        let mut backward = Vec::new();
        env.move_cursor(c, Some(&mut key), None, MoveFlags::LAST).unwrap();
        backward.push(key.clone());
        while env
            .move_cursor(c, Some(&mut key), None, MoveFlags::PREVIOUS)
            .is_ok()
        {
            backward.push(key.clone());
        }
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn chain_starts_on_second_value_and_collapses_on_erase() {
        let mut env = env();
        let c = env.create_cursor();
        env.insert(c, b"k", b"first", InsertFlags::empty()).unwrap();
        env.insert(c, b"k", b"second", InsertFlags::DUPLICATE).unwrap();
        assert_eq!(env.duplicate_count(c).unwrap(), 2);

        // Erase the duplicate the cursor points at (the appended one).
        env.erase(c).unwrap();
        assert!(env.is_nil(c));
        env.find(c, b"k", None, MoveFlags::empty()).unwrap();
        assert_eq!(env.duplicate_count(c).unwrap(), 1);
        let mut record = Vec::new();
        env.move_cursor(c, None, Some(&mut record), MoveFlags::empty())
            .unwrap();
        assert_eq!(record, b"first");
    }

    #[test]
    fn erase_retires_empty_leaves_from_the_chain() {
        let mut env = env();
        let c = env.create_cursor();
        for i in 0u8..8 {
            env.insert(c, &[i], &[i], InsertFlags::empty()).unwrap();
        }
        // Empty out one side of the split entirely.
        for i in 0u8..2 {
            env.find(c, &[i], None, MoveFlags::empty()).unwrap();
            env.erase(c).unwrap();
        }
        // The remaining keys still enumerate in order.
        let mut seen = Vec::new();
        let mut key = Vec::new();
        env.move_cursor(c, Some(&mut key), None, MoveFlags::FIRST).unwrap();
        seen.push(key[0]);
        while env
            .move_cursor(c, Some(&mut key), None, MoveFlags::NEXT)
            .is_ok()
        {
            seen.push(key[0]);
        }
        assert_eq!(seen, (2u8..8).collect::<Vec<_>>());
    }

    #[test]
    fn record_encoding_covers_all_size_classes() {
        let mut tree = MemTree::new();
        let (f, _) = tree.encode_record(b"");
        assert!(f.contains(KeyFlags::BLOB_SIZE_EMPTY));
        let (f, rid) = tree.encode_record(b"abc");
        assert!(f.contains(KeyFlags::BLOB_SIZE_TINY));
        assert_eq!(rid.tiny_len(), 3);
        let (f, _) = tree.encode_record(b"12345678");
        assert!(f.contains(KeyFlags::BLOB_SIZE_SMALL));
        let (f, rid) = tree.encode_record(b"123456789");
        assert!(f.is_empty());
        assert_eq!(tree.datasize(rid).unwrap(), 9);
    }
}
