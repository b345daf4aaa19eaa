//! Contracts consumed by the cursor subsystem.
//!
//! The cursor core does not implement B-tree structural operations, paging
//! I/O, or the blob store; it calls into them through the traits below. The
//! crate ships one complete implementation, [`MemTree`](crate::MemTree),
//! which backs the tests and in-memory embedding; a durable engine plugs in
//! its own.

use smew_error::Result;
use smew_types::{DupeEntry, DupeTable, InsertFlags, KeyFlags, MoveFlags, PageNumber, RecordId};

use crate::cursor::{CursorId, CursorPool};
use crate::node::{BtreeNode, KeyEntry};
use crate::pool::BufferPool;

/// Paging I/O: materialize nodes into the buffer pool and write them back.
///
/// This is the seam the buffer pool uses on fetch and evict. Implementations
/// may block on I/O.
pub trait NodeBacking {
    /// Load the node stored under `page`.
    fn load_node(&mut self, page: PageNumber) -> Result<BtreeNode>;

    /// Write a node back under `page`.
    fn store_node(&mut self, page: PageNumber, node: &BtreeNode) -> Result<()>;
}

/// B-tree structural operations and key/record helpers.
///
/// `find_cursor`, `insert_cursor`, and `erase_cursor` receive the buffer pool
/// and cursor pool because they couple and uncouple cursors as part of their
/// contract: a successful find or insert leaves the cursor coupled to the
/// matching slot with `dup_index = 0`, and structural changes must call
/// [`uncouple_all_cursors`](crate::cursor::uncouple_all_cursors) before
/// invalidating slots.
pub trait TreeOps: NodeBacking {
    /// Root page of the tree, or `None` while the tree is empty.
    fn root_page(&self) -> Option<PageNumber>;

    /// Position `cursor` on `key`. On success the cursor is coupled to the
    /// matching slot with `dup_index = 0`; on failure it is left NIL and the
    /// error is returned verbatim.
    fn find_cursor(
        &mut self,
        pool: &mut BufferPool,
        cursors: &mut CursorPool,
        cursor: CursorId,
        key: &[u8],
        flags: MoveFlags,
    ) -> Result<()>;

    /// Insert `key`/`record`, leaving `cursor` coupled to the new slot.
    fn insert_cursor(
        &mut self,
        pool: &mut BufferPool,
        cursors: &mut CursorPool,
        cursor: CursorId,
        key: &[u8],
        record: &[u8],
        flags: InsertFlags,
    ) -> Result<()>;

    /// Erase the entry identified by the uncoupled `key`; `cursor` carries
    /// the duplicate position the caller snapshotted before uncoupling.
    fn erase_cursor(
        &mut self,
        pool: &mut BufferPool,
        cursors: &mut CursorPool,
        cursor: CursorId,
        key: &[u8],
    ) -> Result<()>;

    /// Overwrite the record of the entry at `(page, slot)`. For keys with a
    /// duplicate chain, `dup_index` selects the duplicate to overwrite.
    fn set_record(
        &mut self,
        pool: &mut BufferPool,
        page: PageNumber,
        slot: u16,
        dup_index: u32,
        record: &[u8],
    ) -> Result<()>;

    /// Extract the key bytes of an entry. Serves both the read-after-position
    /// path of `move` and the snapshot copy taken by `uncouple`.
    fn read_key(&mut self, entry: &KeyEntry) -> Result<Vec<u8>>;

    /// Materialize the record addressed by `(flags, rid)`. May fetch pages
    /// through `pool` and therefore run while the caller holds a page pin.
    fn read_record(
        &mut self,
        pool: &mut BufferPool,
        flags: KeyFlags,
        rid: RecordId,
    ) -> Result<Vec<u8>>;
}

/// Out-of-line duplicate chains and blob sizing.
pub trait DuplicateStore {
    /// Fetch one entry of the duplicate chain addressed by `chain`.
    ///
    /// Returns `KeyNotFound` when `index` overshoots the chain; traversal
    /// treats that as the recoverable cross-key signal.
    fn duplicate_get(&mut self, chain: RecordId, index: u32) -> Result<DupeEntry>;

    /// Number of entries in the duplicate chain addressed by `chain`.
    fn duplicate_get_count(&mut self, chain: RecordId) -> Result<u32>;

    /// Owned snapshot of the full duplicate table addressed by `chain`.
    fn duplicate_get_table(&mut self, chain: RecordId) -> Result<DupeTable>;

    /// Size in bytes of the out-of-line blob addressed by `rid`.
    fn datasize(&mut self, rid: RecordId) -> Result<u64>;
}
