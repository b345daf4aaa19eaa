//! The environment a set of cursors operates in: one backend, one buffer
//! pool, one cursor pool.
//!
//! [`TreeEnv`] is the embedding surface of the cursor subsystem. It owns the
//! arenas (resident pages, live cursors) and the attached backend, and
//! forwards every operation to the cursor core with the three split apart so
//! the backend can re-enter the pools during structural work.

use smew_error::{Result, SmewError};
use smew_types::{DupeTable, InsertFlags, MoveFlags, PageNumber};

use crate::cursor::{
    self, BtreeCursor, CursorId, CursorPool, UncoupleMode, uncouple_all_cursors,
};
use crate::pool::BufferPool;
use crate::traits::{DuplicateStore, TreeOps};

/// Environment owning the buffer pool, the cursor pool, and (optionally) an
/// attached backend.
///
/// Operations that reach the tree or the blob store report `NotInitialized`
/// while no backend is attached; pure state transitions (`set_to_nil`,
/// `close_cursor`, `couple_to_other`) work regardless.
#[derive(Debug)]
pub struct TreeEnv<B> {
    backend: Option<B>,
    pool: BufferPool,
    cursors: CursorPool,
}

impl<B: TreeOps + DuplicateStore> TreeEnv<B> {
    /// Create an environment around `backend`.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend: Some(backend),
            pool: BufferPool::new(),
            cursors: CursorPool::new(),
        }
    }

    /// Create an environment with no backend attached.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            backend: None,
            pool: BufferPool::new(),
            cursors: CursorPool::new(),
        }
    }

    /// Attach (or replace) the backend.
    pub fn attach(&mut self, backend: B) {
        self.backend = Some(backend);
    }

    /// The attached backend, if any.
    #[must_use]
    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    /// The buffer pool.
    #[must_use]
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// The cursor behind `id`, for inspection.
    pub fn cursor(&self, id: CursorId) -> Result<&BtreeCursor> {
        self.cursors.get(id)
    }

    /// Signal (or clear) the transaction-op coupling of `id`.
    pub fn set_txn_coupled(&mut self, id: CursorId, txn_coupled: bool) -> Result<()> {
        self.cursors.get_mut(id)?.set_txn_coupled(txn_coupled);
        Ok(())
    }

    fn parts(&mut self) -> Result<(&mut B, &mut BufferPool, &mut CursorPool)> {
        let backend = self.backend.as_mut().ok_or(SmewError::NotInitialized)?;
        Ok((backend, &mut self.pool, &mut self.cursors))
    }

    // -- Lifecycle --

    /// Create a fresh NIL cursor. Never fails.
    pub fn create_cursor(&mut self) -> CursorId {
        self.cursors.create()
    }

    /// Duplicate `src` into a new cursor observing the same position.
    pub fn clone_cursor(&mut self, src: CursorId) -> Result<CursorId> {
        cursor::clone_cursor(&mut self.pool, &mut self.cursors, src)
    }

    /// Close `id`: transition to NIL, release its resources, and retire the
    /// handle. Closing an already-closed handle is a no-op.
    pub fn close_cursor(&mut self, id: CursorId) -> Result<()> {
        if !self.cursors.contains(id) {
            return Ok(());
        }
        cursor::set_to_nil(&mut self.pool, &mut self.cursors, id)?;
        self.cursors.remove(id);
        Ok(())
    }

    // -- State transitions --

    /// Reset `id` to NIL, releasing its key snapshot or page attachment.
    pub fn set_to_nil(&mut self, id: CursorId) -> Result<()> {
        cursor::set_to_nil(&mut self.pool, &mut self.cursors, id)
    }

    /// Whether `id` has no position (closed handles count as NIL).
    #[must_use]
    pub fn is_nil(&self, id: CursorId) -> bool {
        self.cursors.get(id).map_or(true, BtreeCursor::is_nil)
    }

    /// Degrade `id` to an uncoupled key snapshot.
    pub fn uncouple(&mut self, id: CursorId) -> Result<()> {
        let (backend, pool, cursors) = self.parts()?;
        cursor::uncouple(backend, pool, cursors, id, UncoupleMode::Remove)
    }

    /// Copy `other`'s coupled position onto `id` without touching the page
    /// cursor list. See [`cursor::couple_to_other`].
    pub fn couple_to_other(&mut self, id: CursorId, other: CursorId) -> Result<()> {
        cursor::couple_to_other(&mut self.pool, &mut self.cursors, id, other)
    }

    /// Whether `id` observes the key entry at `(page, slot)`.
    pub fn points_to(&mut self, id: CursorId, page: PageNumber, slot: u16) -> Result<bool> {
        let (backend, pool, cursors) = self.parts()?;
        cursor::points_to(backend, pool, cursors, id, page, slot)
    }

    // -- Traversal --

    /// Traverse per `flags` and optionally read the key and/or record at
    /// the resulting position.
    pub fn move_cursor(
        &mut self,
        id: CursorId,
        key_out: Option<&mut Vec<u8>>,
        record_out: Option<&mut Vec<u8>>,
        flags: MoveFlags,
    ) -> Result<()> {
        let (backend, pool, cursors) = self.parts()?;
        cursor::move_cursor(backend, pool, cursors, id, key_out, record_out, flags)
    }

    // -- Point lookup and mutation --

    /// Position `id` on `key`; optionally read the record.
    pub fn find(
        &mut self,
        id: CursorId,
        key: &[u8],
        record_out: Option<&mut Vec<u8>>,
        flags: MoveFlags,
    ) -> Result<()> {
        let (backend, pool, cursors) = self.parts()?;
        cursor::find(backend, pool, cursors, id, key, record_out, flags)
    }

    /// Insert `key`/`record`; the cursor ends up coupled to the new slot.
    pub fn insert(
        &mut self,
        id: CursorId,
        key: &[u8],
        record: &[u8],
        flags: InsertFlags,
    ) -> Result<()> {
        let (backend, pool, cursors) = self.parts()?;
        cursor::insert(backend, pool, cursors, id, key, record, flags)
    }

    /// Replace the record under the cursor's position.
    pub fn overwrite(&mut self, id: CursorId, record: &[u8]) -> Result<()> {
        let (backend, pool, cursors) = self.parts()?;
        cursor::overwrite(backend, pool, cursors, id, record)
    }

    /// Erase the entry under the cursor; the cursor ends up NIL.
    pub fn erase(&mut self, id: CursorId) -> Result<()> {
        let (backend, pool, cursors) = self.parts()?;
        cursor::erase(backend, pool, cursors, id)
    }

    // -- Auxiliary queries --

    /// Number of values attached to the current key.
    pub fn duplicate_count(&mut self, id: CursorId) -> Result<u32> {
        let (backend, pool, cursors) = self.parts()?;
        cursor::duplicate_count(backend, pool, cursors, id)
    }

    /// Owned duplicate table for the current key.
    pub fn duplicate_table(&mut self, id: CursorId) -> Result<DupeTable> {
        let (backend, pool, cursors) = self.parts()?;
        cursor::duplicate_table(backend, pool, cursors, id)
    }

    /// Size in bytes of the record under the cursor.
    pub fn record_size(&mut self, id: CursorId) -> Result<u64> {
        let (backend, pool, cursors) = self.parts()?;
        cursor::record_size(backend, pool, cursors, id)
    }

    // -- Page-manager entry points --

    /// Uncouple every cursor on `page` whose slot is at or past `start`.
    pub fn uncouple_all_cursors(&mut self, page: PageNumber, start: u16) -> Result<()> {
        let (backend, pool, cursors) = self.parts()?;
        uncouple_all_cursors(backend, pool, cursors, page, start)
    }

    /// Evict `page` from the buffer pool, uncoupling its cursors and writing
    /// the node back if dirty. Returns `false` if a pin kept it resident.
    pub fn evict_page(&mut self, page: PageNumber) -> Result<bool> {
        let (backend, pool, cursors) = self.parts()?;
        if pool.page(page)?.is_pinned() {
            return Ok(false);
        }
        uncouple_all_cursors(backend, pool, cursors, page, 0)?;
        pool.evict(backend, page)
    }

    /// Write every dirty page back to the backend.
    pub fn flush(&mut self) -> Result<()> {
        let (backend, pool, _) = self.parts()?;
        pool.flush(backend)
    }
}
