//! B-tree cursors: the positional handles for reading and mutating the tree.
//!
//! A cursor is in exactly one of three states. *Coupled* cursors hold a
//! direct `(page, slot)` reference into a resident page and appear in that
//! page's cursor list. *Uncoupled* cursors hold an owned copy of the last
//! known key and are attached to nothing. *Nil* cursors have no position.
//!
//! ```text
//! NIL ──find/first/last──▶ COUPLED
//! COUPLED ──uncouple──▶ UNCOUPLED
//! UNCOUPLED ──(implicit on next use)──▶ COUPLED
//! any ──set_to_nil/close──▶ NIL
//! ```
//!
//! The page manager breaks couplings with [`uncouple_all_cursors`] before
//! any structural change that would invalidate slots; the first traversal or
//! read on an affected cursor re-couples it by key lookup.

use smew_error::{Result, SmewError};
use smew_types::{DupeEntry, DupeTable, InsertFlags, KeyFlags, MoveFlags, PageNumber, RecordId};
use tracing::debug;

use crate::pool::BufferPool;
use crate::traits::{DuplicateStore, TreeOps};

// ---------------------------------------------------------------------------
// Cursor identity and registry
// ---------------------------------------------------------------------------

/// Handle to a pooled cursor. Pages reference cursors by this id; clients
/// address every cursor operation with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorId(u32);

impl CursorId {
    /// Build an id from its raw slot index.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw slot index.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Arena of live cursors. The pool hands out [`CursorId`]s; pages store
/// those ids in their membership lists instead of owning back-pointers.
#[derive(Debug, Default)]
pub struct CursorPool {
    slots: Vec<Option<BtreeCursor>>,
    free: Vec<u32>,
}

impl CursorPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a cursor and return its id.
    pub fn insert(&mut self, cursor: BtreeCursor) -> CursorId {
        if let Some(slot) = self.free.pop() {
            self.slots[slot as usize] = Some(cursor);
            CursorId(slot)
        } else {
            self.slots.push(Some(cursor));
            CursorId(self.slots.len() as u32 - 1)
        }
    }

    /// Create a fresh NIL cursor. Never fails.
    pub fn create(&mut self) -> CursorId {
        self.insert(BtreeCursor::new())
    }

    /// Whether `id` refers to a live cursor.
    #[must_use]
    pub fn contains(&self, id: CursorId) -> bool {
        self.slots
            .get(id.0 as usize)
            .is_some_and(Option::is_some)
    }

    /// Live cursor behind `id`, or `CursorIsNil` for a closed handle.
    pub fn get(&self, id: CursorId) -> Result<&BtreeCursor> {
        self.slots
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(SmewError::CursorIsNil)
    }

    /// Mutable cursor behind `id`, or `CursorIsNil` for a closed handle.
    pub fn get_mut(&mut self, id: CursorId) -> Result<&mut BtreeCursor> {
        self.slots
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(SmewError::CursorIsNil)
    }

    /// Remove the cursor behind `id`, returning it if it was live.
    pub fn remove(&mut self, id: CursorId) -> Option<BtreeCursor> {
        let slot = self.slots.get_mut(id.0 as usize)?;
        let taken = slot.take();
        if taken.is_some() {
            self.free.push(id.0);
        }
        taken
    }

    /// Ids of all live cursors.
    pub fn ids(&self) -> impl Iterator<Item = CursorId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| CursorId(i as u32))
    }
}

// ---------------------------------------------------------------------------
// Cursor state
// ---------------------------------------------------------------------------

/// The position (or absence of one) a cursor holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorState {
    /// No position.
    Nil,
    /// Direct reference into a resident page. The cursor appears in that
    /// page's cursor list for as long as it stays coupled.
    Coupled {
        /// Page the cursor is coupled to.
        page: PageNumber,
        /// Slot inside the page's key array.
        slot: u16,
        /// Position within the key's duplicate chain; 0 unless the key has
        /// duplicates.
        dup_index: u32,
    },
    /// Owned snapshot of the last known key; attached to no page.
    Uncoupled {
        /// Copy of the key the cursor last stood on.
        key: Vec<u8>,
        /// Duplicate position to restore after re-coupling.
        dup_index: u32,
    },
}

/// A B-tree cursor.
///
/// The compound cursor owning this state is identified by the [`CursorId`]
/// under which it is pooled; the transaction layer flags its "coupled to a
/// transaction op" condition through [`BtreeCursor::set_txn_coupled`].
#[derive(Debug)]
pub struct BtreeCursor {
    state: CursorState,
    txn_coupled: bool,
    /// One-entry memoization of the most recent duplicate fetch. Invalidated
    /// at the top of every traversal or mutation entry point.
    dupe_cache: Option<DupeEntry>,
}

impl BtreeCursor {
    /// Create a NIL cursor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: CursorState::Nil,
            txn_coupled: false,
            dupe_cache: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &CursorState {
        &self.state
    }

    pub(crate) fn set_state(&mut self, state: CursorState) {
        self.state = state;
    }

    pub(crate) fn set_coupled(&mut self, page: PageNumber, slot: u16, dup_index: u32) {
        self.state = CursorState::Coupled {
            page,
            slot,
            dup_index,
        };
    }

    /// Whether the cursor holds a direct page reference.
    #[must_use]
    pub fn is_coupled(&self) -> bool {
        matches!(self.state, CursorState::Coupled { .. })
    }

    /// Whether the cursor holds an uncoupled key snapshot.
    #[must_use]
    pub fn is_uncoupled(&self) -> bool {
        matches!(self.state, CursorState::Uncoupled { .. })
    }

    /// Whether the cursor has no position at all: not coupled, not
    /// uncoupled, and not parked on a transaction op.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        !self.is_coupled() && !self.is_uncoupled() && !self.txn_coupled
    }

    /// Whether the owning compound cursor is coupled to a transaction op.
    #[must_use]
    pub fn is_txn_coupled(&self) -> bool {
        self.txn_coupled
    }

    /// Signal (or clear) the transaction-op coupling of the owning compound
    /// cursor.
    pub fn set_txn_coupled(&mut self, txn_coupled: bool) {
        self.txn_coupled = txn_coupled;
    }

    /// Current duplicate position; 0 when the cursor is NIL.
    #[must_use]
    pub fn dup_index(&self) -> u32 {
        match self.state {
            CursorState::Coupled { dup_index, .. } | CursorState::Uncoupled { dup_index, .. } => {
                dup_index
            }
            CursorState::Nil => 0,
        }
    }

    /// Overwrite the duplicate position. A no-op on a NIL cursor, which is
    /// what makes the unconditional restore after a failed re-couple safe.
    pub(crate) fn set_dup_index(&mut self, dup: u32) {
        match &mut self.state {
            CursorState::Coupled { dup_index, .. } | CursorState::Uncoupled { dup_index, .. } => {
                *dup_index = dup;
            }
            CursorState::Nil => {}
        }
    }

    /// The cached duplicate entry, if any.
    #[must_use]
    pub fn dupe_cache(&self) -> Option<DupeEntry> {
        self.dupe_cache
    }

    pub(crate) fn set_dupe_cache(&mut self, entry: DupeEntry) {
        self.dupe_cache = Some(entry);
    }

    pub(crate) fn clear_dupe_cache(&mut self) {
        self.dupe_cache = None;
    }

    /// The saved key of an uncoupled cursor.
    #[must_use]
    pub fn uncoupled_key(&self) -> Option<&[u8]> {
        match &self.state {
            CursorState::Uncoupled { key, .. } => Some(key),
            _ => None,
        }
    }
}

impl Default for BtreeCursor {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Uncouple mode
// ---------------------------------------------------------------------------

/// Whether `uncouple` removes the cursor from the page's membership list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UncoupleMode {
    /// Remove the cursor from the page cursor list (the normal case).
    Remove,
    /// Leave the list untouched. Used by the bulk uncouple, which unlinks
    /// cursors itself while walking the list.
    KeepListed,
}

// ---------------------------------------------------------------------------
// State transitions
// ---------------------------------------------------------------------------

/// Reset `id` to NIL: drop an uncoupled key, detach a coupled cursor from
/// its page, and clear the duplicate cache.
pub fn set_to_nil(pool: &mut BufferPool, cursors: &mut CursorPool, id: CursorId) -> Result<()> {
    let coupled_page = match cursors.get(id)?.state() {
        CursorState::Coupled { page, .. } => Some(*page),
        _ => None,
    };
    if let Some(page) = coupled_page {
        pool.page_mut(page)?.remove_cursor(id);
    }
    let cursor = cursors.get_mut(id)?;
    cursor.set_state(CursorState::Nil);
    cursor.clear_dupe_cache();
    Ok(())
}

/// Couple `id` to `(page, slot, dup_index)` and add it to the page's cursor
/// list. The cursor must currently be NIL-positioned (no list membership).
pub(crate) fn couple_to(
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
    page: PageNumber,
    slot: u16,
    dup_index: u32,
) -> Result<()> {
    debug_assert!(
        cursors.get(id).is_ok_and(|c| !c.is_coupled()),
        "coupling a cursor that is still attached"
    );
    pool.page_mut(page)?.add_cursor(id);
    cursors.get_mut(id)?.set_coupled(page, slot, dup_index);
    Ok(())
}

/// Copy `other`'s coupled position onto `id` without adding `id` to the
/// page's cursor list.
///
/// This is a specialized primitive for cursor swaps where two cursors
/// intentionally share one list membership; the caller is responsible for
/// fixing the list afterwards. `other` must be coupled.
pub fn couple_to_other(
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
    other: CursorId,
) -> Result<()> {
    let CursorState::Coupled {
        page,
        slot,
        dup_index,
    } = *cursors.get(other)?.state()
    else {
        return Err(SmewError::CursorIsNil);
    };
    set_to_nil(pool, cursors, id)?;
    cursors.get_mut(id)?.set_coupled(page, slot, dup_index);
    Ok(())
}

/// Degrade a coupled cursor to an uncoupled key snapshot.
///
/// A no-op on cursors that are already uncoupled or NIL. The coupled page
/// must be a leaf and must still hold the key being snapshotted; on any
/// failure the cursor is left unchanged.
pub fn uncouple<B: TreeOps>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
    mode: UncoupleMode,
) -> Result<()> {
    let CursorState::Coupled {
        page,
        slot,
        dup_index,
    } = *cursors.get(id)?.state()
    else {
        return Ok(());
    };

    let key = {
        let resident = pool.page(page)?;
        debug_assert!(
            resident.node().is_leaf(),
            "uncoupling a cursor from an internal node"
        );
        let entry = resident.node().try_key(slot)?;
        backend.read_key(entry)?
    };

    if mode == UncoupleMode::Remove {
        pool.page_mut(page)?.remove_cursor(id);
    }
    cursors
        .get_mut(id)?
        .set_state(CursorState::Uncoupled { key, dup_index });
    Ok(())
}

/// Re-couple an uncoupled cursor by looking its saved key up again.
///
/// `find` repositions the cursor but lands on the first duplicate, so the
/// saved duplicate position is restored afterwards — unconditionally, which
/// is harmless when the lookup failed and left the cursor NIL.
fn couple<B: TreeOps + DuplicateStore>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
) -> Result<()> {
    let (key, dup_index) = match cursors.get(id)?.state() {
        CursorState::Uncoupled { key, dup_index } => (key.clone(), *dup_index),
        _ => {
            debug_assert!(false, "coupling a cursor which is not uncoupled");
            return Ok(());
        }
    };

    let result = find(backend, pool, cursors, id, &key, None, MoveFlags::empty());
    cursors.get_mut(id)?.set_dup_index(dup_index);
    result
}

/// Couple `id` if it is uncoupled and return its coupled position, or
/// `CursorIsNil` if it has no position to recover.
fn require_coupled<B: TreeOps + DuplicateStore>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
) -> Result<(PageNumber, u16, u32)> {
    if cursors.get(id)?.is_uncoupled() {
        couple(backend, pool, cursors, id)?;
    }
    match *cursors.get(id)?.state() {
        CursorState::Coupled {
            page,
            slot,
            dup_index,
        } => Ok((page, slot, dup_index)),
        _ => Err(SmewError::CursorIsNil),
    }
}

/// Whether `id` observes the key entry at `(page, slot)`. An uncoupled
/// cursor is re-coupled first.
pub fn points_to<B: TreeOps + DuplicateStore>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
    page: PageNumber,
    slot: u16,
) -> Result<bool> {
    if cursors.get(id)?.is_uncoupled() {
        couple(backend, pool, cursors, id)?;
    }
    Ok(matches!(
        *cursors.get(id)?.state(),
        CursorState::Coupled { page: p, slot: s, .. } if p == page && s == slot
    ))
}

/// Duplicate a cursor. A coupled source yields a destination coupled to the
/// same slot (and listed on the page); an uncoupled source yields a fresh
/// deep copy of the saved key. The duplicate position carries over; the
/// duplicate cache and transaction coupling do not.
pub fn clone_cursor(
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    src: CursorId,
) -> Result<CursorId> {
    let state = cursors.get(src)?.state().clone();
    let dest = cursors.create();
    match state {
        CursorState::Coupled {
            page,
            slot,
            dup_index,
        } => {
            if let Err(e) = couple_to(pool, cursors, dest, page, slot, dup_index) {
                cursors.remove(dest);
                return Err(e);
            }
        }
        other => cursors
            .get_mut(dest)
            .expect("freshly created cursor")
            .set_state(other),
    }
    Ok(dest)
}

// ---------------------------------------------------------------------------
// Bulk uncouple
// ---------------------------------------------------------------------------

/// Uncouple every cursor on `page` whose slot is at or past `start`.
///
/// Called by the page manager before splits, merges, and deletions that
/// would invalidate those slots. Cursors coupled before `start` stay
/// attached; cursors parked on a transaction op without a coupled slot are
/// treated as affected. When nothing was skipped the whole membership list
/// is dropped in one step.
pub fn uncouple_all_cursors<B: TreeOps>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    page: PageNumber,
    start: u16,
) -> Result<()> {
    let listed: Vec<CursorId> = pool.page(page)?.cursors().to_vec();
    let mut skipped = false;
    let mut uncoupled = 0u32;

    for cid in listed {
        let Ok(cursor) = cursors.get(cid) else {
            continue;
        };
        let coupled_slot = match cursor.state() {
            CursorState::Coupled { slot, .. } => Some(*slot),
            _ => None,
        };
        // Neither coupled nor parked on a txn op: ignored, and deliberately
        // not counted as skipped.
        if coupled_slot.is_none() && !cursor.is_txn_coupled() {
            continue;
        }
        if let Some(slot) = coupled_slot {
            if slot < start {
                skipped = true;
                continue;
            }
        }
        // KeepListed avoids mutating the list mid-walk; unlink explicitly.
        uncouple(backend, pool, cursors, cid, UncoupleMode::KeepListed)?;
        pool.page_mut(page)?.remove_cursor(cid);
        uncoupled += 1;
    }

    if !skipped {
        pool.page_mut(page)?.clear_cursors();
    }
    debug!(
        page = page.get(),
        start, uncoupled, skipped, "bulk uncouple on page"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

fn entry_at(pool: &BufferPool, page: PageNumber, slot: u16) -> Result<(KeyFlags, RecordId)> {
    let node = pool.page(page)?.node();
    debug_assert!(node.is_leaf(), "cursor positioned on an internal node");
    let entry = node.try_key(slot)?;
    Ok((entry.flags(), entry.rid()))
}

fn last_dup_index(count: u32) -> Result<u32> {
    count
        .checked_sub(1)
        .ok_or_else(|| SmewError::corrupt("empty duplicate chain"))
}

fn move_first<B: TreeOps + DuplicateStore>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
) -> Result<()> {
    set_to_nil(pool, cursors, id)?;

    let Some(root) = backend.root_page() else {
        return Err(SmewError::KeyNotFound);
    };

    // Descend along the leftmost child until the leaf level.
    let mut page_id = root;
    loop {
        let page = pool.fetch(backend, page_id)?;
        let node = page.node();
        if node.count() == 0 {
            return Err(SmewError::KeyNotFound);
        }
        if node.is_leaf() {
            break;
        }
        page_id = node
            .ptr_left()
            .ok_or_else(|| SmewError::corrupt("internal node has no leftmost child"))?;
    }

    debug!(page = page_id.get(), "cursor coupled to first key");
    couple_to(pool, cursors, id, page_id, 0, 0)
}

fn move_last<B: TreeOps + DuplicateStore>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
    flags: MoveFlags,
) -> Result<()> {
    set_to_nil(pool, cursors, id)?;

    let Some(root) = backend.root_page() else {
        return Err(SmewError::KeyNotFound);
    };

    // Descend along the rightmost child until the leaf level.
    let mut page_id = root;
    let slot;
    loop {
        let page = pool.fetch(backend, page_id)?;
        let node = page.node();
        let count = node.count();
        if count == 0 {
            return Err(SmewError::KeyNotFound);
        }
        if node.is_leaf() {
            slot = count - 1;
            break;
        }
        page_id = node
            .try_key(count - 1)?
            .child()
            .ok_or_else(|| SmewError::corrupt("separator has no child page"))?;
    }

    couple_to(pool, cursors, id, page_id, slot, 0)?;
    debug!(page = page_id.get(), slot, "cursor coupled to last key");

    // Land on the end of the duplicate chain unless duplicates are skipped.
    let (entry_flags, entry_rid) = entry_at(pool, page_id, slot)?;
    if entry_flags.contains(KeyFlags::HAS_DUPLICATES) && !flags.contains(MoveFlags::SKIP_DUPLICATES)
    {
        let count = backend.duplicate_get_count(entry_rid)?;
        cursors.get_mut(id)?.set_dup_index(last_dup_index(count)?);
    }
    Ok(())
}

fn move_next<B: TreeOps + DuplicateStore>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
    flags: MoveFlags,
) -> Result<()> {
    if cursors.get(id)?.is_uncoupled() {
        couple(backend, pool, cursors, id)?;
    } else if !cursors.get(id)?.is_coupled() {
        return Err(SmewError::CursorIsNil);
    }

    let CursorState::Coupled {
        page,
        slot,
        dup_index,
    } = *cursors.get(id)?.state()
    else {
        return Err(SmewError::CursorIsNil);
    };

    let (count, right) = {
        let node = pool.page(page)?.node();
        (node.count(), node.right())
    };
    let (entry_flags, entry_rid) = entry_at(pool, page, slot)?;

    // Tentatively step within the duplicate chain. A not-found from the
    // chain is the signal to fall through to cross-key stepping; anything
    // else propagates with the position untouched.
    if entry_flags.contains(KeyFlags::HAS_DUPLICATES) && !flags.contains(MoveFlags::SKIP_DUPLICATES)
    {
        match backend.duplicate_get(entry_rid, dup_index + 1) {
            Ok(entry) => {
                let cursor = cursors.get_mut(id)?;
                cursor.set_dup_index(dup_index + 1);
                cursor.set_dupe_cache(entry);
                return Ok(());
            }
            Err(e) if e.is_key_not_found() => {}
            Err(e) => return Err(e),
        }
    }

    if flags.contains(MoveFlags::ONLY_DUPLICATES) {
        return Err(SmewError::KeyNotFound);
    }

    // Next slot on the same page.
    if slot + 1 < count {
        cursors.get_mut(id)?.set_coupled(page, slot + 1, 0);
        return Ok(());
    }

    // Cross to the right sibling. Detach first so a failed fetch leaves the
    // cursor NIL instead of pointing into a page it no longer inhabits.
    let Some(right) = right else {
        return Err(SmewError::KeyNotFound);
    };
    pool.page_mut(page)?.remove_cursor(id);
    cursors.get_mut(id)?.set_state(CursorState::Nil);
    pool.fetch(backend, right)?;
    debug!(
        from = page.get(),
        to = right.get(),
        "cursor crossed to right sibling"
    );
    couple_to(pool, cursors, id, right, 0, 0)
}

fn move_previous<B: TreeOps + DuplicateStore>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
    flags: MoveFlags,
) -> Result<()> {
    if cursors.get(id)?.is_uncoupled() {
        couple(backend, pool, cursors, id)?;
    } else if !cursors.get(id)?.is_coupled() {
        return Err(SmewError::CursorIsNil);
    }

    let CursorState::Coupled {
        page,
        slot,
        dup_index,
    } = *cursors.get(id)?.state()
    else {
        return Err(SmewError::CursorIsNil);
    };

    let (entry_flags, entry_rid) = entry_at(pool, page, slot)?;

    // Step backwards within the duplicate chain; index 0 crosses keys
    // instead of underflowing.
    if entry_flags.contains(KeyFlags::HAS_DUPLICATES)
        && !flags.contains(MoveFlags::SKIP_DUPLICATES)
        && dup_index > 0
    {
        match backend.duplicate_get(entry_rid, dup_index - 1) {
            Ok(entry) => {
                let cursor = cursors.get_mut(id)?;
                cursor.set_dup_index(dup_index - 1);
                cursor.set_dupe_cache(entry);
                return Ok(());
            }
            Err(e) if e.is_key_not_found() => {}
            Err(e) => return Err(e),
        }
    }

    if flags.contains(MoveFlags::ONLY_DUPLICATES) {
        return Err(SmewError::KeyNotFound);
    }

    let (new_page, new_slot);
    if slot > 0 {
        new_page = page;
        new_slot = slot - 1;
        cursors.get_mut(id)?.set_coupled(page, new_slot, 0);
    } else {
        // Cross to the left sibling and couple to its highest key.
        let Some(left) = pool.page(page)?.node().left() else {
            return Err(SmewError::KeyNotFound);
        };
        pool.page_mut(page)?.remove_cursor(id);
        cursors.get_mut(id)?.set_state(CursorState::Nil);
        let count = pool.fetch(backend, left)?.node().count();
        let last = count
            .checked_sub(1)
            .ok_or_else(|| SmewError::corrupt("empty leaf in sibling chain"))?;
        debug!(
            from = page.get(),
            to = left.get(),
            "cursor crossed to left sibling"
        );
        couple_to(pool, cursors, id, left, last, 0)?;
        new_page = left;
        new_slot = last;
    }

    // Land on the end of the new key's duplicate chain.
    let (entry_flags, entry_rid) = entry_at(pool, new_page, new_slot)?;
    if entry_flags.contains(KeyFlags::HAS_DUPLICATES) && !flags.contains(MoveFlags::SKIP_DUPLICATES)
    {
        let count = backend.duplicate_get_count(entry_rid)?;
        cursors.get_mut(id)?.set_dup_index(last_dup_index(count)?);
    }
    Ok(())
}

/// Read the record at the cursor's coupled position into `out`.
///
/// For a duplicated key with `dup_index > 0` the cached duplicate entry is
/// consulted (and populated on a miss); otherwise the key entry's own record
/// identifier is used. The actual materialization is delegated to the
/// backend's record reader.
fn read_current_record<B: TreeOps + DuplicateStore>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
    out: &mut Vec<u8>,
) -> Result<()> {
    let CursorState::Coupled {
        page,
        slot,
        dup_index,
    } = *cursors.get(id)?.state()
    else {
        return Err(SmewError::CursorIsNil);
    };

    let (entry_flags, entry_rid, _pin) = {
        let resident = pool.page(page)?;
        let pin = resident.pin();
        let entry = resident.node().try_key(slot)?;
        (entry.flags(), entry.rid(), pin)
    };

    let (record_flags, record_rid) =
        if entry_flags.contains(KeyFlags::HAS_DUPLICATES) && dup_index > 0 {
            let cached = cursors.get(id)?.dupe_cache();
            let entry = match cached {
                Some(entry) => entry,
                None => {
                    let entry = backend.duplicate_get(entry_rid, dup_index)?;
                    cursors.get_mut(id)?.set_dupe_cache(entry);
                    entry
                }
            };
            (entry.flags, entry.rid)
        } else {
            (entry_flags, entry_rid)
        };

    *out = backend.read_record(pool, record_flags, record_rid)?;
    Ok(())
}

/// Traverse with `flags` and optionally read the key and/or record at the
/// resulting position.
///
/// With no direction flag this reads the current position, coupling an
/// uncoupled cursor first; a NIL cursor with no outputs requested is a
/// no-op, otherwise `CursorIsNil`.
pub fn move_cursor<B: TreeOps + DuplicateStore>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
    key_out: Option<&mut Vec<u8>>,
    record_out: Option<&mut Vec<u8>>,
    flags: MoveFlags,
) -> Result<()> {
    cursors.get_mut(id)?.clear_dupe_cache();

    let want_key = key_out.is_some();
    let want_record = record_out.is_some();

    if flags.contains(MoveFlags::FIRST) {
        move_first(backend, pool, cursors, id)?;
    } else if flags.contains(MoveFlags::LAST) {
        move_last(backend, pool, cursors, id, flags)?;
    } else if flags.contains(MoveFlags::NEXT) {
        move_next(backend, pool, cursors, id, flags)?;
    } else if flags.contains(MoveFlags::PREVIOUS) {
        move_previous(backend, pool, cursors, id, flags)?;
    } else {
        let cursor = cursors.get(id)?;
        if cursor.is_nil() {
            return if want_key || want_record {
                Err(SmewError::CursorIsNil)
            } else {
                Ok(())
            };
        }
        if cursor.is_uncoupled() {
            couple(backend, pool, cursors, id)?;
        }
    }

    if !want_key && !want_record {
        return Ok(());
    }

    let CursorState::Coupled { page, slot, .. } = *cursors.get(id)?.state() else {
        return Err(SmewError::CursorIsNil);
    };

    // Reads below may re-enter the pool (blob fetches) and trigger eviction
    // of other pages; the pin keeps this one resident until both reads are
    // done, on every exit path.
    let (key_bytes, _pin) = {
        let resident = pool.page(page)?;
        let pin = resident.pin();
        debug_assert!(resident.node().is_leaf(), "move landed on an internal node");
        let entry = resident.node().try_key(slot)?;
        let key_bytes = if want_key {
            Some(backend.read_key(entry)?)
        } else {
            None
        };
        (key_bytes, pin)
    };

    if let (Some(out), Some(bytes)) = (key_out, key_bytes) {
        *out = bytes;
    }
    if let Some(out) = record_out {
        read_current_record(backend, pool, cursors, id, out)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Point lookup and mutation
// ---------------------------------------------------------------------------

/// Position `id` on `key` by delegating to the backend's structural lookup.
///
/// The cursor is reset to NIL first; on failure it stays NIL and the error
/// is returned verbatim. On success it is coupled to the matching slot with
/// `dup_index = 0` and the record, if requested, is read out.
pub fn find<B: TreeOps + DuplicateStore>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
    key: &[u8],
    record_out: Option<&mut Vec<u8>>,
    flags: MoveFlags,
) -> Result<()> {
    set_to_nil(pool, cursors, id)?;
    backend.find_cursor(pool, cursors, id, key, flags)?;
    if let Some(out) = record_out {
        read_current_record(backend, pool, cursors, id, out)?;
    }
    Ok(())
}

/// Insert `key`/`record` through the backend, leaving the cursor coupled to
/// the new slot.
pub fn insert<B: TreeOps + DuplicateStore>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
    key: &[u8],
    record: &[u8],
    flags: InsertFlags,
) -> Result<()> {
    cursors.get_mut(id)?.clear_dupe_cache();
    backend.insert_cursor(pool, cursors, id, key, record, flags)
}

/// Replace the record under the cursor's current position, at its current
/// duplicate index. The page is marked dirty.
pub fn overwrite<B: TreeOps + DuplicateStore>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
    record: &[u8],
) -> Result<()> {
    let (page, slot, dup_index) = require_coupled(backend, pool, cursors, id)?;
    cursors.get_mut(id)?.clear_dupe_cache();
    backend.set_record(pool, page, slot, dup_index, record)?;
    pool.page_mut(page)?.set_dirty(true);
    Ok(())
}

/// Erase the entry under the cursor.
///
/// A coupled cursor is uncoupled first so the key identity survives the
/// structural change; the backend receives the saved key. On success the
/// cursor is reset to NIL.
pub fn erase<B: TreeOps + DuplicateStore>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
) -> Result<()> {
    if cursors.get(id)?.is_coupled() {
        uncouple(backend, pool, cursors, id, UncoupleMode::Remove)?;
    } else if !cursors.get(id)?.is_uncoupled() {
        return Err(SmewError::CursorIsNil);
    }

    let key = match cursors.get(id)?.state() {
        CursorState::Uncoupled { key, .. } => key.clone(),
        _ => return Err(SmewError::CursorIsNil),
    };
    backend.erase_cursor(pool, cursors, id, &key)?;
    set_to_nil(pool, cursors, id)
}

// ---------------------------------------------------------------------------
// Auxiliary queries
// ---------------------------------------------------------------------------

/// Number of values attached to the current key: 1 without duplicates,
/// otherwise the chain length reported by the blob store.
pub fn duplicate_count<B: TreeOps + DuplicateStore>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
) -> Result<u32> {
    let (page, slot, _) = require_coupled(backend, pool, cursors, id)?;
    let (entry_flags, entry_rid) = entry_at(pool, page, slot)?;
    if entry_flags.contains(KeyFlags::HAS_DUPLICATES) {
        backend.duplicate_get_count(entry_rid)
    } else {
        Ok(1)
    }
}

/// Owned duplicate table for the current key. A key without duplicates
/// yields a synthesized single-entry table built from its own flags and rid.
pub fn duplicate_table<B: TreeOps + DuplicateStore>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
) -> Result<DupeTable> {
    let (page, slot, _) = require_coupled(backend, pool, cursors, id)?;
    let (entry_flags, entry_rid) = entry_at(pool, page, slot)?;
    if entry_flags.contains(KeyFlags::HAS_DUPLICATES) {
        backend.duplicate_get_table(entry_rid)
    } else {
        Ok(DupeTable::single(DupeEntry {
            flags: entry_flags,
            rid: entry_rid,
        }))
    }
}

/// Size of the record under the cursor, resolved from the blob-size class
/// without materializing the record.
///
/// For a duplicated key the current duplicate entry is fetched into a
/// scratch slot (not the cursor's cache) to read its flags and rid.
pub fn record_size<B: TreeOps + DuplicateStore>(
    backend: &mut B,
    pool: &mut BufferPool,
    cursors: &mut CursorPool,
    id: CursorId,
) -> Result<u64> {
    let (page, slot, dup_index) = require_coupled(backend, pool, cursors, id)?;
    let (entry_flags, entry_rid) = entry_at(pool, page, slot)?;

    let (record_flags, record_rid) = if entry_flags.contains(KeyFlags::HAS_DUPLICATES) {
        let entry = backend.duplicate_get(entry_rid, dup_index)?;
        (entry.flags, entry.rid)
    } else {
        (entry_flags, entry_rid)
    };

    if record_flags.contains(KeyFlags::BLOB_SIZE_TINY) {
        Ok(u64::from(record_rid.tiny_len()))
    } else if record_flags.contains(KeyFlags::BLOB_SIZE_SMALL) {
        Ok(std::mem::size_of::<u64>() as u64)
    } else if record_flags.contains(KeyFlags::BLOB_SIZE_EMPTY) {
        Ok(0)
    } else {
        backend.datasize(record_rid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cursor_is_nil() {
        let c = BtreeCursor::new();
        assert!(c.is_nil());
        assert!(!c.is_coupled());
        assert!(!c.is_uncoupled());
        assert_eq!(c.dup_index(), 0);
        assert!(c.dupe_cache().is_none());
    }

    #[test]
    fn txn_coupling_defeats_is_nil() {
        let mut c = BtreeCursor::new();
        c.set_txn_coupled(true);
        assert!(!c.is_nil());
        c.set_txn_coupled(false);
        assert!(c.is_nil());
    }

    #[test]
    fn dup_index_restore_is_harmless_on_nil() {
        let mut c = BtreeCursor::new();
        c.set_dup_index(7);
        assert!(c.is_nil());
        assert_eq!(c.dup_index(), 0);
    }

    #[test]
    fn pool_recycles_slots() {
        let mut pool = CursorPool::new();
        let a = pool.create();
        let b = pool.create();
        assert_ne!(a, b);
        pool.remove(a);
        assert!(!pool.contains(a));
        let c = pool.create();
        assert_eq!(c.raw(), a.raw());
        assert!(pool.contains(c));
    }

    #[test]
    fn stale_id_reports_cursor_is_nil() {
        let mut pool = CursorPool::new();
        let a = pool.create();
        pool.remove(a);
        assert!(matches!(pool.get(a), Err(SmewError::CursorIsNil)));
        assert!(matches!(pool.get_mut(a), Err(SmewError::CursorIsNil)));
    }

    fn seeded_world() -> (crate::mem::MemTree, BufferPool, CursorPool, CursorId, PageNumber) {
        let mut backend = crate::mem::MemTree::new();
        let mut pool = BufferPool::new();
        let mut cursors = CursorPool::new();
        let writer = cursors.create();
        insert(
            &mut backend,
            &mut pool,
            &mut cursors,
            writer,
            b"k",
            b"v",
            InsertFlags::empty(),
        )
        .unwrap();
        let CursorState::Coupled { page, .. } = *cursors.get(writer).unwrap().state() else {
            panic!("writer not coupled after insert");
        };
        (backend, pool, cursors, writer, page)
    }

    #[test]
    fn bulk_uncouple_unlinks_txn_parked_cursors_without_slots() {
        let (mut backend, mut pool, mut cursors, writer, page) = seeded_world();

        // A txn-parked cursor listed on the page without a coupled slot has
        // no position to compare against start; it is treated as affected.
        let parked = cursors.create();
        cursors.get_mut(parked).unwrap().set_txn_coupled(true);
        pool.page_mut(page).unwrap().add_cursor(parked);

        uncouple_all_cursors(&mut backend, &mut pool, &mut cursors, page, 0).unwrap();
        assert!(!pool.page(page).unwrap().has_cursor(parked));
        assert!(cursors.get(parked).unwrap().is_txn_coupled());
        assert!(!cursors.get(parked).unwrap().is_coupled());
        assert!(cursors.get(writer).unwrap().is_uncoupled());
    }

    #[test]
    fn ignored_cursors_are_dropped_when_the_list_is_cleared() {
        let (mut backend, mut pool, mut cursors, writer, page) = seeded_world();

        // A plain NIL cursor lingering in the list is ignored by the walk
        // and does not count as skipped, so the wholesale clear drops it.
        let ghost = cursors.create();
        pool.page_mut(page).unwrap().add_cursor(ghost);

        uncouple_all_cursors(&mut backend, &mut pool, &mut cursors, page, 0).unwrap();
        assert!(cursors.get(writer).unwrap().is_uncoupled());
        assert!(pool.page(page).unwrap().cursors().is_empty());
        assert!(cursors.get(ghost).unwrap().is_nil());
    }

    #[test]
    fn drained_duplicate_chain_surfaces_as_corruption() {
        let mut backend = crate::mem::MemTree::new();
        let mut pool = BufferPool::new();
        let mut cursors = CursorPool::new();
        let c = cursors.create();
        for (key, record) in [(&b"a"[..], &b"x"[..]), (&b"b"[..], &b"y"[..])] {
            insert(
                &mut backend,
                &mut pool,
                &mut cursors,
                c,
                key,
                record,
                InsertFlags::empty(),
            )
            .unwrap();
            insert(
                &mut backend,
                &mut pool,
                &mut cursors,
                c,
                key,
                record,
                InsertFlags::DUPLICATE,
            )
            .unwrap();
        }

        // Drain both chains out of band; the HAS_DUPLICATES flags stay set,
        // so the chain-end landing hits an empty table.
        let CursorState::Coupled { page, .. } = *cursors.get(c).unwrap().state() else {
            panic!("cursor not coupled after insert");
        };
        for slot in 0..2 {
            let chain = pool.page(page).unwrap().node().try_key(slot).unwrap().rid();
            backend.drain_duplicates(chain);
        }

        let err = move_cursor(
            &mut backend,
            &mut pool,
            &mut cursors,
            c,
            None,
            None,
            MoveFlags::LAST,
        )
        .unwrap_err();
        assert!(matches!(err, SmewError::Corrupt { .. }));

        // Backward key crossing lands on the other drained chain.
        find(
            &mut backend,
            &mut pool,
            &mut cursors,
            c,
            b"b",
            None,
            MoveFlags::empty(),
        )
        .unwrap();
        let err = move_cursor(
            &mut backend,
            &mut pool,
            &mut cursors,
            c,
            None,
            None,
            MoveFlags::PREVIOUS,
        )
        .unwrap_err();
        assert!(matches!(err, SmewError::Corrupt { .. }));
    }

    #[test]
    fn state_is_exactly_one_of_three() {
        let mut c = BtreeCursor::new();
        c.set_coupled(PageNumber::new(1).unwrap(), 0, 0);
        assert!(c.is_coupled() && !c.is_uncoupled() && !c.is_nil());
        c.set_state(CursorState::Uncoupled {
            key: b"k".to_vec(),
            dup_index: 2,
        });
        assert!(!c.is_coupled() && c.is_uncoupled() && !c.is_nil());
        assert_eq!(c.dup_index(), 2);
        assert_eq!(c.uncoupled_key(), Some(&b"k"[..]));
        c.set_state(CursorState::Nil);
        assert!(c.is_nil());
    }
}
