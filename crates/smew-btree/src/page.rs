//! Resident pages and their cursor-membership lists.
//!
//! A page is a node made resident by the buffer pool. Every cursor coupled
//! to the page appears in the page's cursor list; the page manager breaks
//! those back-pointers with a bulk uncouple before any structural mutation.
//! The pin counter is shared out through [`PagePin`] guards so a pin taken
//! for the duration of a read survives any reborrowing of the pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use smew_types::PageNumber;

use crate::cursor::CursorId;
use crate::node::BtreeNode;

/// A node resident in the buffer pool.
#[derive(Debug)]
pub struct Page {
    id: PageNumber,
    node: BtreeNode,
    /// Cursors currently coupled to this page, in attachment order.
    cursors: Vec<CursorId>,
    dirty: bool,
    pins: Arc<AtomicU32>,
}

impl Page {
    /// Make `node` resident under `id`.
    #[must_use]
    pub fn new(id: PageNumber, node: BtreeNode) -> Self {
        Self {
            id,
            node,
            cursors: Vec::new(),
            dirty: false,
            pins: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Page number.
    #[must_use]
    pub fn id(&self) -> PageNumber {
        self.id
    }

    /// The parsed node.
    #[must_use]
    pub fn node(&self) -> &BtreeNode {
        &self.node
    }

    /// Mutable access to the node. The caller decides when to mark dirty.
    pub fn node_mut(&mut self) -> &mut BtreeNode {
        &mut self.node
    }

    /// Whether the page has unwritten changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the page dirty (or clean, after write-back).
    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    /// Append `cursor` to the membership list.
    pub fn add_cursor(&mut self, cursor: CursorId) {
        debug_assert!(!self.cursors.contains(&cursor));
        self.cursors.push(cursor);
    }

    /// Remove `cursor` from the membership list if present.
    pub fn remove_cursor(&mut self, cursor: CursorId) {
        self.cursors.retain(|&c| c != cursor);
    }

    /// The membership list in attachment order.
    #[must_use]
    pub fn cursors(&self) -> &[CursorId] {
        &self.cursors
    }

    /// Whether `cursor` is a member of this page's list.
    #[must_use]
    pub fn has_cursor(&self, cursor: CursorId) -> bool {
        self.cursors.contains(&cursor)
    }

    /// Drop the whole membership list.
    pub fn clear_cursors(&mut self) {
        self.cursors.clear();
    }

    /// Take a scoped pin on this page. Eviction refuses pinned pages, so a
    /// held pin keeps the page resident across re-entrant fetches.
    #[must_use = "a pin is released as soon as the guard drops"]
    pub fn pin(&self) -> PagePin {
        self.pins.fetch_add(1, Ordering::AcqRel);
        PagePin {
            pins: Arc::clone(&self.pins),
        }
    }

    /// Whether any pin is currently held.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::Acquire) > 0
    }
}

/// Scoped pin on a resident page, released on drop.
#[derive(Debug)]
pub struct PagePin {
    pins: Arc<AtomicU32>,
}

impl Drop for PagePin {
    fn drop(&mut self) {
        self.pins.fetch_sub(1, Ordering::AcqRel);
    }
}
