//! Buffer pool: the arena of resident pages.
//!
//! The pool owns every resident [`Page`]; cursors refer to pages by number
//! only. Eviction is mechanism here, not policy — the page manager (or a
//! test) decides *which* page to evict and must break cursor couplings
//! first; the pool only enforces that pinned pages stay resident and that
//! dirty nodes are written back.

use std::collections::HashMap;

use smew_error::{Result, SmewError};
use smew_types::{PageNumber, limits};
use tracing::debug;

use crate::page::Page;
use crate::traits::NodeBacking;

/// Arena of resident pages, keyed by page number.
#[derive(Debug)]
pub struct BufferPool {
    resident: HashMap<PageNumber, Page>,
    budget: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool {
    /// Create a pool with the default page budget.
    #[must_use]
    pub fn new() -> Self {
        Self::with_budget(limits::DEFAULT_CACHE_PAGES)
    }

    /// Create a pool that aims to keep at most `budget` pages resident.
    #[must_use]
    pub fn with_budget(budget: usize) -> Self {
        Self {
            resident: HashMap::new(),
            budget,
        }
    }

    /// Number of resident pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resident.len()
    }

    /// Whether no page is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resident.is_empty()
    }

    /// Whether `page` is resident.
    #[must_use]
    pub fn contains(&self, page: PageNumber) -> bool {
        self.resident.contains_key(&page)
    }

    /// Resident page, if any.
    #[must_use]
    pub fn get(&self, page: PageNumber) -> Option<&Page> {
        self.resident.get(&page)
    }

    /// Resident page, or `PageNotFound`.
    pub fn page(&self, page: PageNumber) -> Result<&Page> {
        self.resident
            .get(&page)
            .ok_or(SmewError::PageNotFound { page: page.get() })
    }

    /// Mutable resident page, or `PageNotFound`.
    pub fn page_mut(&mut self, page: PageNumber) -> Result<&mut Page> {
        self.resident
            .get_mut(&page)
            .ok_or(SmewError::PageNotFound { page: page.get() })
    }

    /// Fetch `page`, loading it through `backing` if it is not resident.
    pub fn fetch(&mut self, backing: &mut dyn NodeBacking, page: PageNumber) -> Result<&mut Page> {
        if !self.resident.contains_key(&page) {
            let node = backing.load_node(page)?;
            if self.resident.len() >= self.budget {
                debug!(
                    page = page.get(),
                    resident = self.resident.len(),
                    budget = self.budget,
                    "buffer pool over budget"
                );
            }
            self.resident.insert(page, Page::new(page, node));
        }
        Ok(self
            .resident
            .get_mut(&page)
            .expect("page inserted or already resident"))
    }

    /// Drop `page` from the pool, writing it back through `backing` if dirty.
    ///
    /// Returns `Ok(false)` without side effects if the page is pinned. The
    /// caller must have uncoupled the page's cursors beforehand.
    pub fn evict(&mut self, backing: &mut dyn NodeBacking, page: PageNumber) -> Result<bool> {
        let resident = self.page(page)?;
        if resident.is_pinned() {
            debug!(page = page.get(), "eviction refused: page is pinned");
            return Ok(false);
        }
        if resident.is_dirty() {
            backing.store_node(page, resident.node())?;
        }
        self.resident.remove(&page);
        debug!(page = page.get(), "page evicted");
        Ok(true)
    }

    /// All resident pages, in no particular order.
    pub fn pages(&self) -> impl Iterator<Item = &Page> {
        self.resident.values()
    }

    /// Write every dirty page back through `backing`, keeping pages resident.
    pub fn flush(&mut self, backing: &mut dyn NodeBacking) -> Result<()> {
        for (id, page) in &mut self.resident {
            if page.is_dirty() {
                backing.store_node(*id, page.node())?;
                page.set_dirty(false);
            }
        }
        Ok(())
    }
}
