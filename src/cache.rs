//! A minimal bounded LRU map from page number to [`Page`](crate::page::Page).
//!
//! Used two ways by the crate: as the "shared" page cache a [`Database`]
//! keeps between independent [`PageTree::walk`](crate::page_tree::PageTree::walk)
//! calls, and as the single-slot, per-recursion-frame cache the tree walker
//! allocates fresh for every branch frame so that a child-page eviction can
//! never invalidate the page the parent frame is still iterating.

use std::collections::HashMap;
use std::rc::Rc;

use crate::page::Page;

#[derive(Debug)]
struct Entry {
    page: Rc<Page>,
    /// Monotonically increasing touch counter used to find the
    /// least-recently-used entry on eviction.
    last_used: u64,
}

/// A bounded `page_number -> Page` cache with LRU eviction.
#[derive(Debug)]
pub struct Cache {
    capacity: usize,
    entries: HashMap<u32, Entry>,
    clock: u64,
}

impl Cache {
    pub fn new(capacity: usize) -> Self {
        Cache {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            clock: 0,
        }
    }

    pub fn get(&mut self, page_number: u32) -> Option<Rc<Page>> {
        self.clock += 1;
        let clock = self.clock;
        if let Some(entry) = self.entries.get_mut(&page_number) {
            entry.last_used = clock;
            return Some(Rc::clone(&entry.page));
        }
        None
    }

    pub fn put(&mut self, page_number: u32, page: Rc<Page>) {
        self.clock += 1;
        let clock = self.clock;
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&page_number) {
            self.evict_one();
        }
        self.entries.insert(
            page_number,
            Entry {
                page,
                last_used: clock,
            },
        );
    }

    /// Drops the cache's own reference to every entry. Any page still
    /// referenced by an outer recursion frame via a cloned `Rc` stays alive
    /// regardless.
    pub fn free(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_one(&mut self) {
        if let Some((&lru_key, _)) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
        {
            self.entries.remove(&lru_key);
        }
    }
}
