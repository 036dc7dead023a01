//! Recursive descent over an ESE page tree.
//!
//! Starting from a root page, [`PageTree::walk`] iterates the tag array of
//! every page it visits: branch pages recurse into their child page, leaf
//! pages hand their decoded `(key, value)` tuple to the caller's visitor.
//! The one invariant that makes this safe to implement with plain
//! recursion is cache isolation — every recursive frame allocates its own
//! single-slot [`Cache`] for the children it loads, so an eviction inside a
//! deeper frame can never invalidate a page an outer frame still holds a
//! live borrow of (this crate sidesteps the borrow question entirely by
//! handing out `Rc<Page>` rather than a borrowed view).

use std::cell::RefCell;
use std::ops::ControlFlow;
use std::rc::Rc;

use log::{debug, trace};

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::io_handle::{IoHandle, PagesVector};
use crate::page::{Page, PageFlags, PageTagFlags};
use crate::page_tree_value::PageTreeValue;
use crate::reader::Reader;

/// Default safety ceiling on recursion depth; also doubles as the property
/// tested by the cyclic-tree "Depth bound" scenario. Overridable per
/// `PageTree` via [`DatabaseOptions::max_recursion_depth`](crate::database::DatabaseOptions::max_recursion_depth).
pub const MAX_INDEX_NODE_RECURSION_DEPTH: usize = 64;

/// Receives leaf tuples from [`PageTree::walk`] in ascending key order.
/// Returning [`ControlFlow::Break`] stops the walk early without it being
/// treated as an error.
pub trait PageTreeVisitor {
    fn on_leaf(&mut self, key: &[u8], value: &[u8]) -> ControlFlow<()>;
}

/// A visitor that just counts leaves, backing
/// [`PageTree::count_leaf_values`].
struct CountingVisitor {
    count: usize,
}

impl PageTreeVisitor for CountingVisitor {
    fn on_leaf(&mut self, _key: &[u8], _value: &[u8]) -> ControlFlow<()> {
        self.count += 1;
        ControlFlow::Continue(())
    }
}

/// A logical B+-tree identified by a root page number and an object
/// identifier, optionally carrying table/template-table metadata owned by
/// a higher layer (e.g. the catalog's column definitions, used when a
/// `PageTree` walks a table's own data tree rather than the catalog).
#[derive(Clone)]
pub struct PageTree<M = ()> {
    io_handle: IoHandle,
    pages_vector: PagesVector,
    /// The embedder-visible "shared" cache. The core treats it as opaque
    /// and never consults it during a walk — see the module docs and
    /// the concurrency section of the design notes: relying on any
    /// specific entry surviving across calls would reopen the exact
    /// cache-invalidation hazard per-frame caches exist to avoid.
    #[allow(dead_code)]
    pages_cache: Rc<RefCell<Cache>>,
    pub root_page_number: u32,
    pub object_identifier: u32,
    pub table_definition: Option<M>,
    pub template_table_definition: Option<M>,
    max_recursion_depth: usize,
}

impl<M: Clone> PageTree<M> {
    pub fn new(
        io_handle: IoHandle,
        pages_vector: PagesVector,
        pages_cache: Rc<RefCell<Cache>>,
        root_page_number: u32,
        object_identifier: u32,
        table_definition: Option<M>,
        template_table_definition: Option<M>,
    ) -> Self {
        Self::with_max_recursion_depth(
            io_handle,
            pages_vector,
            pages_cache,
            root_page_number,
            object_identifier,
            table_definition,
            template_table_definition,
            MAX_INDEX_NODE_RECURSION_DEPTH,
        )
    }

    /// As [`PageTree::new`], but overriding the recursion-depth ceiling —
    /// used by [`crate::database::Database`] when opened with a
    /// non-default [`crate::database::DatabaseOptions`].
    #[allow(clippy::too_many_arguments)]
    pub fn with_max_recursion_depth(
        io_handle: IoHandle,
        pages_vector: PagesVector,
        pages_cache: Rc<RefCell<Cache>>,
        root_page_number: u32,
        object_identifier: u32,
        table_definition: Option<M>,
        template_table_definition: Option<M>,
        max_recursion_depth: usize,
    ) -> Self {
        PageTree {
            io_handle,
            pages_vector,
            pages_cache,
            root_page_number,
            object_identifier,
            table_definition,
            template_table_definition,
            max_recursion_depth,
        }
    }

    /// Walks the tree rooted at `self.root_page_number`, invoking
    /// `visitor.on_leaf` for every leaf tuple in ascending key order.
    pub fn walk(&self, reader: &mut dyn Reader, visitor: &mut dyn PageTreeVisitor) -> Result<()> {
        let mut root_cache = Cache::new(1);
        let root_page = self
            .pages_vector
            .get_page(self.root_page_number, reader, &mut root_cache)?;
        root_page.validate_root()?;

        self.descend(&root_page, 0, reader, visitor)?;

        root_cache.free();
        Ok(())
    }

    /// Convenience wrapper that walks the tree purely to count its leaves.
    pub fn count_leaf_values(&self, reader: &mut dyn Reader) -> Result<usize> {
        let mut visitor = CountingVisitor { count: 0 };
        self.walk(reader, &mut visitor)?;
        Ok(visitor.count)
    }

    fn descend(
        &self,
        page: &Rc<Page>,
        depth: usize,
        reader: &mut dyn Reader,
        visitor: &mut dyn PageTreeVisitor,
    ) -> Result<ControlFlow<()>> {
        if depth > self.max_recursion_depth {
            return Err(Error::RecursionDepthExceeded {
                depth: self.max_recursion_depth,
            });
        }

        let number_of_tags = page.tags.len();
        if number_of_tags == 0 {
            // Legal for a freshly allocated, never-used page.
            return Ok(ControlFlow::Continue(()));
        }

        let page_flags = page.header.flags;
        let is_leaf = page_flags.contains(PageFlags::LEAF);
        let is_branch = page_flags.contains(PageFlags::PARENT);
        if is_leaf == is_branch {
            return Err(Error::InconsistentPageFlags {
                page_number: page.page_number,
            });
        }

        let mut child_cache = Cache::new(1);
        let mut page_key_prefix_source: Option<&[u8]> = None;

        for i in 1..number_of_tags {
            let tag_flags = page.tag_flags(i).ok_or(Error::MissingPageValue {
                page_number: page.page_number,
                tag_index: i,
            })?;
            if tag_flags.contains(PageTagFlags::IS_DEFUNCT) {
                trace!("page {} tag {} is defunct, skipping", page.page_number, i);
                continue;
            }
            let value_bytes = page.tag_value(i).ok_or(Error::MissingPageValue {
                page_number: page.page_number,
                tag_index: i,
            })?;

            let ptv = PageTreeValue::parse(value_bytes, tag_flags, page.page_size).map_err(
                |err| match err {
                    Error::KeyTooLong { .. } => Error::KeyTooLong {
                        page_number: page.page_number,
                    },
                    other => other,
                },
            )?;

            let full_key = reconstruct_key(&ptv, &mut page_key_prefix_source);

            if is_leaf {
                if visitor.on_leaf(&full_key, ptv.value).is_break() {
                    child_cache.free();
                    return Ok(ControlFlow::Break(()));
                }
            } else {
                let child_page_number = ptv.child_page_number().map_err(|_| Error::InvalidBranch {
                    page_number: page.page_number,
                    tag_index: i,
                })?;

                if child_page_number == 0 || child_page_number > self.io_handle.last_page_number {
                    debug!(
                        "page {} tag {} branch child {} is out of range, skipping",
                        page.page_number, i, child_page_number
                    );
                    continue;
                }

                let child_page =
                    self.pages_vector
                        .get_page(child_page_number, reader, &mut child_cache)?;
                child_page.validate()?;

                match self.descend(&child_page, depth + 1, reader, visitor)? {
                    ControlFlow::Continue(()) => {}
                    ControlFlow::Break(()) => {
                        child_cache.free();
                        return Ok(ControlFlow::Break(()));
                    }
                }
            }
        }

        child_cache.free();
        Ok(ControlFlow::Continue(()))
    }
}

/// Reconstructs a tag's full logical key. The first live tag on a page
/// supplies the page's common-key prefix source (its own local key);
/// subsequent tags borrow a `common_key_size`-byte prefix from it when
/// `HAS_COMMON_KEY_SIZE` was set on their tag. See DESIGN.md for why this
/// "snapshot once per page" reading was chosen over per-tag chaining.
fn reconstruct_key<'a>(ptv: &PageTreeValue<'a>, prefix_source: &mut Option<&'a [u8]>) -> Vec<u8> {
    let key = match prefix_source {
        Some(source) => {
            let prefix_len = (ptv.common_key_size as usize).min(source.len());
            let mut full = Vec::with_capacity(prefix_len + ptv.local_key.len());
            full.extend_from_slice(&source[..prefix_len]);
            full.extend_from_slice(ptv.local_key);
            full
        }
        None => ptv.local_key.to_vec(),
    };
    if prefix_source.is_none() {
        *prefix_source = Some(ptv.local_key);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_handle::IoHandle;
    use crate::reader::SliceReader;

    fn io_handle(page_size: u32, last_page_number: u32) -> IoHandle {
        IoHandle {
            page_size,
            format_version: 0x620,
            format_revision: 0,
            last_page_number,
        }
    }

    fn tagged_value(local_key: &[u8], value: &[u8], common_key_size: Option<u16>) -> (Vec<u8>, u8) {
        let mut buf = Vec::new();
        let mut flags = 0u8;
        if let Some(size) = common_key_size {
            buf.extend_from_slice(&size.to_le_bytes());
            flags |= PageTagFlags::HAS_COMMON_KEY_SIZE;
        }
        buf.extend_from_slice(&(local_key.len() as u16).to_le_bytes());
        buf.extend_from_slice(local_key);
        buf.extend_from_slice(value);
        (buf, flags)
    }

    fn build_page(page_size: usize, header_flags: u32, tag0: Vec<u8>, tags: Vec<(Vec<u8>, u8)>) -> Vec<u8> {
        let mut buf = vec![0u8; page_size];
        buf[36..40].copy_from_slice(&header_flags.to_le_bytes());
        let total_tags = tags.len() + 1;
        buf[34..36].copy_from_slice(&(total_tags as u16).to_le_bytes());

        let mut all = vec![(tag0, 0u8)];
        all.extend(tags);

        let mut write_cursor = 40usize;
        let mut entries = Vec::new();
        for (payload, flags) in &all {
            let offset = write_cursor;
            let size = payload.len();
            buf[offset..offset + size].copy_from_slice(payload);
            write_cursor += size;
            entries.push((offset as u16, size as u16, *flags));
        }

        let mut tail = page_size;
        for (offset, size, flags) in entries.iter().rev() {
            tail -= 4;
            let flagged_offset = *offset | ((*flags as u16) << 13);
            buf[tail..tail + 2].copy_from_slice(&size.to_le_bytes());
            buf[tail + 2..tail + 4].copy_from_slice(&flagged_offset.to_le_bytes());
        }

        buf
    }

    struct CollectingVisitor {
        leaves: Vec<(Vec<u8>, Vec<u8>)>,
    }
    impl PageTreeVisitor for CollectingVisitor {
        fn on_leaf(&mut self, key: &[u8], value: &[u8]) -> ControlFlow<()> {
            self.leaves.push((key.to_vec(), value.to_vec()));
            ControlFlow::Continue(())
        }
    }

    fn make_reader_from_pages(page_size: usize, pages: Vec<Vec<u8>>) -> SliceReader {
        // page numbers are 1-based and offset by +1 page (header pages 0
        // and implicit page before logical page 1), matching IoHandle::page_offset.
        let mut bytes = vec![0u8; page_size * 2];
        for page in pages {
            bytes.extend(page);
        }
        SliceReader { bytes }
    }

    fn fresh_cache() -> Rc<RefCell<Cache>> {
        Rc::new(RefCell::new(Cache::new(8)))
    }

    #[test]
    fn empty_tree_yields_no_leaves() {
        let page_size = 512usize;
        let root = build_page(page_size, PageFlags::ROOT | PageFlags::LEAF, vec![], vec![]);
        let mut reader = make_reader_from_pages(page_size, vec![root]);
        let io = io_handle(page_size as u32, 1);
        let pv = PagesVector::new(io);
        let tree: PageTree<()> = PageTree::new(io, pv, fresh_cache(), 1, 2, None, None);
        let mut visitor = CollectingVisitor { leaves: vec![] };
        tree.walk(&mut reader, &mut visitor).unwrap();
        assert!(visitor.leaves.is_empty());
    }

    #[test]
    fn single_leaf_page_yields_ordered_leaves() {
        let page_size = 512usize;
        let tag_a = tagged_value(&[0x00], b"A", None);
        let tag_b = tagged_value(&[0x01], b"B", None);
        let root = build_page(
            page_size,
            PageFlags::ROOT | PageFlags::LEAF,
            vec![],
            vec![tag_a, tag_b],
        );
        let mut reader = make_reader_from_pages(page_size, vec![root]);
        let io = io_handle(page_size as u32, 1);
        let pv = PagesVector::new(io);
        let tree: PageTree<()> = PageTree::new(io, pv, fresh_cache(), 1, 2, None, None);
        let mut visitor = CollectingVisitor { leaves: vec![] };
        tree.walk(&mut reader, &mut visitor).unwrap();
        assert_eq!(visitor.leaves.len(), 2);
        assert_eq!(visitor.leaves[0].1, b"A");
        assert_eq!(visitor.leaves[1].1, b"B");
    }

    #[test]
    fn two_level_tree_visits_leaves_left_to_right() {
        let page_size = 512usize;
        // children: page 2 has leaves a,b; page 3 has leaves c,d
        let p2 = build_page(
            page_size,
            PageFlags::LEAF,
            vec![],
            vec![
                tagged_value(&[0], b"a", None),
                tagged_value(&[1], b"b", None),
            ],
        );
        let p3 = build_page(
            page_size,
            PageFlags::LEAF,
            vec![],
            vec![
                tagged_value(&[2], b"c", None),
                tagged_value(&[3], b"d", None),
            ],
        );
        let mut branch_value_1 = vec![2u8, 0, 0, 0];
        branch_value_1.extend_from_slice(&[0]); // trailing key byte (ignored beyond 4)
        let mut branch_value_2 = vec![3u8, 0, 0, 0];
        branch_value_2.extend_from_slice(&[1]);
        let root = build_page(
            page_size,
            PageFlags::ROOT | PageFlags::PARENT,
            vec![],
            vec![
                tagged_value(&[0], &branch_value_1, None),
                tagged_value(&[1], &branch_value_2, None),
            ],
        );
        let mut reader = make_reader_from_pages(page_size, vec![root, p2, p3]);
        let io = io_handle(page_size as u32, 3);
        let pv = PagesVector::new(io);
        let tree: PageTree<()> = PageTree::new(io, pv, fresh_cache(), 1, 2, None, None);
        let mut visitor = CollectingVisitor { leaves: vec![] };
        tree.walk(&mut reader, &mut visitor).unwrap();
        let values: Vec<_> = visitor.leaves.iter().map(|(_, v)| v.clone()).collect();
        assert_eq!(values, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn out_of_range_child_is_skipped_not_fatal() {
        let page_size = 512usize;
        let p2 = build_page(
            page_size,
            PageFlags::LEAF,
            vec![],
            vec![tagged_value(&[0], b"a", None)],
        );
        let mut branch_value_bad = vec![99u8, 0, 0, 0]; // page 99 does not exist
        branch_value_bad.extend_from_slice(&[0]);
        let mut branch_value_good = vec![2u8, 0, 0, 0];
        branch_value_good.extend_from_slice(&[1]);
        let root = build_page(
            page_size,
            PageFlags::ROOT | PageFlags::PARENT,
            vec![],
            vec![
                tagged_value(&[0], &branch_value_bad, None),
                tagged_value(&[1], &branch_value_good, None),
            ],
        );
        let mut reader = make_reader_from_pages(page_size, vec![root, p2]);
        let io = io_handle(page_size as u32, 2);
        let pv = PagesVector::new(io);
        let tree: PageTree<()> = PageTree::new(io, pv, fresh_cache(), 1, 2, None, None);
        let mut visitor = CollectingVisitor { leaves: vec![] };
        tree.walk(&mut reader, &mut visitor).unwrap();
        assert_eq!(visitor.leaves.len(), 1);
        assert_eq!(visitor.leaves[0].1, b"a");
    }

    #[test]
    fn self_referencing_branch_hits_recursion_ceiling() {
        let page_size = 512usize;
        let mut branch_value_self = vec![1u8, 0, 0, 0]; // points back at page 1 (itself)
        branch_value_self.extend_from_slice(&[0]);
        let root = build_page(
            page_size,
            PageFlags::ROOT | PageFlags::PARENT,
            vec![],
            vec![tagged_value(&[0], &branch_value_self, None)],
        );
        let mut reader = make_reader_from_pages(page_size, vec![root]);
        let io = io_handle(page_size as u32, 1);
        let pv = PagesVector::new(io);
        let tree: PageTree<()> = PageTree::new(io, pv, fresh_cache(), 1, 2, None, None);
        let mut visitor = CollectingVisitor { leaves: vec![] };
        let err = tree.walk(&mut reader, &mut visitor).unwrap_err();
        assert!(matches!(err, Error::RecursionDepthExceeded { .. }));
    }

    #[test]
    fn branch_tag_shorter_than_four_bytes_is_invalid() {
        let page_size = 512usize;
        let root = build_page(
            page_size,
            PageFlags::ROOT | PageFlags::PARENT,
            vec![],
            vec![tagged_value(&[0], &[1, 2, 3], None)],
        );
        let mut reader = make_reader_from_pages(page_size, vec![root]);
        let io = io_handle(page_size as u32, 1);
        let pv = PagesVector::new(io);
        let tree: PageTree<()> = PageTree::new(io, pv, fresh_cache(), 1, 2, None, None);
        let mut visitor = CollectingVisitor { leaves: vec![] };
        let err = tree.walk(&mut reader, &mut visitor).unwrap_err();
        assert!(matches!(err, Error::InvalidBranch { .. }));
    }

    #[test]
    fn defunct_tag_between_two_live_tags_is_skipped() {
        let page_size = 512usize;
        let (mut defunct_bytes, _) = tagged_value(&[0x05], b"X", None);
        let defunct_flags = PageTagFlags::IS_DEFUNCT;
        let root = build_page(
            page_size,
            PageFlags::ROOT | PageFlags::LEAF,
            vec![],
            vec![
                tagged_value(&[0x00], b"A", None),
                (std::mem::take(&mut defunct_bytes), defunct_flags),
                tagged_value(&[0x02], b"B", None),
            ],
        );
        let mut reader = make_reader_from_pages(page_size, vec![root]);
        let io = io_handle(page_size as u32, 1);
        let pv = PagesVector::new(io);
        let tree: PageTree<()> = PageTree::new(io, pv, fresh_cache(), 1, 2, None, None);
        let mut visitor = CollectingVisitor { leaves: vec![] };
        tree.walk(&mut reader, &mut visitor).unwrap();
        assert_eq!(visitor.leaves.len(), 2);
        assert_eq!(visitor.leaves[0].1, b"A");
        assert_eq!(visitor.leaves[1].1, b"B");
    }
}
