//! File-header parsing and the page-number-to-byte-range mapping the core
//! consumes but does not itself validate beyond what the page tree needs.

use log::debug;

use crate::byte_reader::ByteCursor;
use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::page::Page;
use crate::reader::Reader;
use std::rc::Rc;

/// Valid ESE page sizes.
const VALID_PAGE_SIZES: [u32; 4] = [4096, 8192, 16384, 32768];

const FILE_SIGNATURE: [u8; 4] = [0xEF, 0xEF, 0xEF, 0xEF];

/// The first data page after the 2-page file header; object identifier 2's
/// catalog tree is always rooted here.
pub const CATALOG_ROOT_PAGE_NUMBER: u32 = 4;

/// Format/page-size facts extracted from the 100-plus-byte database file
/// header (stored at page 0, mirrored at page 1). Everything the page-tree
/// core needs from the header lives here; full header validation (schema
/// version gating, shadow-copy comparison, …) is a concern of the
/// database-open layer above.
#[derive(Debug, Clone, Copy)]
pub struct IoHandle {
    pub page_size: u32,
    pub format_version: u32,
    pub format_revision: u32,
    pub last_page_number: u32,
}

impl IoHandle {
    /// Reads and validates the file header from `reader`.
    pub fn read(reader: &mut dyn Reader) -> Result<Self> {
        let mut header = vec![0u8; 256];
        reader.read_at(0, &mut header)?;

        let signature: [u8; 4] = header[4..8].try_into().expect("fixed-size slice");
        if signature != FILE_SIGNATURE {
            return Err(Error::MalformedPage {
                page_number: 0,
                reason: "file signature does not match the ESE magic bytes".into(),
            });
        }

        let mut cursor = ByteCursor::at(&header, 8);
        let format_version = cursor.read_u32_le()?;
        let _file_type = cursor.read_u32_le()?;
        let _database_time = cursor.read_u64_le()?;
        let _signature_db = cursor.read_bytes(28)?;
        let format_revision = cursor.read_u32_le()?;
        let page_size = {
            let mut page_size_cursor = ByteCursor::at(&header, 236);
            page_size_cursor.read_u32_le()?
        };

        if !VALID_PAGE_SIZES.contains(&page_size) {
            return Err(Error::MalformedPage {
                page_number: 0,
                reason: format!("page size {page_size} is not one of the valid ESE page sizes"),
            });
        }

        let file_length = reader.len()?;
        let last_page_number = ((file_length / page_size as u64).saturating_sub(2)) as u32;

        debug!(
            "parsed ESE header: page_size={page_size} format_version={format_version} \
             format_revision={format_revision} last_page_number={last_page_number}"
        );

        Ok(IoHandle {
            page_size,
            format_version,
            format_revision,
            last_page_number,
        })
    }

    /// Byte offset of the given 1-based page number, accounting for the two
    /// database-header pages that precede logical page 1.
    pub fn page_offset(&self, page_number: u32) -> u64 {
        (page_number as u64 + 1) * self.page_size as u64
    }
}

/// Maps page numbers to on-disk byte ranges and loads/decodes them through
/// a caller-supplied [`Cache`]. This is the "Page Loader" of the
/// specification; the pages vector itself is read-only during traversal,
/// shared freely, while the cache it's handed is per-caller.
#[derive(Debug, Clone, Copy)]
pub struct PagesVector {
    io_handle: IoHandle,
}

impl PagesVector {
    pub fn new(io_handle: IoHandle) -> Self {
        PagesVector { io_handle }
    }

    pub fn io_handle(&self) -> &IoHandle {
        &self.io_handle
    }

    /// Returns the page with the given 1-based number, using `cache` to
    /// memoize. `0` and anything beyond `last_page_number` are rejected
    /// outright here — the "skip, don't fail" convention for out-of-range
    /// *branch child* pointers lives one layer up, in the tree walker,
    /// where 0 is a meaningful sentinel rather than an invalid argument.
    pub fn get_page(
        &self,
        page_number: u32,
        reader: &mut dyn Reader,
        cache: &mut Cache,
    ) -> Result<Rc<Page>> {
        if page_number == 0 || page_number > self.io_handle.last_page_number {
            return Err(Error::InvalidPageNumber(page_number));
        }

        if let Some(page) = cache.get(page_number) {
            return Ok(page);
        }

        debug!("cache miss for page {page_number}, reading from disk");

        let mut buf = vec![0u8; self.io_handle.page_size as usize];
        reader.read_at(self.io_handle.page_offset(page_number), &mut buf)?;

        let page = Rc::new(Page::decode(buf, page_number)?);
        cache.put(page_number, Rc::clone(&page));
        Ok(page)
    }
}
