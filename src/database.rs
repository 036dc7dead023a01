//! Top-level façade: opens an ESE file, reads its header and catalog, and
//! hands out table/row access. Mirrors the shape of the teacher's
//! `Database` (header parse, then a `schema_table_btree` used to resolve
//! every other table's root page) with the catalog tree standing in for
//! `sqlite_master`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cache::Cache;
use crate::catalog::{Catalog, Table};
use crate::error::{Error, Result};
use crate::io_handle::{IoHandle, PagesVector};
use crate::reader::{FileReader, Reader};
use crate::record::Row;

/// Tunables a caller can override at open time; defaults mirror the
/// constants the core otherwise hardcodes.
#[derive(Debug, Clone, Copy)]
pub struct DatabaseOptions {
    /// Page slots kept in the shared cache handed to every `PageTree`
    /// this `Database` constructs.
    pub cache_capacity: usize,
    /// Recursion-depth ceiling passed through to every `PageTree` walk.
    pub max_recursion_depth: usize,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        DatabaseOptions {
            cache_capacity: 64,
            max_recursion_depth: crate::page_tree::MAX_INDEX_NODE_RECURSION_DEPTH,
        }
    }
}

/// An open ESE database: its header, its assembled catalog, and the
/// plumbing (`io_handle`/`pages_vector`/shared cache) every table's
/// `PageTree` is built from.
pub struct Database {
    reader: Box<dyn Reader>,
    io_handle: IoHandle,
    pages_vector: PagesVector,
    pages_cache: Rc<RefCell<Cache>>,
    catalog: Catalog,
    options: DatabaseOptions,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with_options(path, DatabaseOptions::default())
    }

    pub fn open_with_options(path: &str, options: DatabaseOptions) -> Result<Self> {
        let reader = FileReader::open(path)?;
        Self::from_reader_with_options(Box::new(reader), options)
    }

    pub fn from_reader(reader: Box<dyn Reader>) -> Result<Self> {
        Self::from_reader_with_options(reader, DatabaseOptions::default())
    }

    pub fn from_reader_with_options(mut reader: Box<dyn Reader>, options: DatabaseOptions) -> Result<Self> {
        let io_handle = IoHandle::read(reader.as_mut())?;
        let pages_vector = PagesVector::new(io_handle);
        let pages_cache = Rc::new(RefCell::new(Cache::new(options.cache_capacity)));

        let catalog = Catalog::read(
            reader.as_mut(),
            io_handle,
            pages_vector,
            Rc::clone(&pages_cache),
            options.max_recursion_depth,
        )?;

        Ok(Database {
            reader,
            io_handle,
            pages_vector,
            pages_cache,
            catalog,
            options,
        })
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.catalog.table_names()
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.catalog.table(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.catalog.tables()
    }

    /// Reads every row out of `table_name`'s data tree.
    pub fn rows(&mut self, table_name: &str) -> Result<Vec<Row>> {
        let table = self
            .catalog
            .table(table_name)
            .ok_or_else(|| Error::Catalog(format!("no such table: {table_name}")))?
            .clone();
        table.rows(
            self.reader.as_mut(),
            self.io_handle,
            self.pages_vector,
            Rc::clone(&self.pages_cache),
            self.options.max_recursion_depth,
        )
    }

    pub fn options(&self) -> DatabaseOptions {
        self.options
    }
}
