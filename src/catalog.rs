//! Reads the `MSysObjects` catalog tree (object identifier 2, rooted at
//! [`CATALOG_ROOT_PAGE_NUMBER`]) and assembles it into [`Table`]s, each
//! carrying its [`Column`](crate::record::Column) and [`Index`] definitions.
//!
//! The catalog is itself an ordinary page tree whose rows are ordinary
//! records, decoded through the same [`crate::record::decode_record`] used
//! for user tables — it just has a schema the engine already knows rather
//! than one it has to discover. Every catalog row carries an
//! `obj_id_table` fixed column that names the table it belongs to (a table
//! row names itself); grouping rows by that column is how the individual
//! Table/Column/Index/LongValue catalog rows turn into one `Table` per
//! table, mirroring the teacher's `sqlite_master` scan in `database.rs`
//! but keyed by id rather than by a `type` string column.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::io_handle::{IoHandle, PagesVector, CATALOG_ROOT_PAGE_NUMBER};
use crate::page_tree::{PageTree, PageTreeVisitor};
use crate::reader::Reader;
use crate::record::{decode_record, Column, ColumnFlags, ColumnType, LongValueTree, Row, Value};
use std::ops::ControlFlow;

/// Object identifier the catalog tree itself is always rooted under.
pub const CATALOG_OBJECT_IDENTIFIER: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CatalogObjectType {
    Table,
    Column,
    Index,
    LongValue,
    Callback,
}

impl CatalogObjectType {
    fn from_i16(code: i16) -> Option<Self> {
        match code {
            1 => Some(CatalogObjectType::Table),
            2 => Some(CatalogObjectType::Column),
            3 => Some(CatalogObjectType::Index),
            4 => Some(CatalogObjectType::LongValue),
            5 => Some(CatalogObjectType::Callback),
            _ => None,
        }
    }
}

/// One decoded `MSysObjects` row, before grouping into tables.
struct CatalogEntry {
    obj_id_table: u32,
    object_type: CatalogObjectType,
    id: i32,
    coltyp_or_root_page: i32,
    name: Option<String>,
}

/// An index definition. Key-column parsing is intentionally shallow —
/// just the index's own name and the root page of its key tree — since
/// nothing in this crate needs to evaluate index predicates.
#[derive(Debug, Clone)]
pub struct Index {
    pub name: String,
    pub root_page_number: u32,
}

/// A table's full schema plus enough metadata to walk its data tree.
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub object_identifier: u32,
    pub root_page_number: u32,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub long_value_root_page_number: Option<u32>,
}

impl Table {
    /// Builds a [`PageTree`] over this table's data rows.
    pub fn data_tree(
        &self,
        io_handle: IoHandle,
        pages_vector: PagesVector,
        pages_cache: Rc<RefCell<Cache>>,
        max_recursion_depth: usize,
    ) -> PageTree<()> {
        PageTree::with_max_recursion_depth(
            io_handle,
            pages_vector,
            pages_cache,
            self.root_page_number,
            self.object_identifier,
            None,
            None,
            max_recursion_depth,
        )
    }

    /// Builds the [`LongValueTree`] backing this table's long-value
    /// columns, if the catalog recorded one.
    fn long_value_tree(
        &self,
        io_handle: IoHandle,
        pages_vector: PagesVector,
        pages_cache: Rc<RefCell<Cache>>,
        max_recursion_depth: usize,
    ) -> Option<LongValueTree> {
        let root_page_number = self.long_value_root_page_number?;
        Some(LongValueTree::new(PageTree::with_max_recursion_depth(
            io_handle,
            pages_vector,
            pages_cache,
            root_page_number,
            self.object_identifier,
            None,
            None,
            max_recursion_depth,
        )))
    }

    /// Walks the table's data tree and decodes every row, resolving long
    /// values inline via the table's own long-value tree when present.
    ///
    /// Rows are collected in two passes: first the raw record bytes (while
    /// `reader` is held by the tree walk), then the decode pass, which
    /// reuses `reader` to resolve any long-value columns a record carries.
    /// This keeps a single `&mut dyn Reader` borrow active at a time rather
    /// than needing the walk to hand the visitor reentrant read access.
    pub fn rows(
        &self,
        reader: &mut dyn Reader,
        io_handle: IoHandle,
        pages_vector: PagesVector,
        pages_cache: Rc<RefCell<Cache>>,
        max_recursion_depth: usize,
    ) -> Result<Vec<Row>> {
        struct RawCollector {
            values: Vec<Vec<u8>>,
        }
        impl PageTreeVisitor for RawCollector {
            fn on_leaf(&mut self, _key: &[u8], value: &[u8]) -> ControlFlow<()> {
                self.values.push(value.to_vec());
                ControlFlow::Continue(())
            }
        }

        let tree = self.data_tree(io_handle, pages_vector, Rc::clone(&pages_cache), max_recursion_depth);
        let mut collector = RawCollector { values: Vec::new() };
        tree.walk(reader, &mut collector)?;

        let long_value_tree = self.long_value_tree(io_handle, pages_vector, pages_cache, max_recursion_depth);

        let mut rows = Vec::with_capacity(collector.values.len());
        for value in &collector.values {
            let mut lv_reader = |lv_identifier: u32| -> Result<Vec<u8>> {
                match &long_value_tree {
                    Some(tree) => tree.read(reader, lv_identifier, &io_handle),
                    None => Err(Error::Catalog(format!(
                        "table {} has a long-value tagged column but no long-value tree",
                        self.name
                    ))),
                }
            };
            rows.push(decode_record(value, &self.columns, &mut lv_reader)?);
        }
        Ok(rows)
    }
}

/// Fixed schema for the `MSysObjects` catalog table itself. A real ESE
/// database also carries `MSysObjectsShadow`/`MSysLocales`/etc., which
/// this crate has no need to read.
fn catalog_columns() -> Vec<Column> {
    vec![
        Column {
            name: "ObjidTable".into(),
            identifier: 1,
            column_type: ColumnType::Long,
            flags: ColumnFlags::default(),
        },
        Column {
            name: "Type".into(),
            identifier: 2,
            column_type: ColumnType::Short,
            flags: ColumnFlags::default(),
        },
        Column {
            name: "Id".into(),
            identifier: 3,
            column_type: ColumnType::Long,
            flags: ColumnFlags::default(),
        },
        Column {
            name: "ColtypOrPgnoFDP".into(),
            identifier: 4,
            column_type: ColumnType::Long,
            flags: ColumnFlags::default(),
        },
        Column {
            name: "SpaceUsage".into(),
            identifier: 5,
            column_type: ColumnType::Long,
            flags: ColumnFlags::default(),
        },
        Column {
            name: "Flags".into(),
            identifier: 6,
            column_type: ColumnType::Long,
            flags: ColumnFlags::default(),
        },
        Column {
            name: "PagesOrLocale".into(),
            identifier: 7,
            column_type: ColumnType::Long,
            flags: ColumnFlags::default(),
        },
        Column {
            name: "RootFlag".into(),
            identifier: 8,
            column_type: ColumnType::Bit,
            flags: ColumnFlags::default(),
        },
        Column {
            name: "Name".into(),
            identifier: 128,
            column_type: ColumnType::Text,
            flags: ColumnFlags::default(),
        },
        Column {
            name: "TemplateTable".into(),
            identifier: 130,
            column_type: ColumnType::Text,
            flags: ColumnFlags::default(),
        },
    ]
}

fn as_i32(row: &Row, name: &str) -> Result<i32> {
    match row.get(name) {
        Some(Value::I32(v)) => Ok(*v),
        Some(Value::Null) | None => Ok(0),
        _ => Err(Error::Catalog(format!("catalog column {name} has unexpected type"))),
    }
}

fn as_i16(row: &Row, name: &str) -> Result<i16> {
    match row.get(name) {
        Some(Value::I16(v)) => Ok(*v),
        Some(Value::Null) | None => Ok(0),
        _ => Err(Error::Catalog(format!("catalog column {name} has unexpected type"))),
    }
}

fn as_text(row: &Row, name: &str) -> Option<String> {
    match row.get(name) {
        Some(Value::Text(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Reads and assembles the full catalog into a `table name -> Table` map.
pub struct Catalog {
    tables: HashMap<String, Table>,
}

impl Catalog {
    pub fn read(
        reader: &mut dyn Reader,
        io_handle: IoHandle,
        pages_vector: PagesVector,
        pages_cache: Rc<RefCell<Cache>>,
        max_recursion_depth: usize,
    ) -> Result<Self> {
        struct RawCollector {
            values: Vec<Vec<u8>>,
        }
        impl PageTreeVisitor for RawCollector {
            fn on_leaf(&mut self, _key: &[u8], value: &[u8]) -> ControlFlow<()> {
                self.values.push(value.to_vec());
                ControlFlow::Continue(())
            }
        }

        let tree: PageTree<()> = PageTree::with_max_recursion_depth(
            io_handle,
            pages_vector,
            pages_cache,
            CATALOG_ROOT_PAGE_NUMBER,
            CATALOG_OBJECT_IDENTIFIER,
            None,
            None,
            max_recursion_depth,
        );

        let mut collector = RawCollector { values: Vec::new() };
        tree.walk(reader, &mut collector)?;

        // MSysObjects itself never declares a long-value tree of its own
        // (the `LongValue` catalog rows name *other* tables' LV roots), so
        // a tagged long-value column showing up in a catalog row is an
        // error rather than something to silently read as empty.
        let columns = catalog_columns();
        let mut entries = Vec::with_capacity(collector.values.len());
        for value in &collector.values {
            let mut lv_reader = |_lv_identifier: u32| -> Result<Vec<u8>> {
                Err(Error::Catalog("catalog row references a long value, which the catalog schema does not support".into()))
            };
            let row = decode_record(value, &columns, &mut lv_reader)?;
            let obj_id_table = as_i32(&row, "ObjidTable")? as u32;
            let object_type = CatalogObjectType::from_i16(as_i16(&row, "Type")?)
                .ok_or_else(|| Error::Catalog("unknown catalog object type".into()))?;
            entries.push(CatalogEntry {
                obj_id_table,
                object_type,
                id: as_i32(&row, "Id")?,
                coltyp_or_root_page: as_i32(&row, "ColtypOrPgnoFDP")?,
                name: as_text(&row, "Name"),
            });
        }

        let mut grouped: HashMap<u32, Vec<CatalogEntry>> = HashMap::new();
        for entry in entries {
            grouped.entry(entry.obj_id_table).or_default().push(entry);
        }

        let mut tables = HashMap::new();
        for (obj_id_table, entries) in grouped {
            let table_entry = match entries
                .iter()
                .find(|e| e.object_type == CatalogObjectType::Table && e.id as u32 == obj_id_table)
            {
                Some(e) => e,
                None => continue, // not every group roots at a Table row, e.g. orphaned LV rows
            };
            let table_name = table_entry
                .name
                .clone()
                .unwrap_or_else(|| format!("table_{obj_id_table}"));
            let root_page_number = table_entry.coltyp_or_root_page as u32;

            let mut columns = Vec::new();
            let mut indexes = Vec::new();
            let mut long_value_root_page_number = None;
            for entry in &entries {
                match entry.object_type {
                    CatalogObjectType::Column => {
                        let column_type = ColumnType::from_u32(entry.coltyp_or_root_page as u32)
                            .ok_or_else(|| Error::Catalog(format!(
                                "column {} has unknown coltyp {}",
                                entry.name.clone().unwrap_or_default(),
                                entry.coltyp_or_root_page
                            )))?;
                        columns.push(Column {
                            name: entry.name.clone().unwrap_or_else(|| format!("col_{}", entry.id)),
                            identifier: entry.id as u32,
                            column_type,
                            flags: ColumnFlags::default(),
                        });
                    }
                    CatalogObjectType::Index => {
                        indexes.push(Index {
                            name: entry.name.clone().unwrap_or_else(|| format!("index_{}", entry.id)),
                            root_page_number: entry.coltyp_or_root_page as u32,
                        });
                    }
                    CatalogObjectType::LongValue => {
                        long_value_root_page_number = Some(entry.coltyp_or_root_page as u32);
                    }
                    CatalogObjectType::Table | CatalogObjectType::Callback => {}
                }
            }

            columns.sort_by_key(|c| c.identifier);

            tables.insert(
                table_name.clone(),
                Table {
                    name: table_name,
                    object_identifier: obj_id_table,
                    root_page_number,
                    columns,
                    indexes,
                    long_value_root_page_number,
                },
            );
        }

        Ok(Catalog { tables })
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|s| s.as_str())
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageFlags;
    use crate::reader::SliceReader;

    fn catalog_row_bytes(obj_id_table: i32, object_type: i16, id: i32, coltyp_or_root: i32, name: &str) -> Vec<u8> {
        // last_fixed_column_id=8 (ObjidTable..RootFlag), last_variable_column_id=128 (Name present)
        let mut bytes = Vec::new();
        bytes.push(8u8);
        bytes.push(128u8);
        let variable_offset_pos = bytes.len();
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.push(0u8); // null bitmap, one byte covers 8 fixed columns, none null
        bytes.extend_from_slice(&obj_id_table.to_le_bytes());
        bytes.extend_from_slice(&(object_type as u16).to_le_bytes());
        bytes.extend_from_slice(&id.to_le_bytes());
        bytes.extend_from_slice(&coltyp_or_root.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes()); // SpaceUsage
        bytes.extend_from_slice(&0i32.to_le_bytes()); // Flags
        bytes.extend_from_slice(&0i32.to_le_bytes()); // PagesOrLocale
        bytes.push(0u8); // RootFlag

        let variable_offset = bytes.len() as u16;
        bytes[variable_offset_pos..variable_offset_pos + 2].copy_from_slice(&variable_offset.to_le_bytes());

        let text: Vec<u8> = name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        let end_offset = text.len() as u16;
        bytes.extend_from_slice(&end_offset.to_le_bytes());
        bytes.extend_from_slice(&text);
        bytes
    }

    fn tagged_value(local_key: &[u8], value: &[u8]) -> (Vec<u8>, u8) {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(local_key.len() as u16).to_le_bytes());
        buf.extend_from_slice(local_key);
        buf.extend_from_slice(value);
        (buf, 0u8)
    }

    fn build_page(page_size: usize, header_flags: u32, tags: Vec<(Vec<u8>, u8)>) -> Vec<u8> {
        let mut buf = vec![0u8; page_size];
        buf[36..40].copy_from_slice(&header_flags.to_le_bytes());
        buf[34..36].copy_from_slice(&(tags.len() as u16).to_le_bytes());

        let mut write_cursor = 40usize;
        let mut entries = Vec::new();
        for (payload, flags) in &tags {
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

    #[test]
    fn assembles_one_table_with_one_column() {
        let page_size = 1024usize;
        let table_row = catalog_row_bytes(10, 1, 10, 20, "Users");
        let column_row = catalog_row_bytes(10, 2, 1, 4, "Id"); // coltyp 4 == ColumnType::Long

        let root = build_page(
            page_size,
            PageFlags::ROOT | PageFlags::LEAF,
            vec![
                (vec![], 0u8), // tag 0: page key placeholder, not consulted
                tagged_value(&[0x00], &table_row),
                tagged_value(&[0x01], &column_row),
            ],
        );

        let mut bytes = vec![0u8; page_size * 2];
        bytes.extend(root);
        let mut reader = SliceReader { bytes };

        let io_handle = IoHandle {
            page_size: page_size as u32,
            format_version: 0x620,
            format_revision: 0,
            last_page_number: 1,
        };
        let pages_vector = PagesVector::new(io_handle);
        let cache = Rc::new(RefCell::new(Cache::new(8)));

        let catalog = Catalog::read(&mut reader, io_handle, pages_vector, cache, 64).unwrap();
        let table = catalog.table("Users").expect("table should be assembled");
        assert_eq!(table.root_page_number, 20);
        assert_eq!(table.columns.len(), 1);
        assert_eq!(table.columns[0].name, "Id");
        assert_eq!(table.columns[0].column_type, ColumnType::Long);
    }
}
