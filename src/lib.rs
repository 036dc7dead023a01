//! Read-only access to the Extensible Storage Engine (ESE / "JET Blue")
//! on-disk database format: the format behind `ntds.dit`, the Windows
//! Search index, and a handful of other first-party Windows databases.
//!
//! The entry point is [`Database::open`](database::Database::open); it
//! parses the file header, assembles the `MSysObjects` catalog into
//! [`Table`](catalog::Table) definitions, and from there [`Database::rows`]
//! walks a table's data tree and decodes each row.
//!
//! Internally, every table (and the catalog itself) is just a
//! [`PageTree`](page_tree::PageTree) — a B+-tree of fixed-size pages
//! linking branch pages down to leaves that each hold one record's bytes.
//! That recursive descent is this crate's core; everything else (catalog
//! assembly, record decoding, the CLI in `main.rs`) is built on top of it.

pub mod byte_reader;
pub mod cache;
pub mod catalog;
pub mod database;
pub mod error;
pub mod io_handle;
pub mod page;
pub mod page_tree;
pub mod page_tree_value;
pub mod reader;
pub mod record;
