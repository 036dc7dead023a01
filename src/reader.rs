//! The synchronous random-access reader the page-tree core consumes.
//!
//! Kept deliberately narrow: the core never needs more than "give me `n`
//! bytes starting at offset `o`" and "how long is the file". A real caller
//! hands in a [`FileReader`]; tests hand in an in-memory buffer.

use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::rc::Rc;

use crate::error::Result;

pub trait Reader {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;
    fn len(&mut self) -> Result<u64>;
}

/// A `Reader` backed by a single shared file handle, analogous to the
/// teacher's `Rc<RefCell<File>>` single-owner pattern in `TableBtree`: one
/// handle per `Database`, seeked and read from one recursion frame at a
/// time (never concurrently, since the page-tree walk is single-threaded).
#[derive(Debug, Clone)]
pub struct FileReader {
    file: Rc<RefCell<File>>,
}

impl FileReader {
    pub fn open(path: &str) -> Result<Self> {
        let file = File::open(path)?;
        Ok(FileReader {
            file: Rc::new(RefCell::new(file)),
        })
    }

    pub fn from_file(file: File) -> Self {
        FileReader {
            file: Rc::new(RefCell::new(file)),
        }
    }
}

impl Reader for FileReader {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn len(&mut self) -> Result<u64> {
        let file = self.file.borrow();
        Ok(file.metadata()?.len())
    }
}

/// An in-memory reader used by unit tests to fabricate page trees byte for
/// byte without touching disk.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct SliceReader {
    pub bytes: Vec<u8>,
}

#[cfg(test)]
impl Reader for SliceReader {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.bytes.len() {
            return Err(crate::error::Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past end of fabricated buffer",
            )));
        }
        buf.copy_from_slice(&self.bytes[start..end]);
        Ok(())
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.bytes.len() as u64)
    }
}
