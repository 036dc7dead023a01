//! Decodes one tag's payload into a `(common_key_size, local_key, value)`
//! triple, honoring the tag's flags.
//!
//! Layout, in order:
//! - if `HAS_COMMON_KEY_SIZE` is set: a little-endian `u16` `common_key_size`
//!   (otherwise `common_key_size = 0`)
//! - a little-endian `u16` `local_key_size`
//! - `local_key_size` bytes of `local_key`
//! - the remaining bytes, `value`

use crate::byte_reader::{read_u32_le_at, ByteCursor};
use crate::error::{Error, Result};
use crate::page::PageTagFlags;

#[derive(Debug, Clone)]
pub struct PageTreeValue<'a> {
    pub common_key_size: u16,
    pub local_key: &'a [u8],
    pub value: &'a [u8],
}

impl<'a> PageTreeValue<'a> {
    pub fn parse(bytes: &'a [u8], tag_flags: PageTagFlags, page_size: u32) -> Result<Self> {
        let mut cursor = ByteCursor::new(bytes);

        let common_key_size = if tag_flags.contains(PageTagFlags::HAS_COMMON_KEY_SIZE) {
            cursor.read_u16_le().map_err(|_| Error::TruncatedValue {
                needed: 2,
                available: bytes.len(),
            })?
        } else {
            0
        };

        let local_key_size = cursor.read_u16_le().map_err(|_| Error::TruncatedValue {
            needed: cursor.position() + 2,
            available: bytes.len(),
        })?;

        if (common_key_size as u32 + local_key_size as u32) > page_size {
            return Err(Error::KeyTooLong { page_number: 0 });
        }

        let local_key = cursor
            .read_bytes(local_key_size as usize)
            .map_err(|_| Error::TruncatedValue {
                needed: cursor.position() + local_key_size as usize,
                available: bytes.len(),
            })?;

        let value = &bytes[cursor.position()..];

        Ok(PageTreeValue {
            common_key_size,
            local_key,
            value,
        })
    }

    /// Reads the branch child page number out of `value`; requires at
    /// least 4 bytes, per the `InvalidBranch` contract.
    pub fn child_page_number(&self) -> Result<u32> {
        if self.value.len() < 4 {
            return Err(Error::InvalidBranch {
                page_number: 0,
                tag_index: 0,
            });
        }
        read_u32_le_at(self.value, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_with_local_key(local_key: &[u8], value: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(local_key.len() as u16).to_le_bytes());
        buf.extend_from_slice(local_key);
        buf.extend_from_slice(value);
        buf
    }

    #[test]
    fn parses_without_common_key() {
        let bytes = bytes_with_local_key(&[1, 2, 3], &[9, 9]);
        let ptv = PageTreeValue::parse(&bytes, PageTagFlags(0), 4096).unwrap();
        assert_eq!(ptv.common_key_size, 0);
        assert_eq!(ptv.local_key, &[1, 2, 3]);
        assert_eq!(ptv.value, &[9, 9]);
    }

    #[test]
    fn parses_with_common_key_size() {
        let mut bytes = vec![5u8, 0]; // common_key_size = 5 (LE)
        bytes.extend(bytes_with_local_key(&[1], &[0xAB]));
        let ptv = PageTreeValue::parse(&bytes, PageTagFlags(PageTagFlags::HAS_COMMON_KEY_SIZE), 4096)
            .unwrap();
        assert_eq!(ptv.common_key_size, 5);
        assert_eq!(ptv.local_key, &[1]);
        assert_eq!(ptv.value, &[0xAB]);
    }

    #[test]
    fn rejects_key_too_long() {
        let mut bytes = vec![0xFFu8, 0xFF]; // huge common_key_size
        bytes.extend(bytes_with_local_key(&[1], &[0xAB]));
        let err = PageTreeValue::parse(&bytes, PageTagFlags(PageTagFlags::HAS_COMMON_KEY_SIZE), 4096);
        assert!(matches!(err, Err(Error::KeyTooLong { .. })));
    }

    #[test]
    fn branch_requires_four_byte_value() {
        let bytes = bytes_with_local_key(&[], &[1, 2, 3]);
        let ptv = PageTreeValue::parse(&bytes, PageTagFlags(0), 4096).unwrap();
        assert!(matches!(
            ptv.child_page_number(),
            Err(Error::InvalidBranch { .. })
        ));
    }

    #[test]
    fn branch_decodes_child_page_number() {
        let bytes = bytes_with_local_key(&[], &[0x02, 0x00, 0x00, 0x00]);
        let ptv = PageTreeValue::parse(&bytes, PageTagFlags(0), 4096).unwrap();
        assert_eq!(ptv.child_page_number().unwrap(), 2);
    }
}
