//! File header structure and serialization.
//!
//! The file header occupies a fixed region at the start of the file, before
//! page 0. It is loaded at open and written back at create, flush and close.
//!
//! Field order (big-endian):
//!
//! | Field              | Type | Section      |
//! |--------------------|------|--------------|
//! | page size          | i32  | base         |
//! | total page count   | i64  | base         |
//! | first free page    | i64  | base         |
//! | last free page     | i64  | base         |
//! | page header size   | u8   | base         |
//! | duplicates allowed | bool | b-tree       |
//! | root page          | i64  | b-tree       |
//! | multi value        | bool | value store  |
//! | free list count    | i32  | value store  |
//! | (page i64, free i32) * count | | value store |

use crate::storage::io::StorageError;
use crate::storage::page::{NO_PAGE, PageHeader, PageId};

/// Bytes reserved for the file header; page 0 starts right after.
pub const FILE_HEADER_REGION: usize = 4096;

/// Smallest page size accepted by the store.
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest page size accepted by the store.
pub const MAX_PAGE_SIZE: usize = 1 << 20;

/// Encoded size of one free-space record: page (8) and free bytes (4).
const FREE_SPACE_RECORD_LEN: usize = 12;

/// One persisted free-space record of the value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSpaceRecord {
    pub page: PageId,
    pub free: u32,
}

/// Value-store extension of the file header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueStoreHeader {
    /// Whether one key maps to a list of values.
    pub multi_value: bool,
    /// Data pages with spare room, oldest first.
    pub free_spaces: Vec<FreeSpaceRecord>,
}

/// The file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Page size in bytes, header area included.
    pub page_size: u32,
    /// Pages handed out so far; the next new page gets this number.
    pub total_page_count: u64,
    /// Head of the free-page chain.
    pub first_free_page: PageId,
    /// Tail of the free-page chain.
    pub last_free_page: PageId,
    /// Bytes reserved at the start of each page for its header.
    pub page_header_size: u8,
    /// Whether the tree accepts equal keys.
    pub duplicates_allowed: bool,
    /// Page number of the root node.
    pub root_page: PageId,
    /// Present only on value-store files.
    pub value_store: Option<ValueStoreHeader>,
}

impl FileHeader {
    /// Create a header for an empty file.
    #[must_use]
    pub const fn new(page_size: u32, page_header_size: u8) -> Self {
        Self {
            page_size,
            total_page_count: 0,
            first_free_page: NO_PAGE,
            last_free_page: NO_PAGE,
            page_header_size,
            duplicates_allowed: false,
            root_page: 0,
            value_store: None,
        }
    }

    /// Payload bytes available on each page.
    #[must_use]
    pub const fn work_size(&self) -> usize {
        self.page_size as usize - self.page_header_size as usize
    }

    /// Serialize the header.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&self.page_size.to_be_bytes());
        buf.extend_from_slice(&self.total_page_count.to_be_bytes());
        buf.extend_from_slice(&self.first_free_page.to_be_bytes());
        buf.extend_from_slice(&self.last_free_page.to_be_bytes());
        buf.push(self.page_header_size);
        buf.push(u8::from(self.duplicates_allowed));
        buf.extend_from_slice(&self.root_page.to_be_bytes());

        if let Some(ext) = &self.value_store {
            buf.push(u8::from(ext.multi_value));
            buf.extend_from_slice(&(ext.free_spaces.len() as i32).to_be_bytes());
            for record in &ext.free_spaces {
                buf.extend_from_slice(&record.page.to_be_bytes());
                buf.extend_from_slice(&record.free.to_be_bytes());
            }
        }

        if buf.len() > FILE_HEADER_REGION {
            return Err(StorageError::InvalidArgument(format!(
                "file header of {} bytes exceeds {FILE_HEADER_REGION}",
                buf.len()
            )));
        }
        Ok(buf)
    }

    /// Deserialize a header. `value_store` selects whether the value-store
    /// extension follows the b-tree fields.
    pub fn from_bytes(bytes: &[u8], value_store: bool) -> Result<Self, StorageError> {
        let mut reader = crate::storage::page::ByteReader::new(bytes);
        let page_size = reader.read_u32()?;
        let total_page_count = reader.read_u64()?;
        let first_free_page = reader.read_u64()?;
        let last_free_page = reader.read_u64()?;
        let page_header_size = reader.read_u8()?;
        let duplicates_allowed = reader.read_bool()?;
        let root_page = reader.read_u64()?;

        let value_store = if value_store {
            let multi_value = reader.read_bool()?;
            let count = reader.read_i32()?;
            let count = usize::try_from(count).map_err(|_| {
                StorageError::Corruption(format!("negative free list length {count}"))
            })?;
            if count > reader.remaining() / FREE_SPACE_RECORD_LEN {
                return Err(StorageError::Corruption(format!(
                    "free list length {count} exceeds the header"
                )));
            }
            let mut free_spaces = Vec::with_capacity(count);
            for _ in 0..count {
                let page = reader.read_u64()?;
                let free = reader.read_u32()?;
                free_spaces.push(FreeSpaceRecord { page, free });
            }
            Some(ValueStoreHeader {
                multi_value,
                free_spaces,
            })
        } else {
            None
        };

        let header = Self {
            page_size,
            total_page_count,
            first_free_page,
            last_free_page,
            page_header_size,
            duplicates_allowed,
            root_page,
            value_store,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), StorageError> {
        let page_size = self.page_size as usize;
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(StorageError::Corruption(format!(
                "page size {page_size} out of range"
            )));
        }
        let header_size = self.page_header_size as usize;
        if header_size < PageHeader::SIZE || header_size >= page_size {
            return Err(StorageError::Corruption(format!(
                "page header size {header_size} invalid for page size {page_size}"
            )));
        }
        if self.root_page >= self.total_page_count && self.total_page_count > 0 {
            return Err(StorageError::Corruption(format!(
                "root page {} beyond {} pages",
                self.root_page, self.total_page_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::{DEFAULT_PAGE_HEADER_SIZE, DEFAULT_PAGE_SIZE};

    #[allow(clippy::cast_possible_truncation)]
    fn sample() -> FileHeader {
        let mut header = FileHeader::new(DEFAULT_PAGE_SIZE as u32, DEFAULT_PAGE_HEADER_SIZE as u8);
        header.total_page_count = 12;
        header.first_free_page = 4;
        header.last_free_page = 9;
        header.duplicates_allowed = true;
        header
    }

    #[test]
    fn test_btree_header_roundtrip() {
        let header = sample();
        let bytes = header.to_bytes().expect("encode");
        assert_eq!(bytes.len(), 4 + 8 + 8 + 8 + 1 + 1 + 8);

        let restored = FileHeader::from_bytes(&bytes, false).expect("decode");
        assert_eq!(restored, header);
        assert_eq!(restored.to_bytes().expect("encode again"), bytes);
    }

    #[test]
    fn test_value_store_header_roundtrip() {
        let mut header = sample();
        header.value_store = Some(ValueStoreHeader {
            multi_value: true,
            free_spaces: vec![
                FreeSpaceRecord { page: 3, free: 700 },
                FreeSpaceRecord { page: 8, free: 1500 },
            ],
        });
        let bytes = header.to_bytes().expect("encode");
        let restored = FileHeader::from_bytes(&bytes, true).expect("decode");
        assert_eq!(restored, header);
    }

    #[test]
    fn test_byte_layout_starts_with_page_size() {
        let header = sample();
        let bytes = header.to_bytes().expect("encode");
        assert_eq!(&bytes[0..4], &4096u32.to_be_bytes());
        assert_eq!(&bytes[4..12], &12u64.to_be_bytes());
        assert_eq!(bytes[28], 127);
        assert_eq!(bytes[29], 1);
    }

    #[test]
    fn test_rejects_bad_page_size() {
        let mut header = sample();
        header.page_size = 100;
        let bytes = header.to_bytes().expect("encode");
        assert!(matches!(
            FileHeader::from_bytes(&bytes, false),
            Err(StorageError::Corruption(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_free_list() {
        let mut header = sample();
        header.value_store = Some(ValueStoreHeader {
            multi_value: false,
            free_spaces: vec![FreeSpaceRecord { page: 3, free: 700 }],
        });
        let mut bytes = header.to_bytes().expect("encode");
        // Count follows the b-tree fields and the multi-value flag.
        bytes[39..43].copy_from_slice(&i32::MAX.to_be_bytes());
        assert!(matches!(
            FileHeader::from_bytes(&bytes, true),
            Err(StorageError::Corruption(_))
        ));
    }

    #[test]
    fn test_work_size() {
        assert_eq!(sample().work_size(), 4096 - 127);
    }
}
