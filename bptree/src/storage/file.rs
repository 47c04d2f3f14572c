//! Paged file I/O operations.
//!
//! This module handles reading and writing pages, recycling freed pages and
//! storing values that span several pages.
//!
//! # Layout
//!
//! - Bytes `0..4096`: file header
//! - Page `n`: bytes `4096 + n * page_size ..`, header area then payload
//!
//! # Free pages
//!
//! Freed pages form a chain through their `next_page` field, from
//! `first_free_page` to `last_free_page`. `free_page()` pops from the head of
//! that chain before it grows the file.

use crate::storage::cache::{Cacheable, NodeCache};
use crate::storage::header::{FILE_HEADER_REGION, FileHeader};
use crate::storage::io::{Storage, StorageError};
use crate::storage::page::{
    DEFAULT_PAGE_HEADER_SIZE, NO_PAGE, Page, PageHeader, PageId, PageStatus,
};

impl Cacheable for Page {
    // Pages are written through, so a cached copy is never dirty.
    fn is_dirty(&self) -> bool {
        false
    }

    fn write_order(&self) -> u64 {
        self.id
    }
}

/// A page file with low-level page I/O operations.
pub struct PageStore {
    storage: Box<dyn Storage>,
    header: FileHeader,
    pages: NodeCache<Page>,
}

impl PageStore {
    /// Create a new page store on empty storage and write its header.
    #[allow(clippy::cast_possible_truncation)]
    pub fn create(
        storage: Box<dyn Storage>,
        page_size: usize,
        page_cache_size: usize,
    ) -> Result<Self, StorageError> {
        if !storage.is_empty()? {
            return Err(StorageError::InvalidArgument(
                "cannot create a page store over non-empty storage".to_string(),
            ));
        }
        let header = FileHeader::new(page_size as u32, DEFAULT_PAGE_HEADER_SIZE as u8);
        let mut store = Self {
            storage,
            header,
            pages: Self::page_cache(page_cache_size)?,
        };
        store.write_header()?;
        tracing::debug!(page_size, "created page store");
        Ok(store)
    }

    /// Open an existing page store.
    ///
    /// `value_store` selects whether the header carries the value-store
    /// extension.
    pub fn open(
        mut storage: Box<dyn Storage>,
        value_store: bool,
        page_cache_size: usize,
    ) -> Result<Self, StorageError> {
        if storage.is_empty()? {
            return Err(StorageError::Corruption(
                "storage is empty, no file header".to_string(),
            ));
        }
        let mut buf = vec![0u8; FILE_HEADER_REGION];
        storage.read_at(0, &mut buf)?;
        let header = FileHeader::from_bytes(&buf, value_store)?;
        tracing::debug!(
            page_size = header.page_size,
            total_pages = header.total_page_count,
            "opened page store"
        );
        Ok(Self {
            storage,
            header,
            pages: Self::page_cache(page_cache_size)?,
        })
    }

    fn page_cache(capacity: usize) -> Result<NodeCache<Page>, StorageError> {
        NodeCache::new(capacity.max(1), 1)
            .map_err(|e| StorageError::InvalidArgument(e.to_string()))
    }

    /// Get a reference to the file header.
    #[must_use]
    pub const fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Get a mutable reference to the file header.
    ///
    /// Changes reach disk on the next `flush`.
    pub const fn header_mut(&mut self) -> &mut FileHeader {
        &mut self.header
    }

    /// Page size in bytes.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.header.page_size as usize
    }

    /// Payload bytes available on each page.
    #[must_use]
    pub const fn work_size(&self) -> usize {
        self.header.work_size()
    }

    const fn page_offset(&self, page_id: PageId) -> u64 {
        FILE_HEADER_REGION as u64 + page_id * self.header.page_size as u64
    }

    const fn check_bounds(&self, page_id: PageId) -> Result<(), StorageError> {
        if page_id >= self.header.total_page_count {
            return Err(StorageError::PageOutOfBounds {
                page_id,
                total_pages: self.header.total_page_count,
            });
        }
        Ok(())
    }

    /// Read a page, from the page cache if present.
    pub fn read_page(&mut self, page_id: PageId) -> Result<Page, StorageError> {
        self.check_bounds(page_id)?;
        if let Some(page) = self.pages.get_cloned(page_id) {
            return Ok(page);
        }

        let mut buf = vec![0u8; self.page_size()];
        let read = self.storage.read_at(self.page_offset(page_id), &mut buf)?;
        let page = if read == 0 {
            // Allocated but never written.
            Page::new(page_id, self.work_size())
        } else {
            let header = PageHeader::from_bytes(&buf[..PageHeader::SIZE])?;
            let data = buf.split_off(self.header.page_header_size as usize);
            Page::from_parts(page_id, header, data)
        };
        self.pages.put(page_id, page.clone());
        Ok(page)
    }

    /// Write a page to the file.
    pub fn write_page(&mut self, page: &Page) -> Result<(), StorageError> {
        self.check_bounds(page.id)?;
        let header_size = self.header.page_header_size as usize;
        let mut buf = vec![0u8; self.page_size()];
        buf[..PageHeader::SIZE].copy_from_slice(&page.header.to_bytes());
        let data = page.data();
        let len = data.len().min(buf.len() - header_size);
        buf[header_size..header_size + len].copy_from_slice(&data[..len]);

        self.storage.write_at(self.page_offset(page.id), &buf)?;
        self.pages.put(page.id, page.clone());
        Ok(())
    }

    /// Get a page to write new content into.
    ///
    /// Reuses the head of the free-page chain when there is one, otherwise
    /// grows the file by one page. The returned page has an unused header
    /// and no successor.
    pub fn free_page(&mut self) -> Result<Page, StorageError> {
        let first = self.header.first_free_page;
        if first == NO_PAGE {
            let page_id = self.header.total_page_count;
            self.header.total_page_count += 1;
            return Ok(Page::new(page_id, self.work_size()));
        }

        let recycled = self.read_page(first)?;
        self.header.first_free_page = recycled.header.next_page;
        if self.header.first_free_page == NO_PAGE {
            self.header.last_free_page = NO_PAGE;
        }
        tracing::debug!(page_id = first, "reusing free page");
        Ok(Page::new(first, self.work_size()))
    }

    /// Append the chain starting at `start` to the free-page list.
    pub fn unlink_pages(&mut self, start: PageId) -> Result<(), StorageError> {
        let mut last = start;
        let mut steps = 0u64;
        loop {
            let page = self.read_page(last)?;
            if page.header.next_page == NO_PAGE {
                break;
            }
            steps += 1;
            if steps > self.header.total_page_count {
                return Err(StorageError::Corruption(format!(
                    "page chain from {start} does not terminate"
                )));
            }
            last = page.header.next_page;
        }

        if self.header.last_free_page != NO_PAGE {
            let mut tail = self.read_page(self.header.last_free_page)?;
            tail.header.next_page = start;
            self.write_page(&tail)?;
        }
        if self.header.first_free_page == NO_PAGE {
            self.header.first_free_page = start;
        }
        self.header.last_free_page = last;
        tracing::debug!(start, last, "unlinked page chain");
        Ok(())
    }

    /// Store `value` starting at `page_id`, chaining overflow pages as needed.
    ///
    /// `header` is the header of the first page. Its record length, data
    /// length and successor are updated to match what was written. Overflow
    /// pages left over from a longer previous value are freed.
    pub fn write_value(
        &mut self,
        page_id: PageId,
        header: &mut PageHeader,
        value: &[u8],
    ) -> Result<(), StorageError> {
        let work = self.work_size();
        header.record_len = u32::try_from(value.len()).map_err(|_| {
            StorageError::InvalidArgument(format!("value of {} bytes too large", value.len()))
        })?;

        let mut chunks = value.chunks(work);
        let mut current = Page::new(page_id, work);
        current.header = *header;
        current.fill(chunks.next().unwrap_or(&[]));

        for chunk in chunks {
            let mut next = if current.header.next_page == NO_PAGE {
                let page = self.free_page()?;
                current.header.next_page = page.id;
                page
            } else {
                self.read_page(current.header.next_page)?
            };
            next.header.status = PageStatus::Overflow;
            next.header.record_len = 0;
            next.fill(chunk);

            self.write_page(&current)?;
            if current.id == page_id {
                *header = current.header;
            }
            current = next;
        }

        if current.header.next_page != NO_PAGE {
            let excess = current.header.next_page;
            current.header.next_page = NO_PAGE;
            self.unlink_pages(excess)?;
        }
        self.write_page(&current)?;
        if current.id == page_id {
            *header = current.header;
        }
        Ok(())
    }

    /// Read a value written with `write_value`, following the overflow chain.
    ///
    /// Returns the header of the first page and the full value bytes.
    pub fn read_value(&mut self, page_id: PageId) -> Result<(PageHeader, Vec<u8>), StorageError> {
        let first = self.read_page(page_id)?;
        let header = first.header;
        let mut value = Vec::with_capacity(header.record_len as usize);
        value.extend_from_slice(first.used_data());

        let mut next = header.next_page;
        let mut steps = 0u64;
        while next != NO_PAGE {
            steps += 1;
            if steps > self.header.total_page_count {
                return Err(StorageError::Corruption(format!(
                    "overflow chain from page {page_id} does not terminate"
                )));
            }
            let page = self.read_page(next)?;
            value.extend_from_slice(page.used_data());
            next = page.header.next_page;
        }

        if value.len() != header.record_len as usize {
            return Err(StorageError::Corruption(format!(
                "page {page_id}: record length {} but chain holds {} bytes",
                header.record_len,
                value.len()
            )));
        }
        Ok((header, value))
    }

    fn write_header(&mut self) -> Result<(), StorageError> {
        let bytes = self.header.to_bytes()?;
        self.storage.write_at(0, &bytes)
    }

    /// Write the file header and sync storage.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.write_header()?;
        self.storage.sync()
    }

    /// Flush and release the storage.
    pub fn close(mut self) -> Result<(), StorageError> {
        self.flush()?;
        tracing::debug!(total_pages = self.header.total_page_count, "closed page store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::io::MemoryStorage;

    const PAGE_SIZE: usize = 512;

    fn new_store() -> (MemoryStorage, PageStore) {
        let storage = MemoryStorage::new();
        let store =
            PageStore::create(Box::new(storage.clone()), PAGE_SIZE, 16).expect("create store");
        (storage, store)
    }

    #[test]
    fn test_free_page_grows_file() {
        let (_storage, mut store) = new_store();
        let a = store.free_page().expect("page");
        let b = store.free_page().expect("page");
        assert_eq!((a.id, b.id), (0, 1));
        assert_eq!(store.header().total_page_count, 2);
        assert_eq!(a.header.next_page, NO_PAGE);
        assert_eq!(a.header.status, PageStatus::Unused);
    }

    #[test]
    fn test_read_out_of_bounds() {
        let (_storage, mut store) = new_store();
        assert!(matches!(
            store.read_page(3),
            Err(StorageError::PageOutOfBounds { page_id: 3, .. })
        ));
    }

    #[test]
    fn test_write_and_read_page() {
        let (_storage, mut store) = new_store();
        let mut page = store.free_page().expect("page");
        page.header.status = PageStatus::Leaf;
        page.fill(b"payload");
        store.write_page(&page).expect("write");

        let read = store.read_page(page.id).expect("read");
        assert_eq!(read.header.status, PageStatus::Leaf);
        assert_eq!(read.used_data(), b"payload");
    }

    #[test]
    fn test_unlinked_pages_are_reused_first() {
        let (_storage, mut store) = new_store();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut page = store.free_page().expect("page");
            page.header.status = PageStatus::DataRecord;
            store.write_page(&page).expect("write");
            ids.push(page.id);
        }

        store.unlink_pages(ids[1]).expect("unlink");
        store.unlink_pages(ids[2]).expect("unlink");
        assert_eq!(store.header().first_free_page, ids[1]);
        assert_eq!(store.header().last_free_page, ids[2]);

        assert_eq!(store.free_page().expect("page").id, ids[1]);
        assert_eq!(store.free_page().expect("page").id, ids[2]);
        assert_eq!(store.header().first_free_page, NO_PAGE);
        assert_eq!(store.header().last_free_page, NO_PAGE);
        assert_eq!(store.free_page().expect("page").id, 3);
    }

    #[test]
    fn test_value_spanning_overflow_pages() {
        let (_storage, mut store) = new_store();
        let first = store.free_page().expect("page");
        let mut header = first.header;
        header.status = PageStatus::Leaf;

        let value: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        store
            .write_value(first.id, &mut header, &value)
            .expect("write value");
        assert_ne!(header.next_page, NO_PAGE);
        assert_eq!(header.record_len, 2000);

        let (read_header, read) = store.read_value(first.id).expect("read value");
        assert_eq!(read, value);
        assert_eq!(read_header, header);
        // 2000 bytes over 385-byte payloads.
        assert_eq!(store.header().total_page_count, 6);
    }

    #[test]
    fn test_shrinking_value_frees_overflow_pages() {
        let (_storage, mut store) = new_store();
        let first = store.free_page().expect("page");
        let mut header = first.header;
        header.status = PageStatus::Leaf;

        store
            .write_value(first.id, &mut header, &vec![7u8; 1500])
            .expect("write long");
        let pages_after_long = store.header().total_page_count;

        store
            .write_value(first.id, &mut header, b"short")
            .expect("write short");
        assert_eq!(header.next_page, NO_PAGE);
        assert_ne!(store.header().first_free_page, NO_PAGE);

        let (_, read) = store.read_value(first.id).expect("read");
        assert_eq!(read, b"short");

        // Growing again reuses the freed overflow pages.
        store
            .write_value(first.id, &mut header, &vec![9u8; 1500])
            .expect("write long again");
        assert_eq!(store.header().total_page_count, pages_after_long);
        let (_, read) = store.read_value(first.id).expect("read");
        assert_eq!(read, vec![9u8; 1500]);
    }

    #[test]
    fn test_header_persists_across_reopen() {
        let (storage, mut store) = new_store();
        let mut page = store.free_page().expect("page");
        page.fill(b"x");
        store.write_page(&page).expect("write");
        store.close().expect("close");

        let mut reopened =
            PageStore::open(Box::new(storage), false, 16).expect("reopen store");
        assert_eq!(reopened.header().total_page_count, 1);
        assert_eq!(reopened.page_size(), PAGE_SIZE);
        assert_eq!(reopened.read_page(0).expect("read").used_data(), b"x");
    }

    #[test]
    fn test_create_over_existing_data_fails() {
        let (storage, store) = new_store();
        store.close().expect("close");
        assert!(PageStore::create(Box::new(storage), PAGE_SIZE, 16).is_err());
    }

    #[test]
    fn test_write_failure_is_reported() {
        let (storage, mut store) = new_store();
        let page = store.free_page().expect("page");
        storage.fail_next_writes(1);
        assert!(matches!(
            store.write_page(&page),
            Err(StorageError::InjectedFault(_))
        ));
    }
}
