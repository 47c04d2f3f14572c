//! B+Tree index with a value store.
//!
//! Values are byte tuples kept on data pages in the same file as the tree.
//! The tree maps each key to a value pointer (see `pointer`). A multi-value
//! index maps each key to a pointer list tuple instead, which in turn points
//! at every value stored under the key.
//!
//! Data pages go through their own `NodeCache`, checked out and handed back
//! the same way the tree handles its nodes. Pages with spare room are found
//! through the `FreeList`, which is persisted in the file header on flush.
//!
//! Values are not deduplicated: every insert stores its own tuple, so equal
//! values under different keys take space once per insert.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::config::StoreConfig;
use crate::index::data_page::{DataPage, MAX_TUPLE_LEN, SLOT_OVERHEAD};
use crate::index::free_list::FreeList;
use crate::index::{IndexError, pointer};
use crate::query::IndexQuery;
use crate::storage::{
    Cacheable, FileStorage, NodeCache, PageId, PageStore, Storage, StorageError, TreeCore,
    ValueStoreHeader,
};
use crate::types::Value;

/// Unsynchronized value index.
pub struct IndexCore {
    tree: TreeCore,
    pages: NodeCache<DataPage>,
    free_list: FreeList,
    multi_value: bool,
}

impl IndexCore {
    fn create(
        mut store: PageStore,
        config: &StoreConfig,
        duplicates: bool,
        multi_value: bool,
    ) -> Result<Self, IndexError> {
        let pages = NodeCache::new(config.data_cache_size, config.data_cache_purge_unit)?;
        store.header_mut().value_store = Some(ValueStoreHeader {
            multi_value,
            free_spaces: Vec::new(),
        });
        let tree = TreeCore::create(store, config, duplicates && !multi_value)?;
        tracing::info!(multi_value, "created value index");
        Ok(Self {
            tree,
            pages,
            free_list: FreeList::default(),
            multi_value,
        })
    }

    fn open(store: PageStore, config: &StoreConfig) -> Result<Self, IndexError> {
        let pages = NodeCache::new(config.data_cache_size, config.data_cache_purge_unit)?;
        let Some(value_store) = &store.header().value_store else {
            return Err(IndexError::Corrupt(
                "file header has no value-store section".to_string(),
            ));
        };
        let multi_value = value_store.multi_value;
        let free_list = FreeList::from_records(&value_store.free_spaces);
        let tree = TreeCore::open(store, config)?;
        tracing::info!(multi_value, free_pages = free_list.len(), "opened value index");
        Ok(Self {
            tree,
            pages,
            free_list,
            multi_value,
        })
    }

    // ----- data pages -----

    fn fetch_page(&mut self, page_id: PageId) -> Result<DataPage, IndexError> {
        if let Some(page) = self.pages.take(page_id) {
            return Ok(page);
        }
        let (header, bytes) = self.tree.store_mut().read_value(page_id)?;
        DataPage::decode(page_id, header, &bytes)
    }

    fn release_page(&mut self, page: DataPage) -> Result<(), IndexError> {
        let victims = self.pages.put(page.page_id(), page);
        for mut victim in victims {
            if victim.is_dirty() {
                victim.write(self.tree.store_mut())?;
            }
        }
        Ok(())
    }

    fn new_page(&mut self) -> Result<DataPage, IndexError> {
        let page_id = self.tree.store_mut().free_page()?.id;
        tracing::debug!(page_id, "new data page");
        Ok(DataPage::new(page_id))
    }

    fn work_size(&self) -> usize {
        self.tree.store().work_size()
    }

    // ----- tuples -----

    /// Store a tuple on the best-fitting data page and return its pointer.
    fn store_tuple(&mut self, tuple: Vec<u8>) -> Result<u64, IndexError> {
        if tuple.len() > MAX_TUPLE_LEN {
            return Err(IndexError::Storage(StorageError::InvalidArgument(format!(
                "value of {} bytes too large",
                tuple.len()
            ))));
        }
        let required = u32::try_from(tuple.len() + SLOT_OVERHEAD).unwrap_or(u32::MAX);
        let work_size = self.work_size();

        let mut tuple = tuple;
        loop {
            let mut page = match self.free_list.retrieve(required) {
                Some(page_id) => self.fetch_page(page_id)?,
                None => self.new_page()?,
            };
            let page_id = page.page_id();
            match page.add(tuple) {
                Ok(slot) => {
                    let ptr = pointer::pack(page_id, slot);
                    if ptr.is_err() {
                        page.remove(slot);
                    }
                    self.free_list.update(page_id, page.free_space(work_size));
                    self.release_page(page)?;
                    return ptr;
                }
                Err(rejected) => {
                    // Every slot taken: stop offering the page.
                    self.free_list.remove(page_id);
                    self.release_page(page)?;
                    tuple = rejected;
                }
            }
        }
    }

    fn read_tuple(&mut self, ptr: u64) -> Result<Vec<u8>, IndexError> {
        let (page_id, slot) = pointer::unpack(ptr);
        let page = self.fetch_page(page_id)?;
        let tuple = page.get(slot).map(<[u8]>::to_vec);
        self.release_page(page)?;
        tuple.ok_or_else(|| dangling(ptr))
    }

    fn update_tuple(&mut self, ptr: u64, tuple: Vec<u8>) -> Result<(), IndexError> {
        let (page_id, slot) = pointer::unpack(ptr);
        let mut page = self.fetch_page(page_id)?;
        let replaced = page.set(slot, tuple);
        self.free_list.update(page_id, page.free_space(self.work_size()));
        self.release_page(page)?;
        replaced.map(|_| ()).ok_or_else(|| dangling(ptr))
    }

    /// Remove a tuple. A data page left without tuples goes back to the
    /// free-page chain.
    fn remove_tuple(&mut self, ptr: u64) -> Result<Vec<u8>, IndexError> {
        let (page_id, slot) = pointer::unpack(ptr);
        let mut page = self.fetch_page(page_id)?;
        let Some(tuple) = page.remove(slot) else {
            self.release_page(page)?;
            return Err(dangling(ptr));
        };

        if page.is_empty() {
            self.free_list.remove(page_id);
            // Rewrite first so no stale overflow link survives the unlink.
            page.write(self.tree.store_mut())?;
            self.tree.store_mut().unlink_pages(page_id)?;
            tracing::debug!(page_id, "unlinked empty data page");
        } else {
            self.free_list.update(page_id, page.free_space(self.work_size()));
            self.release_page(page)?;
        }
        Ok(tuple)
    }

    /// Values behind one tree entry, expanding pointer lists.
    fn values_at(&mut self, ptr: u64) -> Result<Vec<Vec<u8>>, IndexError> {
        if !self.multi_value {
            return Ok(vec![self.read_tuple(ptr)?]);
        }
        let list = pointer::decode_list(&self.read_tuple(ptr)?)?;
        list.into_iter().map(|p| self.read_tuple(p)).collect()
    }

    fn entries(&mut self, query: &IndexQuery) -> Result<Vec<(Value, u64)>, IndexError> {
        let mut entries = Vec::new();
        self.tree.search(query, |key, ptr| {
            entries.push((key.clone(), ptr));
            true
        })?;
        Ok(entries)
    }

    // ----- operations -----

    /// Store `value` under `key` and return the pointer of the stored value.
    ///
    /// On a unique index an existing value is overwritten in place. With
    /// duplicates a new entry is always added. A multi-value index appends
    /// to the key's value list.
    pub fn add_value(&mut self, key: Value, value: &[u8]) -> Result<u64, IndexError> {
        if self.multi_value {
            return self.append_to_list(key, value);
        }
        if !self.tree.duplicates_allowed()
            && let Some(ptr) = self.tree.find_value(&key)?
        {
            self.update_tuple(ptr, value.to_vec())?;
            return Ok(ptr);
        }
        let ptr = self.store_tuple(value.to_vec())?;
        self.tree.add_value(key, ptr)?;
        Ok(ptr)
    }

    /// Overwrite the first value of `key`, or add it when absent.
    ///
    /// On a multi-value index every value of the key is replaced by `value`.
    pub fn put_value(&mut self, key: Value, value: &[u8]) -> Result<u64, IndexError> {
        let Some(ptr) = self.tree.find_value(&key)? else {
            return self.add_value(key, value);
        };
        if !self.multi_value {
            self.update_tuple(ptr, value.to_vec())?;
            return Ok(ptr);
        }

        for old in pointer::decode_list(&self.read_tuple(ptr)?)? {
            self.remove_tuple(old)?;
        }
        let value_ptr = self.store_tuple(value.to_vec())?;
        self.update_tuple(ptr, pointer::encode_list(&[value_ptr]))?;
        Ok(value_ptr)
    }

    fn append_to_list(&mut self, key: Value, value: &[u8]) -> Result<u64, IndexError> {
        let value_ptr = self.store_tuple(value.to_vec())?;
        match self.tree.find_value(&key)? {
            Some(list_ptr) => {
                let mut list = pointer::decode_list(&self.read_tuple(list_ptr)?)?;
                list.push(value_ptr);
                self.update_tuple(list_ptr, pointer::encode_list(&list))?;
            }
            None => {
                let list_ptr = self.store_tuple(pointer::encode_list(&[value_ptr]))?;
                self.tree.add_value(key, list_ptr)?;
            }
        }
        Ok(value_ptr)
    }

    /// First value stored under `key`.
    pub fn get_value(&mut self, key: &Value) -> Result<Option<Vec<u8>>, IndexError> {
        let Some(ptr) = self.tree.find_value(key)? else {
            return Ok(None);
        };
        Ok(self.values_at(ptr)?.into_iter().next())
    }

    /// Every value stored under `key`, in insertion order.
    pub fn get_values(&mut self, key: &Value) -> Result<Vec<Vec<u8>>, IndexError> {
        let mut values = Vec::new();
        for (_, ptr) in self.entries(&IndexQuery::eq(key.clone()))? {
            values.extend(self.values_at(ptr)?);
        }
        Ok(values)
    }

    /// Remove `key` with all its values and return them.
    pub fn remove(&mut self, key: &Value) -> Result<Vec<Vec<u8>>, IndexError> {
        let mut removed = Vec::new();
        while let Some(ptr) = self.tree.remove_value(key)? {
            if self.multi_value {
                for value_ptr in pointer::decode_list(&self.remove_tuple(ptr)?)? {
                    removed.push(self.remove_tuple(value_ptr)?);
                }
            } else {
                removed.push(self.remove_tuple(ptr)?);
            }
        }
        Ok(removed)
    }

    /// Scan `(key, value pointer)` pairs selected by `query`.
    ///
    /// On a multi-value index each key is reported once per value.
    pub fn search<F>(&mut self, query: &IndexQuery, mut callback: F) -> Result<(), IndexError>
    where
        F: FnMut(&Value, u64) -> bool,
    {
        if !self.multi_value {
            self.tree.search(query, callback)?;
            return Ok(());
        }
        for (key, ptr) in self.entries(query)? {
            for value_ptr in pointer::decode_list(&self.read_tuple(ptr)?)? {
                if !callback(&key, value_ptr) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Scan `(key, value)` pairs selected by `query`.
    ///
    /// Entries are collected by one tree scan and their values read after
    /// it, so the callback never runs while a tree node is checked out.
    pub fn search_values<F>(&mut self, query: &IndexQuery, mut callback: F) -> Result<(), IndexError>
    where
        F: FnMut(&Value, &[u8]) -> bool,
    {
        for (key, ptr) in self.entries(query)? {
            for value in self.values_at(ptr)? {
                if !callback(&key, &value) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    // ----- maintenance -----

    fn write_back_pages(&mut self, purge: bool, clear: bool) -> Result<(), IndexError> {
        if clear {
            for mut page in self.pages.purge_all() {
                if page.is_dirty() {
                    page.write(self.tree.store_mut())?;
                }
            }
        } else if purge {
            for (_, mut page) in self.pages.take_dirty() {
                page.write(self.tree.store_mut())?;
                self.release_page(page)?;
            }
        }
        Ok(())
    }

    /// Write back data pages, record the free list, then flush the tree.
    pub fn flush(&mut self, purge: bool, clear: bool) -> Result<(), IndexError> {
        self.write_back_pages(purge, clear)?;
        let free_spaces = self.free_list.to_records();
        self.tree.store_mut().header_mut().value_store = Some(ValueStoreHeader {
            multi_value: self.multi_value,
            free_spaces,
        });
        self.tree.flush(purge, clear)?;
        Ok(())
    }

    /// Widen both purge units while loading many values.
    pub fn set_bulk_loading(
        &mut self,
        enabled: bool,
        node_percentage: f32,
        data_percentage: f32,
    ) -> Result<(), IndexError> {
        self.tree.set_bulk_loading(enabled, node_percentage)?;
        self.pages.set_bulk_loading(enabled, data_percentage)?;
        Ok(())
    }

    pub fn close(mut self) -> Result<(), IndexError> {
        self.flush(true, true)?;
        self.tree.close()?;
        Ok(())
    }
}

fn dangling(ptr: u64) -> IndexError {
    let (page_id, slot) = pointer::unpack(ptr);
    IndexError::Corrupt(format!("no value at page {page_id} slot {slot}"))
}

/// A B+Tree index storing byte values, in one file.
///
/// All operations serialize on an internal lock.
pub struct BTreeIndex {
    core: Mutex<IndexCore>,
    path: Option<PathBuf>,
}

impl BTreeIndex {
    /// Create a new index file. Fails if `path` exists.
    pub fn create(path: &Path, config: &StoreConfig, duplicates: bool) -> Result<Self, IndexError> {
        config.validate()?;
        let storage = FileStorage::create(path)?;
        let mut index = Self::create_on(Box::new(storage), config, duplicates)?;
        index.path = Some(path.to_path_buf());
        Ok(index)
    }

    /// Create a new multi-value index file. Fails if `path` exists.
    pub fn create_multi_value(path: &Path, config: &StoreConfig) -> Result<Self, IndexError> {
        config.validate()?;
        let storage = FileStorage::create(path)?;
        let mut index = Self::create_multi_value_on(Box::new(storage), config)?;
        index.path = Some(path.to_path_buf());
        Ok(index)
    }

    /// Open an existing index file.
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self, IndexError> {
        config.validate()?;
        let storage = FileStorage::open(path)?;
        let mut index = Self::open_on(Box::new(storage), config)?;
        index.path = Some(path.to_path_buf());
        Ok(index)
    }

    /// Open `path` if it exists, otherwise create it.
    pub fn open_or_create(
        path: &Path,
        config: &StoreConfig,
        duplicates: bool,
    ) -> Result<Self, IndexError> {
        if path.exists() {
            Self::open(path, config)
        } else {
            Self::create(path, config, duplicates)
        }
    }

    /// Create an index on empty storage.
    pub fn create_on(
        storage: Box<dyn Storage>,
        config: &StoreConfig,
        duplicates: bool,
    ) -> Result<Self, IndexError> {
        Self::init(storage, config, duplicates, false)
    }

    /// Create a multi-value index on empty storage.
    pub fn create_multi_value_on(
        storage: Box<dyn Storage>,
        config: &StoreConfig,
    ) -> Result<Self, IndexError> {
        Self::init(storage, config, false, true)
    }

    fn init(
        storage: Box<dyn Storage>,
        config: &StoreConfig,
        duplicates: bool,
        multi_value: bool,
    ) -> Result<Self, IndexError> {
        config.validate()?;
        let store = PageStore::create(storage, config.page_size, config.page_cache_size)?;
        Ok(Self {
            core: Mutex::new(IndexCore::create(store, config, duplicates, multi_value)?),
            path: None,
        })
    }

    /// Open an index previously written to `storage`.
    pub fn open_on(storage: Box<dyn Storage>, config: &StoreConfig) -> Result<Self, IndexError> {
        config.validate()?;
        let store = PageStore::open(storage, true, config.page_cache_size)?;
        Ok(Self {
            core: Mutex::new(IndexCore::open(store, config)?),
            path: None,
        })
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn core(&self) -> MutexGuard<'_, IndexCore> {
        self.core.lock().expect("lock poisoned")
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn is_multi_value(&self) -> bool {
        self.core().multi_value
    }

    #[must_use]
    pub fn duplicates_allowed(&self) -> bool {
        self.core().tree.duplicates_allowed()
    }

    /// Store `value` under `key`. See [`IndexCore::add_value`].
    pub fn add_value(&self, key: Value, value: &[u8]) -> Result<u64, IndexError> {
        self.core().add_value(key, value)
    }

    /// Overwrite the value of `key`, or add it when absent.
    pub fn put_value(&self, key: Value, value: &[u8]) -> Result<u64, IndexError> {
        self.core().put_value(key, value)
    }

    pub fn get_value(&self, key: &Value) -> Result<Option<Vec<u8>>, IndexError> {
        self.core().get_value(key)
    }

    pub fn get_values(&self, key: &Value) -> Result<Vec<Vec<u8>>, IndexError> {
        self.core().get_values(key)
    }

    /// Remove `key` with all its values and return them.
    pub fn remove(&self, key: &Value) -> Result<Vec<Vec<u8>>, IndexError> {
        self.core().remove(key)
    }

    /// Scan `(key, value pointer)` pairs. The callback runs under the index
    /// lock and must not call back into this index.
    pub fn search<F>(&self, query: &IndexQuery, callback: F) -> Result<(), IndexError>
    where
        F: FnMut(&Value, u64) -> bool,
    {
        self.core().search(query, callback)
    }

    /// Scan `(key, value)` pairs. The callback runs under the index lock and
    /// must not call back into this index.
    pub fn search_values<F>(&self, query: &IndexQuery, callback: F) -> Result<(), IndexError>
    where
        F: FnMut(&Value, &[u8]) -> bool,
    {
        self.core().search_values(query, callback)
    }

    /// Write back cached pages and the file header.
    pub fn flush(&self, purge: bool, clear: bool) -> Result<(), IndexError> {
        self.core().flush(purge, clear)
    }

    pub fn set_bulk_loading(
        &self,
        enabled: bool,
        node_percentage: f32,
        data_percentage: f32,
    ) -> Result<(), IndexError> {
        self.core()
            .set_bulk_loading(enabled, node_percentage, data_percentage)
    }

    /// Flush and close the file.
    pub fn close(self) -> Result<(), IndexError> {
        #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
        let core = self.core.into_inner().expect("lock poisoned");
        core.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BTreeError, MemoryStorage};
    use crate::testing::small_config;

    fn new_index(duplicates: bool) -> (MemoryStorage, BTreeIndex) {
        let storage = MemoryStorage::new();
        let index = BTreeIndex::create_on(Box::new(storage.clone()), &small_config(), duplicates)
            .expect("create index");
        (storage, index)
    }

    fn key(i: usize) -> Value {
        Value::from(format!("key{i:04}"))
    }

    fn value(i: usize) -> Vec<u8> {
        format!("value-{i}").into_bytes()
    }

    fn total_pages(index: &BTreeIndex) -> u64 {
        index.core().tree.store().header().total_page_count
    }

    #[test]
    fn test_add_and_get() {
        let (_storage, index) = new_index(false);
        for i in 0..300 {
            index.add_value(key(i), &value(i)).expect("add");
        }
        for i in 0..300 {
            assert_eq!(index.get_value(&key(i)).expect("get"), Some(value(i)));
        }
        assert_eq!(index.get_value(&key(300)).expect("get"), None);
    }

    #[test]
    fn test_unique_add_updates_in_place() {
        let (_storage, index) = new_index(false);
        let first = index.add_value(key(1), b"old").expect("add");
        let second = index.add_value(key(1), b"a longer replacement").expect("add");
        assert_eq!(first, second);
        assert_eq!(
            index.get_values(&key(1)).expect("get"),
            vec![b"a longer replacement".to_vec()]
        );
    }

    #[test]
    fn test_duplicates_keep_every_value() {
        let (_storage, index) = new_index(true);
        index.add_value(key(1), b"one").expect("add");
        index.add_value(key(1), b"two").expect("add");
        index.add_value(key(2), b"other").expect("add");

        assert_eq!(index.get_value(&key(1)).expect("get"), Some(b"one".to_vec()));
        assert_eq!(
            index.get_values(&key(1)).expect("get"),
            vec![b"one".to_vec(), b"two".to_vec()]
        );
        assert_eq!(
            index.remove(&key(1)).expect("remove"),
            vec![b"one".to_vec(), b"two".to_vec()]
        );
        assert!(index.get_values(&key(1)).expect("get").is_empty());
        assert_eq!(index.get_value(&key(2)).expect("get"), Some(b"other".to_vec()));
    }

    #[test]
    fn test_put_value_overwrites() {
        let (_storage, index) = new_index(true);
        index.put_value(key(5), b"first").expect("put");
        index.put_value(key(5), b"second").expect("put");
        assert_eq!(index.get_values(&key(5)).expect("get"), vec![b"second".to_vec()]);
    }

    #[test]
    fn test_remove_absent_key() {
        let (_storage, index) = new_index(false);
        assert!(index.remove(&key(1)).expect("remove").is_empty());
    }

    #[test]
    fn test_multi_value_lists() {
        let storage = MemoryStorage::new();
        let index = BTreeIndex::create_multi_value_on(Box::new(storage.clone()), &small_config())
            .expect("create");
        assert!(index.is_multi_value());
        assert!(!index.duplicates_allowed());

        for i in 0..3 {
            index.add_value(key(1), &value(i)).expect("add");
        }
        index.add_value(key(2), b"single").expect("add");

        let expected: Vec<Vec<u8>> = (0..3).map(value).collect();
        assert_eq!(index.get_values(&key(1)).expect("get"), expected);
        assert_eq!(index.get_value(&key(1)).expect("get"), Some(value(0)));

        let mut seen = Vec::new();
        index
            .search_values(&IndexQuery::any(), |k, v| {
                seen.push((k.clone(), v.to_vec()));
                true
            })
            .expect("scan");
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[3], (key(2), b"single".to_vec()));

        let mut pointers = 0;
        index
            .search(&IndexQuery::eq(key(1)), |_, _| {
                pointers += 1;
                true
            })
            .expect("scan");
        assert_eq!(pointers, 3);

        index.put_value(key(1), b"replaced").expect("put");
        assert_eq!(index.get_values(&key(1)).expect("get"), vec![b"replaced".to_vec()]);

        assert_eq!(index.remove(&key(1)).expect("remove"), vec![b"replaced".to_vec()]);
        assert_eq!(index.get_value(&key(1)).expect("get"), None);

        index.close().expect("close");
        let reopened = BTreeIndex::open_on(Box::new(storage), &small_config()).expect("open");
        assert!(reopened.is_multi_value());
        assert_eq!(reopened.get_values(&key(2)).expect("get"), vec![b"single".to_vec()]);
    }

    #[test]
    fn test_empty_data_page_is_reused() {
        let (_storage, index) = new_index(false);
        let big = vec![1u8; 300];
        let first = index.add_value(key(1), &big).expect("add");
        index.add_value(key(2), &big).expect("add");
        let pages = total_pages(&index);

        assert_eq!(index.remove(&key(1)).expect("remove"), vec![big.clone()]);
        let reused = index.add_value(key(3), &big).expect("add");

        assert_eq!(pointer::unpack(reused).0, pointer::unpack(first).0);
        assert_eq!(total_pages(&index), pages);
        assert_eq!(index.get_value(&key(3)).expect("get"), Some(big));
    }

    #[test]
    fn test_small_values_share_pages() {
        let (_storage, index) = new_index(false);
        let a = index.add_value(key(1), b"a").expect("add");
        let b = index.add_value(key(2), b"b").expect("add");
        assert_eq!(pointer::unpack(a), (pointer::unpack(b).0, 0));
        assert_eq!(pointer::unpack(b).1, 1);
    }

    #[test]
    fn test_large_value_spans_pages() {
        let (_storage, index) = new_index(false);
        let big: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        index.add_value(key(1), &big).expect("add");
        index.add_value(key(2), b"small").expect("add");
        index.flush(true, true).expect("flush");

        assert_eq!(index.get_value(&key(1)).expect("get"), Some(big));
        assert_eq!(index.get_value(&key(2)).expect("get"), Some(b"small".to_vec()));
    }

    #[test]
    fn test_search_values_in_key_order_and_stop() {
        let (_storage, index) = new_index(false);
        for i in (0..100).rev() {
            index.add_value(key(i), &value(i)).expect("add");
        }

        let mut seen = Vec::new();
        index
            .search_values(&IndexQuery::ge(key(90)), |k, v| {
                seen.push((k.clone(), v.to_vec()));
                true
            })
            .expect("scan");
        let expected: Vec<(Value, Vec<u8>)> = (90..100).map(|i| (key(i), value(i))).collect();
        assert_eq!(seen, expected);

        let mut count = 0;
        index
            .search_values(&IndexQuery::any(), |_, _| {
                count += 1;
                count < 7
            })
            .expect("scan");
        assert_eq!(count, 7);
    }

    #[test]
    fn test_persistence_with_free_list() {
        let storage = MemoryStorage::new();
        let index = BTreeIndex::create_on(Box::new(storage.clone()), &small_config(), false)
            .expect("create");
        for i in 0..400 {
            index.add_value(key(i), &value(i)).expect("add");
        }
        for i in (0..400).step_by(3) {
            index.remove(&key(i)).expect("remove");
        }
        let free_list = index.core().free_list.to_records();
        index.close().expect("close");

        let index = BTreeIndex::open_on(Box::new(storage), &small_config()).expect("open");
        assert_eq!(index.core().free_list.to_records(), free_list);
        for i in 0..400 {
            let expected = (i % 3 != 0).then(|| value(i));
            assert_eq!(index.get_value(&key(i)).expect("get"), expected);
        }
    }

    #[test]
    fn test_open_empty_storage_fails() {
        assert!(matches!(
            BTreeIndex::open_on(Box::new(MemoryStorage::new()), &small_config()),
            Err(IndexError::Storage(StorageError::Corruption(_)))
        ));
    }

    #[test]
    fn test_bulk_loading_validates_percentages() {
        let (_storage, index) = new_index(false);
        index.set_bulk_loading(true, 0.5, 0.5).expect("enable");
        for i in 0..200 {
            index.add_value(key(i), &value(i)).expect("add");
        }
        index.set_bulk_loading(false, 0.5, 0.5).expect("disable");
        assert!(matches!(
            index.set_bulk_loading(true, 0.5, 0.0),
            Err(IndexError::Tree(BTreeError::InvalidArgument(_)))
        ));
        assert_eq!(index.get_value(&key(199)).expect("get"), Some(value(199)));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("values.db");
        let index = BTreeIndex::open_or_create(&path, &small_config(), false).expect("create");
        index.add_value(Value::from("apple"), b"red").expect("add");
        assert_eq!(index.path(), Some(path.as_path()));
        index.close().expect("close");

        let index = BTreeIndex::open_or_create(&path, &small_config(), false).expect("open");
        assert_eq!(
            index.get_value(&Value::from("apple")).expect("get"),
            Some(b"red".to_vec())
        );
        assert!(matches!(
            BTreeIndex::create(&path, &small_config(), false),
            Err(IndexError::Storage(StorageError::AlreadyExists(_)))
        ));
    }
}
