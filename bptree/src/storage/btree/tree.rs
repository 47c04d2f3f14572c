//! Page-backed B+Tree.
//!
//! `TreeCore` holds the algorithms and is not synchronized; `BTree` wraps it
//! in a mutex for shared use. The value index builds on `TreeCore` directly.
//!
//! Nodes are checked out of the node cache while they are read or changed
//! and handed back afterwards, so a node is never evicted mid-update. Code
//! here must not fetch a page that is already checked out.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::config::{ConfigError, StoreConfig};
use crate::query::IndexQuery;
use crate::storage::btree::node::{BTreeNode, NodeError, NodeType, SplitOff};
use crate::storage::cache::{Cacheable, NodeCache};
use crate::storage::file::PageStore;
use crate::storage::io::{FileStorage, Storage, StorageError};
use crate::storage::page::{NO_PAGE, PageId};
use crate::types::Value;

/// First occurrence of a key, as found by a leftmost lookup.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Located {
    /// Leaf and slot of the first equal key, if any.
    pub first: Option<(PageId, usize, u64)>,
    /// Leftmost leaf that can hold keys at or above the searched key.
    pub boundary: PageId,
}

/// Unsynchronized B+Tree over a page store.
pub struct TreeCore {
    store: PageStore,
    nodes: NodeCache<BTreeNode>,
    duplicates: bool,
    root: PageId,
}

impl TreeCore {
    /// Initialize a tree on a freshly created page store.
    pub fn create(
        mut store: PageStore,
        config: &StoreConfig,
        duplicates: bool,
    ) -> Result<Self, BTreeError> {
        let nodes = NodeCache::new(config.node_cache_size, config.node_cache_purge_unit)?;
        let root = store.free_page()?.id;
        let header = store.header_mut();
        header.duplicates_allowed = duplicates;
        header.root_page = root;

        let mut root_node = BTreeNode::new(root, NodeType::Leaf, NO_PAGE);
        root_node.write(&mut store)?;
        store.flush()?;
        tracing::info!(root, duplicates, "created b-tree");

        Ok(Self {
            store,
            nodes,
            duplicates,
            root,
        })
    }

    /// Attach to the tree of an existing page store.
    pub fn open(store: PageStore, config: &StoreConfig) -> Result<Self, BTreeError> {
        let nodes = NodeCache::new(config.node_cache_size, config.node_cache_purge_unit)?;
        let header = store.header();
        let mut core = Self {
            duplicates: header.duplicates_allowed,
            root: header.root_page,
            store,
            nodes,
        };
        let root = core.fetch(core.root)?;
        core.release(root)?;
        tracing::info!(
            root = core.root,
            duplicates = core.duplicates,
            total_pages = core.store.header().total_page_count,
            "opened b-tree"
        );
        Ok(core)
    }

    /// Whether equal keys are accepted.
    #[must_use]
    pub const fn duplicates_allowed(&self) -> bool {
        self.duplicates
    }

    #[must_use]
    pub const fn root(&self) -> PageId {
        self.root
    }

    pub(crate) const fn store(&self) -> &PageStore {
        &self.store
    }

    pub(crate) const fn store_mut(&mut self) -> &mut PageStore {
        &mut self.store
    }

    // ----- node check-out -----

    /// Check a node out of the cache, loading it from disk on a miss.
    pub(crate) fn fetch(&mut self, page_id: PageId) -> Result<BTreeNode, BTreeError> {
        if let Some(node) = self.nodes.take(page_id) {
            return Ok(node);
        }
        let (header, bytes) = self.store.read_value(page_id)?;
        Ok(BTreeNode::decode(page_id, header, &bytes)?)
    }

    /// Hand a node back to the cache and write back any dirty victims.
    pub(crate) fn release(&mut self, node: BTreeNode) -> Result<(), BTreeError> {
        let victims = self.nodes.put(node.page_id(), node);
        for mut victim in victims {
            if victim.is_dirty() {
                victim.write(&mut self.store)?;
            }
        }
        Ok(())
    }

    fn create_node(&mut self, node_type: NodeType, parent: PageId) -> Result<BTreeNode, BTreeError> {
        let page = self.store.free_page()?;
        Ok(BTreeNode::new(page.id, node_type, parent))
    }

    /// Fail once a walk has taken more steps than there are pages.
    pub(crate) fn check_walk(&self, steps: u64, start: PageId) -> Result<(), BTreeError> {
        if steps > self.store.header().total_page_count {
            return Err(BTreeError::Corrupt(format!(
                "walk from page {start} does not terminate"
            )));
        }
        Ok(())
    }

    // ----- descent -----

    /// Descend to the leaf for `key`, fixing stale parent links on the way.
    ///
    /// The leaf is returned checked out.
    fn descend(&mut self, key: &Value, rightmost: bool) -> Result<BTreeNode, BTreeError> {
        self.descend_by(|node, duplicates| node.ptrs()[node.child_index(key, rightmost, duplicates)])
    }

    /// Descend along the first or last child of every branch.
    pub(crate) fn edge_leaf(&mut self, rightmost: bool) -> Result<PageId, BTreeError> {
        let leaf = self.descend_by(|node, _| {
            if rightmost {
                node.ptrs()[node.ptrs().len() - 1]
            } else {
                node.ptrs()[0]
            }
        })?;
        let id = leaf.page_id();
        self.release(leaf)?;
        Ok(id)
    }

    fn descend_by(
        &mut self,
        choose: impl Fn(&BTreeNode, bool) -> PageId,
    ) -> Result<BTreeNode, BTreeError> {
        let mut page_id = self.root;
        let mut parent = NO_PAGE;
        let mut steps = 0u64;
        loop {
            steps += 1;
            self.check_walk(steps, self.root)?;
            let mut node = self.fetch(page_id)?;
            node.set_parent(parent);
            if node.is_leaf() {
                return Ok(node);
            }
            if node.ptrs().is_empty() {
                let id = node.page_id();
                self.release(node)?;
                return Err(BTreeError::Corrupt(format!("branch page {id} has no children")));
            }
            let child = choose(&node, self.duplicates);
            self.release(node)?;
            parent = page_id;
            page_id = child;
        }
    }

    /// Leaf that bounds keys at or below `key` on the right.
    pub(crate) fn right_leaf(&mut self, key: &Value) -> Result<PageId, BTreeError> {
        let leaf = self.descend(key, true)?;
        let id = leaf.page_id();
        self.release(leaf)?;
        Ok(id)
    }

    /// Leftmost lookup of `key`.
    ///
    /// A duplicate run cut by a split continues at the end of the previous
    /// leaves; leaves with a nonzero left lookup are followed backwards while
    /// the run may continue there. A landing leaf emptied by deletes may
    /// also have the rest of the run after it, so that case walks forward.
    pub(crate) fn locate(&mut self, key: &Value) -> Result<Located, BTreeError> {
        let mut current = self.descend(key, false)?;
        let found = current.search_leftmost(key, self.duplicates);
        let mut located = Located {
            first: found
                .ok()
                .map(|i| (current.page_id(), i, current.ptrs()[i])),
            boundary: current.page_id(),
        };
        if !self.duplicates {
            self.release(current)?;
            return Ok(located);
        }

        let start = current.page_id();
        let exhausted = matches!(found, Err(i) if i == current.len());
        let start_next = current.next();
        let mut at_start = matches!(found, Ok(0) | Err(0));
        let mut steps = 0u64;
        while at_start && current.left_lookup() > 0 && current.prev() != NO_PAGE {
            steps += 1;
            self.check_walk(steps, start)?;
            let prev = self.fetch(current.prev())?;
            self.release(current)?;
            current = prev;

            if current.is_empty() {
                located.boundary = current.page_id();
                continue;
            }
            if current.keys().last().is_none_or(|last| last < key) {
                break;
            }
            located.boundary = current.page_id();
            match current.search_leftmost(key, true) {
                Ok(i) => {
                    located.first = Some((current.page_id(), i, current.ptrs()[i]));
                    at_start = i == 0;
                }
                Err(i) => at_start = i == 0,
            }
        }
        self.release(current)?;

        if located.first.is_none() && exhausted {
            located.first = self.locate_forward(start_next, key)?;
        }
        Ok(located)
    }

    /// First `key` in the leaves from `page_id` on, skipping empty leaves
    /// and leaves holding only smaller keys.
    ///
    /// Stops at the first leaf with a key at or above `key`.
    fn locate_forward(
        &mut self,
        mut page_id: PageId,
        key: &Value,
    ) -> Result<Option<(PageId, usize, u64)>, BTreeError> {
        let start = page_id;
        let mut steps = 0u64;
        while page_id != NO_PAGE {
            steps += 1;
            self.check_walk(steps, start)?;
            let leaf = self.fetch(page_id)?;
            let stop = match leaf.search_leftmost(key, true) {
                Ok(i) => Some(Some((page_id, i, leaf.ptrs()[i]))),
                Err(i) if i < leaf.len() => Some(None),
                Err(_) => None,
            };
            let next = leaf.next();
            self.release(leaf)?;
            if let Some(first) = stop {
                return Ok(first);
            }
            page_id = next;
        }
        Ok(None)
    }

    // ----- operations -----

    /// Add `key` with `ptr`.
    ///
    /// Returns the pointer of the last equal key already present, which only
    /// happens on a tree that allows duplicates.
    pub fn add_value(&mut self, key: Value, ptr: u64) -> Result<Option<u64>, BTreeError> {
        let mut leaf = self.descend(&key, true)?;
        let (idx, previous) = match leaf.search_rightmost(&key, self.duplicates) {
            Ok(i) if self.duplicates => (i + 1, Some(leaf.ptrs()[i])),
            Ok(_) => {
                self.release(leaf)?;
                return Err(BTreeError::DuplicateKey(key));
            }
            Err(i) => (i, None),
        };
        leaf.insert_leaf_entry(idx, key, ptr);

        if leaf.needs_split(self.store.work_size()) {
            self.split(leaf)?;
        } else {
            self.release(leaf)?;
        }
        Ok(previous)
    }

    /// Pointer of the first occurrence of `key`.
    pub fn find_value(&mut self, key: &Value) -> Result<Option<u64>, BTreeError> {
        Ok(self.locate(key)?.first.map(|(_, _, ptr)| ptr))
    }

    /// Remove the first occurrence of `key` and return its pointer.
    pub fn remove_value(&mut self, key: &Value) -> Result<Option<u64>, BTreeError> {
        let Some((leaf_id, idx, _)) = self.locate(key)?.first else {
            return Ok(None);
        };
        let mut leaf = self.fetch(leaf_id)?;
        let (_, ptr) = leaf.remove_leaf_entry(idx);
        self.release(leaf)?;
        Ok(Some(ptr))
    }

    /// Remove every `(key, ptr)` entry and return how many were removed.
    pub fn remove_value_with_pointer(&mut self, key: &Value, ptr: u64) -> Result<usize, BTreeError> {
        let Some((mut leaf_id, mut idx, _)) = self.locate(key)?.first else {
            return Ok(0);
        };
        let start = leaf_id;
        let mut removed = 0;
        let mut steps = 0u64;
        loop {
            steps += 1;
            self.check_walk(steps, start)?;
            let mut leaf = self.fetch(leaf_id)?;
            while idx < leaf.len() && leaf.keys()[idx] == *key {
                if leaf.ptrs()[idx] == ptr {
                    leaf.remove_leaf_entry(idx);
                    removed += 1;
                } else {
                    idx += 1;
                }
            }
            let run_ended = idx < leaf.len();
            let next = leaf.next();
            self.release(leaf)?;
            if run_ended || next == NO_PAGE || !self.duplicates {
                return Ok(removed);
            }
            leaf_id = next;
            idx = 0;
        }
    }

    /// Scan the entries selected by `query` in key order.
    ///
    /// `callback` returns `false` to stop the scan.
    pub fn search<F>(&mut self, query: &IndexQuery, callback: F) -> Result<(), BTreeError>
    where
        F: FnMut(&Value, u64) -> bool,
    {
        super::scan::search(self, query, callback)
    }

    // ----- splits -----

    fn split(&mut self, mut node: BTreeNode) -> Result<(), BTreeError> {
        let parts = node.split_off();
        if node.page_id() == self.root {
            self.split_root(node, parts)
        } else {
            self.split_child(node, parts)
        }
    }

    /// Move both halves of the root into new children and turn the root into
    /// a branch, so the root page never moves.
    fn split_root(&mut self, mut root: BTreeNode, parts: SplitOff) -> Result<(), BTreeError> {
        let root_id = root.page_id();
        let node_type = root.node_type();
        let mut left = self.create_node(node_type, root_id)?;
        let mut right = self.create_node(node_type, root_id)?;
        left.set_entries(root.keys().to_vec(), root.ptrs().to_vec());
        right.set_entries(parts.keys, parts.ptrs);
        let (left_id, right_id) = (left.page_id(), right.page_id());

        if node_type == NodeType::Leaf {
            left.set_next(right_id);
            right.set_prev(left_id);
            if parts.left_lookup > 0 {
                right.set_left_lookup(parts.left_lookup);
            }
        }
        root.become_branch(parts.separator, left_id, right_id);

        let left_children = Self::children_of(&left);
        let right_children = Self::children_of(&right);
        self.release(left)?;
        self.release(right)?;
        self.release(root)?;
        self.adopt_children(left_id, &left_children)?;
        self.adopt_children(right_id, &right_children)?;

        tracing::debug!(root = root_id, left = left_id, right = right_id, "split root");
        Ok(())
    }

    /// Split a non-root node into itself and a new right sibling, then
    /// promote the separator into the parent.
    fn split_child(&mut self, mut node: BTreeNode, parts: SplitOff) -> Result<(), BTreeError> {
        let node_id = node.page_id();
        let parent_id = node.parent();
        let mut right = self.create_node(node.node_type(), parent_id)?;
        right.set_entries(parts.keys, parts.ptrs);
        let right_id = right.page_id();

        if node.is_leaf() {
            let next = node.next();
            right.set_prev(node_id);
            right.set_next(next);
            node.set_next(right_id);
            if parts.left_lookup > 0 {
                right.set_left_lookup(parts.left_lookup);
            }
            if next != NO_PAGE {
                let mut after = self.fetch(next)?;
                after.set_prev(right_id);
                self.release(after)?;
            }
        }

        let children = Self::children_of(&right);
        self.release(node)?;
        self.release(right)?;
        self.adopt_children(right_id, &children)?;
        tracing::debug!(page = node_id, right = right_id, parent = parent_id, "split node");

        let mut parent = self.fetch(parent_id)?;
        let Some(pos) = parent.ptrs().iter().position(|&p| p == node_id) else {
            self.release(parent)?;
            return Err(BTreeError::Corrupt(format!(
                "page {node_id} is not a child of its parent {parent_id}"
            )));
        };
        parent.insert_branch_entry(pos, parts.separator, right_id);
        if parent.needs_split(self.store.work_size()) {
            self.split(parent)
        } else {
            self.release(parent)
        }
    }

    fn children_of(node: &BTreeNode) -> Vec<PageId> {
        match node.node_type() {
            NodeType::Branch => node.ptrs().to_vec(),
            NodeType::Leaf => Vec::new(),
        }
    }

    fn adopt_children(&mut self, parent: PageId, children: &[PageId]) -> Result<(), BTreeError> {
        for &child in children {
            let mut node = self.fetch(child)?;
            node.set_parent(parent);
            self.release(node)?;
        }
        Ok(())
    }

    // ----- maintenance -----

    /// Write cached nodes back to the page store.
    ///
    /// `purge` writes every dirty node in page order. `clear` also empties the
    /// cache; dirty nodes are never dropped, so it implies the write.
    pub(crate) fn write_back_nodes(&mut self, purge: bool, clear: bool) -> Result<(), BTreeError> {
        if clear {
            for mut node in self.nodes.purge_all() {
                if node.is_dirty() {
                    node.write(&mut self.store)?;
                }
            }
        } else if purge {
            for (_, mut node) in self.nodes.take_dirty() {
                node.write(&mut self.store)?;
                self.release(node)?;
            }
        }
        Ok(())
    }

    /// Write back nodes, then the file header, and sync.
    pub fn flush(&mut self, purge: bool, clear: bool) -> Result<(), BTreeError> {
        self.write_back_nodes(purge, clear)?;
        self.store.header_mut().root_page = self.root;
        self.store.flush()?;
        Ok(())
    }

    /// Widen the node cache purge unit while loading many keys.
    pub fn set_bulk_loading(&mut self, enabled: bool, percentage: f32) -> Result<(), BTreeError> {
        self.nodes.set_bulk_loading(enabled, percentage)?;
        Ok(())
    }

    /// Flush everything and release the page store.
    pub fn close(mut self) -> Result<(), BTreeError> {
        self.flush(true, true)?;
        self.store.close()?;
        tracing::info!("closed b-tree");
        Ok(())
    }
}

/// A B+Tree mapping keys to `u64` pointers, stored in one file.
///
/// All operations serialize on an internal lock.
pub struct BTree {
    core: Mutex<TreeCore>,
    path: Option<PathBuf>,
}

impl BTree {
    /// Create a new tree file. Fails if `path` exists.
    pub fn create(path: &Path, config: &StoreConfig, duplicates: bool) -> Result<Self, BTreeError> {
        config.validate()?;
        let storage = FileStorage::create(path)?;
        let mut tree = Self::create_on(Box::new(storage), config, duplicates)?;
        tree.path = Some(path.to_path_buf());
        Ok(tree)
    }

    /// Open an existing tree file.
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self, BTreeError> {
        config.validate()?;
        let storage = FileStorage::open(path)?;
        let mut tree = Self::open_on(Box::new(storage), config)?;
        tree.path = Some(path.to_path_buf());
        Ok(tree)
    }

    /// Open `path` if it exists, otherwise create it.
    pub fn open_or_create(
        path: &Path,
        config: &StoreConfig,
        duplicates: bool,
    ) -> Result<Self, BTreeError> {
        if path.exists() {
            Self::open(path, config)
        } else {
            Self::create(path, config, duplicates)
        }
    }

    /// Create a tree on empty storage.
    pub fn create_on(
        storage: Box<dyn Storage>,
        config: &StoreConfig,
        duplicates: bool,
    ) -> Result<Self, BTreeError> {
        config.validate()?;
        let store = PageStore::create(storage, config.page_size, config.page_cache_size)?;
        Ok(Self {
            core: Mutex::new(TreeCore::create(store, config, duplicates)?),
            path: None,
        })
    }

    /// Open a tree previously written to `storage`.
    pub fn open_on(storage: Box<dyn Storage>, config: &StoreConfig) -> Result<Self, BTreeError> {
        config.validate()?;
        let store = PageStore::open(storage, false, config.page_cache_size)?;
        Ok(Self {
            core: Mutex::new(TreeCore::open(store, config)?),
            path: None,
        })
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn core(&self) -> MutexGuard<'_, TreeCore> {
        self.core.lock().expect("lock poisoned")
    }

    /// File backing the tree, when opened from a path.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether equal keys are accepted.
    #[must_use]
    pub fn duplicates_allowed(&self) -> bool {
        self.core().duplicates_allowed()
    }

    /// Add `key` with `ptr`. See [`TreeCore::add_value`].
    pub fn add_value(&self, key: Value, ptr: u64) -> Result<Option<u64>, BTreeError> {
        self.core().add_value(key, ptr)
    }

    /// Remove the first occurrence of `key`.
    pub fn remove_value(&self, key: &Value) -> Result<Option<u64>, BTreeError> {
        self.core().remove_value(key)
    }

    /// Remove every `(key, ptr)` entry; returns the number removed.
    pub fn remove_value_with_pointer(&self, key: &Value, ptr: u64) -> Result<usize, BTreeError> {
        self.core().remove_value_with_pointer(key, ptr)
    }

    /// Pointer of the first occurrence of `key`.
    pub fn find_value(&self, key: &Value) -> Result<Option<u64>, BTreeError> {
        self.core().find_value(key)
    }

    /// Scan the entries selected by `query`.
    ///
    /// The callback runs under the tree lock and must not call back into
    /// this tree.
    pub fn search<F>(&self, query: &IndexQuery, callback: F) -> Result<(), BTreeError>
    where
        F: FnMut(&Value, u64) -> bool,
    {
        self.core().search(query, callback)
    }

    /// Write back cached nodes and the file header.
    pub fn flush(&self, purge: bool, clear: bool) -> Result<(), BTreeError> {
        self.core().flush(purge, clear)
    }

    /// Tune node eviction for bulk loading.
    pub fn set_bulk_loading(&self, enabled: bool, percentage: f32) -> Result<(), BTreeError> {
        self.core().set_bulk_loading(enabled, percentage)
    }

    /// Flush and close the file.
    pub fn close(self) -> Result<(), BTreeError> {
        #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
        let core = self.core.into_inner().expect("lock poisoned");
        core.close()
    }
}

/// Errors that can occur during B-tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// Page store error.
    Storage(StorageError),
    /// Node decode error.
    Node(NodeError),
    /// Structural inconsistency found while walking the tree.
    Corrupt(String),
    /// Key already present in a tree without duplicates.
    DuplicateKey(Value),
    /// Rejected configuration or tuning argument.
    InvalidArgument(ConfigError),
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::Corrupt(msg) => write!(f, "b-tree corrupt: {msg}"),
            Self::DuplicateKey(key) => write!(f, "duplicate key in unique tree: {key:?}"),
            Self::InvalidArgument(e) => write!(f, "invalid argument: {e}"),
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::InvalidArgument(e) => Some(e),
            Self::Corrupt(_) | Self::DuplicateKey(_) => None,
        }
    }
}

impl From<StorageError> for BTreeError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<NodeError> for BTreeError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

impl From<ConfigError> for BTreeError {
    fn from(e: ConfigError) -> Self {
        Self::InvalidArgument(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::io::MemoryStorage;
    use crate::testing::small_config;

    fn new_tree(duplicates: bool) -> (MemoryStorage, BTree) {
        let storage = MemoryStorage::new();
        let tree = BTree::create_on(Box::new(storage.clone()), &small_config(), duplicates)
            .expect("create tree");
        (storage, tree)
    }

    fn key(i: usize) -> Value {
        Value::from(format!("key{i:05}"))
    }

    #[test]
    fn test_btree_basic_operations() {
        let (_storage, tree) = new_tree(false);
        assert_eq!(tree.add_value(Value::from("b"), 2).expect("add"), None);
        assert_eq!(tree.add_value(Value::from("a"), 1).expect("add"), None);

        assert_eq!(tree.find_value(&Value::from("a")).expect("find"), Some(1));
        assert_eq!(tree.find_value(&Value::from("b")).expect("find"), Some(2));
        assert_eq!(tree.find_value(&Value::from("c")).expect("find"), None);
    }

    #[test]
    fn test_btree_rejects_duplicate_in_unique_tree() {
        let (_storage, tree) = new_tree(false);
        tree.add_value(Value::from("a"), 1).expect("add");
        assert!(matches!(
            tree.add_value(Value::from("a"), 2),
            Err(BTreeError::DuplicateKey(_))
        ));
        assert_eq!(tree.find_value(&Value::from("a")).expect("find"), Some(1));
    }

    #[test]
    fn test_btree_many_inserts_split_root() {
        let (_storage, tree) = new_tree(false);
        for i in 0..2000 {
            tree.add_value(key(i), i as u64).expect("add");
        }
        for i in 0..2000 {
            assert_eq!(tree.find_value(&key(i)).expect("find"), Some(i as u64));
        }
        let core = tree.core();
        let root = core.root();
        assert_eq!(root, 0);
        assert!(core.store().header().total_page_count > 3);
    }

    #[test]
    fn test_btree_reverse_inserts() {
        let (_storage, tree) = new_tree(false);
        for i in (0..1500).rev() {
            tree.add_value(key(i), i as u64).expect("add");
        }
        let mut seen = Vec::new();
        tree.search(&IndexQuery::any(), |k, p| {
            seen.push((k.clone(), p));
            true
        })
        .expect("scan");
        assert_eq!(seen.len(), 1500);
        for (i, (k, p)) in seen.iter().enumerate() {
            assert_eq!(*k, key(i));
            assert_eq!(*p, i as u64);
        }
    }

    #[test]
    fn test_btree_remove() {
        let (_storage, tree) = new_tree(false);
        for i in 0..500 {
            tree.add_value(key(i), i as u64).expect("add");
        }
        assert_eq!(tree.remove_value(&key(250)).expect("remove"), Some(250));
        assert_eq!(tree.remove_value(&key(250)).expect("remove"), None);
        assert_eq!(tree.find_value(&key(250)).expect("find"), None);
        assert_eq!(tree.find_value(&key(251)).expect("find"), Some(251));
        assert_eq!(tree.remove_value(&Value::from("absent")).expect("remove"), None);
    }

    #[test]
    fn test_btree_duplicates_across_leaves() {
        let (_storage, tree) = new_tree(true);
        let dup = Value::from("dup");
        for i in 0..300 {
            tree.add_value(key(i), i as u64).expect("add");
        }
        for p in 1000..1600 {
            let previous = tree.add_value(dup.clone(), p).expect("add dup");
            if p > 1000 {
                assert_eq!(previous, Some(p - 1));
            }
        }
        assert_eq!(tree.find_value(&dup).expect("find"), Some(1000));

        let mut ptrs = Vec::new();
        tree.search(&IndexQuery::eq(dup.clone()), |_, p| {
            ptrs.push(p);
            true
        })
        .expect("scan");
        assert_eq!(ptrs, (1000..1600).collect::<Vec<_>>());

        assert_eq!(tree.remove_value(&dup).expect("remove"), Some(1000));
        assert_eq!(tree.find_value(&dup).expect("find"), Some(1001));
    }

    #[test]
    fn test_btree_remove_with_pointer() {
        let (_storage, tree) = new_tree(true);
        let dup = Value::from("dup");
        for p in 0..400u64 {
            tree.add_value(dup.clone(), p % 4).expect("add");
        }
        assert_eq!(tree.remove_value_with_pointer(&dup, 2).expect("remove"), 100);
        assert_eq!(tree.remove_value_with_pointer(&dup, 2).expect("remove"), 0);

        let mut count = 0;
        tree.search(&IndexQuery::eq(dup.clone()), |_, p| {
            assert_ne!(p, 2);
            count += 1;
            true
        })
        .expect("scan");
        assert_eq!(count, 300);
    }

    #[test]
    fn test_btree_persistence() {
        let (storage, tree) = new_tree(false);
        for i in 0..1000 {
            tree.add_value(key(i), i as u64).expect("add");
        }
        tree.close().expect("close");

        let tree = BTree::open_on(Box::new(storage), &small_config()).expect("reopen");
        assert!(!tree.duplicates_allowed());
        for i in 0..1000 {
            assert_eq!(tree.find_value(&key(i)).expect("find"), Some(i as u64));
        }
    }

    #[test]
    fn test_btree_flush_without_clear_keeps_working() {
        let (storage, tree) = new_tree(false);
        for i in 0..300 {
            tree.add_value(key(i), i as u64).expect("add");
        }
        tree.flush(true, false).expect("flush");
        tree.add_value(key(300), 300).expect("add after flush");
        tree.flush(true, true).expect("flush and clear");
        assert_eq!(tree.find_value(&key(10)).expect("find"), Some(10));

        let reopened = BTree::open_on(Box::new(storage), &small_config()).expect("reopen");
        assert_eq!(reopened.find_value(&key(300)).expect("find"), Some(300));
    }

    #[test]
    fn test_btree_bulk_loading_toggle() {
        let (_storage, tree) = new_tree(false);
        tree.set_bulk_loading(true, 0.5).expect("enable");
        for i in 0..1000 {
            tree.add_value(key(i), i as u64).expect("add");
        }
        tree.set_bulk_loading(false, 0.5).expect("disable");
        assert!(matches!(
            tree.set_bulk_loading(true, 1.5),
            Err(BTreeError::InvalidArgument(_))
        ));
        assert_eq!(tree.find_value(&key(999)).expect("find"), Some(999));
    }

    #[test]
    fn test_btree_write_failure_propagates() {
        let (storage, tree) = new_tree(false);
        tree.add_value(key(1), 1).expect("add");
        storage.fail_next_writes(1);
        assert!(matches!(
            tree.flush(true, true),
            Err(BTreeError::Storage(StorageError::InjectedFault(_)))
        ));
    }

    #[test]
    fn test_btree_file_roundtrip() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("tree.db");
        let config = StoreConfig::default();

        let tree = BTree::open_or_create(&path, &config, false).expect("create");
        assert_eq!(tree.path(), Some(path.as_path()));
        tree.add_value(Value::from("alpha"), 7).expect("add");
        tree.close().expect("close");

        assert!(matches!(
            BTree::create(&path, &config, false),
            Err(BTreeError::Storage(StorageError::AlreadyExists(_)))
        ));
        let tree = BTree::open_or_create(&path, &config, false).expect("open");
        assert_eq!(tree.find_value(&Value::from("alpha")).expect("find"), Some(7));
    }
}
