//! B-tree node types and serialization.
//!
//! A node is the in-memory view of one page: sorted keys, pointers, and for
//! leaves the links to the neighbouring leaves.
//!
//! # Record layout (page payload)
//!
//! - shared prefix bytes (`prefix_len` in the page header)
//! - per key: `-1` (i32) when the key equals the previous key, otherwise the
//!   suffix length (i32) followed by the suffix bytes
//! - one varint pointer per key (one extra for branches)
//! - leaves only: previous and next leaf page ids (i64 each)

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use crate::storage::cache::Cacheable;
use crate::storage::file::PageStore;
use crate::storage::io::StorageError;
use crate::storage::page::{ByteReader, NO_PAGE, PageHeader, PageId, PageStatus};
use crate::storage::varint::{encode_varint, varint_len};
use crate::types::Value;

/// Nodes with fewer keys than this never split, whatever their size.
pub const LEAST_KEYS: usize = 5;

/// Most keys a node can hold; the count is persisted as an i16.
pub const MAX_KEYS: usize = i16::MAX as usize;

/// Sentinel suffix length for "same key as the previous slot".
const REPEAT_KEY: i32 = -1;

/// Bytes taken by the leaf sibling links.
const LEAF_LINKS_SIZE: usize = 16;

/// Node type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Leaf,
    Branch,
}

impl NodeType {
    const fn status(self) -> PageStatus {
        match self {
            Self::Leaf => PageStatus::Leaf,
            Self::Branch => PageStatus::Branch,
        }
    }
}

/// Result of splitting a node in two.
///
/// The node that was split keeps the left half.
#[derive(Debug)]
pub struct SplitOff {
    /// Key promoted to the parent.
    pub separator: Value,
    /// Keys of the new right node.
    pub keys: Vec<Value>,
    /// Pointers of the new right node.
    pub ptrs: Vec<u64>,
    /// Entries of a duplicate run that stayed on the left page (leaves only).
    pub left_lookup: u32,
}

/// A B-tree node.
///
/// # Invariants
/// - branch: `ptrs.len() == keys.len() + 1`
/// - leaf: `ptrs.len() == keys.len()`
/// - keys are non-decreasing
#[derive(Debug, Clone)]
pub struct BTreeNode {
    page_id: PageId,
    header: PageHeader,
    node_type: NodeType,
    keys: Vec<Value>,
    ptrs: Vec<u64>,
    prev: PageId,
    next: PageId,
    /// Estimated encoded size, kept current on every mutation.
    data_len: usize,
    dirty: bool,
}

impl BTreeNode {
    /// Create an empty node for a freshly allocated page.
    #[must_use]
    pub fn new(page_id: PageId, node_type: NodeType, parent: PageId) -> Self {
        let mut header = PageHeader::unused();
        header.status = node_type.status();
        header.parent_page = parent;
        let mut node = Self {
            page_id,
            header,
            node_type,
            keys: Vec::new(),
            ptrs: Vec::new(),
            prev: NO_PAGE,
            next: NO_PAGE,
            data_len: 0,
            dirty: true,
        };
        node.data_len = node.calculate_data_len();
        node
    }

    /// Decode a node from its page header and record bytes.
    pub fn decode(page_id: PageId, header: PageHeader, bytes: &[u8]) -> Result<Self, NodeError> {
        let node_type = match header.status {
            PageStatus::Leaf => NodeType::Leaf,
            PageStatus::Branch => NodeType::Branch,
            status => return Err(NodeError::UnexpectedStatus { page_id, status }),
        };

        let mut reader = ByteReader::new(bytes);
        let prefix = reader.read_bytes(header.prefix_len as usize)?;
        let count = header.value_count as usize;

        let mut keys: Vec<Value> = Vec::with_capacity(count);
        for _ in 0..count {
            let len = reader.read_i32()?;
            if len == REPEAT_KEY {
                let previous = keys.last().cloned().ok_or(NodeError::DanglingRepeat { page_id })?;
                keys.push(previous);
                continue;
            }
            let len = usize::try_from(len)
                .map_err(|_| NodeError::Decode(StorageError::Corruption(format!(
                    "page {page_id}: negative key length {len}"
                ))))?;
            let suffix = reader.read_bytes(len)?;
            let mut key = Vec::with_capacity(prefix.len() + len);
            key.extend_from_slice(prefix);
            key.extend_from_slice(suffix);
            keys.push(Value::from(key));
        }

        let ptr_count = match node_type {
            NodeType::Leaf => count,
            NodeType::Branch => count + 1,
        };
        let mut ptrs = Vec::with_capacity(ptr_count);
        for _ in 0..ptr_count {
            ptrs.push(reader.read_varint()?);
        }

        let (prev, next) = match node_type {
            NodeType::Leaf => (reader.read_u64()?, reader.read_u64()?),
            NodeType::Branch => (NO_PAGE, NO_PAGE),
        };

        let mut node = Self {
            page_id,
            header,
            node_type,
            keys,
            ptrs,
            prev,
            next,
            data_len: 0,
            dirty: false,
        };
        node.data_len = node.calculate_data_len();
        Ok(node)
    }

    /// Encode the node record and refresh the header's count fields.
    pub fn encode(&mut self) -> Vec<u8> {
        let prefix_len = self.prefix_len();
        let mut buf = Vec::with_capacity(self.data_len + 8);
        if let Some(first) = self.keys.first() {
            buf.extend_from_slice(&first.as_bytes()[..prefix_len]);
        }

        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 && *key == self.keys[i - 1] {
                buf.extend_from_slice(&REPEAT_KEY.to_be_bytes());
                continue;
            }
            let suffix = &key.as_bytes()[prefix_len..];
            buf.extend_from_slice(&(suffix.len() as i32).to_be_bytes());
            buf.extend_from_slice(suffix);
        }

        for &ptr in &self.ptrs {
            encode_varint(ptr, &mut buf);
        }

        if self.node_type == NodeType::Leaf {
            buf.extend_from_slice(&self.prev.to_be_bytes());
            buf.extend_from_slice(&self.next.to_be_bytes());
        }

        self.header.status = self.node_type.status();
        self.header.value_count = self.keys.len() as u16;
        self.header.prefix_len = prefix_len as u16;
        buf
    }

    /// Write the node through the page store and mark it clean.
    pub fn write(&mut self, store: &mut PageStore) -> Result<(), StorageError> {
        let bytes = self.encode();
        store.write_value(self.page_id, &mut self.header, &bytes)?;
        self.dirty = false;
        Ok(())
    }

    /// Common prefix of all keys (first and last bound it, keys being sorted).
    fn prefix_len(&self) -> usize {
        match (self.keys.first(), self.keys.last()) {
            (Some(first), Some(last)) if self.keys.len() > 1 => {
                first.common_prefix_len(last).min(i16::MAX as usize)
            }
            _ => 0,
        }
    }

    fn calculate_data_len(&self) -> usize {
        let prefix = self.prefix_len();
        let mut total = prefix;
        for (i, key) in self.keys.iter().enumerate() {
            total += 4;
            if i == 0 || *key != self.keys[i - 1] {
                total += key.len() - prefix;
            }
        }
        total += self.ptrs.iter().map(|&p| varint_len(p)).sum::<usize>();
        if self.node_type == NodeType::Leaf {
            total += LEAF_LINKS_SIZE;
        }
        total
    }

    /// Encoded cost of an entry placed between `left` and `right`.
    fn entry_cost(key: &Value, ptr: u64, left: Option<&Value>, right: Option<&Value>) -> usize {
        let repeats = left == Some(key) || right == Some(key);
        4 + varint_len(ptr) + if repeats { 0 } else { key.len() }
    }

    fn neighbours(&self, idx: usize) -> (Option<&Value>, Option<&Value>) {
        let left = idx.checked_sub(1).and_then(|i| self.keys.get(i));
        (left, self.keys.get(idx))
    }

    // ----- accessors -----

    #[must_use]
    pub const fn page_id(&self) -> PageId {
        self.page_id
    }

    #[must_use]
    pub const fn node_type(&self) -> NodeType {
        self.node_type
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self.node_type, NodeType::Leaf)
    }

    #[must_use]
    pub fn keys(&self) -> &[Value] {
        &self.keys
    }

    #[must_use]
    pub fn ptrs(&self) -> &[u64] {
        &self.ptrs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub const fn parent(&self) -> PageId {
        self.header.parent_page
    }

    /// Point the node at a new parent. Marks dirty only on change.
    pub const fn set_parent(&mut self, parent: PageId) {
        if self.header.parent_page != parent {
            self.header.parent_page = parent;
            self.dirty = true;
        }
    }

    #[must_use]
    pub const fn prev(&self) -> PageId {
        self.prev
    }

    #[must_use]
    pub const fn next(&self) -> PageId {
        self.next
    }

    pub const fn set_prev(&mut self, prev: PageId) {
        self.prev = prev;
        self.dirty = true;
    }

    pub const fn set_next(&mut self, next: PageId) {
        self.next = next;
        self.dirty = true;
    }

    #[must_use]
    pub const fn left_lookup(&self) -> u32 {
        self.header.left_lookup
    }

    pub const fn set_left_lookup(&mut self, left_lookup: u32) {
        self.header.left_lookup = left_lookup;
        self.dirty = true;
    }

    #[must_use]
    pub const fn data_len(&self) -> usize {
        self.data_len
    }

    // ----- search -----

    /// Leftmost index holding `key`, or the insertion point.
    pub fn search_leftmost(&self, key: &Value, duplicates: bool) -> Result<usize, usize> {
        if !duplicates {
            return self.keys.binary_search(key);
        }
        let idx = self.keys.partition_point(|k| k < key);
        if self.keys.get(idx) == Some(key) {
            Ok(idx)
        } else {
            Err(idx)
        }
    }

    /// Rightmost index holding `key`, or the insertion point.
    pub fn search_rightmost(&self, key: &Value, duplicates: bool) -> Result<usize, usize> {
        if !duplicates {
            return self.keys.binary_search(key);
        }
        let idx = self.keys.partition_point(|k| k <= key);
        if idx > 0 && self.keys[idx - 1] == *key {
            Ok(idx - 1)
        } else {
            Err(idx)
        }
    }

    /// Child pointer index to follow for `key` in a branch.
    #[must_use]
    pub fn child_index(&self, key: &Value, rightmost: bool, duplicates: bool) -> usize {
        let found = if rightmost {
            self.search_rightmost(key, duplicates)
        } else {
            self.search_leftmost(key, duplicates)
        };
        match found {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }

    // ----- mutation -----

    /// Insert a leaf entry at `idx`, sharing the buffer of an equal neighbour.
    pub fn insert_leaf_entry(&mut self, idx: usize, key: Value, ptr: u64) {
        let (left, right) = self.neighbours(idx);
        let cost = Self::entry_cost(&key, ptr, left, right);
        let key = match (left, right) {
            (Some(left), _) if *left == key => left.clone(),
            (_, Some(right)) if *right == key => right.clone(),
            _ => key,
        };
        self.data_len += cost;
        self.keys.insert(idx, key);
        self.ptrs.insert(idx, ptr);
        self.dirty = true;
    }

    /// Insert a separator at `idx` with `right_child` just after it.
    pub fn insert_branch_entry(&mut self, idx: usize, key: Value, right_child: PageId) {
        let (left, right) = self.neighbours(idx);
        let cost = Self::entry_cost(&key, right_child, left, right);
        self.data_len += cost;
        self.keys.insert(idx, key);
        self.ptrs.insert(idx + 1, right_child);
        self.dirty = true;
    }

    /// Remove the leaf entry at `idx`.
    pub fn remove_leaf_entry(&mut self, idx: usize) -> (Value, u64) {
        let key = self.keys.remove(idx);
        let ptr = self.ptrs.remove(idx);
        let (left, right) = self.neighbours(idx);
        let cost = Self::entry_cost(&key, ptr, left, right);
        self.data_len = self.data_len.saturating_sub(cost);
        self.dirty = true;
        (key, ptr)
    }

    /// Replace the whole content of the node.
    pub fn set_entries(&mut self, keys: Vec<Value>, ptrs: Vec<u64>) {
        debug_assert_eq!(
            ptrs.len(),
            keys.len() + usize::from(self.node_type == NodeType::Branch)
        );
        self.keys = keys;
        self.ptrs = ptrs;
        self.data_len = self.calculate_data_len();
        self.dirty = true;
    }

    /// Turn a leaf root into a branch root holding one separator.
    pub fn become_branch(&mut self, separator: Value, left: PageId, right: PageId) {
        self.node_type = NodeType::Branch;
        self.prev = NO_PAGE;
        self.next = NO_PAGE;
        self.header.left_lookup = 0;
        self.set_entries(vec![separator], vec![left, right]);
    }

    /// Whether the node has outgrown its page.
    #[must_use]
    pub fn needs_split(&self, work_size: usize) -> bool {
        let count = self.keys.len();
        if count < LEAST_KEYS {
            return false;
        }
        count > MAX_KEYS || self.data_len > work_size
    }

    /// Move the upper half of the node out, keeping the lower half.
    ///
    /// Branches promote their middle key and drop it from both halves. Leaves
    /// promote the shortest key that separates the halves, and record how much
    /// of a duplicate run straddling the split stays on the left.
    ///
    /// # Panics
    /// Panics if the node holds fewer than two keys.
    pub fn split_off(&mut self) -> SplitOff {
        let pivot = self.keys.len() / 2;
        match self.node_type {
            NodeType::Branch => {
                let keys = self.keys.split_off(pivot + 1);
                let ptrs = self.ptrs.split_off(pivot + 1);
                let separator = self.keys.pop().unwrap_or_default();
                self.data_len = self.calculate_data_len();
                self.dirty = true;
                SplitOff {
                    separator,
                    keys,
                    ptrs,
                    left_lookup: 0,
                }
            }
            NodeType::Leaf => {
                let straddles = self.keys[pivot - 1] == self.keys[pivot];
                let left_lookup = if straddles {
                    let run_start = self.keys[..pivot].partition_point(|k| *k < self.keys[pivot]);
                    (pivot - run_start) as u32
                } else {
                    0
                };
                let keys = self.keys.split_off(pivot);
                let ptrs = self.ptrs.split_off(pivot);
                let separator = Value::separator(&self.keys[pivot - 1], &keys[0]);
                self.data_len = self.calculate_data_len();
                self.dirty = true;
                SplitOff {
                    separator,
                    keys,
                    ptrs,
                    left_lookup,
                }
            }
        }
    }
}

impl Cacheable for BTreeNode {
    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn write_order(&self) -> u64 {
        self.page_id
    }
}

/// Errors that can occur when working with B-tree nodes.
#[derive(Debug)]
pub enum NodeError {
    /// The page does not hold a tree node.
    UnexpectedStatus { page_id: PageId, status: PageStatus },
    /// A repeat-key marker appeared before any key.
    DanglingRepeat { page_id: PageId },
    /// The record could not be decoded.
    Decode(StorageError),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedStatus { page_id, status } => {
                write!(f, "page {page_id} is not a tree node (status {status:?})")
            }
            Self::DanglingRepeat { page_id } => {
                write!(f, "page {page_id}: repeat marker without a previous key")
            }
            Self::Decode(e) => write!(f, "node decode error: {e}"),
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for NodeError {
    fn from(e: StorageError) -> Self {
        Self::Decode(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_with(keys: &[&str]) -> BTreeNode {
        let mut node = BTreeNode::new(1, NodeType::Leaf, 0);
        let keys: Vec<Value> = keys.iter().map(|k| Value::from(*k)).collect();
        let ptrs = (0..keys.len() as u64).collect();
        node.set_entries(keys, ptrs);
        node
    }

    fn roundtrip(node: &mut BTreeNode) -> BTreeNode {
        let bytes = node.encode();
        BTreeNode::decode(node.page_id(), node.header, &bytes).expect("decode")
    }

    #[test]
    fn test_leaf_roundtrip_with_prefix() {
        let mut node = leaf_with(&["user:alice", "user:bob", "user:carol"]);
        node.set_prev(7);
        node.set_next(9);
        let restored = roundtrip(&mut node);

        assert_eq!(node.header.prefix_len, 5);
        assert_eq!(restored.keys(), node.keys());
        assert_eq!(restored.ptrs(), &[0, 1, 2]);
        assert_eq!((restored.prev(), restored.next()), (7, 9));
        assert!(!restored.is_dirty());
    }

    #[test]
    fn test_branch_roundtrip() {
        let mut node = BTreeNode::new(4, NodeType::Branch, NO_PAGE);
        node.set_entries(
            vec![Value::from("m"), Value::from("t")],
            vec![10, 300, 70_000],
        );
        let restored = roundtrip(&mut node);
        assert_eq!(restored.node_type(), NodeType::Branch);
        assert_eq!(restored.keys(), node.keys());
        assert_eq!(restored.ptrs(), &[10, 300, 70_000]);
    }

    #[test]
    fn test_equal_neighbours_are_encoded_once() {
        let mut dup = leaf_with(&["same", "same", "same"]);
        let mut distinct = leaf_with(&["sama", "samb", "samc"]);
        let dup_bytes = dup.encode();
        let distinct_bytes = distinct.encode();
        assert!(dup_bytes.len() < distinct_bytes.len());

        let restored = BTreeNode::decode(1, dup.header, &dup_bytes).expect("decode");
        assert_eq!(restored.keys().len(), 3);
        assert!(restored.keys()[0].shares_buffer(&restored.keys()[2]));
        assert!(restored.keys()[0].ref_count() >= 3);
    }

    #[test]
    fn test_estimate_matches_encoding_after_set() {
        let mut node = leaf_with(&["alpha", "beta", "beta", "gamma"]);
        let estimate = node.data_len();
        assert_eq!(estimate, node.encode().len());
    }

    #[test]
    fn test_decode_rejects_data_page() {
        let mut header = PageHeader::unused();
        header.status = PageStatus::DataRecord;
        assert!(matches!(
            BTreeNode::decode(3, header, &[]),
            Err(NodeError::UnexpectedStatus { page_id: 3, .. })
        ));
    }

    #[test]
    fn test_leftmost_and_rightmost_with_duplicates() {
        let node = leaf_with(&["a", "b", "b", "b", "c"]);
        let b = Value::from("b");
        assert_eq!(node.search_leftmost(&b, true), Ok(1));
        assert_eq!(node.search_rightmost(&b, true), Ok(3));
        assert_eq!(node.search_leftmost(&Value::from("bb"), true), Err(4));
        assert_eq!(node.search_rightmost(&Value::from("0"), true), Err(0));
        assert_eq!(node.child_index(&b, true, true), 4);
        assert_eq!(node.child_index(&b, false, true), 2);
    }

    #[test]
    fn test_insert_shares_equal_neighbour() {
        let mut node = leaf_with(&["a", "k", "z"]);
        node.insert_leaf_entry(2, Value::from("k"), 99);
        assert!(node.keys()[1].shares_buffer(&node.keys()[2]));
        assert_eq!(node.ptrs(), &[0, 1, 99, 2]);
    }

    #[test]
    fn test_needs_split_respects_floor() {
        let mut node = leaf_with(&["a", "b", "c", "d"]);
        assert!(!node.needs_split(1));
        node.insert_leaf_entry(4, Value::from("e"), 4);
        assert!(node.needs_split(1));
        assert!(!node.needs_split(4096));
    }

    #[test]
    fn test_leaf_split_separator_and_lookup() {
        let mut node = leaf_with(&["a", "b", "dup", "dup", "dup", "z"]);
        let split = node.split_off();
        // pivot 3: left [a, b, dup], right [dup, dup, z]
        assert_eq!(node.keys().len(), 3);
        assert_eq!(split.keys.len(), 3);
        assert_eq!(split.separator, Value::from("dup"));
        assert_eq!(split.left_lookup, 1);
    }

    #[test]
    fn test_leaf_split_shortest_separator() {
        let mut node = leaf_with(&["k10", "k11", "k199", "k2", "k20"]);
        let split = node.split_off();
        assert_eq!(node.keys().last(), Some(&Value::from("k11")));
        assert_eq!(split.keys[0], Value::from("k199"));
        assert_eq!(split.separator, Value::from("k19"));
        assert_eq!(split.left_lookup, 0);
    }

    #[test]
    fn test_branch_split_promotes_middle() {
        let mut node = BTreeNode::new(2, NodeType::Branch, NO_PAGE);
        let keys: Vec<Value> = ["b", "d", "f", "h", "j"].iter().map(|k| Value::from(*k)).collect();
        node.set_entries(keys, vec![1, 2, 3, 4, 5, 6]);
        let split = node.split_off();
        assert_eq!(split.separator, Value::from("f"));
        assert_eq!(node.keys(), &[Value::from("b"), Value::from("d")]);
        assert_eq!(node.ptrs(), &[1, 2, 3]);
        assert_eq!(split.keys, vec![Value::from("h"), Value::from("j")]);
        assert_eq!(split.ptrs, vec![4, 5, 6]);
    }
}
