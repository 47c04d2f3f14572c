//! Immutable byte-string used for keys and operands.
//!
//! A `Value` wraps a shared, reference-counted byte buffer. Cloning is cheap and
//! keeps the same buffer, so equal keys that sit next to each other in a node
//! can share storage. Ordering is byte-exact: bytes compare unsigned and a value
//! that is a strict prefix of another sorts first.
//!
//! # Invariants
//!
//! - The bytes never change after construction
//! - `hash_code()` is computed at most once per buffer clone family
//! - `Ord`, `Eq` and `Hash` all agree on the raw bytes

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

/// An immutable, cheaply clonable byte string.
#[derive(Clone)]
pub struct Value {
    data: Arc<[u8]>,
    hash: OnceLock<u32>,
}

impl Value {
    /// Create a value by copying `bytes`.
    #[must_use]
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            data: Arc::from(bytes),
            hash: OnceLock::new(),
        }
    }

    /// The empty value.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(&[])
    }

    /// Raw bytes of the value.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the value has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of live handles sharing this buffer.
    ///
    /// Keys inserted next to an equal key reuse that key's buffer, so a count
    /// above one on a node key means the key is part of a duplicate run.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    /// Whether both handles point at the same buffer.
    #[must_use]
    pub fn shares_buffer(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// CRC32 of the bytes, computed lazily and cached.
    #[must_use]
    pub fn hash_code(&self) -> u32 {
        *self.hash.get_or_init(|| crc32fast::hash(&self.data))
    }

    /// Whether this value begins with `prefix`.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.data.starts_with(&prefix.data)
    }

    /// Length of the longest common prefix of `self` and `other`.
    #[must_use]
    pub fn common_prefix_len(&self, other: &Self) -> usize {
        self.data
            .iter()
            .zip(other.data.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// A new value holding the first `len` bytes.
    ///
    /// # Panics
    /// Panics if `len > self.len()`.
    #[must_use]
    pub fn prefix(&self, len: usize) -> Self {
        if len == self.len() {
            return self.clone();
        }
        Self::new(&self.data[..len])
    }

    /// Shortest value `s` with `left < s <= right`.
    ///
    /// The result is `right` cut just after the first byte where it differs
    /// from `left`. When the two are equal, `right` itself is returned.
    #[must_use]
    pub fn separator(left: &Self, right: &Self) -> Self {
        if left == right {
            return right.clone();
        }
        let common = left.common_prefix_len(right);
        right.prefix((common + 1).min(right.len()))
    }

    /// Smallest value greater than every value starting with `self`.
    ///
    /// Returns `None` when no such bound exists (empty value or all `0xFF`).
    #[must_use]
    pub fn prefix_successor(&self) -> Option<Self> {
        let mut bytes = self.data.to_vec();
        while let Some(last) = bytes.pop() {
            if last < u8::MAX {
                bytes.push(last + 1);
                return Some(Self::from(bytes));
            }
        }
        None
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            data: Arc::from(bytes),
            hash: OnceLock::new(),
        }
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::from(s.into_bytes())
    }
}

impl AsRef<[u8]> for Value {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.data[..].cmp(&other.data[..])
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash_code());
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.data) {
            Ok(s) => write!(f, "Value({s:?})"),
            Err(_) => write!(f, "Value({:02x?})", &self.data[..]),
        }
    }
}
