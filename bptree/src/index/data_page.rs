//! Data pages of the value store.
//!
//! A data page holds a list of tuples addressed by slot. The record is the
//! concatenation of, per slot, an `i32` length and the tuple bytes; a removed
//! slot is written as length `-1` so later slots keep their numbers. Records
//! longer than one page continue on overflow pages through the page store.
//!
//! # Invariants
//!
//! - `header.tuple_count` is the number of live slots
//! - a slot number never changes while its tuple is live
//! - no trailing removed slots are kept

use crate::index::IndexError;
use crate::index::pointer::MAX_SLOT;
use crate::storage::{ByteReader, Cacheable, PageHeader, PageId, PageStatus, PageStore, StorageError};

/// Length marker of a removed slot.
const REMOVED_SLOT: i32 = -1;

/// Bytes of record overhead per slot.
pub const SLOT_OVERHEAD: usize = 4;

/// Largest tuple a data page accepts.
pub const MAX_TUPLE_LEN: usize = i32::MAX.unsigned_abs() as usize;

#[derive(Debug, Clone)]
pub struct DataPage {
    page_id: PageId,
    header: PageHeader,
    tuples: Vec<Option<Vec<u8>>>,
    live: usize,
    record_len: usize,
    dirty: bool,
}

impl DataPage {
    /// An empty data page on a freshly allocated page.
    #[must_use]
    pub fn new(page_id: PageId) -> Self {
        let mut header = PageHeader::unused();
        header.status = PageStatus::DataRecord;
        Self {
            page_id,
            header,
            tuples: Vec::new(),
            live: 0,
            record_len: 0,
            dirty: true,
        }
    }

    pub fn decode(page_id: PageId, header: PageHeader, bytes: &[u8]) -> Result<Self, IndexError> {
        if header.status != PageStatus::DataRecord {
            return Err(IndexError::Corrupt(format!(
                "page {page_id} is {:?}, expected a data page",
                header.status
            )));
        }

        let mut reader = ByteReader::new(bytes);
        let mut tuples = Vec::new();
        let mut live = 0;
        while reader.remaining() > 0 {
            let len = reader.read_i32()?;
            if len == REMOVED_SLOT {
                tuples.push(None);
                continue;
            }
            let len = usize::try_from(len).map_err(|_| {
                IndexError::Corrupt(format!("page {page_id}: bad tuple length {len}"))
            })?;
            tuples.push(Some(reader.read_bytes(len)?.to_vec()));
            live += 1;
        }

        if live != header.tuple_count as usize {
            return Err(IndexError::Corrupt(format!(
                "page {page_id}: header counts {} tuples, record holds {live}",
                header.tuple_count
            )));
        }
        Ok(Self {
            page_id,
            header,
            tuples,
            live,
            record_len: bytes.len(),
            dirty: false,
        })
    }

    /// Serialize the tuples and refresh the header's tuple count.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn encode(&mut self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.record_len);
        for tuple in &self.tuples {
            match tuple {
                Some(bytes) => {
                    buf.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    buf.extend_from_slice(bytes);
                }
                None => buf.extend_from_slice(&REMOVED_SLOT.to_be_bytes()),
            }
        }
        self.header.status = PageStatus::DataRecord;
        self.header.tuple_count = self.live as u32;
        buf
    }

    /// Write the page, and its overflow chain, to the page store.
    pub fn write(&mut self, store: &mut PageStore) -> Result<(), StorageError> {
        let bytes = self.encode();
        store.write_value(self.page_id, &mut self.header, &bytes)?;
        self.dirty = false;
        Ok(())
    }

    #[must_use]
    pub const fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Number of live tuples.
    #[must_use]
    pub const fn live_count(&self) -> usize {
        self.live
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Encoded record length in bytes.
    #[must_use]
    pub const fn record_len(&self) -> usize {
        self.record_len
    }

    /// Bytes left before the record spills onto an overflow page.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn free_space(&self, work_size: usize) -> u32 {
        work_size.saturating_sub(self.record_len).min(u32::MAX as usize) as u32
    }

    /// Store `tuple` in the first removed slot, or a new one at the end.
    ///
    /// Hands the tuple back when every addressable slot is taken.
    pub fn add(&mut self, tuple: Vec<u8>) -> Result<usize, Vec<u8>> {
        let slot = match self.tuples.iter().position(Option::is_none) {
            Some(hole) => {
                self.record_len += tuple.len();
                self.tuples[hole] = Some(tuple);
                hole
            }
            None if self.tuples.len() <= usize::from(MAX_SLOT) => {
                self.record_len += SLOT_OVERHEAD + tuple.len();
                self.tuples.push(Some(tuple));
                self.tuples.len() - 1
            }
            None => return Err(tuple),
        };
        self.live += 1;
        self.dirty = true;
        Ok(slot)
    }

    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&[u8]> {
        self.tuples.get(slot)?.as_deref()
    }

    /// Replace the live tuple at `slot` and return the old bytes.
    pub fn set(&mut self, slot: usize, tuple: Vec<u8>) -> Option<Vec<u8>> {
        let entry = self.tuples.get_mut(slot)?;
        let old = entry.as_ref()?.len();
        self.record_len = self.record_len - old + tuple.len();
        self.dirty = true;
        entry.replace(tuple)
    }

    /// Remove the live tuple at `slot` and return its bytes.
    pub fn remove(&mut self, slot: usize) -> Option<Vec<u8>> {
        let tuple = self.tuples.get_mut(slot)?.take()?;
        self.record_len -= tuple.len();
        self.live -= 1;
        while self.tuples.last().is_some_and(Option::is_none) {
            self.tuples.pop();
            self.record_len -= SLOT_OVERHEAD;
        }
        self.dirty = true;
        Some(tuple)
    }
}

impl Cacheable for DataPage {
    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn write_order(&self) -> u64 {
        self.page_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn page_with(tuples: &[&[u8]]) -> DataPage {
        let mut page = DataPage::new(3);
        for t in tuples {
            page.add(t.to_vec()).expect("free slot");
        }
        page
    }

    fn roundtrip(page: &mut DataPage) -> DataPage {
        let bytes = page.encode();
        DataPage::decode(page.page_id, page.header, &bytes).expect("decode")
    }

    #[test]
    fn test_add_assigns_sequential_slots() {
        let page = page_with(&[b"alpha", b"", b"gamma"]);
        assert_eq!(page.live_count(), 3);
        assert_eq!(page.get(0), Some(&b"alpha"[..]));
        assert_eq!(page.get(1), Some(&b""[..]));
        assert_eq!(page.get(2), Some(&b"gamma"[..]));
        assert_eq!(page.get(3), None);
        assert_eq!(page.record_len(), 3 * SLOT_OVERHEAD + 10);
    }

    #[test]
    fn test_removed_slots_keep_positions() {
        let mut page = page_with(&[b"a", b"b", b"c"]);
        assert_eq!(page.remove(1), Some(b"b".to_vec()));
        assert_eq!(page.remove(1), None);

        let decoded = roundtrip(&mut page);
        assert_eq!(decoded.get(0), Some(&b"a"[..]));
        assert_eq!(decoded.get(1), None);
        assert_eq!(decoded.get(2), Some(&b"c"[..]));
        assert_eq!(decoded.live_count(), 2);
        assert_eq!(decoded.record_len(), page.record_len());
    }

    #[test]
    fn test_holes_are_reused() {
        let mut page = page_with(&[b"a", b"b", b"c"]);
        page.remove(0);
        assert_eq!(page.add(b"z".to_vec()), Ok(0));
        assert_eq!(page.add(b"y".to_vec()), Ok(3));
    }

    #[test]
    fn test_slot_exhaustion_returns_tuple() {
        let mut page = DataPage::new(1);
        for _ in 0..=usize::from(MAX_SLOT) {
            page.add(Vec::new()).expect("free slot");
        }
        assert_eq!(page.add(b"late".to_vec()), Err(b"late".to_vec()));

        page.remove(10);
        assert_eq!(page.add(b"late".to_vec()), Ok(10));
    }

    #[test]
    fn test_trailing_holes_are_trimmed() {
        let mut page = page_with(&[b"a", b"b", b"c"]);
        page.remove(1);
        page.remove(2);
        assert_eq!(page.record_len(), SLOT_OVERHEAD + 1);
        assert_eq!(page.add(b"d".to_vec()), Ok(1));

        page.remove(0);
        page.remove(1);
        assert!(page.is_empty());
        assert_eq!(page.record_len(), 0);
    }

    #[test]
    fn test_set_replaces_and_tracks_length() {
        let mut page = page_with(&[b"short"]);
        assert_eq!(page.set(0, b"much longer".to_vec()), Some(b"short".to_vec()));
        assert_eq!(page.get(0), Some(&b"much longer"[..]));
        assert_eq!(page.record_len(), SLOT_OVERHEAD + 11);
        assert_eq!(page.set(1, b"x".to_vec()), None);
    }

    #[test]
    fn test_free_space() {
        let page = page_with(&[&[0u8; 100]]);
        assert_eq!(page.free_space(475), 371);
        assert_eq!(page.free_space(50), 0);
    }

    #[test]
    fn test_decode_rejects_tree_pages() {
        let mut header = PageHeader::unused();
        header.status = PageStatus::Leaf;
        assert!(matches!(
            DataPage::decode(1, header, &[]),
            Err(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn test_decode_rejects_count_mismatch() {
        let mut page = page_with(&[b"a", b"b"]);
        let bytes = page.encode();
        let mut header = page.header;
        header.tuple_count = 5;
        assert!(matches!(
            DataPage::decode(3, header, &bytes),
            Err(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn test_write_spills_to_overflow() {
        let storage = MemoryStorage::new();
        let mut store = PageStore::create(Box::new(storage), 512, 4).expect("create store");
        let id = store.free_page().expect("page").id;

        let mut page = DataPage::new(id);
        let big = vec![7u8; 1500];
        page.add(big.clone()).expect("slot");
        page.add(b"tail".to_vec()).expect("slot");
        page.write(&mut store).expect("write");
        assert!(!page.is_dirty());

        let (header, bytes) = store.read_value(id).expect("read");
        let loaded = DataPage::decode(id, header, &bytes).expect("decode");
        assert_eq!(loaded.get(0), Some(&big[..]));
        assert_eq!(loaded.get(1), Some(&b"tail"[..]));
        assert!(store.header().total_page_count > 1);
    }
}
