//! Free-space list for data pages.
//!
//! Tracks data pages that still have room for more tuples, oldest first.
//! Lookups are a best-fit linear scan; the list stays short because pages
//! with less than `MIN_LEFT_FREE` bytes left are dropped from it.

use crate::storage::{FreeSpaceRecord, PageId};

/// Pages with less free space than this are not worth tracking.
pub const MIN_LEFT_FREE: u32 = 64;

/// Most entries written to the file header. The oldest are dropped first.
pub const MAX_PERSISTED: usize = 128;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeList {
    entries: Vec<FreeSpaceRecord>,
}

impl FreeList {
    /// Rebuild the list from the records persisted in the file header.
    #[must_use]
    pub fn from_records(records: &[FreeSpaceRecord]) -> Self {
        Self {
            entries: records.to_vec(),
        }
    }

    /// Records to persist, at most `MAX_PERSISTED` of the newest entries.
    #[must_use]
    pub fn to_records(&self) -> Vec<FreeSpaceRecord> {
        let skip = self.entries.len().saturating_sub(MAX_PERSISTED);
        self.entries[skip..].to_vec()
    }

    /// Page with the least free space that still fits `required` bytes.
    ///
    /// Ties go to the older entry.
    #[must_use]
    pub fn retrieve(&self, required: u32) -> Option<PageId> {
        self.entries
            .iter()
            .filter(|e| e.free >= required)
            .min_by_key(|e| e.free)
            .map(|e| e.page)
    }

    /// Record that `page` now has `free` bytes left.
    ///
    /// Updates the entry in place, drops it below `MIN_LEFT_FREE`, and
    /// appends a new entry for an untracked page with enough room.
    pub fn update(&mut self, page: PageId, free: u32) {
        let position = self.entries.iter().position(|e| e.page == page);
        match position {
            Some(i) if free < MIN_LEFT_FREE => {
                self.entries.remove(i);
            }
            Some(i) => self.entries[i].free = free,
            None if free >= MIN_LEFT_FREE => self.entries.push(FreeSpaceRecord { page, free }),
            None => {}
        }
    }

    /// Stop tracking `page`.
    pub fn remove(&mut self, page: PageId) {
        self.entries.retain(|e| e.page != page);
    }

    /// Free bytes recorded for `page`.
    #[cfg(test)]
    #[must_use]
    pub fn free_of(&self, page: PageId) -> Option<u32> {
        self.entries.iter().find(|e| e.page == page).map(|e| e.free)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_fit() {
        let mut list = FreeList::default();
        list.update(1, 400);
        list.update(2, 120);
        list.update(3, 250);

        assert_eq!(list.retrieve(100), Some(2));
        assert_eq!(list.retrieve(121), Some(3));
        assert_eq!(list.retrieve(300), Some(1));
        assert_eq!(list.retrieve(401), None);
    }

    #[test]
    fn test_ties_prefer_oldest() {
        let mut list = FreeList::default();
        list.update(9, 200);
        list.update(4, 200);
        assert_eq!(list.retrieve(150), Some(9));
    }

    #[test]
    fn test_update_drops_nearly_full_pages() {
        let mut list = FreeList::default();
        list.update(1, 300);
        list.update(1, MIN_LEFT_FREE - 1);
        assert!(list.is_empty());

        // Untracked pages below the threshold are not added at all.
        list.update(2, 10);
        assert!(list.is_empty());

        list.update(2, MIN_LEFT_FREE);
        assert_eq!(list.free_of(2), Some(MIN_LEFT_FREE));
    }

    #[test]
    fn test_remove() {
        let mut list = FreeList::default();
        list.update(1, 300);
        list.update(2, 300);
        list.remove(1);
        assert_eq!(list.len(), 1);
        assert_eq!(list.retrieve(1), Some(2));
    }

    #[test]
    fn test_persisted_records_keep_newest() {
        let mut list = FreeList::default();
        for page in 0..(MAX_PERSISTED as u64 + 10) {
            list.update(page, 100);
        }
        let records = list.to_records();
        assert_eq!(records.len(), MAX_PERSISTED);
        assert_eq!(records[0].page, 10);

        let restored = FreeList::from_records(&records);
        assert_eq!(restored.len(), MAX_PERSISTED);
        assert_eq!(restored.free_of(10), Some(100));
        assert_eq!(restored.free_of(9), None);
    }
}
