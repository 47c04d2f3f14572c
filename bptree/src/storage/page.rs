//! Page types and constants for the storage engine.
//!
//! Every page starts with a fixed header area (`page_header_size` bytes, 127 by
//! default) followed by the payload. Multi-byte integers are big-endian.

use crate::storage::io::StorageError;

/// Default page size in bytes (4KB).
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of bytes reserved for the page header.
pub const DEFAULT_PAGE_HEADER_SIZE: usize = 127;

/// A page identifier (0-indexed page number).
pub type PageId = u64;

/// Absent page link. Persisted as `-1`.
pub const NO_PAGE: PageId = u64::MAX;

/// Page status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageStatus {
    /// Freshly allocated or recycled, no content yet.
    Unused = 0,
    /// B-tree leaf node.
    Leaf = 1,
    /// B-tree branch node.
    Branch = 2,
    /// Value-store data page.
    DataRecord = 10,
    /// Continuation of a value that did not fit its first page.
    Overflow = 126,
}

impl TryFrom<u8> for PageStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unused),
            1 => Ok(Self::Leaf),
            2 => Ok(Self::Branch),
            10 => Ok(Self::DataRecord),
            126 => Ok(Self::Overflow),
            _ => Err(value),
        }
    }
}

/// Header stored at the start of every page.
///
/// Layout:
/// - `status`: 1 byte
/// - `data_len`: 4 bytes (payload bytes on this page)
/// - `record_len`: 4 bytes (payload bytes across the whole chain)
/// - `next_page`: 8 bytes (overflow successor or free-list link)
/// - `parent_page`: 8 bytes (B-tree nodes)
/// - `value_count`: 2 bytes (B-tree nodes)
/// - `prefix_len`: 2 bytes (B-tree nodes)
/// - `left_lookup`: 4 bytes (B-tree leaves)
/// - `tuple_count`: 4 bytes (data pages)
///
/// Total: 37 bytes, always below the reserved header size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub status: PageStatus,
    pub data_len: u32,
    pub record_len: u32,
    pub next_page: PageId,
    pub parent_page: PageId,
    pub value_count: u16,
    pub prefix_len: u16,
    pub left_lookup: u32,
    pub tuple_count: u32,
}

impl PageHeader {
    /// Encoded size of the header in bytes.
    pub const SIZE: usize = 37;

    /// Header of a page that holds nothing.
    #[must_use]
    pub const fn unused() -> Self {
        Self {
            status: PageStatus::Unused,
            data_len: 0,
            record_len: 0,
            next_page: NO_PAGE,
            parent_page: NO_PAGE,
            value_count: 0,
            prefix_len: 0,
            left_lookup: 0,
            tuple_count: 0,
        }
    }

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.status as u8;
        buf[1..5].copy_from_slice(&self.data_len.to_be_bytes());
        buf[5..9].copy_from_slice(&self.record_len.to_be_bytes());
        buf[9..17].copy_from_slice(&self.next_page.to_be_bytes());
        buf[17..25].copy_from_slice(&self.parent_page.to_be_bytes());
        buf[25..27].copy_from_slice(&self.value_count.to_be_bytes());
        buf[27..29].copy_from_slice(&self.prefix_len.to_be_bytes());
        buf[29..33].copy_from_slice(&self.left_lookup.to_be_bytes());
        buf[33..37].copy_from_slice(&self.tuple_count.to_be_bytes());
        buf
    }

    /// Deserialize a header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let mut reader = ByteReader::new(bytes);
        let status_byte = reader.read_u8()?;
        let status = PageStatus::try_from(status_byte).map_err(|v| {
            StorageError::Corruption(format!("invalid page status: 0x{v:02x}"))
        })?;
        Ok(Self {
            status,
            data_len: reader.read_u32()?,
            record_len: reader.read_u32()?,
            next_page: reader.read_u64()?,
            parent_page: reader.read_u64()?,
            value_count: reader.read_u16()?,
            prefix_len: reader.read_u16()?,
            left_lookup: reader.read_u32()?,
            tuple_count: reader.read_u32()?,
        })
    }
}

impl Default for PageHeader {
    fn default() -> Self {
        Self::unused()
    }
}

/// A materialized page: its number, header and payload area.
#[derive(Clone)]
pub struct Page {
    pub id: PageId,
    pub header: PageHeader,
    data: Vec<u8>,
}

impl Page {
    /// Create a page with an unused header and a zeroed payload of `work_size` bytes.
    #[must_use]
    pub fn new(id: PageId, work_size: usize) -> Self {
        Self {
            id,
            header: PageHeader::unused(),
            data: vec![0u8; work_size],
        }
    }

    /// Create a page from its header and payload area.
    #[must_use]
    pub const fn from_parts(id: PageId, header: PageHeader, data: Vec<u8>) -> Self {
        Self { id, header, data }
    }

    /// Payload area of the page.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes of the payload that are in use (`data_len`).
    #[must_use]
    pub fn used_data(&self) -> &[u8] {
        let len = (self.header.data_len as usize).min(self.data.len());
        &self.data[..len]
    }

    /// Replace the start of the payload with `bytes` and set `data_len`.
    ///
    /// # Panics
    /// Panics if `bytes` is longer than the payload area.
    #[allow(clippy::cast_possible_truncation)]
    pub fn fill(&mut self, bytes: &[u8]) {
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.data[bytes.len()..].fill(0);
        self.header.data_len = bytes.len() as u32;
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

/// Big-endian cursor over an encoded record.
///
/// Running off the end is reported as corruption, since every record this
/// crate reads was written with its exact length.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset into the buffer.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], StorageError> {
        if self.remaining() < len {
            return Err(StorageError::Corruption(format!(
                "record truncated: need {len} bytes at offset {}, have {}",
                self.pos,
                self.remaining()
            )));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], StorageError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, StorageError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, StorageError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, StorageError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, StorageError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, StorageError> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, StorageError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Read a varint-encoded unsigned integer.
    pub fn read_varint(&mut self) -> Result<u64, StorageError> {
        let (value, used) = crate::storage::varint::decode_varint(&self.buf[self.pos..])
            .map_err(|e| StorageError::Corruption(format!("at offset {}: {e}", self.pos)))?;
        self.pos += used;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_header_roundtrip() {
        let header = PageHeader {
            status: PageStatus::Leaf,
            data_len: 1234,
            record_len: 5678,
            next_page: NO_PAGE,
            parent_page: 42,
            value_count: 17,
            prefix_len: 3,
            left_lookup: 2,
            tuple_count: 0,
        };

        let bytes = header.to_bytes();
        let restored = PageHeader::from_bytes(&bytes).expect("should parse");

        assert_eq!(restored, header);
    }

    #[test]
    fn test_no_page_is_persisted_as_minus_one() {
        let header = PageHeader::unused();
        let bytes = header.to_bytes();
        let next = i64::from_be_bytes(bytes[9..17].try_into().expect("8 bytes"));
        assert_eq!(next, -1);
    }

    #[test]
    fn test_page_status_conversion() {
        assert_eq!(PageStatus::try_from(1), Ok(PageStatus::Leaf));
        assert_eq!(PageStatus::try_from(126), Ok(PageStatus::Overflow));
        assert!(PageStatus::try_from(0xFF).is_err());
    }

    #[test]
    fn test_invalid_status_is_corruption() {
        let mut bytes = PageHeader::unused().to_bytes();
        bytes[0] = 77;
        assert!(matches!(
            PageHeader::from_bytes(&bytes),
            Err(StorageError::Corruption(_))
        ));
    }

    #[test]
    fn test_page_fill_sets_data_len() {
        let mut page = Page::new(3, 64);
        page.fill(b"hello");
        assert_eq!(page.header.data_len, 5);
        assert_eq!(page.used_data(), b"hello");
        assert_eq!(page.data().len(), 64);
    }

    #[test]
    fn test_byte_reader_truncation() {
        let mut reader = ByteReader::new(&[0, 1, 2]);
        assert_eq!(reader.read_u16().expect("u16"), 1);
        assert!(matches!(
            reader.read_u32(),
            Err(StorageError::Corruption(_))
        ));
    }
}
