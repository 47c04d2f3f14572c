//! Value pointers.
//!
//! A pointer names one tuple slot on one data page, packed into the `u64`
//! the b-tree stores next to each key:
//!
//! - bits 0-15: slot index
//! - bits 16-63: data page id

use crate::index::IndexError;
use crate::storage::{ByteReader, PageId};

/// Largest page id a pointer can address.
pub const MAX_POINTER_PAGE: PageId = (1 << 48) - 1;

/// Largest slot index a pointer can address.
pub const MAX_SLOT: u16 = 0x7FFF;

/// Pack a page id and slot into a pointer.
pub fn pack(page_id: PageId, slot: usize) -> Result<u64, IndexError> {
    if page_id > MAX_POINTER_PAGE || slot > usize::from(MAX_SLOT) {
        return Err(IndexError::InvalidPointer { page_id, slot });
    }
    Ok((page_id << 16) | slot as u64)
}

/// Split a pointer into its page id and slot.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn unpack(ptr: u64) -> (PageId, usize) {
    (ptr >> 16, (ptr & 0xFFFF) as usize)
}

/// Encode the pointer list of a multi-value key: a `u32` count, then the
/// pointers.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_list(ptrs: &[u64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + ptrs.len() * 8);
    buf.extend_from_slice(&(ptrs.len() as u32).to_be_bytes());
    for ptr in ptrs {
        buf.extend_from_slice(&ptr.to_be_bytes());
    }
    buf
}

pub fn decode_list(bytes: &[u8]) -> Result<Vec<u64>, IndexError> {
    let mut reader = ByteReader::new(bytes);
    let count = reader.read_u32()? as usize;
    if reader.remaining() != count * 8 {
        return Err(IndexError::Corrupt(format!(
            "pointer list of {count} entries has {} bytes",
            reader.remaining()
        )));
    }
    (0..count)
        .map(|_| reader.read_u64().map_err(IndexError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_list() {
        let ptrs = [pack(3, 0).expect("pack"), pack(9, 12).expect("pack")];
        let bytes = encode_list(&ptrs);
        assert_eq!(bytes.len(), 4 + 16);
        assert_eq!(decode_list(&bytes).expect("decode"), ptrs);
        assert_eq!(decode_list(&encode_list(&[])).expect("decode"), Vec::<u64>::new());
    }

    #[test]
    fn test_truncated_pointer_list() {
        let bytes = encode_list(&[1, 2]);
        assert!(matches!(
            decode_list(&bytes[..bytes.len() - 3]),
            Err(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn test_pack_layout() {
        assert_eq!(pack(0, 0).expect("pack"), 0);
        assert_eq!(pack(1, 3).expect("pack"), 0x1_0003);
        assert_eq!(unpack(0x1_0003), (1, 3));
    }

    #[test]
    fn test_limits() {
        let ptr = pack(MAX_POINTER_PAGE, usize::from(MAX_SLOT)).expect("pack at limits");
        assert_eq!(unpack(ptr), (MAX_POINTER_PAGE, usize::from(MAX_SLOT)));
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(matches!(
            pack(MAX_POINTER_PAGE + 1, 0),
            Err(IndexError::InvalidPointer { .. })
        ));
        assert!(matches!(
            pack(7, usize::from(MAX_SLOT) + 1),
            Err(IndexError::InvalidPointer { page_id: 7, .. })
        ));
    }
}
