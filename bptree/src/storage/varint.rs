//! Variable-length unsigned integer encoding for on-page pointers.
//!
//! Each byte carries seven data bits, least-significant group first. The high
//! bit is set on every byte except the last.
//!
//! | Value range          | Bytes |
//! |----------------------|-------|
//! | 0 - 127              | 1     |
//! | 128 - 16383          | 2     |
//! | 16384 - 2097151      | 3     |
//! | ...                  | ...   |
//! | up to `u64::MAX`     | 10    |

/// Longest possible encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

const CONTINUATION: u8 = 0x80;
const DATA_MASK: u8 = 0x7F;

/// Number of bytes `value` occupies when encoded.
#[must_use]
pub const fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value > DATA_MASK as u64 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Append the encoding of `value` to `out`.
#[allow(clippy::cast_possible_truncation)]
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    while value > u64::from(DATA_MASK) {
        out.push((value as u8 & DATA_MASK) | CONTINUATION);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Decode a value from the start of `buf`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize), VarintError> {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().enumerate().take(MAX_VARINT_LEN) {
        let shift = 7 * i;
        let bits = u64::from(byte & DATA_MASK);
        if shift == 63 && bits > 1 {
            return Err(VarintError::Overflow);
        }
        value |= bits << shift;
        if byte & CONTINUATION == 0 {
            return Ok((value, i + 1));
        }
    }
    if buf.len() >= MAX_VARINT_LEN {
        Err(VarintError::Overflow)
    } else {
        Err(VarintError::Truncated)
    }
}

/// Errors produced while decoding a varint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarintError {
    /// The buffer ended before the terminating byte.
    Truncated,
    /// The encoding does not fit in 64 bits.
    Overflow,
}

impl std::fmt::Display for VarintError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated varint"),
            Self::Overflow => write!(f, "varint overflows 64 bits"),
        }
    }
}

impl std::error::Error for VarintError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_values_take_one_byte() {
        let mut buf = Vec::new();
        encode_varint(0, &mut buf);
        encode_varint(127, &mut buf);
        assert_eq!(buf, vec![0x00, 0x7F]);
        assert_eq!(varint_len(127), 1);
    }

    #[test]
    fn test_boundary_lengths() {
        assert_eq!(varint_len(128), 2);
        assert_eq!(varint_len(16_383), 2);
        assert_eq!(varint_len(16_384), 3);
        assert_eq!(varint_len(u64::MAX), MAX_VARINT_LEN);
    }

    #[test]
    fn test_low_group_comes_first() {
        let mut buf = Vec::new();
        encode_varint(300, &mut buf);
        assert_eq!(buf, vec![0xAC, 0x02]);
        assert_eq!(decode_varint(&buf), Ok((300, 2)));
    }

    #[test]
    fn test_decode_extremes() {
        for value in [0, 1, 0x7FFF_FFFF_FFFF, u64::MAX] {
            let mut buf = Vec::new();
            encode_varint(value, &mut buf);
            assert_eq!(buf.len(), varint_len(value));
            assert_eq!(decode_varint(&buf), Ok((value, buf.len())));
        }
    }

    #[test]
    fn test_decode_stops_at_terminator() {
        let buf = [0x05, 0xFF, 0xFF];
        assert_eq!(decode_varint(&buf), Ok((5, 1)));
    }

    #[test]
    fn test_decode_truncated() {
        assert_eq!(decode_varint(&[0x80, 0x80]), Err(VarintError::Truncated));
        assert_eq!(decode_varint(&[]), Err(VarintError::Truncated));
    }

    #[test]
    fn test_decode_overflow() {
        let buf = [0xFF; 11];
        assert_eq!(decode_varint(&buf), Err(VarintError::Overflow));
    }
}
