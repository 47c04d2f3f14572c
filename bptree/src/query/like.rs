//! Byte-level LIKE patterns.
//!
//! `%` matches any run of bytes (including none), `_` matches exactly one
//! byte, and `\` escapes the next `%`, `_` or `\`.

use crate::query::QueryError;

const ESCAPE: u8 = b'\\';

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(Vec<u8>),
    One,
    Any,
}

/// A compiled LIKE pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikePattern {
    segments: Vec<Segment>,
}

impl LikePattern {
    /// Compile `pattern`.
    ///
    /// # Errors
    /// Returns `QueryError::MalformedPattern` for a trailing escape or an
    /// escape before any byte other than `%`, `_` or `\`.
    pub fn parse(pattern: &[u8]) -> Result<Self, QueryError> {
        let mut segments = Vec::new();
        let mut pending = Vec::new();
        let mut bytes = pattern.iter().copied();

        while let Some(b) = bytes.next() {
            match b {
                ESCAPE => match bytes.next() {
                    Some(c @ (b'%' | b'_' | ESCAPE)) => pending.push(c),
                    _ => {
                        return Err(QueryError::MalformedPattern(
                            String::from_utf8_lossy(pattern).into_owned(),
                        ));
                    }
                },
                b'%' => {
                    if !pending.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut pending)));
                    }
                    // Consecutive runs collapse into one.
                    if segments.last() != Some(&Segment::Any) {
                        segments.push(Segment::Any);
                    }
                }
                b'_' => {
                    if !pending.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut pending)));
                    }
                    segments.push(Segment::One);
                }
                _ => pending.push(b),
            }
        }
        if !pending.is_empty() {
            segments.push(Segment::Literal(pending));
        }
        Ok(Self { segments })
    }

    /// Whether the pattern has no segments and so matches only empty input.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether `target` matches the whole pattern.
    #[must_use]
    pub fn matches(&self, target: &[u8]) -> bool {
        match_from(&self.segments, target)
    }
}

fn match_from(segments: &[Segment], target: &[u8]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return target.is_empty();
    };
    match first {
        Segment::Literal(lit) => {
            target.starts_with(lit) && match_from(rest, &target[lit.len()..])
        }
        Segment::One => !target.is_empty() && match_from(rest, &target[1..]),
        Segment::Any => {
            if rest.is_empty() {
                return true;
            }
            (0..=target.len()).any(|skip| match_from(rest, &target[skip..]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn like(pattern: &str) -> LikePattern {
        LikePattern::parse(pattern.as_bytes()).expect("valid pattern")
    }

    #[test]
    fn test_literal_only() {
        assert!(like("abc").matches(b"abc"));
        assert!(!like("abc").matches(b"abcd"));
        assert!(!like("abc").matches(b"ab"));
    }

    #[test]
    fn test_wildcards() {
        assert!(like("a%c").matches(b"ac"));
        assert!(like("a%c").matches(b"abbbc"));
        assert!(!like("a%c").matches(b"abcd"));
        assert!(like("a_c").matches(b"abc"));
        assert!(!like("a_c").matches(b"ac"));
        assert!(like("%").matches(b""));
        assert!(like("%x%").matches(b"axb"));
        assert!(like("_%_").matches(b"ab"));
        assert!(!like("_%_").matches(b"a"));
    }

    #[test]
    fn test_backtracking_any() {
        assert!(like("%ab%ab").matches(b"xxabyyabab"));
        assert!(!like("%ab%ab").matches(b"xxabyya"));
    }

    #[test]
    fn test_escapes() {
        let p = like(r"100\%");
        assert!(p.matches(b"100%"));
        assert!(!p.matches(b"1000"));
        assert!(like(r"a\_b").matches(b"a_b"));
        assert!(!like(r"a\_b").matches(b"axb"));
        assert!(like(r"a\\").matches(b"a\\"));
    }

    #[test]
    fn test_malformed_patterns() {
        assert!(matches!(
            LikePattern::parse(b"abc\\"),
            Err(QueryError::MalformedPattern(_))
        ));
        assert!(matches!(
            LikePattern::parse(b"a\\bc"),
            Err(QueryError::MalformedPattern(_))
        ));
    }

    #[test]
    fn test_empty_pattern() {
        let p = like("");
        assert!(p.is_empty());
        assert!(p.matches(b""));
        assert!(!p.matches(b"a"));
    }
}
