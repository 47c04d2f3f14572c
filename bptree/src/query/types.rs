//! Predicates for range scans.
//!
//! An `IndexQuery` pairs an operator with its operands. The tree uses the
//! operands to pick the leaves a scan has to visit, then `test_value` to
//! filter the keys on them.

use std::fmt;

use crate::query::QueryError;
use crate::query::like::LikePattern;
use crate::types::Value;

/// Scan operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Every key.
    Any,
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Between, bounds included.
    Bw,
    /// Outside `Bw`.
    Nbw,
    /// Between, bounds excluded.
    Bwx,
    /// Outside `Bwx`.
    Nbwx,
    /// One of a set.
    In,
    /// None of a set.
    NotIn,
    /// Starts with a prefix.
    StartWith,
    /// Does not start with a prefix.
    NotStartWith,
    /// Starts with a prefix and the rest matches a LIKE pattern.
    Like,
}

impl Operator {
    /// Operators whose result is everything outside one key range.
    #[must_use]
    pub const fn is_complement(self) -> bool {
        matches!(
            self,
            Self::Ne | Self::Nbw | Self::Nbwx | Self::NotIn | Self::NotStartWith
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "ANY",
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Gt => "GT",
            Self::Ge => "GE",
            Self::Lt => "LT",
            Self::Le => "LE",
            Self::Bw => "BW",
            Self::Nbw => "NBW",
            Self::Bwx => "BWX",
            Self::Nbwx => "NBWX",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
            Self::StartWith => "START_WITH",
            Self::NotStartWith => "NOT_START_WITH",
            Self::Like => "LIKE",
        };
        f.write_str(name)
    }
}

/// A scan predicate: an operator and its operands.
///
/// # Invariants
/// - range operators hold `lo <= hi`
/// - set operators hold sorted, distinct, non-empty operands
/// - prefix operators hold the prefix and, when one exists, its successor
#[derive(Debug, Clone)]
pub struct IndexQuery {
    operator: Operator,
    operands: Vec<Value>,
    pattern: Option<LikePattern>,
}

impl IndexQuery {
    fn single(operator: Operator, operand: Value) -> Self {
        Self {
            operator,
            operands: vec![operand],
            pattern: None,
        }
    }

    fn range(operator: Operator, lo: Value, hi: Value) -> Result<Self, QueryError> {
        if lo > hi {
            return Err(QueryError::InvertedRange { operator });
        }
        Ok(Self {
            operator,
            operands: vec![lo, hi],
            pattern: None,
        })
    }

    fn set(operator: Operator, values: impl IntoIterator<Item = Value>) -> Result<Self, QueryError> {
        let mut operands: Vec<Value> = values.into_iter().collect();
        if operands.is_empty() {
            return Err(QueryError::EmptyOperands { operator });
        }
        operands.sort();
        operands.dedup();
        Ok(Self {
            operator,
            operands,
            pattern: None,
        })
    }

    fn prefix(operator: Operator, prefix: Value) -> Self {
        let mut operands = vec![prefix];
        if let Some(successor) = operands[0].prefix_successor() {
            operands.push(successor);
        }
        Self {
            operator,
            operands,
            pattern: None,
        }
    }

    /// Match every key.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            operator: Operator::Any,
            operands: Vec::new(),
            pattern: None,
        }
    }

    #[must_use]
    pub fn eq(key: impl Into<Value>) -> Self {
        Self::single(Operator::Eq, key.into())
    }

    #[must_use]
    pub fn ne(key: impl Into<Value>) -> Self {
        Self::single(Operator::Ne, key.into())
    }

    #[must_use]
    pub fn gt(key: impl Into<Value>) -> Self {
        Self::single(Operator::Gt, key.into())
    }

    #[must_use]
    pub fn ge(key: impl Into<Value>) -> Self {
        Self::single(Operator::Ge, key.into())
    }

    #[must_use]
    pub fn lt(key: impl Into<Value>) -> Self {
        Self::single(Operator::Lt, key.into())
    }

    #[must_use]
    pub fn le(key: impl Into<Value>) -> Self {
        Self::single(Operator::Le, key.into())
    }

    /// Keys in `[lo, hi]`.
    pub fn between(lo: impl Into<Value>, hi: impl Into<Value>) -> Result<Self, QueryError> {
        Self::range(Operator::Bw, lo.into(), hi.into())
    }

    /// Keys outside `[lo, hi]`.
    pub fn not_between(lo: impl Into<Value>, hi: impl Into<Value>) -> Result<Self, QueryError> {
        Self::range(Operator::Nbw, lo.into(), hi.into())
    }

    /// Keys in `(lo, hi)`.
    pub fn between_exclusive(
        lo: impl Into<Value>,
        hi: impl Into<Value>,
    ) -> Result<Self, QueryError> {
        Self::range(Operator::Bwx, lo.into(), hi.into())
    }

    /// Keys outside `(lo, hi)`.
    pub fn not_between_exclusive(
        lo: impl Into<Value>,
        hi: impl Into<Value>,
    ) -> Result<Self, QueryError> {
        Self::range(Operator::Nbwx, lo.into(), hi.into())
    }

    /// Keys equal to one of `values`.
    pub fn in_set<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Result<Self, QueryError> {
        Self::set(Operator::In, values.into_iter().map(Into::into))
    }

    /// Keys equal to none of `values`.
    pub fn not_in_set<V: Into<Value>>(
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self, QueryError> {
        Self::set(Operator::NotIn, values.into_iter().map(Into::into))
    }

    #[must_use]
    pub fn start_with(prefix: impl Into<Value>) -> Self {
        Self::prefix(Operator::StartWith, prefix.into())
    }

    #[must_use]
    pub fn not_start_with(prefix: impl Into<Value>) -> Self {
        Self::prefix(Operator::NotStartWith, prefix.into())
    }

    /// Keys that start with `prefix` and whose remainder matches `pattern`.
    ///
    /// An empty pattern accepts any remainder.
    pub fn like(prefix: impl Into<Value>, pattern: &[u8]) -> Result<Self, QueryError> {
        let mut query = Self::prefix(Operator::Like, prefix.into());
        query.pattern = Some(LikePattern::parse(pattern)?);
        Ok(query)
    }

    #[must_use]
    pub const fn operator(&self) -> Operator {
        self.operator
    }

    #[must_use]
    pub fn operands(&self) -> &[Value] {
        &self.operands
    }

    /// Lowest operand (the prefix for prefix operators).
    #[must_use]
    pub fn first(&self) -> Option<&Value> {
        self.operands.first()
    }

    /// Highest operand that bounds the matching range.
    ///
    /// For prefix operators this is the prefix successor, absent when the
    /// prefix is empty or all `0xFF`.
    #[must_use]
    pub fn last(&self) -> Option<&Value> {
        match self.operator {
            Operator::StartWith | Operator::NotStartWith | Operator::Like => self.operands.get(1),
            _ => self.operands.last(),
        }
    }

    fn operand(&self, idx: usize) -> &Value {
        &self.operands[idx]
    }

    /// Whether `value` satisfies the predicate.
    #[must_use]
    pub fn test_value(&self, value: &Value) -> bool {
        match self.operator {
            Operator::Any => true,
            Operator::Eq => value == self.operand(0),
            Operator::Ne => value != self.operand(0),
            Operator::Gt => value > self.operand(0),
            Operator::Ge => value >= self.operand(0),
            Operator::Lt => value < self.operand(0),
            Operator::Le => value <= self.operand(0),
            Operator::Bw => value >= self.operand(0) && value <= self.operand(1),
            Operator::Nbw => value < self.operand(0) || value > self.operand(1),
            Operator::Bwx => value > self.operand(0) && value < self.operand(1),
            Operator::Nbwx => value <= self.operand(0) || value >= self.operand(1),
            Operator::In => self.operands.binary_search(value).is_ok(),
            Operator::NotIn => self.operands.binary_search(value).is_err(),
            Operator::StartWith => value.starts_with(self.operand(0)),
            Operator::NotStartWith => !value.starts_with(self.operand(0)),
            Operator::Like => {
                let prefix = self.operand(0);
                if !value.starts_with(prefix) {
                    return false;
                }
                match &self.pattern {
                    Some(pattern) if !pattern.is_empty() => {
                        pattern.matches(&value.as_bytes()[prefix.len()..])
                    }
                    _ => true,
                }
            }
        }
    }
}

impl fmt::Display for IndexQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operator)?;
        for operand in &self.operands {
            write!(f, " {operand:?}")?;
        }
        Ok(())
    }
}
