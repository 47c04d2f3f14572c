//! Scan predicates.
//!
//! Queries are built with the `IndexQuery` constructors and handed to
//! `BTree::search` or `BTreeIndex::search_values`:
//!
//! ```ignore
//! use bptree::query::IndexQuery;
//!
//! let query = IndexQuery::between("k100", "k199")?;
//! tree.search(&query, |key, ptr| {
//!     println!("{key:?} -> {ptr}");
//!     true
//! })?;
//! ```

mod like;
mod types;

pub use like::LikePattern;
pub use types::{IndexQuery, Operator};

/// Errors raised while building a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Lower bound above the upper bound.
    InvertedRange { operator: Operator },
    /// Set operator without operands.
    EmptyOperands { operator: Operator },
    /// LIKE pattern with a dangling or unknown escape.
    MalformedPattern(String),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvertedRange { operator } => {
                write!(f, "{operator}: lower bound is above upper bound")
            }
            Self::EmptyOperands { operator } => write!(f, "{operator}: no operands"),
            Self::MalformedPattern(p) => write!(f, "malformed LIKE pattern: {p}"),
        }
    }
}

impl std::error::Error for QueryError {}
