//! Range scans over the leaf chain.
//!
//! A query becomes one or two segments, each a key range plus the leaves
//! that bound it. A scan walks the `next` links from the first leaf of a
//! segment to its last. Boundary leaves are trimmed by binary search; every
//! emitted key is checked against the segment bounds, and set and pattern
//! operators also filter with `IndexQuery::test_value`.

use std::ops::{Bound, RangeBounds};

use crate::query::{IndexQuery, Operator};
use crate::storage::btree::node::BTreeNode;
use crate::storage::btree::tree::{BTreeError, TreeCore};
use crate::storage::page::{NO_PAGE, PageId};
use crate::types::Value;

/// A key range and the leaves that hold it, first and last included.
#[derive(Debug, Clone)]
struct Segment {
    start: PageId,
    end: PageId,
    lower: Bound<Value>,
    upper: Bound<Value>,
}

impl Segment {
    fn new(core: &mut TreeCore, lower: Bound<Value>, upper: Bound<Value>) -> Result<Self, BTreeError> {
        let start = match &lower {
            Bound::Included(v) | Bound::Excluded(v) => core.locate(v)?.boundary,
            Bound::Unbounded => core.edge_leaf(false)?,
        };
        let end = match (&lower, &upper) {
            (Bound::Unbounded, Bound::Excluded(v)) => core.locate(v)?.boundary,
            (_, Bound::Included(v) | Bound::Excluded(v)) => core.right_leaf(v)?,
            (_, Bound::Unbounded) => core.edge_leaf(true)?,
        };
        Ok(Self {
            start,
            end,
            lower,
            upper,
        })
    }

    fn bounds(&self) -> (Bound<&Value>, Bound<&Value>) {
        (self.lower.as_ref(), self.upper.as_ref())
    }
}

fn operand(query: &IndexQuery, last: bool) -> Result<Value, BTreeError> {
    let found = if last { query.last() } else { query.first() };
    found.cloned().ok_or_else(|| {
        BTreeError::Corrupt(format!("{} query without operands", query.operator()))
    })
}

/// Key ranges covered by `query`, in ascending order and disjoint.
fn key_ranges(query: &IndexQuery) -> Result<Vec<(Bound<Value>, Bound<Value>)>, BTreeError> {
    use Bound::{Excluded, Included, Unbounded};

    let first = || operand(query, false);
    let last = || operand(query, true);
    let successor = || query.last().cloned().map_or(Unbounded, Excluded);

    let ranges = match query.operator() {
        Operator::Any | Operator::NotIn => vec![(Unbounded, Unbounded)],
        Operator::Eq => vec![(Included(first()?), Included(first()?))],
        Operator::Gt => vec![(Excluded(first()?), Unbounded)],
        Operator::Ge => vec![(Included(first()?), Unbounded)],
        Operator::Lt => vec![(Unbounded, Excluded(first()?))],
        Operator::Le => vec![(Unbounded, Included(first()?))],
        Operator::Bw | Operator::In => vec![(Included(first()?), Included(last()?))],
        Operator::Bwx => {
            let (lo, hi) = (first()?, last()?);
            if lo == hi {
                Vec::new()
            } else {
                vec![(Excluded(lo), Excluded(hi))]
            }
        }
        Operator::StartWith | Operator::Like => vec![(Included(first()?), successor())],
        Operator::Ne => vec![(Unbounded, Excluded(first()?)), (Excluded(first()?), Unbounded)],
        Operator::Nbw => vec![(Unbounded, Excluded(first()?)), (Excluded(last()?), Unbounded)],
        Operator::Nbwx => {
            let (lo, hi) = (first()?, last()?);
            if lo == hi {
                vec![(Unbounded, Unbounded)]
            } else {
                vec![(Unbounded, Included(lo)), (Included(hi), Unbounded)]
            }
        }
        Operator::NotStartWith => {
            let mut ranges = vec![(Unbounded, Excluded(first()?))];
            if let Some(successor) = query.last() {
                ranges.push((Included(successor.clone()), Unbounded));
            }
            ranges
        }
    };
    Ok(ranges)
}

pub(super) fn search<F>(
    core: &mut TreeCore,
    query: &IndexQuery,
    mut callback: F,
) -> Result<(), BTreeError>
where
    F: FnMut(&Value, u64) -> bool,
{
    let filter = matches!(
        query.operator(),
        Operator::In | Operator::NotIn | Operator::Like
    );
    for (lower, upper) in key_ranges(query)? {
        let segment = Segment::new(core, lower, upper)?;
        if !walk(core, &segment, query, filter, &mut callback)? {
            break;
        }
    }
    Ok(())
}

/// Visit every leaf of `segment`. Returns `false` once the callback stops.
fn walk<F>(
    core: &mut TreeCore,
    segment: &Segment,
    query: &IndexQuery,
    filter: bool,
    callback: &mut F,
) -> Result<bool, BTreeError>
where
    F: FnMut(&Value, u64) -> bool,
{
    let mut page_id = segment.start;
    let mut steps = 0u64;
    loop {
        steps += 1;
        core.check_walk(steps, segment.start)?;
        let leaf = core.fetch(page_id)?;
        if !leaf.is_leaf() {
            core.release(leaf)?;
            return Err(BTreeError::Corrupt(format!(
                "page {page_id} in the leaf chain is not a leaf"
            )));
        }
        let edges = (page_id == segment.start, page_id == segment.end);
        let keep_going = scan_leaf(&leaf, segment, edges, filter.then_some(query), callback);
        let next = leaf.next();
        core.release(leaf)?;

        if !keep_going {
            return Ok(false);
        }
        if edges.1 {
            return Ok(true);
        }
        if next == page_id {
            return Err(BTreeError::Corrupt(format!("leaf {page_id} links to itself")));
        }
        if next == NO_PAGE {
            return Err(BTreeError::Corrupt(format!(
                "leaf chain from {} ended before boundary leaf {}",
                segment.start, segment.end
            )));
        }
        page_id = next;
    }
}

/// Emit the entries of one leaf that fall in `segment`.
///
/// Returns `false` once the callback stops.
fn scan_leaf<F>(
    leaf: &BTreeNode,
    segment: &Segment,
    (first_edge, last_edge): (bool, bool),
    filter: Option<&IndexQuery>,
    callback: &mut F,
) -> bool
where
    F: FnMut(&Value, u64) -> bool,
{
    let keys = leaf.keys();
    let lo = match (&segment.lower, first_edge) {
        (Bound::Included(v), true) => keys.partition_point(|k| k < v),
        (Bound::Excluded(v), true) => keys.partition_point(|k| k <= v),
        _ => 0,
    };
    let hi = match (&segment.upper, last_edge) {
        (Bound::Included(v), true) => keys.partition_point(|k| k <= v),
        (Bound::Excluded(v), true) => keys.partition_point(|k| k < v),
        _ => keys.len(),
    };

    let bounds = segment.bounds();
    for idx in lo..hi.max(lo) {
        let key = &keys[idx];
        if !bounds.contains(key) || filter.is_some_and(|q| !q.test_value(key)) {
            continue;
        }
        if !callback(key, leaf.ptrs()[idx]) {
            return false;
        }
    }
    true
}
