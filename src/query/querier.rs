//! Queriers: `select` and label enumeration over a time window
//!
//! ```text
//!                     ┌──────────────┐
//!                     │  DbQuerier   │  concat or N-way merge
//!                     └──────┬───────┘
//!             ┌──────────────┼──────────────┐
//!      ┌──────▼──────┐ ┌─────▼───────┐ ┌────▼────────┐
//!      │ShardQuerier │ │ShardQuerier │ │ShardQuerier │  pairwise merge-join
//!      └──────┬──────┘ └─────────────┘ └─────────────┘
//!        ┌────┴─────┐
//! ┌──────▼─────┐ ┌──▼─────────┐
//! │BlockQuerier│ │BlockQuerier│  matchers → postings → series
//! └────────────┘ └────────────┘
//! ```
//!
//! Fan-out to children may run on the rayon pool; results are always
//! combined in child order.

use crate::index::matcher::Matcher;
use crate::index::postings::{intersect, union, ErrPostings, Postings};
use crate::index::reader::{IndexReader, TupleTable};
use crate::query::error::{QueryError, QueryResult};
use crate::query::series_set::{
    BlockSeriesSet, ConcatSeriesSet, EmptySeriesSet, MergeJoinSeriesSet, MultiMergeSeriesSet,
    SeriesSet,
};
use crate::storage::block::{ReaderGuard, ShardMerge};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{Label, TimeRange};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Query interface over a fixed time window
pub trait Querier: Send + Sync {
    /// Series matching every matcher, in label order
    ///
    /// No matchers selects nothing.
    fn select(&self, matchers: &[Matcher]) -> Box<dyn SeriesSet>;

    /// Sorted distinct values of the label `name`
    fn label_values(&self, name: &str) -> QueryResult<Vec<String>>;

    /// Sorted distinct values of `name` among series carrying `label`
    fn label_values_for(&self, name: &str, _label: &Label) -> QueryResult<Vec<String>> {
        Err(QueryError::NotImplemented(format!(
            "label_values_for({}) is not supported by this querier",
            name
        )))
    }

    /// Release readers held by this querier and its children
    ///
    /// Calling it again is a no-op.
    fn close(&mut self) -> QueryResult<()>;
}

/// Querier over a single block's index
pub struct BlockQuerier {
    index: Arc<dyn IndexReader>,
    range: Option<TimeRange>,
    guard: Option<ReaderGuard>,
    closed: bool,
}

impl BlockQuerier {
    /// `range` is the query window clipped to the block; None when they
    /// do not overlap
    pub fn new(index: Arc<dyn IndexReader>, range: Option<TimeRange>) -> Self {
        Self {
            index,
            range,
            guard: None,
            closed: false,
        }
    }

    /// Hold `guard` until the querier is closed or dropped
    pub fn with_guard(mut self, guard: ReaderGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Query window; sample filtering by it is left to iterator consumers
    pub fn time_range(&self) -> Option<TimeRange> {
        self.range
    }

    /// Values of the matcher's label that it accepts, ascending
    fn matching_values(&self, matcher: &Matcher) -> StorageResult<Vec<String>> {
        let table = self.index.label_values(matcher.name())?;
        let prefix = matcher.literal_prefix();

        let start = match prefix {
            Some(p) => lower_bound(table.as_ref(), p)?,
            None => 0,
        };

        let mut values = Vec::new();
        for i in start..table.len() {
            let value = first_value(table.at(i)?)?;
            if let Some(p) = prefix {
                if !value.starts_with(p) {
                    break;
                }
            }
            if matcher.matches(&value) {
                values.push(value);
            }
        }
        Ok(values)
    }

    /// Union of the postings of every value the matcher accepts
    fn matcher_postings(&self, matcher: &Matcher) -> Box<dyn Postings> {
        let values = match self.matching_values(matcher) {
            Ok(values) => values,
            Err(e) => {
                return Box::new(ErrPostings::new(QueryError::IndexLookup(format!(
                    "values of {}: {}",
                    matcher.name(),
                    e
                ))))
            }
        };

        let mut lists = Vec::with_capacity(values.len());
        for value in &values {
            match self.index.postings(matcher.name(), value) {
                Ok(p) => lists.push(p),
                Err(e) => {
                    return Box::new(ErrPostings::new(QueryError::IndexLookup(format!(
                        "postings of {}={:?}: {}",
                        matcher.name(),
                        value,
                        e
                    ))))
                }
            }
        }
        union(lists)
    }
}

/// First index whose value is not less than `prefix`
fn lower_bound(table: &dyn TupleTable, prefix: &str) -> StorageResult<usize> {
    let (mut lo, mut hi) = (0, table.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if first_value(table.at(mid)?)?.as_str() < prefix {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

fn first_value(tuple: Vec<String>) -> StorageResult<String> {
    tuple
        .into_iter()
        .next()
        .ok_or_else(|| StorageError::Corruption("empty label value tuple".into()))
}

fn lookup_error(e: StorageError) -> QueryError {
    QueryError::IndexLookup(e.to_string())
}

impl Querier for BlockQuerier {
    fn select(&self, matchers: &[Matcher]) -> Box<dyn SeriesSet> {
        if self.closed {
            return Box::new(EmptySeriesSet::failed(QueryError::Closed));
        }

        if self.range.is_none() {
            return Box::new(EmptySeriesSet::new());
        }

        let its = matchers.iter().map(|m| self.matcher_postings(m)).collect();
        Box::new(BlockSeriesSet::new(Arc::clone(&self.index), intersect(its)))
    }

    fn label_values(&self, name: &str) -> QueryResult<Vec<String>> {
        if self.closed {
            return Err(QueryError::Closed);
        }

        let table = self.index.label_values(name).map_err(lookup_error)?;
        (0..table.len())
            .map(|i| table.at(i).and_then(first_value).map_err(lookup_error))
            .collect()
    }

    fn label_values_for(&self, name: &str, label: &Label) -> QueryResult<Vec<String>> {
        if self.closed {
            return Err(QueryError::Closed);
        }

        let mut postings = self
            .index
            .postings(&label.name, &label.value)
            .map_err(lookup_error)?;

        let mut values = BTreeSet::new();
        while postings.next() {
            let reference = postings.at();
            let series =
                self.index
                    .series(reference)
                    .map_err(|e| QueryError::SeriesResolution {
                        reference,
                        reason: e.to_string(),
                    })?;
            if let Some(value) = series.labels().get(name) {
                values.insert(value.to_string());
            }
        }
        if let Some(e) = postings.err() {
            return Err(e.clone());
        }
        Ok(values.into_iter().collect())
    }

    fn close(&mut self) -> QueryResult<()> {
        self.closed = true;
        self.guard.take();
        Ok(())
    }
}

/// Run `select` on every child, in parallel if asked; output keeps child order
fn select_all(
    children: &[Box<dyn Querier>],
    matchers: &[Matcher],
    parallel: bool,
) -> Vec<Box<dyn SeriesSet>> {
    if parallel && children.len() > 1 {
        children.par_iter().map(|q| q.select(matchers)).collect()
    } else {
        children.iter().map(|q| q.select(matchers)).collect()
    }
}

/// Sorted union of a label lookup across children
fn aggregate_values<F>(children: &[Box<dyn Querier>], lookup: F) -> QueryResult<Vec<String>>
where
    F: Fn(&dyn Querier) -> QueryResult<Vec<String>>,
{
    let mut values = BTreeSet::new();
    for child in children {
        values.extend(lookup(child.as_ref())?);
    }
    Ok(values.into_iter().collect())
}

/// Close every child, reporting the first failure
fn close_all(children: &mut [Box<dyn Querier>]) -> QueryResult<()> {
    let mut first_err = None;
    for child in children.iter_mut() {
        if let Err(e) = child.close() {
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Querier over the blocks of one shard
///
/// Blocks are time-ordered, so a series split across block boundaries is
/// reassembled by merge-joining block results left to right.
pub struct ShardQuerier {
    blocks: Vec<Box<dyn Querier>>,
    parallel: bool,
    closed: bool,
}

impl ShardQuerier {
    /// `blocks` must be in time order
    pub fn new(blocks: Vec<Box<dyn Querier>>, parallel: bool) -> Self {
        Self {
            blocks,
            parallel,
            closed: false,
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

impl Querier for ShardQuerier {
    fn select(&self, matchers: &[Matcher]) -> Box<dyn SeriesSet> {
        if self.closed {
            return Box::new(EmptySeriesSet::failed(QueryError::Closed));
        }

        debug!(
            "Shard select over {} blocks with {} matchers",
            self.blocks.len(),
            matchers.len()
        );
        select_all(&self.blocks, matchers, self.parallel)
            .into_iter()
            .reduce(|acc, set| Box::new(MergeJoinSeriesSet::new(acc, set)))
            .unwrap_or_else(|| Box::new(EmptySeriesSet::new()))
    }

    fn label_values(&self, name: &str) -> QueryResult<Vec<String>> {
        if self.closed {
            return Err(QueryError::Closed);
        }
        aggregate_values(&self.blocks, |q| q.label_values(name))
    }

    fn label_values_for(&self, name: &str, label: &Label) -> QueryResult<Vec<String>> {
        if self.closed {
            return Err(QueryError::Closed);
        }
        aggregate_values(&self.blocks, |q| q.label_values_for(name, label))
    }

    fn close(&mut self) -> QueryResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        close_all(&mut self.blocks)
    }
}

/// Querier over every shard of a database
pub struct DbQuerier {
    shards: Vec<Box<dyn Querier>>,
    merge: ShardMerge,
    parallel: bool,
    closed: bool,
}

impl DbQuerier {
    pub fn new(shards: Vec<Box<dyn Querier>>, merge: ShardMerge, parallel: bool) -> Self {
        Self {
            shards,
            merge,
            parallel,
            closed: false,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl Querier for DbQuerier {
    fn select(&self, matchers: &[Matcher]) -> Box<dyn SeriesSet> {
        if self.closed {
            return Box::new(EmptySeriesSet::failed(QueryError::Closed));
        }

        debug!(
            "Select across {} shards ({:?})",
            self.shards.len(),
            self.merge
        );
        let sets = select_all(&self.shards, matchers, self.parallel);
        match self.merge {
            ShardMerge::Concat => Box::new(ConcatSeriesSet::new(sets)),
            ShardMerge::Merge => Box::new(MultiMergeSeriesSet::new(sets)),
        }
    }

    fn label_values(&self, name: &str) -> QueryResult<Vec<String>> {
        if self.closed {
            return Err(QueryError::Closed);
        }
        aggregate_values(&self.shards, |q| q.label_values(name))
    }

    fn label_values_for(&self, name: &str, label: &Label) -> QueryResult<Vec<String>> {
        if self.closed {
            return Err(QueryError::Closed);
        }
        aggregate_values(&self.shards, |q| q.label_values_for(name, label))
    }

    fn close(&mut self) -> QueryResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        close_all(&mut self.shards)
    }
}
