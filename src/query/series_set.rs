//! Series sets: forward-only cursors over series in label order
//!
//! ```text
//!   DbQuerier        ConcatSeriesSet | MultiMergeSeriesSet   (shards)
//!        │
//!   ShardQuerier     MergeJoinSeriesSet, left-folded         (blocks)
//!        │
//!   BlockQuerier     BlockSeriesSet                          (postings → series)
//! ```
//!
//! Every combinator relies on its inputs already being sorted by
//! `compare_labels`; none of them re-sort. Errors stop the combined set and
//! are reported through `err()` once `next()` has returned false.

use crate::index::postings::Postings;
use crate::index::reader::IndexReader;
use crate::query::error::QueryError;
use crate::query::series::{ChainedSeries, Series};
use crate::storage::types::compare_labels;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::{trace, warn};

/// Forward-only cursor over series
///
/// Once `next()` returns false it keeps returning false.
pub trait SeriesSet: Send {
    fn next(&mut self) -> bool;

    /// Series at the cursor; None before the first `next()` or after the end
    fn current(&self) -> Option<Arc<dyn Series>>;

    fn err(&self) -> Option<&QueryError>;
}

/// Series set with nothing in it, optionally carrying an error
#[derive(Debug, Default)]
pub struct EmptySeriesSet {
    err: Option<QueryError>,
}

impl EmptySeriesSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failed(err: QueryError) -> Self {
        Self { err: Some(err) }
    }
}

impl SeriesSet for EmptySeriesSet {
    fn next(&mut self) -> bool {
        false
    }

    fn current(&self) -> Option<Arc<dyn Series>> {
        None
    }

    fn err(&self) -> Option<&QueryError> {
        self.err.as_ref()
    }
}

/// Resolves each reference of a postings list to its series
pub struct BlockSeriesSet {
    index: Arc<dyn IndexReader>,
    postings: Box<dyn Postings>,
    cur: Option<Arc<dyn Series>>,
    err: Option<QueryError>,
    done: bool,
}

impl BlockSeriesSet {
    pub fn new(index: Arc<dyn IndexReader>, postings: Box<dyn Postings>) -> Self {
        Self {
            index,
            postings,
            cur: None,
            err: None,
            done: false,
        }
    }
}

impl SeriesSet for BlockSeriesSet {
    fn next(&mut self) -> bool {
        if self.done {
            return false;
        }

        if !self.postings.next() {
            if let Some(e) = self.postings.err() {
                warn!("Postings iteration failed: {}", e);
            }
            self.cur = None;
            self.done = true;
            return false;
        }

        let reference = self.postings.at();
        match self.index.series(reference) {
            Ok(series) => {
                self.cur = Some(series);
                true
            }
            Err(e) => {
                warn!("Failed to resolve series ref {}: {}", reference, e);
                self.err = Some(QueryError::SeriesResolution {
                    reference,
                    reason: e.to_string(),
                });
                self.cur = None;
                self.done = true;
                false
            }
        }
    }

    fn current(&self) -> Option<Arc<dyn Series>> {
        self.cur.clone()
    }

    fn err(&self) -> Option<&QueryError> {
        self.err.as_ref().or_else(|| self.postings.err())
    }
}

/// Advance a set and take its new head, if any
fn advance(set: &mut dyn SeriesSet) -> Option<Arc<dyn Series>> {
    if set.next() {
        set.current()
    } else {
        None
    }
}

/// Chain series sharing one label set, warning if their samples overlap
fn fuse(components: Vec<Arc<dyn Series>>) -> Arc<dyn Series> {
    let ranges: Vec<_> = components.iter().filter_map(|s| s.time_range()).collect();
    if ranges.windows(2).any(|w| w[0].overlaps(&w[1])) {
        if let Some(first) = components.first() {
            warn!("Fusing series {} with overlapping time ranges", first.labels());
        }
    }
    Arc::new(ChainedSeries::new(components))
}

/// Two-way merge-join of sorted series sets
///
/// Series present in both inputs come out once, as a chained series with
/// `a`'s part first.
pub struct MergeJoinSeriesSet {
    a: Box<dyn SeriesSet>,
    b: Box<dyn SeriesSet>,
    peek_a: Option<Arc<dyn Series>>,
    peek_b: Option<Arc<dyn Series>>,
    cur: Option<Arc<dyn Series>>,
    done: bool,
}

impl MergeJoinSeriesSet {
    pub fn new(mut a: Box<dyn SeriesSet>, mut b: Box<dyn SeriesSet>) -> Self {
        let peek_a = advance(a.as_mut());
        let peek_b = advance(b.as_mut());
        Self {
            a,
            b,
            peek_a,
            peek_b,
            cur: None,
            done: false,
        }
    }
}

impl SeriesSet for MergeJoinSeriesSet {
    fn next(&mut self) -> bool {
        if self.done {
            return false;
        }

        if let Some(e) = self.err() {
            warn!("Merge stopped on input error: {}", e);
            self.cur = None;
            self.done = true;
            return false;
        }

        // An exhausted input sorts after everything
        let order = match (&self.peek_a, &self.peek_b) {
            (None, None) => None,
            (Some(_), None) => Some(Ordering::Less),
            (None, Some(_)) => Some(Ordering::Greater),
            (Some(x), Some(y)) => Some(compare_labels(x.labels(), y.labels())),
        };

        match order {
            None => {
                self.cur = None;
                self.done = true;
                return false;
            }
            Some(Ordering::Less) => {
                self.cur = self.peek_a.take();
                self.peek_a = advance(self.a.as_mut());
            }
            Some(Ordering::Greater) => {
                self.cur = self.peek_b.take();
                self.peek_b = advance(self.b.as_mut());
            }
            Some(Ordering::Equal) => {
                let components: Vec<Arc<dyn Series>> = self
                    .peek_a
                    .take()
                    .into_iter()
                    .chain(self.peek_b.take())
                    .collect();
                if let Some(first) = components.first() {
                    trace!("Chaining series {} across blocks", first.labels());
                }
                self.cur = Some(fuse(components));
                self.peek_a = advance(self.a.as_mut());
                self.peek_b = advance(self.b.as_mut());
            }
        }
        true
    }

    fn current(&self) -> Option<Arc<dyn Series>> {
        self.cur.clone()
    }

    fn err(&self) -> Option<&QueryError> {
        self.a.err().or_else(|| self.b.err())
    }
}

/// Series sets drained one after another, without reordering
///
/// Only sorted when the inputs hold disjoint, ordered label ranges.
pub struct ConcatSeriesSet {
    sets: Vec<Box<dyn SeriesSet>>,
    i: usize,
    cur: Option<Arc<dyn Series>>,
    done: bool,
}

impl ConcatSeriesSet {
    pub fn new(sets: Vec<Box<dyn SeriesSet>>) -> Self {
        Self {
            sets,
            i: 0,
            cur: None,
            done: false,
        }
    }
}

impl SeriesSet for ConcatSeriesSet {
    fn next(&mut self) -> bool {
        if self.done {
            return false;
        }

        while let Some(set) = self.sets.get_mut(self.i) {
            if set.next() {
                self.cur = set.current();
                return true;
            }
            if let Some(e) = set.err() {
                warn!("Concatenation stopped at input {}: {}", self.i, e);
                break;
            }
            self.i += 1;
        }

        self.cur = None;
        self.done = true;
        false
    }

    fn current(&self) -> Option<Arc<dyn Series>> {
        self.cur.clone()
    }

    fn err(&self) -> Option<&QueryError> {
        self.sets.get(self.i).and_then(|set| set.err())
    }
}

/// Head of one input in the N-way merge
struct HeapEntry {
    series: Arc<dyn Series>,
    input: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Reversed so the max-heap pops the smallest labels, lowest input first
    fn cmp(&self, other: &Self) -> Ordering {
        compare_labels(other.series.labels(), self.series.labels())
            .then_with(|| other.input.cmp(&self.input))
    }
}

/// N-way merge-join of sorted series sets
///
/// Equal label sets from several inputs are chained in input order.
pub struct MultiMergeSeriesSet {
    sets: Vec<Box<dyn SeriesSet>>,
    heap: BinaryHeap<HeapEntry>,
    cur: Option<Arc<dyn Series>>,
    done: bool,
}

impl MultiMergeSeriesSet {
    pub fn new(mut sets: Vec<Box<dyn SeriesSet>>) -> Self {
        let mut heap = BinaryHeap::with_capacity(sets.len());
        for (input, set) in sets.iter_mut().enumerate() {
            if let Some(series) = advance(set.as_mut()) {
                heap.push(HeapEntry { series, input });
            }
        }
        Self {
            sets,
            heap,
            cur: None,
            done: false,
        }
    }

    fn refill(&mut self, input: usize) {
        if let Some(series) = self.sets.get_mut(input).and_then(|s| advance(s.as_mut())) {
            self.heap.push(HeapEntry { series, input });
        }
    }
}

impl SeriesSet for MultiMergeSeriesSet {
    fn next(&mut self) -> bool {
        if self.done {
            return false;
        }

        if let Some(e) = self.err() {
            warn!("Merge stopped on input error: {}", e);
            self.cur = None;
            self.done = true;
            return false;
        }

        let head = match self.heap.pop() {
            Some(head) => head,
            None => {
                self.cur = None;
                self.done = true;
                return false;
            }
        };

        let mut components = vec![Arc::clone(&head.series)];
        self.refill(head.input);
        while let Some(entry) = self.heap.peek() {
            if compare_labels(entry.series.labels(), head.series.labels()) != Ordering::Equal {
                break;
            }
            if let Some(entry) = self.heap.pop() {
                components.push(entry.series);
                self.refill(entry.input);
            }
        }

        self.cur = Some(if components.len() == 1 {
            head.series
        } else {
            trace!(
                "Chaining series {} across {} shards",
                head.series.labels(),
                components.len()
            );
            fuse(components)
        });
        true
    }

    fn current(&self) -> Option<Arc<dyn Series>> {
        self.cur.clone()
    }

    fn err(&self) -> Option<&QueryError> {
        self.sets.iter().find_map(|set| set.err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::postings::{ErrPostings, ListPostings};
    use crate::index::reader::IndexBuilder;
    use crate::query::test_util::{chunk, collect, drain, leaf, VecSeriesSet};
    use crate::storage::types::Labels;

    fn set(series: Vec<Arc<dyn Series>>) -> Box<dyn SeriesSet> {
        Box::new(VecSeriesSet::new(series))
    }

    fn failing(series: Vec<Arc<dyn Series>>) -> Box<dyn SeriesSet> {
        Box::new(VecSeriesSet::failing(
            series,
            QueryError::IndexLookup("index unavailable".into()),
        ))
    }

    fn label_strings(set: &mut dyn SeriesSet) -> Vec<String> {
        collect(set)
            .iter()
            .map(|s| s.labels().to_string())
            .collect()
    }

    #[test]
    fn test_empty_series_set() {
        let mut s = EmptySeriesSet::new();
        assert!(!s.next());
        assert!(s.current().is_none());
        assert!(s.err().is_none());

        let s = EmptySeriesSet::failed(QueryError::Closed);
        assert_eq!(s.err(), Some(&QueryError::Closed));
    }

    #[test]
    fn test_block_series_set_resolves_refs() {
        let mut builder = IndexBuilder::new();
        builder.add_series(Labels::from_pairs(&[("job", "a")]), vec![chunk(&[1])]);
        builder.add_series(Labels::from_pairs(&[("job", "b")]), vec![chunk(&[2])]);
        let index: Arc<dyn IndexReader> = Arc::new(builder.build().unwrap());

        let postings = Box::new(ListPostings::new(vec![1].into()));
        let mut s = BlockSeriesSet::new(Arc::clone(&index), postings);
        assert_eq!(label_strings(&mut s), vec![r#"{job="b"}"#]);
        assert!(s.err().is_none());

        // Reference 9 does not exist
        let postings = Box::new(ListPostings::new(vec![0, 9].into()));
        let mut s = BlockSeriesSet::new(index, postings);
        assert!(s.next());
        assert!(!s.next());
        assert!(matches!(
            s.err(),
            Some(QueryError::SeriesResolution { reference: 9, .. })
        ));
        assert!(!s.next());
    }

    #[test]
    fn test_block_series_set_postings_error() {
        let index: Arc<dyn IndexReader> = Arc::new(IndexBuilder::new().build().unwrap());
        let postings = Box::new(ErrPostings::new(QueryError::IndexLookup("boom".into())));
        let mut s = BlockSeriesSet::new(index, postings);

        assert!(!s.next());
        assert_eq!(s.err(), Some(&QueryError::IndexLookup("boom".into())));
    }

    #[test]
    fn test_merge_join_disjoint() {
        let a = set(vec![leaf(&[("job", "a")], &[1]), leaf(&[("job", "c")], &[1])]);
        let b = set(vec![leaf(&[("job", "b")], &[1]), leaf(&[("job", "d")], &[1])]);
        let mut m = MergeJoinSeriesSet::new(a, b);

        assert_eq!(
            label_strings(&mut m),
            vec![
                r#"{job="a"}"#,
                r#"{job="b"}"#,
                r#"{job="c"}"#,
                r#"{job="d"}"#
            ]
        );
        assert!(m.err().is_none());
        assert!(!m.next());
    }

    #[test]
    fn test_merge_join_fuses_equal_labels() {
        let a = set(vec![
            leaf(&[("job", "a")], &[0, 50, 99]),
            leaf(&[("job", "b")], &[10]),
        ]);
        let b = set(vec![leaf(&[("job", "a")], &[100, 150, 199])]);
        let mut m = MergeJoinSeriesSet::new(a, b);

        let series = collect(&mut m);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].labels().to_string(), r#"{job="a"}"#);

        let ts: Vec<i64> = drain(series[0].iterator().as_mut())
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        assert_eq!(ts, vec![0, 50, 99, 100, 150, 199]);
    }

    #[test]
    fn test_merge_join_with_empty_side() {
        let mut m = MergeJoinSeriesSet::new(set(vec![]), set(vec![leaf(&[("job", "a")], &[1])]));
        assert_eq!(label_strings(&mut m), vec![r#"{job="a"}"#]);

        let mut m = MergeJoinSeriesSet::new(set(vec![]), set(vec![]));
        assert!(!m.next());
    }

    #[test]
    fn test_merge_join_error_not_masked() {
        let a = failing(vec![leaf(&[("job", "a")], &[1])]);
        let b = set(vec![
            leaf(&[("job", "b")], &[1]),
            leaf(&[("job", "c")], &[1]),
        ]);
        let mut m = MergeJoinSeriesSet::new(a, b);

        // {job="a"} came before the failure and stays valid
        assert!(m.next());
        assert_eq!(
            m.current().map(|s| s.labels().to_string()),
            Some(r#"{job="a"}"#.to_string())
        );
        assert!(!m.next());
        assert!(matches!(m.err(), Some(QueryError::IndexLookup(_))));
        assert!(!m.next());
    }

    #[test]
    fn test_concat_keeps_input_order() {
        let mut c = ConcatSeriesSet::new(vec![
            set(vec![leaf(&[("job", "b")], &[1])]),
            set(vec![]),
            set(vec![leaf(&[("job", "a")], &[1]), leaf(&[("job", "b")], &[2])]),
        ]);

        assert_eq!(
            label_strings(&mut c),
            vec![r#"{job="b"}"#, r#"{job="a"}"#, r#"{job="b"}"#]
        );
    }

    #[test]
    fn test_concat_stops_at_error() {
        let mut c = ConcatSeriesSet::new(vec![
            failing(vec![leaf(&[("job", "a")], &[1])]),
            set(vec![leaf(&[("job", "b")], &[1])]),
        ]);

        assert!(c.next());
        assert!(!c.next());
        assert!(c.err().is_some());
    }

    #[test]
    fn test_multi_merge_orders_and_fuses() {
        let mut m = MultiMergeSeriesSet::new(vec![
            set(vec![leaf(&[("job", "a")], &[0]), leaf(&[("job", "c")], &[0])]),
            set(vec![leaf(&[("job", "b")], &[0])]),
            set(vec![leaf(&[("job", "a")], &[10]), leaf(&[("job", "c")], &[10])]),
        ]);

        let series = collect(&mut m);
        let labels: Vec<String> = series.iter().map(|s| s.labels().to_string()).collect();
        assert_eq!(
            labels,
            vec![r#"{job="a"}"#, r#"{job="b"}"#, r#"{job="c"}"#]
        );

        // Shard order decides chain order
        let ts: Vec<i64> = drain(series[2].iterator().as_mut())
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        assert_eq!(ts, vec![0, 10]);
    }

    #[test]
    fn test_multi_merge_error() {
        let mut m = MultiMergeSeriesSet::new(vec![
            set(vec![leaf(&[("job", "a")], &[0])]),
            failing(vec![]),
        ]);
        assert!(!m.next());
        assert!(matches!(m.err(), Some(QueryError::IndexLookup(_))));
    }

    #[test]
    fn test_multi_merge_no_inputs() {
        let mut m = MultiMergeSeriesSet::new(Vec::new());
        assert!(!m.next());
        assert!(m.err().is_none());
    }
}
