//! Series: a label set plus a factory for sample iterators
//!
//! ```text
//!   ChunkSeries (leaf)      one block's chunk list
//!   ChainedSeries           same labels, time-disjoint pieces from
//!                           several blocks or shards, oldest first
//! ```

use crate::query::iterator::{
    ChainSegment, ChainedSeriesIterator, ChunkSeriesIterator, SeriesIterator,
};
use crate::storage::chunk::Chunk;
use crate::storage::types::{Labels, TimeRange};
use std::sync::Arc;

/// A time series visible to a query
pub trait Series: Send + Sync {
    fn labels(&self) -> &Labels;

    /// A fresh iterator positioned before the first sample
    fn iterator(&self) -> Box<dyn SeriesIterator>;

    /// Inclusive bounds of the series' samples, when known without decoding
    fn time_range(&self) -> Option<TimeRange> {
        None
    }
}

/// Series backed by one block's chunks
///
/// Holds the chunks by `Arc`, so its data stays alive for as long as the
/// series or any iterator over it does.
#[derive(Debug, Clone)]
pub struct ChunkSeries {
    labels: Labels,
    chunks: Arc<[Arc<dyn Chunk>]>,
}

impl ChunkSeries {
    pub fn new(labels: Labels, chunks: Vec<Arc<dyn Chunk>>) -> Self {
        Self {
            labels,
            chunks: chunks.into(),
        }
    }

    pub fn chunks(&self) -> &[Arc<dyn Chunk>] {
        &self.chunks
    }

    /// Total samples across all chunks
    pub fn num_samples(&self) -> u64 {
        self.chunks
            .iter()
            .map(|c| u64::from(c.meta().num_samples))
            .sum()
    }
}

impl Series for ChunkSeries {
    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn iterator(&self) -> Box<dyn SeriesIterator> {
        Box::new(ChunkSeriesIterator::new(Arc::clone(&self.chunks)))
    }

    fn time_range(&self) -> Option<TimeRange> {
        let first = self.chunks.first()?.meta();
        let last = self.chunks.last()?.meta();
        Some(TimeRange {
            min: first.min_time,
            max: last.max_time,
        })
    }
}

/// One logical series assembled from time-disjoint components
pub struct ChainedSeries {
    labels: Labels,
    components: Vec<Arc<dyn Series>>,
}

impl ChainedSeries {
    /// Chain components in time order; all must share the same labels
    pub fn new(components: Vec<Arc<dyn Series>>) -> Self {
        let labels = components
            .first()
            .map(|s| s.labels().clone())
            .unwrap_or_default();
        Self { labels, components }
    }

    pub fn components(&self) -> &[Arc<dyn Series>] {
        &self.components
    }
}

impl Series for ChainedSeries {
    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn iterator(&self) -> Box<dyn SeriesIterator> {
        let segments = self
            .components
            .iter()
            .map(|s| ChainSegment {
                iter: s.iterator(),
                range: s.time_range(),
            })
            .collect();
        Box::new(ChainedSeriesIterator::new(segments))
    }

    fn time_range(&self) -> Option<TimeRange> {
        self.components
            .iter()
            .map(|s| s.time_range())
            .reduce(|acc, r| match (acc, r) {
                (Some(a), Some(b)) => Some(a.union(&b)),
                _ => None,
            })
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::test_util::{chunk, drain};

    fn leaf(pairs: &[(&str, &str)], groups: &[&[i64]]) -> Arc<dyn Series> {
        let chunks = groups.iter().map(|ts| chunk(ts)).collect();
        Arc::new(ChunkSeries::new(Labels::from_pairs(pairs), chunks))
    }

    #[test]
    fn test_chunk_series() {
        let series = ChunkSeries::new(
            Labels::from_pairs(&[("job", "a")]),
            vec![chunk(&[1, 2]), chunk(&[5, 9])],
        );

        assert_eq!(series.num_samples(), 4);
        assert_eq!(series.time_range(), Some(TimeRange::new(1, 9)));
        assert_eq!(drain(series.iterator().as_mut()).len(), 4);
        // Each call yields an independent iterator
        assert_eq!(drain(series.iterator().as_mut()).len(), 4);
    }

    #[test]
    fn test_empty_chunk_series() {
        let series = ChunkSeries::new(Labels::from_pairs(&[("job", "a")]), Vec::new());
        assert_eq!(series.time_range(), None);
        assert!(!series.iterator().next());
    }

    #[test]
    fn test_chained_series() {
        let chained = ChainedSeries::new(vec![
            leaf(&[("job", "a")], &[&[0, 50, 99]]),
            leaf(&[("job", "a")], &[&[100, 150], &[160, 199]]),
        ]);

        assert_eq!(chained.labels(), &Labels::from_pairs(&[("job", "a")]));
        assert_eq!(chained.time_range(), Some(TimeRange::new(0, 199)));
        let ts: Vec<i64> = drain(chained.iterator().as_mut())
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        assert_eq!(ts, vec![0, 50, 99, 100, 150, 160, 199]);
    }

    #[test]
    fn test_nested_chain() {
        let inner: Arc<dyn Series> = Arc::new(ChainedSeries::new(vec![
            leaf(&[("job", "a")], &[&[0]]),
            leaf(&[("job", "a")], &[&[10]]),
        ]));
        let outer = ChainedSeries::new(vec![inner, leaf(&[("job", "a")], &[&[20]])]);

        assert_eq!(outer.time_range(), Some(TimeRange::new(0, 20)));
        let mut it = outer.iterator();
        assert!(it.seek(5));
        assert_eq!(it.values().0, 10);
        assert!(it.seek(11));
        assert_eq!(it.values().0, 20);
    }
}
