//! Index reader - inverted index access for one block
//!
//! Maps label name → sorted values → postings list, and resolves a
//! reference back to its series.
//!
//! # Example
//! ```ignore
//! // Which series have env="prod"?
//! let mut postings = index.postings("env", "prod")?;
//! while postings.next() {
//!     let series = index.series(postings.at())?;
//! }
//! ```
//!
//! # Design Notes
//! - References are assigned in label order, so walking any postings list
//!   yields series sorted by `compare_labels`
//! - Value tables are sorted, enabling binary search on literal prefixes

use crate::index::postings::{EmptyPostings, ListPostings, Postings, SeriesRef};
use crate::query::{ChunkSeries, Series};
use crate::storage::chunk::Chunk;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::Labels;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Sorted table of the value tuples recorded for a label name
pub trait TupleTable: Send {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `i`-th tuple in lexicographic order
    fn at(&self, i: usize) -> StorageResult<Vec<String>>;
}

/// Read access to a block's inverted index
pub trait IndexReader: Send + Sync {
    /// Every value recorded for `name`; empty if the name is unknown
    fn label_values(&self, name: &str) -> StorageResult<Box<dyn TupleTable>>;

    /// References of the series carrying `name=value`
    fn postings(&self, name: &str, value: &str) -> StorageResult<Box<dyn Postings>>;

    /// Resolve a reference to its series
    fn series(&self, reference: SeriesRef) -> StorageResult<Arc<dyn Series>>;
}

/// Single-column tuple table over owned strings
struct StringTuples {
    values: Vec<String>,
}

impl TupleTable for StringTuples {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn at(&self, i: usize) -> StorageResult<Vec<String>> {
        self.values
            .get(i)
            .map(|v| vec![v.clone()])
            .ok_or_else(|| {
                StorageError::Corruption(format!(
                    "tuple {} out of range ({} entries)",
                    i,
                    self.values.len()
                ))
            })
    }
}

/// In-memory inverted index
#[derive(Debug, Default)]
pub struct MemIndex {
    /// name → value → references, ascending
    postings: BTreeMap<String, BTreeMap<String, Arc<[SeriesRef]>>>,
    /// Indexed by reference
    series: Vec<Arc<ChunkSeries>>,
}

impl MemIndex {
    /// Number of series in the index
    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Number of label names
    pub fn name_count(&self) -> usize {
        self.postings.len()
    }

    /// Number of distinct name=value pairs
    pub fn pair_count(&self) -> usize {
        self.postings.values().map(|values| values.len()).sum()
    }

    /// All series in reference order
    pub fn all_series(&self) -> impl Iterator<Item = &Arc<ChunkSeries>> {
        self.series.iter()
    }
}

impl IndexReader for MemIndex {
    fn label_values(&self, name: &str) -> StorageResult<Box<dyn TupleTable>> {
        let values = self
            .postings
            .get(name)
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default();
        Ok(Box::new(StringTuples { values }))
    }

    fn postings(&self, name: &str, value: &str) -> StorageResult<Box<dyn Postings>> {
        match self.postings.get(name).and_then(|values| values.get(value)) {
            Some(list) => Ok(Box::new(ListPostings::new(Arc::clone(list)))),
            None => Ok(Box::new(EmptyPostings)),
        }
    }

    fn series(&self, reference: SeriesRef) -> StorageResult<Arc<dyn Series>> {
        usize::try_from(reference)
            .ok()
            .and_then(|i| self.series.get(i))
            .map(|s| Arc::clone(s) as Arc<dyn Series>)
            .ok_or(StorageError::SeriesNotFound(reference))
    }
}

/// Collects series and assigns references in label order
#[derive(Default)]
pub struct IndexBuilder {
    series: Vec<(Labels, Vec<Arc<dyn Chunk>>)>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a series with its time-ordered chunks
    pub fn add_series(&mut self, labels: Labels, chunks: Vec<Arc<dyn Chunk>>) {
        self.series.push((labels, chunks));
    }

    /// Build the index
    ///
    /// Fails on duplicate label sets or on chunks that overlap or are out
    /// of time order.
    pub fn build(mut self) -> StorageResult<MemIndex> {
        self.series.sort_by(|a, b| a.0.cmp(&b.0));

        let mut lists: BTreeMap<String, BTreeMap<String, Vec<SeriesRef>>> = BTreeMap::new();
        let mut series: Vec<Arc<ChunkSeries>> = Vec::with_capacity(self.series.len());

        for (i, (labels, chunks)) in self.series.into_iter().enumerate() {
            if let Some(prev) = series.last().map(|s| s.labels()) {
                if *prev == labels {
                    return Err(StorageError::InvalidBlock(format!(
                        "duplicate series {}",
                        labels
                    )));
                }
            }

            for pair in chunks.windows(2) {
                let (a, b) = (pair[0].meta(), pair[1].meta());
                if b.min_time <= a.max_time {
                    return Err(StorageError::InvalidBlock(format!(
                        "series {} has overlapping chunks [{}, {}] and [{}, {}]",
                        labels, a.min_time, a.max_time, b.min_time, b.max_time
                    )));
                }
            }

            let reference = i as SeriesRef;
            for label in &labels {
                lists
                    .entry(label.name.clone())
                    .or_default()
                    .entry(label.value.clone())
                    .or_default()
                    .push(reference);
            }
            series.push(Arc::new(ChunkSeries::new(labels, chunks)));
        }

        let postings = lists
            .into_iter()
            .map(|(name, values)| {
                let values: BTreeMap<String, Arc<[SeriesRef]>> = values
                    .into_iter()
                    .map(|(value, refs)| (value, Arc::from(refs)))
                    .collect();
                (name, values)
            })
            .collect();

        Ok(MemIndex { postings, series })
    }
}
