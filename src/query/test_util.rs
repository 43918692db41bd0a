//! Fixtures shared by the query and storage tests

use crate::index::postings::Postings;
use crate::index::reader::{IndexReader, TupleTable};
use crate::query::error::QueryError;
use crate::query::iterator::SeriesIterator;
use crate::query::series::{ChunkSeries, Series};
use crate::query::series_set::SeriesSet;
use crate::storage::block::{Block, BlockBuilder};
use crate::storage::chunk::{Chunk, EncodedChunk};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{Labels, Sample};
use std::sync::Arc;

/// Chunk whose sample values equal their timestamps
pub(crate) fn chunk(ts: &[i64]) -> Arc<dyn Chunk> {
    let samples: Vec<Sample> = ts.iter().map(|&t| Sample::new(t, t as f64)).collect();
    Arc::new(EncodedChunk::encode(&samples).unwrap())
}

pub(crate) fn chunk_list(groups: &[&[i64]]) -> Arc<[Arc<dyn Chunk>]> {
    groups.iter().map(|ts| chunk(ts)).collect::<Vec<_>>().into()
}

/// Chunk with valid metadata whose payload fails its checksum
pub(crate) fn corrupt_chunk(ts: &[i64]) -> Arc<dyn Chunk> {
    let samples: Vec<Sample> = ts.iter().map(|&t| Sample::new(t, t as f64)).collect();
    let good = EncodedChunk::encode(&samples).unwrap();
    let mut bytes = good.bytes().to_vec();
    bytes[0] ^= 0xFF;
    Arc::new(EncodedChunk::from_raw(good.meta(), bytes))
}

/// Leaf series with a single chunk (or none for an empty `ts`)
pub(crate) fn leaf(pairs: &[(&str, &str)], ts: &[i64]) -> Arc<dyn Series> {
    let chunks = if ts.is_empty() {
        Vec::new()
    } else {
        vec![chunk(ts)]
    };
    Arc::new(ChunkSeries::new(Labels::from_pairs(pairs), chunks))
}

/// Block with two samples per chunk; values equal timestamps
pub(crate) fn block(series: &[(&[(&str, &str)], &[i64])]) -> Block {
    let mut builder = BlockBuilder::new().with_samples_per_chunk(2);
    for (pairs, ts) in series {
        builder.add_series(
            Labels::from_pairs(pairs),
            ts.iter().map(|&t| Sample::new(t, t as f64)).collect(),
        );
    }
    builder.build().unwrap()
}

pub(crate) fn drain(it: &mut dyn SeriesIterator) -> Vec<(i64, f64)> {
    let mut out = Vec::new();
    while it.next() {
        out.push(it.values());
    }
    out
}

pub(crate) fn collect(set: &mut dyn SeriesSet) -> Vec<Arc<dyn Series>> {
    let mut out = Vec::new();
    while set.next() {
        if let Some(series) = set.current() {
            out.push(series);
        }
    }
    out
}

/// Series set over a fixed list, optionally failing once drained
pub(crate) struct VecSeriesSet {
    series: std::vec::IntoIter<Arc<dyn Series>>,
    cur: Option<Arc<dyn Series>>,
    fail_with: Option<QueryError>,
    err: Option<QueryError>,
}

impl VecSeriesSet {
    pub(crate) fn new(series: Vec<Arc<dyn Series>>) -> Self {
        Self {
            series: series.into_iter(),
            cur: None,
            fail_with: None,
            err: None,
        }
    }

    pub(crate) fn failing(series: Vec<Arc<dyn Series>>, err: QueryError) -> Self {
        Self {
            fail_with: Some(err),
            ..Self::new(series)
        }
    }
}

impl SeriesSet for VecSeriesSet {
    fn next(&mut self) -> bool {
        if self.err.is_some() {
            return false;
        }
        self.cur = self.series.next();
        if self.cur.is_none() {
            self.err = self.fail_with.take();
        }
        self.cur.is_some()
    }

    fn current(&self) -> Option<Arc<dyn Series>> {
        self.cur.clone()
    }

    fn err(&self) -> Option<&QueryError> {
        self.err.as_ref()
    }
}

/// Index reader whose every lookup fails
pub(crate) struct FailingIndex;

impl IndexReader for FailingIndex {
    fn label_values(&self, name: &str) -> StorageResult<Box<dyn TupleTable>> {
        Err(StorageError::Corruption(format!("value table for {}", name)))
    }

    fn postings(&self, name: &str, value: &str) -> StorageResult<Box<dyn Postings>> {
        Err(StorageError::Corruption(format!(
            "postings for {}={}",
            name, value
        )))
    }

    fn series(&self, reference: u64) -> StorageResult<Arc<dyn Series>> {
        Err(StorageError::SeriesNotFound(reference))
    }
}
