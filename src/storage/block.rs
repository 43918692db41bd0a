//! Blocks, shards and the database handle
//!
//! ```text
//! Db
//!  ├── Shard 0: [Block t0..t1] [Block t1..t2] ...
//!  └── Shard 1: [Block t0..t1] ...
//! ```
//!
//! Blocks are immutable once built. A block counts the block queriers open
//! against it so that whatever manages block lifetimes can tell when it is
//! safe to release one.

use crate::index::reader::{IndexBuilder, IndexReader};
use crate::query::{BlockQuerier, DbQuerier, Querier, ShardQuerier};
use crate::storage::chunk::{Chunk, EncodedChunk};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{Labels, Sample, TimeRange};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Samples per chunk when the builder is not told otherwise
pub const DEFAULT_SAMPLES_PER_CHUNK: usize = 120;

/// How the top-level querier combines shard results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardMerge {
    /// Append shard results in shard order. Only sorted and duplicate-free
    /// when shards own disjoint label sets.
    Concat,
    /// N-way merge-join; equal label sets across shards become one series
    #[default]
    Merge,
}

impl FromStr for ShardMerge {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "concat" => Ok(ShardMerge::Concat),
            "merge" => Ok(ShardMerge::Merge),
            other => Err(format!(
                "unknown shard merge mode '{}' (expected 'merge' or 'concat')",
                other
            )),
        }
    }
}

impl fmt::Display for ShardMerge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardMerge::Concat => write!(f, "concat"),
            ShardMerge::Merge => write!(f, "merge"),
        }
    }
}

/// Options applied to every querier a `Db` opens
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub shard_merge: ShardMerge,
    /// Run `select` fan-out on the rayon pool
    pub parallel_select: bool,
}

/// Summary of a block's contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    /// Earliest sample timestamp in the block
    pub min_time: i64,
    /// Latest sample timestamp in the block
    pub max_time: i64,
    pub num_series: u64,
    pub num_samples: u64,
}

impl BlockMeta {
    pub fn time_range(&self) -> TimeRange {
        TimeRange {
            min: self.min_time,
            max: self.max_time,
        }
    }

    /// Check if block overlaps the inclusive range [mint, maxt]
    pub fn overlaps(&self, mint: i64, maxt: i64) -> bool {
        self.min_time <= maxt && self.max_time >= mint
    }
}

/// Registration of one open reader on a block; released on drop
#[derive(Debug)]
pub struct ReaderGuard {
    readers: Arc<AtomicUsize>,
}

impl ReaderGuard {
    fn acquire(readers: &Arc<AtomicUsize>) -> Self {
        readers.fetch_add(1, Ordering::SeqCst);
        Self {
            readers: Arc::clone(readers),
        }
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An immutable, time-bounded partition with its own index
pub struct Block {
    meta: BlockMeta,
    index: Arc<dyn IndexReader>,
    readers: Arc<AtomicUsize>,
}

impl Block {
    pub fn new(meta: BlockMeta, index: Arc<dyn IndexReader>) -> Self {
        Self {
            meta,
            index,
            readers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn meta(&self) -> &BlockMeta {
        &self.meta
    }

    pub fn index(&self) -> Arc<dyn IndexReader> {
        Arc::clone(&self.index)
    }

    /// Number of block queriers currently open on this block
    pub fn pending_readers(&self) -> usize {
        self.readers.load(Ordering::SeqCst)
    }

    /// Open a querier over [mint, maxt]
    ///
    /// The block counts the querier as a reader until it is closed or
    /// dropped. A window that misses the block yields a querier that
    /// selects nothing.
    pub fn querier(&self, mint: i64, maxt: i64) -> BlockQuerier {
        let range = TimeRange::try_new(mint, maxt)
            .and_then(|window| window.intersection(&self.meta.time_range()));
        BlockQuerier::new(Arc::clone(&self.index), range)
            .with_guard(ReaderGuard::acquire(&self.readers))
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("meta", &self.meta)
            .field("pending_readers", &self.pending_readers())
            .finish()
    }
}

/// Builds an in-memory block from raw samples
pub struct BlockBuilder {
    samples_per_chunk: usize,
    series: Vec<(Labels, Vec<Sample>)>,
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self {
            samples_per_chunk: DEFAULT_SAMPLES_PER_CHUNK,
            series: Vec::new(),
        }
    }

    /// Cut chunks of at most `n` samples (at least one)
    pub fn with_samples_per_chunk(mut self, n: usize) -> Self {
        self.samples_per_chunk = n.max(1);
        self
    }

    /// Add a series; samples must have strictly increasing timestamps
    pub fn add_series(&mut self, labels: Labels, samples: Vec<Sample>) {
        self.series.push((labels, samples));
    }

    pub fn build(self) -> StorageResult<Block> {
        if self.series.is_empty() {
            return Err(StorageError::InvalidBlock("block has no series".into()));
        }

        let mut index = IndexBuilder::new();
        let mut range: Option<TimeRange> = None;
        let mut num_samples = 0u64;
        let num_series = self.series.len() as u64;

        for (labels, samples) in self.series {
            let series_range = match (samples.first(), samples.last()) {
                (Some(first), Some(last)) => TimeRange {
                    min: first.t,
                    max: last.t,
                },
                _ => {
                    return Err(StorageError::InvalidBlock(format!(
                        "series {} has no samples",
                        labels
                    )))
                }
            };
            range = Some(match range {
                Some(r) => r.union(&series_range),
                None => series_range,
            });
            num_samples += samples.len() as u64;

            let chunks = samples
                .chunks(self.samples_per_chunk)
                .map(|part| EncodedChunk::encode(part).map(|c| Arc::new(c) as Arc<dyn Chunk>))
                .collect::<StorageResult<Vec<_>>>()?;
            index.add_series(labels, chunks);
        }

        let index = index.build()?;
        let range = range.ok_or_else(|| StorageError::InvalidBlock("block has no samples".into()))?;
        let meta = BlockMeta {
            min_time: range.min,
            max_time: range.max,
            num_series,
            num_samples,
        };

        debug!(
            "Built block [{}, {}] with {} series, {} samples",
            meta.min_time, meta.max_time, meta.num_series, meta.num_samples
        );

        Ok(Block::new(meta, Arc::new(index)))
    }
}

/// A horizontal partition owning a time-ordered set of blocks
#[derive(Debug, Default)]
pub struct Shard {
    blocks: Vec<Block>,
}

impl Shard {
    pub fn new(mut blocks: Vec<Block>) -> Self {
        blocks.sort_by_key(|b| b.meta.min_time);
        Self { blocks }
    }

    /// Add a block, keeping blocks ordered by start time
    pub fn add_block(&mut self, block: Block) {
        let at = self
            .blocks
            .partition_point(|b| b.meta.min_time <= block.meta.min_time);
        self.blocks.insert(at, block);
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Blocks overlapping the inclusive range [mint, maxt], by start time
    pub fn blocks_for_range(&self, mint: i64, maxt: i64) -> Vec<&Block> {
        self.blocks
            .iter()
            .filter(|b| b.meta.overlaps(mint, maxt))
            .collect()
    }

    /// Open a querier over the blocks overlapping [mint, maxt]
    pub fn querier(&self, mint: i64, maxt: i64, parallel: bool) -> ShardQuerier {
        let blocks: Vec<Box<dyn Querier>> = self
            .blocks_for_range(mint, maxt)
            .into_iter()
            .map(|b| Box::new(b.querier(mint, maxt)) as Box<dyn Querier>)
            .collect();
        ShardQuerier::new(blocks, parallel)
    }
}

/// Top-level handle over every shard
#[derive(Debug, Default)]
pub struct Db {
    shards: Vec<Shard>,
    options: QueryOptions,
}

impl Db {
    pub fn new(shards: Vec<Shard>, options: QueryOptions) -> Self {
        Self { shards, options }
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn options(&self) -> QueryOptions {
        self.options
    }

    /// Open a querier over [mint, maxt] across all shards
    pub fn querier(&self, mint: i64, maxt: i64) -> DbQuerier {
        let shards: Vec<Box<dyn Querier>> = self
            .shards
            .iter()
            .map(|s| {
                Box::new(s.querier(mint, maxt, self.options.parallel_select)) as Box<dyn Querier>
            })
            .collect();

        debug!(
            "Opened querier for [{}, {}] over {} shards",
            mint,
            maxt,
            shards.len()
        );
        DbQuerier::new(
            shards,
            self.options.shard_merge,
            self.options.parallel_select,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::matcher::Matcher;
    use crate::query::test_util::{block, collect, drain};

    fn starts(blocks: &[&Block]) -> Vec<i64> {
        blocks.iter().map(|b| b.meta().min_time).collect()
    }

    #[test]
    fn test_builder_meta_and_chunking() {
        let mut builder = BlockBuilder::new().with_samples_per_chunk(2);
        builder.add_series(
            Labels::from_pairs(&[("job", "a")]),
            (0..5).map(|t| Sample::new(t * 10, t as f64)).collect(),
        );
        builder.add_series(
            Labels::from_pairs(&[("job", "b")]),
            vec![Sample::new(-5, 1.0)],
        );
        let block = builder.build().unwrap();

        assert_eq!(
            *block.meta(),
            BlockMeta {
                min_time: -5,
                max_time: 40,
                num_series: 2,
                num_samples: 6,
            }
        );

        let q = block.querier(i64::MIN, i64::MAX);
        let series = collect(q.select(&[Matcher::equal("job", "a")]).as_mut());
        assert_eq!(drain(series[0].iterator().as_mut()).len(), 5);
    }

    #[test]
    fn test_builder_full_timestamp_range() {
        let mut builder = BlockBuilder::new();
        builder.add_series(
            Labels::from_pairs(&[("job", "a")]),
            vec![
                Sample::new(i64::MIN, 0.0),
                Sample::new(-10, 1.0),
                Sample::new(i64::MAX, 2.0),
            ],
        );
        let block = builder.build().unwrap();
        assert_eq!(block.meta().min_time, i64::MIN);
        assert_eq!(block.meta().max_time, i64::MAX);

        let q = block.querier(i64::MIN, i64::MAX);
        let series = collect(q.select(&[Matcher::equal("job", "a")]).as_mut());
        let ts: Vec<i64> = drain(series[0].iterator().as_mut())
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        assert_eq!(ts, vec![i64::MIN, -10, i64::MAX]);
    }

    #[test]
    fn test_builder_rejects_bad_input() {
        assert!(matches!(
            BlockBuilder::new().build(),
            Err(StorageError::InvalidBlock(_))
        ));

        let mut builder = BlockBuilder::new();
        builder.add_series(Labels::from_pairs(&[("job", "a")]), Vec::new());
        assert!(matches!(builder.build(), Err(StorageError::InvalidBlock(_))));

        // Out of order across a chunk boundary
        let mut builder = BlockBuilder::new().with_samples_per_chunk(2);
        builder.add_series(
            Labels::from_pairs(&[("job", "a")]),
            vec![Sample::new(1, 0.0), Sample::new(5, 0.0), Sample::new(3, 0.0)],
        );
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_blocks_for_range() {
        let mut shard = Shard::new(vec![
            block(&[(&[("job", "a")], &[200, 299])]),
            block(&[(&[("job", "a")], &[0, 99])]),
        ]);
        shard.add_block(block(&[(&[("job", "a")], &[100, 199])]));

        assert_eq!(starts(&shard.blocks_for_range(0, 1000)), vec![0, 100, 200]);
        assert_eq!(starts(&shard.blocks_for_range(150, 250)), vec![100, 200]);
        // Inclusive at both ends
        assert_eq!(starts(&shard.blocks_for_range(99, 100)), vec![0, 100]);
        assert!(shard.blocks_for_range(300, 400).is_empty());
    }

    #[test]
    fn test_shard_querier_skips_blocks_outside_range() {
        let shard = Shard::new(vec![
            block(&[(&[("job", "a")], &[0, 99])]),
            block(&[(&[("job", "a")], &[100, 199])]),
        ]);

        let q = shard.querier(100, 150, false);
        assert_eq!(q.block_count(), 1);
        assert_eq!(shard.blocks()[0].pending_readers(), 0);
        assert_eq!(shard.blocks()[1].pending_readers(), 1);
    }

    #[test]
    fn test_block_querier_window() {
        let b = block(&[(&[("job", "a")], &[100, 199])]);

        let q = b.querier(150, 1000);
        assert_eq!(q.time_range(), Some(TimeRange::new(150, 199)));
        assert_eq!(collect(q.select(&[Matcher::equal("job", "a")]).as_mut()).len(), 1);

        // Outside the block, and an inverted window
        for (mint, maxt) in [(200, 300), (0, 99), (180, 120)] {
            let q = b.querier(mint, maxt);
            assert_eq!(q.time_range(), None);
            let mut set = q.select(&[Matcher::equal("job", "a")]);
            assert!(!set.next());
            assert!(set.err().is_none());
        }
    }

    #[test]
    fn test_db_querier() {
        let db = Db::new(
            vec![
                Shard::new(vec![
                    block(&[(&[("job", "a")], &[0, 99])]),
                    block(&[(&[("job", "a")], &[100, 199])]),
                ]),
                Shard::new(vec![block(&[(&[("job", "b")], &[50])])]),
            ],
            QueryOptions::default(),
        );

        let mut q = db.querier(0, 200);
        assert_eq!(q.shard_count(), 2);
        let series = collect(q.select(&[Matcher::prefix("job", "")]).as_mut());
        assert_eq!(series.len(), 2);
        assert_eq!(drain(series[0].iterator().as_mut()).len(), 4);

        q.close().unwrap();
        for shard in db.shards() {
            for block in shard.blocks() {
                assert_eq!(block.pending_readers(), 0);
            }
        }
    }

    #[test]
    fn test_shard_merge_parse() {
        assert_eq!("merge".parse::<ShardMerge>().unwrap(), ShardMerge::Merge);
        assert_eq!("CONCAT".parse::<ShardMerge>().unwrap(), ShardMerge::Concat);
        assert!("zip".parse::<ShardMerge>().is_err());
        assert_eq!(ShardMerge::default().to_string(), "merge");
    }
}
