//! Chronicle Storage Layer
//!
//! The immutable, already-durable data a query runs against:
//!
//! - **types**: Core data structures (Labels, Sample, TimeRange)
//! - **chunk**: Delta encoding + LZ4 compressed sample chunks
//! - **block**: Blocks with their index, shards of blocks, the `Db` handle
//! - **dataset**: JSON description of a whole database
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Db ─┬─ Shard ─┬─ Block (index + chunks)  [t0, t1]
//!     │         └─ Block (index + chunks)  [t1, t2]
//!     └─ Shard ─── Block (index + chunks)  [t0, t2]
//! ```
//!
//! # Example
//!
//! ```rust
//! use chronicle_tsdb::index::Matcher;
//! use chronicle_tsdb::query::Querier;
//! use chronicle_tsdb::storage::{BlockBuilder, Db, Labels, QueryOptions, Sample, Shard};
//!
//! let mut builder = BlockBuilder::new();
//! builder.add_series(
//!     Labels::from_pairs(&[("job", "api")]),
//!     vec![Sample::new(0, 1.0), Sample::new(1000, 2.0)],
//! );
//! let block = builder.build().unwrap();
//!
//! let db = Db::new(vec![Shard::new(vec![block])], QueryOptions::default());
//! let mut querier = db.querier(0, 1000);
//! let mut set = querier.select(&[Matcher::equal("job", "api")]);
//! assert!(set.next());
//! querier.close().unwrap();
//! ```

pub mod block;
pub mod chunk;
pub mod dataset;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use block::{
    Block, BlockBuilder, BlockMeta, Db, QueryOptions, ReaderGuard, Shard, ShardMerge,
    DEFAULT_SAMPLES_PER_CHUNK,
};
pub use chunk::{Chunk, ChunkIterator, ChunkMeta, EncodedChunk};
pub use dataset::{Dataset, DatasetBlock, DatasetSeries, DatasetShard};
pub use error::{StorageError, StorageResult};
pub use types::{compare_labels, Label, Labels, Sample, TimeRange, METRIC_NAME_LABEL};
