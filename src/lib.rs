//! # chronicle-tsdb
//!
//! Read path of a sharded, time-partitioned time-series store.
//!
//! Given a time window and a conjunction of label matchers, the query
//! engine returns the matching series in label order, each as a single
//! seekable sample stream, even when a series' history is split across
//! blocks and shards.
//!
//! ## Modules
//!
//! - [`storage`]: Labels, samples, chunks, blocks, shards and the `Db` handle
//! - [`index`]: Matchers, postings lists and the per-block inverted index
//! - [`query`]: Queriers, series-set merges and series iterators
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust
//! use chronicle_tsdb::query::{parse_selector, Querier};
//! use chronicle_tsdb::storage::{BlockBuilder, Db, Labels, QueryOptions, Sample, Shard};
//!
//! fn block(start: i64) -> chronicle_tsdb::storage::Block {
//!     let mut builder = BlockBuilder::new();
//!     builder.add_series(
//!         Labels::from_pairs(&[("__name__", "up"), ("job", "api")]),
//!         (0..10).map(|i| Sample::new(start + i * 1000, 1.0)).collect(),
//!     );
//!     builder.build().unwrap()
//! }
//!
//! // One shard, two consecutive blocks holding the same series
//! let db = Db::new(
//!     vec![Shard::new(vec![block(0), block(10_000)])],
//!     QueryOptions::default(),
//! );
//!
//! let matchers = parse_selector(r#"up{job="api"}"#).unwrap();
//! let mut querier = db.querier(0, 20_000);
//! let mut set = querier.select(&matchers);
//!
//! assert!(set.next());
//! let series = set.current().unwrap();
//! let mut it = series.iterator();
//! let mut count = 0;
//! while it.next() {
//!     count += 1;
//! }
//! assert_eq!(count, 20);
//! assert!(!set.next());
//!
//! querier.close().unwrap();
//! ```

pub mod config;
pub mod index;
pub mod query;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    Block, BlockBuilder, Dataset, Db, Label, Labels, QueryOptions, Sample, Shard, ShardMerge,
    StorageError, StorageResult, TimeRange,
};

pub use index::{IndexReader, Matcher};

pub use query::{
    parse_selector, BufferedSeriesIterator, Querier, QueryError, QueryResult, Series,
    SeriesIterator, SeriesSet,
};

pub use config::{generate_default_config, Config, ConfigError, LoggingConfig, QueryConfig};
