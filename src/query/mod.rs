//! Chronicle Query Engine
//!
//! Answers `select(matchers)` over a time window of a sharded, block
//! partitioned database:
//!
//! - **Querier**: block, shard and database level query handles
//! - **SeriesSet**: sorted cursors over matching series, with merge-joins
//! - **Series / SeriesIterator**: per-series sample access with seek and
//!   bounded lookback
//! - **Parser**: selector strings into label matchers
//!
//! # Examples
//!
//! ```rust,ignore
//! use chronicle_tsdb::query::{parse_selector, Querier};
//!
//! let matchers = parse_selector(r#"http_requests{job="api"}"#)?;
//! let mut querier = db.querier(mint, maxt);
//! let mut set = querier.select(&matchers);
//! while set.next() {
//!     let series = set.current().expect("positioned");
//!     let mut it = series.iterator();
//!     while it.next() {
//!         let (t, v) = it.values();
//!     }
//! }
//! if let Some(e) = set.err() {
//!     return Err(e.clone().into());
//! }
//! querier.close()?;
//! ```

mod error;
mod iterator;
mod parser;
mod querier;
mod series;
mod series_set;

#[cfg(test)]
pub(crate) mod test_util;

pub use error::{QueryError, QueryResult};
pub use iterator::{
    BufferedSeriesIterator, ChainSegment, ChainedSeriesIterator, ChunkSeriesIterator,
    SeriesIterator,
};
pub use parser::parse_selector;
pub use querier::{BlockQuerier, DbQuerier, Querier, ShardQuerier};
pub use series::{ChainedSeries, ChunkSeries, Series};
pub use series_set::{
    BlockSeriesSet, ConcatSeriesSet, EmptySeriesSet, MergeJoinSeriesSet, MultiMergeSeriesSet,
    SeriesSet,
};
