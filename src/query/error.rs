//! Query error types
//!
//! Errors are captured on the failing series set or iterator and read back
//! through `err()` once `next()` has returned false.

use thiserror::Error;

/// Errors that can occur while selecting or iterating series
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Label value table or postings could not be read
    #[error("Index lookup error: {0}")]
    IndexLookup(String),

    /// A postings reference did not resolve to a series
    #[error("Series resolution error for ref {reference}: {reason}")]
    SeriesResolution { reference: u64, reason: String },

    /// The querier does not support this operation
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Sample data could not be decoded
    #[error("Iterator error: {0}")]
    Iterator(String),

    /// Matcher could not be constructed
    #[error("Invalid matcher: {0}")]
    InvalidMatcher(String),

    /// Selector string could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Querier was used after close()
    #[error("Querier is closed")]
    Closed,
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
