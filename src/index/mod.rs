//! Chronicle Index Structures
//!
//! The inverted index a block exposes to the query layer:
//!
//! - **Matcher**: predicates over the values of one label
//! - **Postings**: sorted series-reference cursors with union/intersection
//! - **IndexReader**: label values, postings and series lookup per block
//!
//! # Architecture
//!
//! ```text
//! Matcher env=~"prod|staging"
//!        ↓
//! label_values("env") → [dev, prod, staging]  → keep prod, staging
//!        ↓
//! postings(env, prod) ∪ postings(env, staging) → [1, 3, 4]
//!        ↓
//! ∩ with the other matchers' postings → series(ref)
//! ```

pub mod matcher;
pub mod postings;
pub mod reader;

pub use matcher::Matcher;
pub use postings::{
    expand, intersect, union, EmptyPostings, ErrPostings, ListPostings, Postings, SeriesRef,
};
pub use reader::{IndexBuilder, IndexReader, MemIndex, TupleTable};
