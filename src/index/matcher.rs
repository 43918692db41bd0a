//! Label matchers
//!
//! A matcher names a label and tests candidate values for it. The set of
//! variants is closed so dispatch is a plain `match`.

use crate::query::{QueryError, QueryResult};
use regex::Regex;
use std::fmt;

/// Predicate over the values of one label
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Value equals the given string
    Equal { name: String, value: String },
    /// Value differs from the given string
    NotEqual { name: String, value: String },
    /// Value starts with the given string
    Prefix { name: String, prefix: String },
    /// Value matches the fully anchored pattern
    Regex {
        name: String,
        pattern: String,
        regex: Regex,
        /// Literal every match starts with, for `literal.*` patterns
        prefix: Option<String>,
    },
}

impl Matcher {
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Matcher::Equal {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn not_equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Matcher::NotEqual {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn prefix(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Matcher::Prefix {
            name: name.into(),
            prefix: prefix.into(),
        }
    }

    /// Build a regex matcher anchored at both ends
    ///
    /// `(?s)literal.*` becomes a `Prefix` matcher. Plain `literal.*` stays a
    /// regex, since `.` does not match newlines, but keeps `literal` as its
    /// scan prefix.
    pub fn regex(name: impl Into<String>, pattern: impl Into<String>) -> QueryResult<Self> {
        let name = name.into();
        let pattern = pattern.into();

        let dot_all = pattern.strip_prefix("(?s)");
        let literal = dot_all
            .unwrap_or(&pattern)
            .strip_suffix(".*")
            .filter(|l| !l.is_empty() && regex::escape(l) == *l);

        if let (Some(_), Some(literal)) = (dot_all, literal) {
            return Ok(Matcher::prefix(name, literal));
        }
        let prefix = literal.map(String::from);

        let regex = Regex::new(&format!("^(?:{})$", pattern))
            .map_err(|e| QueryError::InvalidMatcher(format!("{}: {}", name, e)))?;

        Ok(Matcher::Regex {
            name,
            pattern,
            regex,
            prefix,
        })
    }

    /// Label name this matcher applies to
    pub fn name(&self) -> &str {
        match self {
            Matcher::Equal { name, .. }
            | Matcher::NotEqual { name, .. }
            | Matcher::Prefix { name, .. }
            | Matcher::Regex { name, .. } => name,
        }
    }

    /// Whether `value` satisfies the matcher
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Matcher::Equal { value: v, .. } => value == v,
            Matcher::NotEqual { value: v, .. } => value != v,
            Matcher::Prefix { prefix, .. } => value.starts_with(prefix.as_str()),
            Matcher::Regex { regex, .. } => regex.is_match(value),
        }
    }

    /// Prefix every matching value shares, if the matcher has one
    ///
    /// Sorted value tables can seek to this prefix and stop scanning once
    /// values no longer start with it.
    pub fn literal_prefix(&self) -> Option<&str> {
        match self {
            Matcher::Equal { value, .. } => Some(value),
            Matcher::Prefix { prefix, .. } => Some(prefix),
            Matcher::Regex { prefix, .. } => prefix.as_deref(),
            Matcher::NotEqual { .. } => None,
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Equal { name, value } => write!(f, "{}={:?}", name, value),
            Matcher::NotEqual { name, value } => write!(f, "{}!={:?}", name, value),
            Matcher::Prefix { name, prefix } => {
                write!(f, "{}=~{:?}", name, format!("(?s){}.*", regex::escape(prefix)))
            }
            Matcher::Regex { name, pattern, .. } => write!(f, "{}=~{:?}", name, pattern),
        }
    }
}
