//! Core data types shared by the storage and query layers
//!
//! - `Label` / `Labels`: series identity, kept sorted by name
//! - `Sample`: a single (timestamp, value) measurement
//! - `TimeRange`: an inclusive time window used to select blocks
//! - `compare_labels`: the sort key for every merge in the query layer

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Label name reserved for the metric name in selectors
pub const METRIC_NAME_LABEL: &str = "__name__";

/// A single name/value pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The complete, name-sorted label set identifying a series
///
/// Names are unique; construction sorts by name and keeps the last value
/// given for a duplicated name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct Labels(Vec<Label>);

impl Labels {
    /// Build a label set, sorting by name and removing duplicate names
    pub fn new(mut labels: Vec<Label>) -> Self {
        // Stable sort keeps insertion order among duplicates, so the last
        // occurrence of a name is the one that survives dedup below.
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        let mut out: Vec<Label> = Vec::with_capacity(labels.len());
        for label in labels {
            match out.last_mut() {
                Some(last) if last.name == label.name => *last = label,
                _ => out.push(label),
            }
        }
        Self(out)
    }

    /// Build a label set from `(name, value)` pairs
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self::new(pairs.iter().map(|(n, v)| Label::new(*n, *v)).collect())
    }

    /// Value of the label with the given name, if present
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|i| self.0[i].value.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Label] {
        &self.0
    }
}

impl From<BTreeMap<String, String>> for Labels {
    fn from(map: BTreeMap<String, String>) -> Self {
        // BTreeMap iteration is already name-ordered and unique
        Self(map.into_iter().map(|(name, value)| Label { name, value }).collect())
    }
}

impl From<Labels> for BTreeMap<String, String> {
    fn from(labels: Labels) -> Self {
        labels.0.into_iter().map(|l| (l.name, l.value)).collect()
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}

impl Ord for Labels {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_labels(self, other)
    }
}

impl PartialOrd for Labels {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two label sets
///
/// Position by position, names are compared first and values second; the
/// first difference decides. When one set is a prefix of the other, the
/// shorter set sorts first.
pub fn compare_labels(a: &Labels, b: &Labels) -> Ordering {
    for (la, lb) in a.0.iter().zip(b.0.iter()) {
        let ord = la
            .name
            .cmp(&lb.name)
            .then_with(|| la.value.cmp(&lb.value));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.0.len().cmp(&b.0.len())
}

/// A single time-series sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unix timestamp in milliseconds
    pub t: i64,
    /// Measured value
    pub v: f64,
}

impl Sample {
    pub fn new(t: i64, v: f64) -> Self {
        Self { t, v }
    }
}

impl From<(i64, f64)> for Sample {
    fn from((t, v): (i64, f64)) -> Self {
        Self { t, v }
    }
}

/// Time range for queries (closed interval: [min, max])
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// First timestamp included, in milliseconds
    pub min: i64,
    /// Last timestamp included, in milliseconds
    pub max: i64,
}

impl TimeRange {
    /// Create a new time range
    ///
    /// # Panics
    /// Panics if min > max
    pub fn new(min: i64, max: i64) -> Self {
        assert!(min <= max, "TimeRange: min must not exceed max");
        Self { min, max }
    }

    /// Create a time range, returning None if invalid
    pub fn try_new(min: i64, max: i64) -> Option<Self> {
        if min <= max {
            Some(Self { min, max })
        } else {
            None
        }
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.min && timestamp <= self.max
    }

    /// Check if this range overlaps with another
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.min <= other.max && self.max >= other.min
    }

    /// Smallest range covering both
    pub fn union(&self, other: &TimeRange) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Get intersection with another range, if any
    pub fn intersection(&self, other: &TimeRange) -> Option<Self> {
        Self::try_new(self.min.max(other.min), self.max.min(other.max))
    }
}
