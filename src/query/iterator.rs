//! Series iterators
//!
//! All iterators share one state machine: unstarted, positioned on a
//! sample, or exhausted (possibly with an error).
//!
//! - `ChunkSeriesIterator`: walks a leaf series' chunk list
//! - `ChainedSeriesIterator`: walks time-disjoint segments of one series
//!   drawn from several blocks
//! - `BufferedSeriesIterator`: any iterator plus a bounded window of the
//!   samples it has already passed

use crate::query::error::QueryError;
use crate::storage::chunk::{Chunk, ChunkIterator};
use crate::storage::types::{Sample, TimeRange};
use std::collections::VecDeque;
use std::sync::Arc;

/// Iterates over the samples of one time series
pub trait SeriesIterator: Send {
    /// Advance to the first sample with timestamp >= `t`
    ///
    /// Does not move if the current sample already satisfies it. Returns
    /// false and exhausts the iterator if no such sample exists.
    fn seek(&mut self, t: i64) -> bool;

    /// Current (timestamp, value); only meaningful while positioned
    fn values(&self) -> (i64, f64);

    /// Advance by one sample
    fn next(&mut self) -> bool;

    fn err(&self) -> Option<&QueryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unstarted,
    Positioned,
    Exhausted,
}

/// Iterator over an ordered, non-overlapping list of chunks
pub struct ChunkSeriesIterator {
    chunks: Arc<[Arc<dyn Chunk>]>,
    /// Index of the chunk `cur` iterates
    i: usize,
    cur: Option<Box<dyn ChunkIterator>>,
    sample: Sample,
    state: State,
    err: Option<QueryError>,
}

impl ChunkSeriesIterator {
    pub fn new(chunks: Arc<[Arc<dyn Chunk>]>) -> Self {
        Self {
            chunks,
            i: 0,
            cur: None,
            sample: Sample::new(0, 0.0),
            state: State::Unstarted,
            err: None,
        }
    }

    /// Jump past chunks that end before `t`, if the current one does
    fn skip_chunks(&mut self, t: i64) {
        let ends_before = |c: &Arc<dyn Chunk>| c.meta().max_time < t;
        if self.chunks.get(self.i).map_or(false, ends_before) {
            let rest = &self.chunks[self.i + 1..];
            self.i += 1 + rest.partition_point(ends_before);
            self.cur = None;
        }
    }
}

impl SeriesIterator for ChunkSeriesIterator {
    fn seek(&mut self, t: i64) -> bool {
        match self.state {
            State::Exhausted => return false,
            State::Positioned if self.sample.t >= t => return true,
            _ => {}
        }

        self.skip_chunks(t);
        while self.next() {
            if self.sample.t >= t {
                return true;
            }
        }
        false
    }

    fn values(&self) -> (i64, f64) {
        (self.sample.t, self.sample.v)
    }

    fn next(&mut self) -> bool {
        if self.state == State::Exhausted {
            return false;
        }

        loop {
            if let Some(it) = self.cur.as_mut() {
                if it.next() {
                    self.sample = it.at();
                    self.state = State::Positioned;
                    return true;
                }
                if let Some(e) = it.err() {
                    self.err = Some(QueryError::Iterator(e.to_string()));
                    self.state = State::Exhausted;
                    return false;
                }
                self.i += 1;
            }

            match self.chunks.get(self.i) {
                Some(chunk) => self.cur = Some(chunk.iterator()),
                None => {
                    self.cur = None;
                    self.state = State::Exhausted;
                    return false;
                }
            }
        }
    }

    fn err(&self) -> Option<&QueryError> {
        self.err.as_ref()
    }
}

/// One time-disjoint piece of a chained series
pub struct ChainSegment {
    pub iter: Box<dyn SeriesIterator>,
    /// Inclusive sample bounds of the segment, when known
    pub range: Option<TimeRange>,
}

/// Iterator presenting time-disjoint segments as one sample stream
///
/// Segments are consumed in the order given, which must be time order.
pub struct ChainedSeriesIterator {
    segments: Vec<ChainSegment>,
    /// Segment currently being consumed
    i: usize,
    sample: Sample,
    state: State,
}

impl ChainedSeriesIterator {
    pub fn new(segments: Vec<ChainSegment>) -> Self {
        Self {
            segments,
            i: 0,
            sample: Sample::new(0, 0.0),
            state: State::Unstarted,
        }
    }
}

impl SeriesIterator for ChainedSeriesIterator {
    fn seek(&mut self, t: i64) -> bool {
        match self.state {
            State::Exhausted => return false,
            State::Positioned if self.sample.t >= t => return true,
            _ => {}
        }

        // Segments with known bounds ending before t hold nothing for us
        while let Some(seg) = self.segments.get(self.i) {
            match seg.range {
                Some(range) if range.max < t => self.i += 1,
                _ => break,
            }
        }

        while let Some(seg) = self.segments.get_mut(self.i) {
            if seg.iter.seek(t) {
                let (t, v) = seg.iter.values();
                self.sample = Sample::new(t, v);
                self.state = State::Positioned;
                return true;
            }
            if seg.iter.err().is_some() {
                self.state = State::Exhausted;
                return false;
            }
            self.i += 1;
        }

        self.state = State::Exhausted;
        false
    }

    fn values(&self) -> (i64, f64) {
        (self.sample.t, self.sample.v)
    }

    fn next(&mut self) -> bool {
        if self.state == State::Exhausted {
            return false;
        }

        while let Some(seg) = self.segments.get_mut(self.i) {
            if seg.iter.next() {
                let (t, v) = seg.iter.values();
                self.sample = Sample::new(t, v);
                self.state = State::Positioned;
                return true;
            }
            if seg.iter.err().is_some() {
                // Stay on the failed segment so err() can report it
                self.state = State::Exhausted;
                return false;
            }
            self.i += 1;
        }

        self.state = State::Exhausted;
        false
    }

    fn err(&self) -> Option<&QueryError> {
        self.segments.get(self.i).and_then(|seg| seg.iter.err())
    }
}

/// Iterator that remembers up to `capacity` previously visited samples
///
/// Windowed consumers (rates, deltas) read history through `peek_back`
/// without re-seeking the underlying iterator.
pub struct BufferedSeriesIterator {
    it: Box<dyn SeriesIterator>,
    /// Oldest sample first
    buf: VecDeque<Sample>,
    capacity: usize,
    positioned: bool,
}

impl BufferedSeriesIterator {
    pub fn new(it: Box<dyn SeriesIterator>, capacity: usize) -> Self {
        Self {
            it,
            buf: VecDeque::with_capacity(capacity),
            capacity,
            positioned: false,
        }
    }

    /// Sample `i` positions behind the head; `peek_back(0)` is the head
    ///
    /// None if the iterator is not positioned or the window holds fewer
    /// than `i` earlier samples.
    pub fn peek_back(&self, i: usize) -> Option<Sample> {
        if !self.positioned {
            return None;
        }
        if i == 0 {
            return self.head();
        }
        self.buf
            .len()
            .checked_sub(i)
            .and_then(|idx| self.buf.get(idx))
            .copied()
    }

    /// Number of samples currently held behind the head
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Samples behind the head, oldest first
    pub fn window(&self) -> impl Iterator<Item = &Sample> {
        self.buf.iter()
    }

    /// Per-second rate of change between the sample `n` back and the head
    pub fn trailing_rate(&self, n: usize) -> Option<f64> {
        if n == 0 {
            return None;
        }
        let head = self.head()?;
        let back = self.peek_back(n)?;
        let elapsed_ms = head.t.checked_sub(back.t).filter(|&ms| ms > 0)?;
        Some((head.v - back.v) * 1000.0 / elapsed_ms as f64)
    }

    fn head(&self) -> Option<Sample> {
        if !self.positioned {
            return None;
        }
        let (t, v) = self.it.values();
        Some(Sample::new(t, v))
    }

    fn remember(&mut self, sample: Sample) {
        if self.capacity == 0 {
            return;
        }
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(sample);
    }
}

impl SeriesIterator for BufferedSeriesIterator {
    /// Steps with `next` so the window stays contiguous behind the head
    fn seek(&mut self, t: i64) -> bool {
        if self.positioned && self.it.values().0 >= t {
            return true;
        }
        while self.next() {
            if self.it.values().0 >= t {
                return true;
            }
        }
        false
    }

    fn values(&self) -> (i64, f64) {
        self.it.values()
    }

    fn next(&mut self) -> bool {
        let prev = self.head();
        self.positioned = self.it.next();
        // The window only ever holds samples behind a live head
        if let (true, Some(prev)) = (self.positioned, prev) {
            self.remember(prev);
        }
        self.positioned
    }

    fn err(&self) -> Option<&QueryError> {
        self.it.err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::test_util::{chunk, chunk_list, corrupt_chunk, drain};

    fn chunk_iter(groups: &[&[i64]]) -> ChunkSeriesIterator {
        ChunkSeriesIterator::new(chunk_list(groups))
    }

    fn segment(groups: &[&[i64]]) -> ChainSegment {
        let chunks = chunk_list(groups);
        let range = match (chunks.first(), chunks.last()) {
            (Some(first), Some(last)) => Some(TimeRange::new(
                first.meta().min_time,
                last.meta().max_time,
            )),
            _ => None,
        };
        ChainSegment {
            iter: Box::new(ChunkSeriesIterator::new(chunks)),
            range,
        }
    }

    #[test]
    fn test_chunk_iterator_chains_chunks() {
        let mut it = chunk_iter(&[&[1, 2, 3], &[10, 11], &[20]]);
        let ts: Vec<i64> = drain(&mut it).into_iter().map(|(t, _)| t).collect();

        assert_eq!(ts, vec![1, 2, 3, 10, 11, 20]);
        assert!(it.err().is_none());
        assert!(!it.next());
    }

    #[test]
    fn test_chunk_iterator_empty() {
        let mut it = ChunkSeriesIterator::new(Vec::new().into());
        assert!(!it.next());
        assert!(!it.seek(0));
        assert!(it.err().is_none());
    }

    #[test]
    fn test_chunk_iterator_seek() {
        let mut it = chunk_iter(&[&[1, 2, 3], &[10, 11], &[20, 25]]);

        assert!(it.seek(2));
        assert_eq!(it.values(), (2, 2.0));
        // Seeking backwards stays put
        assert!(it.seek(0));
        assert_eq!(it.values().0, 2);
        // Skips the remainder of the first chunk and into the second
        assert!(it.seek(5));
        assert_eq!(it.values().0, 10);
        // Skips a whole chunk
        assert!(it.seek(21));
        assert_eq!(it.values().0, 25);
        assert!(!it.seek(26));
        assert!(!it.next());
    }

    #[test]
    fn test_chunk_iterator_seek_then_next() {
        let mut it = chunk_iter(&[&[1, 2], &[10, 11]]);
        assert!(it.seek(11));
        assert_eq!(it.values().0, 11);
        assert!(!it.next());
    }

    #[test]
    fn test_chunk_iterator_surfaces_decode_errors() {
        let chunks: Arc<[Arc<dyn Chunk>]> =
            vec![chunk(&[1, 2]), corrupt_chunk(&[5, 6]), chunk(&[9])].into();
        let mut it = ChunkSeriesIterator::new(chunks);

        assert!(it.next());
        assert!(it.next());
        assert!(!it.next());
        assert!(matches!(it.err(), Some(QueryError::Iterator(_))));
        // Never recovers into the following chunk
        assert!(!it.next());
    }

    #[test]
    fn test_chained_iterator_concatenates() {
        let mut it = ChainedSeriesIterator::new(vec![
            segment(&[&[0, 50], &[60, 99]]),
            segment(&[&[100, 150]]),
            segment(&[&[200]]),
        ]);
        let ts: Vec<i64> = drain(&mut it).into_iter().map(|(t, _)| t).collect();

        assert_eq!(ts, vec![0, 50, 60, 99, 100, 150, 200]);
    }

    #[test]
    fn test_chained_iterator_seek_across_segments() {
        let mut it = ChainedSeriesIterator::new(vec![
            segment(&[&[0, 10, 20]]),
            segment(&[&[100, 110]]),
            segment(&[&[200, 210]]),
        ]);

        assert!(it.seek(15));
        assert_eq!(it.values().0, 20);
        assert!(it.seek(21));
        assert_eq!(it.values().0, 100);
        assert!(it.seek(150));
        assert_eq!(it.values().0, 200);
        assert!(it.next());
        assert_eq!(it.values().0, 210);
        assert!(!it.seek(211));
    }

    #[test]
    fn test_chained_iterator_seek_without_bounds() {
        let unbounded = |groups: &[&[i64]]| ChainSegment {
            iter: Box::new(ChunkSeriesIterator::new(chunk_list(groups))),
            range: None,
        };
        let mut it = ChainedSeriesIterator::new(vec![
            unbounded(&[&[0, 10]]),
            unbounded(&[&[100]]),
        ]);

        assert!(it.seek(50));
        assert_eq!(it.values().0, 100);
    }

    #[test]
    fn test_chained_iterator_stops_on_error() {
        let failing = ChainSegment {
            iter: Box::new(ChunkSeriesIterator::new(
                vec![corrupt_chunk(&[100, 101])].into(),
            )),
            range: None,
        };
        let mut it =
            ChainedSeriesIterator::new(vec![segment(&[&[1]]), failing, segment(&[&[200]])]);

        assert!(it.next());
        assert!(!it.next());
        assert!(matches!(it.err(), Some(QueryError::Iterator(_))));
        assert!(!it.next());
    }

    #[test]
    fn test_buffered_peek_back() {
        let mut it = BufferedSeriesIterator::new(Box::new(chunk_iter(&[&[1, 2, 3, 4, 5]])), 2);

        assert_eq!(it.peek_back(0), None);
        assert!(it.next());
        assert_eq!(it.peek_back(0), Some(Sample::new(1, 1.0)));
        assert_eq!(it.peek_back(1), None);

        assert!(it.next());
        assert!(it.next());
        assert_eq!(it.values().0, 3);
        assert_eq!(it.peek_back(1), Some(Sample::new(2, 2.0)));
        assert_eq!(it.peek_back(2), Some(Sample::new(1, 1.0)));

        assert!(it.next());
        // Capacity 2: sample 1 has been evicted
        assert_eq!(it.peek_back(2), Some(Sample::new(2, 2.0)));
        assert_eq!(it.peek_back(3), None);
        assert_eq!(it.buffered(), 2);
    }

    #[test]
    fn test_buffered_seek_keeps_window_contiguous() {
        let mut it = BufferedSeriesIterator::new(Box::new(chunk_iter(&[&[1, 2], &[3, 4, 5]])), 3);

        assert!(it.seek(4));
        assert_eq!(it.values().0, 4);
        let window: Vec<i64> = it.window().map(|s| s.t).collect();
        assert_eq!(window, vec![1, 2, 3]);
        // Seeking does not disturb history when already satisfied
        assert!(it.seek(4));
        assert_eq!(it.peek_back(1).map(|s| s.t), Some(3));
    }

    #[test]
    fn test_buffered_window_after_exhaustion() {
        let mut it = BufferedSeriesIterator::new(Box::new(chunk_iter(&[&[1, 2, 3]])), 4);
        while it.next() {}

        assert_eq!(it.peek_back(0), None);
        assert_eq!(it.peek_back(1), None);
        assert_eq!(it.trailing_rate(1), None);
        // Only samples that were ever behind a head stay in the window
        let window: Vec<i64> = it.window().map(|s| s.t).collect();
        assert_eq!(window, vec![1, 2]);
    }

    #[test]
    fn test_buffered_zero_capacity() {
        let mut it = BufferedSeriesIterator::new(Box::new(chunk_iter(&[&[1, 2]])), 0);
        assert!(it.next());
        assert!(it.next());
        assert_eq!(it.peek_back(1), None);
        assert_eq!(it.peek_back(0).map(|s| s.t), Some(2));
    }

    #[test]
    fn test_trailing_rate() {
        // Values equal timestamps: one unit per millisecond
        let mut it = BufferedSeriesIterator::new(
            Box::new(chunk_iter(&[&[0, 1000, 2000, 3000]])),
            4,
        );
        assert!(it.seek(3000));

        assert_eq!(it.trailing_rate(3), Some(1000.0));
        assert_eq!(it.trailing_rate(1), Some(1000.0));
        assert_eq!(it.trailing_rate(0), None);
        assert_eq!(it.trailing_rate(4), None);
    }
}
