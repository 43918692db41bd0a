//! Postings lists
//!
//! A postings list is the ascending sequence of series references that
//! carry one label name/value pair. Selection combines them two ways:
//!
//! - `union`: OR across the values one matcher accepts
//! - `intersect`: AND across the matchers of a selection
//!
//! Both are lazy cursors over their inputs.

use crate::query::QueryError;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Block-local series reference
pub type SeriesRef = u64;

/// Forward-only cursor over ascending series references
pub trait Postings: Send {
    /// Advance to the next reference
    fn next(&mut self) -> bool;

    /// Advance to the first reference >= `target`
    ///
    /// Does not move if the current reference already satisfies it.
    fn seek(&mut self, target: SeriesRef) -> bool;

    /// Current reference; only meaningful after `next`/`seek` returned true
    fn at(&self) -> SeriesRef;

    fn err(&self) -> Option<&QueryError>;
}

/// Postings over a shared, sorted, deduplicated reference list
pub struct ListPostings {
    list: Arc<[SeriesRef]>,
    next_idx: usize,
    cur: SeriesRef,
    started: bool,
    done: bool,
}

impl ListPostings {
    pub fn new(list: Arc<[SeriesRef]>) -> Self {
        Self {
            list,
            next_idx: 0,
            cur: 0,
            started: false,
            done: false,
        }
    }
}

impl Postings for ListPostings {
    fn next(&mut self) -> bool {
        if self.done {
            return false;
        }
        match self.list.get(self.next_idx) {
            Some(&r) => {
                self.cur = r;
                self.next_idx += 1;
                self.started = true;
                true
            }
            None => {
                self.done = true;
                false
            }
        }
    }

    fn seek(&mut self, target: SeriesRef) -> bool {
        if self.done {
            return false;
        }
        if self.started && self.cur >= target {
            return true;
        }
        let rest = &self.list[self.next_idx..];
        self.next_idx += rest.partition_point(|&r| r < target);
        self.next()
    }

    fn at(&self) -> SeriesRef {
        self.cur
    }

    fn err(&self) -> Option<&QueryError> {
        None
    }
}

/// Postings with no entries
pub struct EmptyPostings;

impl Postings for EmptyPostings {
    fn next(&mut self) -> bool {
        false
    }

    fn seek(&mut self, _target: SeriesRef) -> bool {
        false
    }

    fn at(&self) -> SeriesRef {
        0
    }

    fn err(&self) -> Option<&QueryError> {
        None
    }
}

/// Postings that failed to resolve; empty, reporting the failure
pub struct ErrPostings {
    err: QueryError,
}

impl ErrPostings {
    pub fn new(err: QueryError) -> Self {
        Self { err }
    }
}

impl Postings for ErrPostings {
    fn next(&mut self) -> bool {
        false
    }

    fn seek(&mut self, _target: SeriesRef) -> bool {
        false
    }

    fn at(&self) -> SeriesRef {
        0
    }

    fn err(&self) -> Option<&QueryError> {
        Some(&self.err)
    }
}

/// References present in every input
pub fn intersect(mut its: Vec<Box<dyn Postings>>) -> Box<dyn Postings> {
    if its.len() <= 1 {
        return its.pop().unwrap_or_else(|| Box::new(EmptyPostings));
    }
    Box::new(IntersectPostings {
        its,
        cur: 0,
        started: false,
        done: false,
    })
}

/// References present in any input, each reported once
pub fn union(mut its: Vec<Box<dyn Postings>>) -> Box<dyn Postings> {
    if its.len() <= 1 {
        return its.pop().unwrap_or_else(|| Box::new(EmptyPostings));
    }
    Box::new(UnionPostings {
        heap: BinaryHeap::with_capacity(its.len()),
        its,
        cur: 0,
        state: UnionState::Unstarted,
    })
}

/// Drain a postings list into a vector
pub fn expand(p: &mut dyn Postings) -> Result<Vec<SeriesRef>, QueryError> {
    let mut out = Vec::new();
    while p.next() {
        out.push(p.at());
    }
    match p.err() {
        Some(e) => Err(e.clone()),
        None => Ok(out),
    }
}

struct IntersectPostings {
    its: Vec<Box<dyn Postings>>,
    cur: SeriesRef,
    started: bool,
    done: bool,
}

impl IntersectPostings {
    /// Seek every input to `target`, raising the target whenever one
    /// overshoots, until all inputs agree or one runs out.
    fn converge(&mut self, mut target: SeriesRef) -> bool {
        'outer: loop {
            for it in self.its.iter_mut() {
                if !it.seek(target) {
                    self.done = true;
                    return false;
                }
                let at = it.at();
                if at > target {
                    target = at;
                    continue 'outer;
                }
            }
            self.cur = target;
            self.started = true;
            return true;
        }
    }
}

impl Postings for IntersectPostings {
    fn next(&mut self) -> bool {
        if self.done {
            return false;
        }
        if !self.its[0].next() {
            self.done = true;
            return false;
        }
        let target = self.its[0].at();
        self.converge(target)
    }

    fn seek(&mut self, target: SeriesRef) -> bool {
        if self.done {
            return false;
        }
        if self.started && self.cur >= target {
            return true;
        }
        self.converge(target)
    }

    fn at(&self) -> SeriesRef {
        self.cur
    }

    fn err(&self) -> Option<&QueryError> {
        self.its.iter().find_map(|it| it.err())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnionState {
    Unstarted,
    Positioned,
    Done,
}

struct UnionPostings {
    its: Vec<Box<dyn Postings>>,
    /// Min-heap of (current reference, input index) for live inputs
    heap: BinaryHeap<Reverse<(SeriesRef, usize)>>,
    cur: SeriesRef,
    state: UnionState,
}

impl UnionPostings {
    /// Position every input, at its first entry or at `target`
    fn init(&mut self, target: Option<SeriesRef>) -> bool {
        for (i, it) in self.its.iter_mut().enumerate() {
            let ok = match target {
                Some(t) => it.seek(t),
                None => it.next(),
            };
            if ok {
                self.heap.push(Reverse((it.at(), i)));
            } else if it.err().is_some() {
                self.state = UnionState::Done;
                return false;
            }
        }
        self.take_head()
    }

    /// Move input `i` forward (to the next entry or to `target`) and
    /// re-queue it. Returns false if the input failed.
    fn advance(&mut self, i: usize, target: Option<SeriesRef>) -> bool {
        let it = &mut self.its[i];
        let ok = match target {
            Some(t) => it.seek(t),
            None => it.next(),
        };
        if ok {
            self.heap.push(Reverse((it.at(), i)));
            true
        } else {
            it.err().is_none()
        }
    }

    fn take_head(&mut self) -> bool {
        match self.heap.peek() {
            Some(Reverse((r, _))) => {
                self.cur = *r;
                self.state = UnionState::Positioned;
                true
            }
            None => {
                self.state = UnionState::Done;
                false
            }
        }
    }
}

impl Postings for UnionPostings {
    fn next(&mut self) -> bool {
        match self.state {
            UnionState::Done => false,
            UnionState::Unstarted => self.init(None),
            UnionState::Positioned => {
                // Every input sitting on the current reference moves on,
                // which is what drops duplicates across inputs.
                while let Some(&Reverse((r, i))) = self.heap.peek() {
                    if r != self.cur {
                        break;
                    }
                    self.heap.pop();
                    if !self.advance(i, None) {
                        self.state = UnionState::Done;
                        return false;
                    }
                }
                self.take_head()
            }
        }
    }

    fn seek(&mut self, target: SeriesRef) -> bool {
        match self.state {
            UnionState::Done => false,
            UnionState::Unstarted => self.init(Some(target)),
            UnionState::Positioned => {
                if self.cur >= target {
                    return true;
                }
                while let Some(&Reverse((r, i))) = self.heap.peek() {
                    if r >= target {
                        break;
                    }
                    self.heap.pop();
                    if !self.advance(i, Some(target)) {
                        self.state = UnionState::Done;
                        return false;
                    }
                }
                self.take_head()
            }
        }
    }

    fn at(&self) -> SeriesRef {
        self.cur
    }

    fn err(&self) -> Option<&QueryError> {
        self.its.iter().find_map(|it| it.err())
    }
}
