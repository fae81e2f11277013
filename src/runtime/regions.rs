//! Region state machines. Pure: they decide what changes, the instance
//! performs the tree work.

use std::ops::Range;

use crate::regions::Branch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Same branch as before: no teardown, no creation.
    Unchanged,
    /// First resolution after mount.
    Mount(Branch),
    Flip { from: Branch, to: Branch },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConditionalState {
    active: Option<Branch>,
}

impl ConditionalState {
    pub fn active(&self) -> Option<Branch> {
        self.active
    }

    pub fn transition(&mut self, value: bool) -> Transition {
        let next = Branch::from_condition(value);
        match self.active.replace(next) {
            None => Transition::Mount(next),
            Some(current) if current == next => Transition::Unchanged,
            Some(from) => Transition::Flip { from, to: next },
        }
    }

    /// Unmounts the region, returning the branch that was active.
    pub fn clear(&mut self) -> Option<Branch> {
        self.active.take()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resize {
    Unchanged,
    /// Item indices to create, after the untouched prefix.
    Grow(Range<usize>),
    /// Trailing item indices to destroy.
    Shrink(Range<usize>),
}

/// A range repetition only remembers how many items exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeState {
    count: usize,
}

impl RangeState {
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn resize(&mut self, count: usize) -> Resize {
        let previous = std::mem::replace(&mut self.count, count);
        match count.cmp(&previous) {
            std::cmp::Ordering::Equal => Resize::Unchanged,
            std::cmp::Ordering::Greater => Resize::Grow(previous..count),
            std::cmp::Ordering::Less => Resize::Shrink(count..previous),
        }
    }

    pub fn clear(&mut self) {
        self.count = 0;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rebuild {
    pub destroyed: usize,
    pub created: usize,
}

/// A collection repetition either rebuilds everything or appends one item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionState {
    count: usize,
}

impl CollectionState {
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn rebuild(&mut self, len: usize) -> Rebuild {
        let destroyed = std::mem::replace(&mut self.count, len);
        Rebuild {
            destroyed,
            created: len,
        }
    }

    /// Index of the appended item.
    pub fn append(&mut self) -> usize {
        self.count += 1;
        self.count - 1
    }

    pub fn clear(&mut self) {
        self.count = 0;
    }
}
