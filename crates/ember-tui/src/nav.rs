//! Drill-down history.  A snapshot holds the id list it was showing, so
//! popping restores that exact list without a refetch; item state still
//! resolves through the arena.

use crate::action::ListRequest;
use crate::cache::Section;

#[derive(Debug, Clone, PartialEq)]
pub struct NavState {
    pub section: Section,
    pub ids: Vec<String>,
    pub cursor: usize,
    pub title: String,
    pub source: ListRequest,
    pub total: usize,
}

/// Unbounded; cleared on section or server switch.
#[derive(Debug, Default)]
pub struct NavStack {
    frames: Vec<NavState>,
}

impl NavStack {
    pub fn push(&mut self, state: NavState) {
        self.frames.push(state);
    }

    pub fn pop(&mut self) -> Option<NavState> {
        self.frames.pop()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NavState> {
        self.frames.iter()
    }
}
