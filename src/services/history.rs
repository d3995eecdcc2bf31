//! Undo/redo history of a plan's table collection.
//!
//! Snapshots are whole collections. Applying one is a bulk write, so callers
//! peek the target, commit it through the state guard, and only then move it
//! across stacks with `undone`/`redone`. A rejected apply leaves both stacks
//! untouched, and so does an apply whose target is no longer on top (two
//! editors undoing the same step at once).

use std::collections::VecDeque;

use crate::state::Table;

pub struct History {
    limit: usize,
    undo: VecDeque<Vec<Table>>,
    redo: Vec<Vec<Table>>,
}

impl History {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { limit, undo: VecDeque::new(), redo: Vec::new() }
    }

    /// Record the collection as it was before a new commit. Clears redo.
    pub fn record(&mut self, previous: Vec<Table>) {
        self.push_undo(previous);
        self.redo.clear();
    }

    #[must_use]
    pub fn peek_undo(&self) -> Option<&Vec<Table>> {
        self.undo.back()
    }

    #[must_use]
    pub fn peek_redo(&self) -> Option<&Vec<Table>> {
        self.redo.last()
    }

    /// `applied` was committed over `replaced`. Moves the undo top to redo
    /// only if it is still `applied`. Returns whether the stacks moved.
    pub fn undone(&mut self, applied: &[Table], replaced: Vec<Table>) -> bool {
        if self.undo.back().is_none_or(|top| top.as_slice() != applied) {
            return false;
        }
        self.undo.pop_back();
        self.redo.push(replaced);
        true
    }

    /// Mirror of `undone` for the redo stack.
    pub fn redone(&mut self, applied: &[Table], replaced: Vec<Table>) -> bool {
        if self.redo.last().is_none_or(|top| top.as_slice() != applied) {
            return false;
        }
        self.redo.pop();
        self.push_undo(replaced);
        true
    }

    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    fn push_undo(&mut self, snapshot: Vec<Table>) {
        if self.limit == 0 {
            return;
        }
        if self.undo.len() == self.limit {
            self.undo.pop_front();
        }
        self.undo.push_back(snapshot);
    }
}

#[cfg(test)]
#[path = "history_test.rs"]
mod tests;
