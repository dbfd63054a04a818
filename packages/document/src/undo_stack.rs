//! # Undo/Redo Stack
//!
//! Holds the inverse-patch batches produced by committed update blocks.
//! Undoing applies a batch in reverse and keeps the inverses it produced as
//! the redo batch, so undo, redo and transaction rollback all run through
//! the same patch machinery. The stack never applies anything itself; the
//! session drives it.

use crate::session::Patch;

/// One undoable step: the inverse patches of a committed block, in forward
/// order.
#[derive(Debug)]
pub struct PatchBatch {
    pub patches: Vec<Patch>,
    pub description: Option<String>,
}

#[derive(Debug)]
pub struct UndoStack {
    undo: Vec<PatchBatch>,
    redo: Vec<PatchBatch>,
    /// 0 means unlimited.
    max_levels: usize,
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoStack {
    pub fn new() -> Self {
        Self::with_max_levels(100)
    }

    pub fn with_max_levels(max_levels: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            max_levels,
        }
    }

    /// Record a freshly committed batch. A new action invalidates the redo
    /// future.
    pub fn push(&mut self, batch: PatchBatch) {
        self.undo.push(batch);
        if self.max_levels > 0 && self.undo.len() > self.max_levels {
            self.undo.remove(0);
        }
        self.redo.clear();
    }

    pub(crate) fn pop_undo(&mut self) -> Option<PatchBatch> {
        self.undo.pop()
    }

    pub(crate) fn push_redo(&mut self, batch: PatchBatch) {
        self.redo.push(batch);
    }

    pub(crate) fn pop_redo(&mut self) -> Option<PatchBatch> {
        self.redo.pop()
    }

    /// Re-admit a redone batch to the undo side without clearing redo.
    pub(crate) fn push_undone(&mut self, batch: PatchBatch) {
        self.undo.push(batch);
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_levels(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_levels(&self) -> usize {
        self.redo.len()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.undo.last().and_then(|b| b.description.as_deref())
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}
