//! Last-note-priority stack for monophonic voices.
//!
//! The most recently pressed, still-held note sounds. Releasing it reveals the
//! next most recent held note; notes may be released out of press order.

use crate::note::Note;

/// Ordered set of held notes, most recent last. Never contains duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonoNotePriorityStack {
    notes: Vec<Note>,
}

impl MonoNotePriorityStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `note` to the top. Pressing an already held note does not add a
    /// second entry.
    pub fn push(&mut self, note: Note) {
        self.notes.retain(|n| *n != note);
        self.notes.push(note);
    }

    /// Remove `note` wherever it sits. Returns whether it was present.
    pub fn remove(&mut self, note: Note) -> bool {
        let before = self.notes.len();
        self.notes.retain(|n| *n != note);
        self.notes.len() != before
    }

    pub fn top(&self) -> Option<Note> {
        self.notes.last().copied()
    }

    pub fn contains(&self, note: Note) -> bool {
        self.notes.contains(&note)
    }

    /// Oldest first.
    pub fn as_slice(&self) -> &[Note] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }
}
