//! Per-engine note bookkeeping.
//!
//! Answers, for any note, "is it sounding, and why?". A note can be:
//! - **key-held**: its originating input still holds it down
//! - **sustained**: released by its input but retained by the sustain pedal
//! - **active only**: sounding, neither held nor sustained, waiting for its
//!   natural (or scheduled) release
//!
//! A note with no record is stopped. Both the play and the stop paths consult
//! this table, and [`VoiceEnvelopeState::note_should_release`] is evaluated at
//! the moment of every note-off and sustain-off instead of being cached.

use crate::allocator::VoiceId;
use crate::note::Note;
use std::collections::BTreeMap;

/// Bookkeeping for one currently-sounding note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteRecord {
    pub note: Note,
    /// Voice that was triggered for this note
    pub voice: VoiceId,
    pub key_held: bool,
    pub sustained: bool,
}

impl NoteRecord {
    fn should_release(&self) -> bool {
        !self.key_held && !self.sustained
    }
}

/// Key-held / sustained / active tracking for one engine.
#[derive(Debug, Clone, Default)]
pub struct VoiceEnvelopeState {
    records: BTreeMap<Note, NoteRecord>,
}

impl VoiceEnvelopeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly triggered voice, replacing any previous record for the
    /// same note. Returns the replaced record (a retrigger).
    pub fn start(&mut self, note: Note, voice: VoiceId, key_held: bool) -> Option<NoteRecord> {
        self.records.insert(
            note,
            NoteRecord {
                note,
                voice,
                key_held,
                sustained: false,
            },
        )
    }

    /// Point an existing record at a different voice (legato retune keeps the
    /// voice but moves it to another note).
    pub fn move_note(&mut self, from: Note, to: Note) -> Option<NoteRecord> {
        let mut record = self.records.remove(&from)?;
        record.note = to;
        self.records.insert(to, record);
        Some(record)
    }

    /// Returns false if the note has no record.
    pub fn mark_key_held(&mut self, note: Note) -> bool {
        match self.records.get_mut(&note) {
            Some(record) => {
                record.key_held = true;
                true
            }
            None => false,
        }
    }

    /// Returns false if the note has no record (duplicate or stray note-off).
    pub fn clear_key_held(&mut self, note: Note) -> bool {
        match self.records.get_mut(&note) {
            Some(record) => {
                record.key_held = false;
                true
            }
            None => false,
        }
    }

    /// Returns false if the note has no record.
    pub fn mark_sustained(&mut self, note: Note) -> bool {
        match self.records.get_mut(&note) {
            Some(record) => {
                record.sustained = true;
                true
            }
            None => false,
        }
    }

    pub fn is_sustained(&self, note: Note) -> bool {
        self.records.get(&note).is_some_and(|r| r.sustained)
    }

    pub fn is_key_held(&self, note: Note) -> bool {
        self.records.get(&note).is_some_and(|r| r.key_held)
    }

    pub fn is_sounding(&self, note: Note) -> bool {
        self.records.contains_key(&note)
    }

    /// True iff the note is sounding and neither key-held nor sustained.
    ///
    /// A note without a record is already stopped, so there is nothing to
    /// release and this returns false.
    pub fn note_should_release(&self, note: Note) -> bool {
        self.records.get(&note).is_some_and(NoteRecord::should_release)
    }

    pub fn get(&self, note: Note) -> Option<&NoteRecord> {
        self.records.get(&note)
    }

    /// Stop tracking a note.
    pub fn remove(&mut self, note: Note) -> Option<NoteRecord> {
        self.records.remove(&note)
    }

    /// Sustain pedal lifted: drop and return every sustained note that is not
    /// key-held. Held notes lose their sustained flag but keep sounding.
    pub fn release_sustained(&mut self) -> Vec<NoteRecord> {
        let mut released = Vec::new();
        self.records.retain(|_, record| {
            if !record.sustained {
                return true;
            }
            record.sustained = false;
            if record.key_held {
                true
            } else {
                released.push(*record);
                false
            }
        });
        released
    }

    /// Sounding notes that are not retained by the pedal.
    pub fn active_notes(&self) -> Vec<Note> {
        self.records
            .values()
            .filter(|r| !r.sustained)
            .map(|r| r.note)
            .collect()
    }

    pub fn sustained_notes(&self) -> Vec<Note> {
        self.records
            .values()
            .filter(|r| r.sustained)
            .map(|r| r.note)
            .collect()
    }

    pub fn held_notes(&self) -> Vec<Note> {
        self.records
            .values()
            .filter(|r| r.key_held)
            .map(|r| r.note)
            .collect()
    }

    /// Every sounding note, in pitch order.
    pub fn notes(&self) -> Vec<Note> {
        self.records.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record and return them.
    pub fn drain(&mut self) -> Vec<NoteRecord> {
        std::mem::take(&mut self.records).into_values().collect()
    }
}
