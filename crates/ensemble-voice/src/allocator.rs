//! Voice allocator with polyphony limit and stealing strategies.
//!
//! Backends allocate one slot per sounding pitch:
//! - Stealing strategies: oldest, quietest, highest/lowest note, newest
//! - Mono and legato modes share a single slot
//!
//! Sustain and key-held decisions are made by the engine's
//! [`VoiceEnvelopeState`](crate::VoiceEnvelopeState); the allocator only knows
//! which slots are attacking/sustaining and which are releasing.

use crate::note::Note;
use serde::{Deserialize, Serialize};

/// Unique identifier for a voice instance.
pub type VoiceId = u64;

/// Voice allocation strategy when no idle voices are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// Steal the oldest playing voice (most common)
    #[default]
    Oldest,
    /// Steal the quietest voice (lowest envelope level)
    Quietest,
    HighestNote,
    LowestNote,
    /// Steal the most recent voice
    Newest,
    /// Never steal - drop new notes if no voices available
    NoSteal,
}

/// Voice playing mode, fixed when an engine is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceMode {
    /// Multiple simultaneous voices
    #[default]
    Poly,
    /// One voice, a new note re-attacks the envelope
    Mono,
    /// One voice, a new note glides without re-attacking
    Legato,
}

impl VoiceMode {
    pub fn is_monophonic(self) -> bool {
        !matches!(self, VoiceMode::Poly)
    }
}

/// State of a single voice slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceState {
    #[default]
    Idle,
    /// Attack/decay/sustain
    Active,
    Releasing,
    /// Stolen but still fading out
    Stolen,
}

#[derive(Debug, Clone, Default)]
pub struct VoiceSlot {
    pub voice_id: VoiceId,
    pub note: Note,
    /// 0.0-1.0
    pub velocity: f32,
    /// Current envelope level (0.0-1.0) for quietest stealing
    pub envelope_level: f32,
    /// Allocation sequence number
    pub start_time: u64,
    pub state: VoiceState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceAllocatorConfig {
    pub max_voices: usize,
    pub strategy: AllocationStrategy,
    pub mode: VoiceMode,
}

impl Default for VoiceAllocatorConfig {
    fn default() -> Self {
        Self {
            max_voices: 16,
            strategy: AllocationStrategy::Oldest,
            mode: VoiceMode::Poly,
        }
    }
}

/// Result of attempting to allocate a voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationResult {
    Allocated {
        voice_id: VoiceId,
        slot_index: usize,
    },
    /// Existing voice was stolen to make room
    Stolen {
        voice_id: VoiceId,
        slot_index: usize,
        stolen_voice_id: VoiceId,
        stolen_note: Note,
    },
    /// Legato transition - existing voice retuned without retriggering
    LegatoRetrigger {
        voice_id: VoiceId,
        slot_index: usize,
    },
    /// No voice available (NoSteal strategy)
    Unavailable,
}

impl AllocationResult {
    pub fn voice_id(&self) -> Option<VoiceId> {
        match self {
            AllocationResult::Allocated { voice_id, .. }
            | AllocationResult::Stolen { voice_id, .. }
            | AllocationResult::LegatoRetrigger { voice_id, .. } => Some(*voice_id),
            AllocationResult::Unavailable => None,
        }
    }

    pub fn slot_index(&self) -> Option<usize> {
        match self {
            AllocationResult::Allocated { slot_index, .. }
            | AllocationResult::Stolen { slot_index, .. }
            | AllocationResult::LegatoRetrigger { slot_index, .. } => Some(*slot_index),
            AllocationResult::Unavailable => None,
        }
    }

    /// True when the envelope attack must be triggered.
    pub fn is_attack(&self) -> bool {
        matches!(
            self,
            AllocationResult::Allocated { .. } | AllocationResult::Stolen { .. }
        )
    }
}

/// Fixed-size voice slot table.
#[derive(Debug, Clone)]
pub struct VoiceAllocator {
    config: VoiceAllocatorConfig,
    slots: Vec<VoiceSlot>,
    next_voice_id: VoiceId,
    sequence: u64,

    /// Active note tracking: MIDI note -> slot index
    note_to_slot: [Option<usize>; 128],
}

impl VoiceAllocator {
    pub fn new(config: VoiceAllocatorConfig) -> Self {
        let slot_count = if config.mode.is_monophonic() {
            1
        } else {
            config.max_voices.max(1)
        };
        let slots = (0..slot_count).map(|_| VoiceSlot::default()).collect();

        Self {
            config,
            slots,
            next_voice_id: 1,
            sequence: 0,
            note_to_slot: [None; 128],
        }
    }

    pub fn mode(&self) -> VoiceMode {
        self.config.mode
    }

    /// Allocate a voice for a new note.
    ///
    /// A note that is already sounding is released first, so one pitch never
    /// stacks two voices. Releasing voices are recycled before any active
    /// voice is stolen, and recycling one is not reported as a steal: its
    /// note-off has already happened.
    pub fn allocate(&mut self, note: Note, velocity: f32) -> AllocationResult {
        if self.config.mode.is_monophonic() {
            return self.allocate_mono_legato(note, velocity);
        }

        if let Some(existing_slot) = self.note_to_slot[note.midi() as usize] {
            self.slots[existing_slot].state = VoiceState::Releasing;
            self.note_to_slot[note.midi() as usize] = None;
        }

        // Idle slots first, then voices already fading out
        if let Some(slot_index) = self.find_idle_slot().or_else(|| self.find_releasing_slot()) {
            return self.activate_slot(slot_index, note, velocity);
        }

        // Only attacking/sustaining voices are left
        if self.config.strategy == AllocationStrategy::NoSteal {
            return AllocationResult::Unavailable;
        }

        match self.find_slot_to_steal() {
            Some(slot_index) => {
                let stolen_voice_id = self.slots[slot_index].voice_id;
                let stolen_note = self.slots[slot_index].note;
                if self.note_to_slot[stolen_note.midi() as usize] == Some(slot_index) {
                    self.note_to_slot[stolen_note.midi() as usize] = None;
                }
                self.slots[slot_index].state = VoiceState::Stolen;

                match self.activate_slot(slot_index, note, velocity) {
                    AllocationResult::Allocated {
                        voice_id,
                        slot_index,
                    } => AllocationResult::Stolen {
                        voice_id,
                        slot_index,
                        stolen_voice_id,
                        stolen_note,
                    },
                    other => other,
                }
            }
            None => AllocationResult::Unavailable,
        }
    }

    /// Move the mono voice to `note` without retriggering.
    ///
    /// Returns `None` when no voice is sounding.
    pub fn glide(&mut self, note: Note, velocity: f32) -> Option<VoiceId> {
        let slot_index = self
            .slots
            .iter()
            .position(|s| s.state == VoiceState::Active)?;

        let old_note = self.slots[slot_index].note;
        if self.note_to_slot[old_note.midi() as usize] == Some(slot_index) {
            self.note_to_slot[old_note.midi() as usize] = None;
        }

        let slot = &mut self.slots[slot_index];
        slot.note = note;
        slot.velocity = velocity;
        self.note_to_slot[note.midi() as usize] = Some(slot_index);

        Some(slot.voice_id)
    }

    /// Move a sounding voice into its release phase.
    ///
    /// Returns the released voice, or `None` if the note was not sounding.
    pub fn release(&mut self, note: Note) -> Option<VoiceId> {
        let slot_index = self.note_to_slot[note.midi() as usize].take()?;
        let slot = &mut self.slots[slot_index];
        if slot.state != VoiceState::Active {
            return None;
        }
        slot.state = VoiceState::Releasing;
        Some(slot.voice_id)
    }

    /// Mark a voice as finished (envelope reached zero), freeing its slot.
    pub fn voice_finished(&mut self, voice_id: VoiceId) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.voice_id == voice_id {
                if self.note_to_slot[slot.note.midi() as usize] == Some(i) {
                    self.note_to_slot[slot.note.midi() as usize] = None;
                }
                slot.state = VoiceState::Idle;
                break;
            }
        }
    }

    /// Update envelope level for a voice (for quietest stealing).
    pub fn update_envelope_level(&mut self, voice_id: VoiceId, level: f32) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.voice_id == voice_id) {
            slot.envelope_level = level;
        }
    }

    /// Release every active voice.
    pub fn release_all(&mut self) -> Vec<VoiceId> {
        let mut released = Vec::new();
        for slot in &mut self.slots {
            if slot.state == VoiceState::Active {
                slot.state = VoiceState::Releasing;
                released.push(slot.voice_id);
            }
        }
        self.note_to_slot = [None; 128];
        released
    }

    /// Number of voices in attack/decay/sustain.
    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == VoiceState::Active)
            .count()
    }

    /// Notes currently held by an active voice, in pitch order.
    pub fn sounding_notes(&self) -> Vec<Note> {
        let mut notes: Vec<Note> = self
            .slots
            .iter()
            .filter(|s| s.state == VoiceState::Active)
            .map(|s| s.note)
            .collect();
        notes.sort();
        notes
    }

    pub fn slot_for(&self, note: Note) -> Option<usize> {
        self.note_to_slot[note.midi() as usize]
    }

    pub fn max_voices(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[VoiceSlot] {
        &self.slots
    }

    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = VoiceSlot::default();
        }
        self.note_to_slot = [None; 128];
    }

    fn find_idle_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.state == VoiceState::Idle)
    }

    /// Quietest voice in its release phase, oldest first on a tie.
    fn find_releasing_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s.state, VoiceState::Releasing | VoiceState::Stolen))
            .min_by(|(_, a), (_, b)| {
                a.envelope_level
                    .partial_cmp(&b.envelope_level)
                    .unwrap_or(core::cmp::Ordering::Equal)
                    .then(a.start_time.cmp(&b.start_time))
            })
            .map(|(i, _)| i)
    }

    /// Active voice to cut off, per the configured strategy.
    fn find_slot_to_steal(&self) -> Option<usize> {
        let active = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state == VoiceState::Active);

        match self.config.strategy {
            AllocationStrategy::Oldest => active.min_by_key(|(_, s)| s.start_time).map(|(i, _)| i),
            AllocationStrategy::Quietest => active
                .min_by(|(_, a), (_, b)| {
                    a.envelope_level
                        .partial_cmp(&b.envelope_level)
                        .unwrap_or(core::cmp::Ordering::Equal)
                        .then(a.start_time.cmp(&b.start_time))
                })
                .map(|(i, _)| i),
            AllocationStrategy::HighestNote => active.max_by_key(|(_, s)| s.note).map(|(i, _)| i),
            AllocationStrategy::LowestNote => active.min_by_key(|(_, s)| s.note).map(|(i, _)| i),
            AllocationStrategy::Newest => active.max_by_key(|(_, s)| s.start_time).map(|(i, _)| i),
            AllocationStrategy::NoSteal => None,
        }
    }

    fn activate_slot(&mut self, slot_index: usize, note: Note, velocity: f32) -> AllocationResult {
        let voice_id = self.next_voice_id;
        self.next_voice_id += 1;
        self.sequence += 1;

        self.slots[slot_index] = VoiceSlot {
            voice_id,
            note,
            velocity,
            // Peak level until the backend reports the real envelope
            envelope_level: velocity,
            start_time: self.sequence,
            state: VoiceState::Active,
        };
        self.note_to_slot[note.midi() as usize] = Some(slot_index);

        AllocationResult::Allocated {
            voice_id,
            slot_index,
        }
    }

    fn allocate_mono_legato(&mut self, note: Note, velocity: f32) -> AllocationResult {
        let active_slot = self
            .slots
            .iter()
            .position(|s| s.state == VoiceState::Active);

        if let (VoiceMode::Legato, Some(slot_index)) = (self.config.mode, active_slot) {
            // glide cannot fail here: slot_index is active
            let voice_id = self.glide(note, velocity).unwrap_or_default();
            return AllocationResult::LegatoRetrigger {
                voice_id,
                slot_index,
            };
        }

        if let Some(slot_index) = active_slot {
            let old_note = self.slots[slot_index].note;
            self.note_to_slot[old_note.midi() as usize] = None;
            self.slots[slot_index].state = VoiceState::Releasing;
        }
        self.activate_slot(0, note, velocity)
    }
}
