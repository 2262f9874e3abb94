//! Voice backends: the audio-producing half of an engine.
//!
//! An engine owns exactly one backend and decides *when* voices start and
//! stop; the backend decides *which* voice slot sounds and how. Both backends
//! allocate through [`VoiceAllocator`](ensemble_voice::VoiceAllocator), so
//! polyphony limits and stealing behave the same for samples and synthesis.

mod sampler;
mod synth;

pub use sampler::{SampleSet, SampleVoiceBank};
pub use synth::SynthVoiceGraph;

use ensemble_voice::{EnvelopeConfig, Note, OscillatorType, SynthParams, SynthParamsPatch, VoiceId};
use serde::Serialize;

/// Handle of one triggered voice. Unique per backend for its lifetime.
pub type VoiceHandle = VoiceId;

/// Outcome of [`VoiceBackend::attack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceStart {
    pub handle: VoiceHandle,
    /// Active voice cut off to make room
    pub stolen: Option<StolenVoice>,
}

/// A sounding voice that lost its slot to a new note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StolenVoice {
    pub note: Note,
    pub handle: VoiceHandle,
}

/// Uniform playback contract over sample and synthesis backends.
pub trait VoiceBackend: Send {
    /// Start a voice with a fresh envelope attack.
    ///
    /// Returns `None` when no voice is available (no-steal allocation).
    fn attack(&mut self, note: Note, velocity: f32) -> Option<VoiceStart>;

    /// Move the sounding note into its release phase.
    fn release(&mut self, note: Note) -> Option<VoiceHandle>;

    /// Retune the sounding voice to `note` without a new attack.
    fn glide(&mut self, note: Note, velocity: f32) -> Option<VoiceHandle>;

    fn release_all(&mut self) -> Vec<VoiceHandle>;

    /// Push a parameter change to live nodes. `params` is the full state after
    /// the patch was applied.
    fn apply_params(&mut self, params: &SynthParams, patch: &SynthParamsPatch);

    fn snapshot(&self) -> BackendSnapshot;

    /// Free every voice. The backend is unusable afterwards.
    fn dispose(&mut self);
}

/// Diagnostics view of a backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackendSnapshot {
    /// Notes with a voice in attack/decay/sustain, in pitch order
    pub sounding: Vec<Note>,
    /// Envelope attacks triggered so far (glides do not count)
    pub attacks: u64,
    pub voices: Vec<VoiceSnapshot>,
}

impl BackendSnapshot {
    pub fn voice_for(&self, note: Note) -> Option<&VoiceSnapshot> {
        self.voices.iter().find(|v| v.note == note && !v.releasing)
    }

    pub fn releasing_count(&self) -> usize {
        self.voices.iter().filter(|v| v.releasing).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceSnapshot {
    pub handle: VoiceHandle,
    pub note: Note,
    pub velocity: f32,
    pub releasing: bool,
    pub detail: VoiceDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VoiceDetail {
    Synth {
        frequency: f32,
        /// Captured at attack time
        oscillator: OscillatorType,
        amp_envelope: EnvelopeConfig,
        filter_envelope: EnvelopeConfig,
        modulation_envelope: EnvelopeConfig,
        modulation_index: f32,
        harmonicity: f32,
        /// Live: follows parameter updates
        filter_cutoff: f32,
        filter_resonance: f32,
        gain: f32,
    },
    Sample {
        root: Note,
        playback_rate: f64,
    },
}
