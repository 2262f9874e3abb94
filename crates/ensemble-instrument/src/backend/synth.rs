//! Synthesized voice graph.

use super::{
    BackendSnapshot, StolenVoice, VoiceBackend, VoiceDetail, VoiceHandle, VoiceSnapshot,
    VoiceStart,
};
use ensemble_voice::{
    AllocationResult, EnvelopeConfig, Note, OscillatorType, SynthParams, SynthParamsPatch,
    VoiceAllocator, VoiceAllocatorConfig, VoiceState,
};
use std::collections::HashMap;

/// One synthesized voice.
///
/// Envelopes and oscillator are captured when the voice attacks; filter and
/// gain follow live parameter changes.
#[derive(Debug, Clone)]
struct SynthVoice {
    note: Note,
    velocity: f32,
    oscillator: OscillatorType,
    amp_envelope: EnvelopeConfig,
    filter_envelope: EnvelopeConfig,
    modulation_envelope: EnvelopeConfig,
    modulation_index: f32,
    harmonicity: f32,
    filter_cutoff: f32,
    filter_resonance: f32,
    gain: f32,
    releasing: bool,
}

impl SynthVoice {
    fn new(note: Note, velocity: f32, params: &SynthParams) -> Self {
        Self {
            note,
            velocity,
            oscillator: params.oscillator,
            amp_envelope: params.amp_envelope,
            filter_envelope: params.filter_envelope,
            modulation_envelope: params.modulation_envelope,
            modulation_index: params.modulation_index,
            harmonicity: params.harmonicity,
            filter_cutoff: params.filter_cutoff,
            filter_resonance: params.filter_resonance,
            gain: params.gain,
            releasing: false,
        }
    }
}

/// Voice graph of a synthesizer engine. Built lazily on first play.
pub struct SynthVoiceGraph {
    allocator: VoiceAllocator,
    params: SynthParams,
    voices: HashMap<VoiceHandle, SynthVoice>,
    attacks: u64,
}

impl SynthVoiceGraph {
    pub fn new(config: VoiceAllocatorConfig, params: SynthParams) -> Self {
        Self {
            allocator: VoiceAllocator::new(config),
            params,
            voices: HashMap::new(),
            attacks: 0,
        }
    }

    pub fn params(&self) -> &SynthParams {
        &self.params
    }

    /// Drop voices whose slot has been reused or freed.
    fn prune(&mut self) {
        let slots = self.allocator.slots();
        self.voices.retain(|handle, _| {
            slots
                .iter()
                .any(|s| s.voice_id == *handle && s.state != VoiceState::Idle)
        });
    }
}

impl VoiceBackend for SynthVoiceGraph {
    fn attack(&mut self, note: Note, velocity: f32) -> Option<VoiceStart> {
        let start = match self.allocator.allocate(note, velocity) {
            AllocationResult::Allocated { voice_id, .. } => VoiceStart {
                handle: voice_id,
                stolen: None,
            },
            AllocationResult::Stolen {
                voice_id,
                stolen_voice_id,
                stolen_note,
                ..
            } => VoiceStart {
                handle: voice_id,
                stolen: Some(StolenVoice {
                    note: stolen_note,
                    handle: stolen_voice_id,
                }),
            },
            AllocationResult::LegatoRetrigger { voice_id, .. } => {
                if let Some(voice) = self.voices.get_mut(&voice_id) {
                    voice.note = note;
                    voice.velocity = velocity;
                }
                return Some(VoiceStart {
                    handle: voice_id,
                    stolen: None,
                });
            }
            AllocationResult::Unavailable => return None,
        };

        self.prune();
        let voice = SynthVoice::new(note, velocity, &self.params);
        // Stealing by level compares sustain plateaus
        self.allocator
            .update_envelope_level(start.handle, velocity * voice.amp_envelope.sustain);
        self.voices.insert(start.handle, voice);
        self.attacks += 1;
        Some(start)
    }

    fn release(&mut self, note: Note) -> Option<VoiceHandle> {
        let handle = self.allocator.release(note)?;
        if let Some(voice) = self.voices.get_mut(&handle) {
            voice.releasing = true;
        }
        Some(handle)
    }

    fn glide(&mut self, note: Note, velocity: f32) -> Option<VoiceHandle> {
        let handle = self.allocator.glide(note, velocity)?;
        if let Some(voice) = self.voices.get_mut(&handle) {
            voice.note = note;
            voice.velocity = velocity;
        }
        Some(handle)
    }

    fn release_all(&mut self) -> Vec<VoiceHandle> {
        let released = self.allocator.release_all();
        for handle in &released {
            if let Some(voice) = self.voices.get_mut(handle) {
                voice.releasing = true;
            }
        }
        released
    }

    fn apply_params(&mut self, params: &SynthParams, patch: &SynthParamsPatch) {
        self.params = *params;
        if !patch.touches_live_params() {
            return;
        }
        for voice in self.voices.values_mut() {
            voice.filter_cutoff = params.filter_cutoff;
            voice.filter_resonance = params.filter_resonance;
            voice.gain = params.gain;
        }
    }

    fn snapshot(&self) -> BackendSnapshot {
        let mut voices: Vec<VoiceSnapshot> = self
            .voices
            .iter()
            .map(|(handle, v)| VoiceSnapshot {
                handle: *handle,
                note: v.note,
                velocity: v.velocity,
                releasing: v.releasing,
                detail: VoiceDetail::Synth {
                    frequency: v.note.frequency(),
                    oscillator: v.oscillator,
                    amp_envelope: v.amp_envelope,
                    filter_envelope: v.filter_envelope,
                    modulation_envelope: v.modulation_envelope,
                    modulation_index: v.modulation_index,
                    harmonicity: v.harmonicity,
                    filter_cutoff: v.filter_cutoff,
                    filter_resonance: v.filter_resonance,
                    gain: v.gain,
                },
            })
            .collect();
        voices.sort_by_key(|v| v.handle);

        BackendSnapshot {
            sounding: self.allocator.sounding_notes(),
            attacks: self.attacks,
            voices,
        }
    }

    fn dispose(&mut self) {
        self.allocator.reset();
        self.voices.clear();
    }
}

impl std::fmt::Debug for SynthVoiceGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthVoiceGraph")
            .field("voices", &self.voices.len())
            .field("attacks", &self.attacks)
            .finish()
    }
}
