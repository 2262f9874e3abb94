//! Sample-based voices.

use super::{
    BackendSnapshot, StolenVoice, VoiceBackend, VoiceDetail, VoiceHandle, VoiceSnapshot,
    VoiceStart,
};
use crate::assets::{decode_wav, SampleAsset, SampleBuffer};
use crate::error::{Error, Result};
use ensemble_voice::{
    AllocationResult, Note, SynthParams, SynthParamsPatch, VoiceAllocator, VoiceAllocatorConfig,
    VoiceState,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Decoded sample zones of one instrument, keyed by root note.
#[derive(Debug, Clone, Default)]
pub struct SampleSet {
    zones: BTreeMap<Note, Arc<SampleBuffer>>,
}

impl SampleSet {
    /// Decode every asset whose file stem names a note.
    ///
    /// Other files are skipped. An instrument without a single zone is
    /// reported as [`Error::AssetNotFound`].
    pub fn decode(instrument: &str, assets: &[SampleAsset]) -> Result<Self> {
        let mut zones = BTreeMap::new();
        for asset in assets {
            let Some(root) = asset.root_note() else {
                tracing::warn!(
                    instrument,
                    file = %asset.file_name,
                    "sample file name is not a note, skipping"
                );
                continue;
            };
            let buffer = decode_wav(instrument, root, asset)?;
            zones.insert(root, Arc::new(buffer));
        }

        if zones.is_empty() {
            return Err(Error::AssetNotFound {
                instrument: instrument.to_string(),
            });
        }
        Ok(Self { zones })
    }

    /// Zone closest to `note`; the lower zone wins a tie.
    pub fn nearest(&self, note: Note) -> Option<&Arc<SampleBuffer>> {
        let below = self.zones.range(..=note).next_back();
        let above = self.zones.range(note..).next();
        match (below, above) {
            (Some((lo, lo_buf)), Some((hi, hi_buf))) => {
                if note.semitones_from(*lo) <= hi.semitones_from(note) {
                    Some(lo_buf)
                } else {
                    Some(hi_buf)
                }
            }
            (Some((_, buf)), None) | (None, Some((_, buf))) => Some(buf),
            (None, None) => None,
        }
    }

    pub fn roots(&self) -> Vec<Note> {
        self.zones.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

/// Playback rate that transposes a zone recorded at `root` to `note`.
fn playback_rate(note: Note, root: Note) -> f64 {
    2f64.powf(note.semitones_from(root) as f64 / 12.0)
}

#[derive(Debug, Clone)]
struct SampleVoice {
    note: Note,
    velocity: f32,
    zone: Arc<SampleBuffer>,
    releasing: bool,
}

/// Polyphonic sample player for melodic instruments and drum kits.
#[derive(Debug)]
pub struct SampleVoiceBank {
    samples: SampleSet,
    allocator: VoiceAllocator,
    voices: HashMap<VoiceHandle, SampleVoice>,
    attacks: u64,
}

impl SampleVoiceBank {
    pub fn new(samples: SampleSet, config: VoiceAllocatorConfig) -> Self {
        Self {
            samples,
            allocator: VoiceAllocator::new(config),
            voices: HashMap::new(),
            attacks: 0,
        }
    }

    pub fn samples(&self) -> &SampleSet {
        &self.samples
    }

    fn prune(&mut self) {
        let slots = self.allocator.slots();
        self.voices.retain(|handle, _| {
            slots
                .iter()
                .any(|s| s.voice_id == *handle && s.state != VoiceState::Idle)
        });
    }
}

impl VoiceBackend for SampleVoiceBank {
    fn attack(&mut self, note: Note, velocity: f32) -> Option<VoiceStart> {
        let zone = self.samples.nearest(note)?.clone();
        let start = match self.allocator.allocate(note, velocity) {
            AllocationResult::Allocated { voice_id, .. }
            | AllocationResult::LegatoRetrigger { voice_id, .. } => VoiceStart {
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
            AllocationResult::Unavailable => return None,
        };

        self.prune();
        self.voices.insert(
            start.handle,
            SampleVoice {
                note,
                velocity,
                zone,
                releasing: false,
            },
        );
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

    /// Samples cannot be retuned mid-flight, so a glide re-attacks.
    fn glide(&mut self, note: Note, velocity: f32) -> Option<VoiceHandle> {
        self.attack(note, velocity).map(|start| start.handle)
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

    fn apply_params(&mut self, _params: &SynthParams, _patch: &SynthParamsPatch) {}

    fn snapshot(&self) -> BackendSnapshot {
        let mut voices: Vec<VoiceSnapshot> = self
            .voices
            .iter()
            .map(|(handle, v)| VoiceSnapshot {
                handle: *handle,
                note: v.note,
                velocity: v.velocity,
                releasing: v.releasing,
                detail: VoiceDetail::Sample {
                    root: v.zone.root,
                    playback_rate: playback_rate(v.note, v.zone.root),
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
        self.samples = SampleSet::default();
    }
}
