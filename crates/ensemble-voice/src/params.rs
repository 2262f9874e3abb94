//! Synthesis parameter state and partial updates.
//!
//! [`SynthParams`] is the full snapshot owned by one engine. Collaborators and
//! the UI send [`SynthParamsPatch`]es: only the supplied fields change, and
//! applying the same patch twice leaves the same state as applying it once.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

pub const MIN_CUTOFF_HZ: f32 = 20.0;
pub const MAX_CUTOFF_HZ: f32 = 20_000.0;
pub const MAX_RESONANCE: f32 = 30.0;
pub const MAX_STAGE_SECONDS: f32 = 20.0;
pub const MAX_MODULATION_INDEX: f32 = 100.0;
pub const MAX_HARMONICITY: f32 = 32.0;
pub const MAX_GAIN: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OscillatorType {
    Sine,
    Saw,
    Square,
    #[default]
    Triangle,
    Noise,
}

/// Four-stage ADSR envelope. Times in seconds, sustain 0.0 - 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.7,
            release: 0.2,
        }
    }
}

impl EnvelopeConfig {
    pub fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self {
            attack,
            decay,
            sustain,
            release,
        }
    }

    /// Quick attack, no decay, full sustain.
    pub fn organ() -> Self {
        Self::new(0.001, 0.0, 1.0, 0.01)
    }

    /// Plucky envelope with fast attack and decay.
    pub fn pluck() -> Self {
        Self::new(0.001, 0.3, 0.0, 0.1)
    }

    /// Pad-style envelope with slow attack and release.
    pub fn pad() -> Self {
        Self::new(0.5, 0.2, 0.8, 1.0)
    }

    fn apply(&mut self, patch: &EnvelopePatch) {
        if let Some(v) = patch.attack {
            self.attack = v.clamp(0.0, MAX_STAGE_SECONDS);
        }
        if let Some(v) = patch.decay {
            self.decay = v.clamp(0.0, MAX_STAGE_SECONDS);
        }
        if let Some(v) = patch.sustain {
            self.sustain = v.clamp(0.0, 1.0);
        }
        if let Some(v) = patch.release {
            self.release = v.clamp(0.0, MAX_STAGE_SECONDS);
        }
    }
}

/// Partial envelope update.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attack: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decay: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sustain: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<f32>,
}

impl EnvelopePatch {
    pub fn is_empty(&self) -> bool {
        self.attack.is_none() && self.decay.is_none() && self.sustain.is_none() && self.release.is_none()
    }

    fn check(&self, name: &'static str) -> Result<()> {
        for value in [self.attack, self.decay, self.sustain, self.release]
            .into_iter()
            .flatten()
        {
            check_finite(name, value)?;
        }
        Ok(())
    }
}

impl From<EnvelopeConfig> for EnvelopePatch {
    fn from(env: EnvelopeConfig) -> Self {
        Self {
            attack: Some(env.attack),
            decay: Some(env.decay),
            sustain: Some(env.sustain),
            release: Some(env.release),
        }
    }
}

/// Complete parameter state of one synthesized instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthParams {
    pub oscillator: OscillatorType,
    pub filter_cutoff: f32,
    pub filter_resonance: f32,
    pub amp_envelope: EnvelopeConfig,
    pub filter_envelope: EnvelopeConfig,
    /// FM modulation index
    pub modulation_index: f32,
    /// Modulator / carrier frequency ratio
    pub harmonicity: f32,
    pub modulation_envelope: EnvelopeConfig,
    /// Linear output gain
    pub gain: f32,
}

impl Default for SynthParams {
    fn default() -> Self {
        Self {
            oscillator: OscillatorType::Triangle,
            filter_cutoff: 2_000.0,
            filter_resonance: 1.0,
            amp_envelope: EnvelopeConfig::default(),
            filter_envelope: EnvelopeConfig::new(0.05, 0.2, 0.5, 0.5),
            modulation_index: 0.0,
            harmonicity: 1.0,
            modulation_envelope: EnvelopeConfig::new(0.01, 0.2, 1.0, 0.5),
            gain: 0.8,
        }
    }
}

impl SynthParams {
    /// Bright FM voice.
    pub fn fm() -> Self {
        Self {
            oscillator: OscillatorType::Sine,
            modulation_index: 10.0,
            harmonicity: 3.0,
            ..Self::default()
        }
    }

    /// Amplitude-modulated voice.
    pub fn am() -> Self {
        Self {
            oscillator: OscillatorType::Sine,
            modulation_index: 1.0,
            harmonicity: 2.0,
            modulation_envelope: EnvelopeConfig::new(0.5, 0.0, 1.0, 0.5),
            ..Self::default()
        }
    }

    /// Filtered saw lead for monophonic use.
    pub fn lead() -> Self {
        Self {
            oscillator: OscillatorType::Saw,
            filter_cutoff: 1_200.0,
            filter_resonance: 4.0,
            amp_envelope: EnvelopeConfig::new(0.005, 0.1, 0.9, 0.15),
            ..Self::default()
        }
    }

    /// Slow pad.
    pub fn pad() -> Self {
        Self {
            oscillator: OscillatorType::Saw,
            filter_cutoff: 900.0,
            amp_envelope: EnvelopeConfig::pad(),
            ..Self::default()
        }
    }

    /// Apply a partial update. Values are clamped to their valid range;
    /// non-finite values reject the whole patch without touching state.
    ///
    /// Returns whether anything changed.
    pub fn apply(&mut self, patch: &SynthParamsPatch) -> Result<bool> {
        patch.validate()?;
        let before = *self;

        if let Some(osc) = patch.oscillator {
            self.oscillator = osc;
        }
        if let Some(v) = patch.filter_cutoff {
            self.filter_cutoff = v.clamp(MIN_CUTOFF_HZ, MAX_CUTOFF_HZ);
        }
        if let Some(v) = patch.filter_resonance {
            self.filter_resonance = v.clamp(0.0, MAX_RESONANCE);
        }
        if let Some(env) = &patch.amp_envelope {
            self.amp_envelope.apply(env);
        }
        if let Some(env) = &patch.filter_envelope {
            self.filter_envelope.apply(env);
        }
        if let Some(v) = patch.modulation_index {
            self.modulation_index = v.clamp(0.0, MAX_MODULATION_INDEX);
        }
        if let Some(v) = patch.harmonicity {
            self.harmonicity = v.clamp(0.0, MAX_HARMONICITY);
        }
        if let Some(env) = &patch.modulation_envelope {
            self.modulation_envelope.apply(env);
        }
        if let Some(v) = patch.gain {
            self.gain = v.clamp(0.0, MAX_GAIN);
        }

        Ok(*self != before)
    }
}

/// Partial update of [`SynthParams`]. `None` fields are left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthParamsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oscillator: Option<OscillatorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_cutoff: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_resonance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amp_envelope: Option<EnvelopePatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_envelope: Option<EnvelopePatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modulation_index: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harmonicity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modulation_envelope: Option<EnvelopePatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gain: Option<f32>,
}

impl SynthParamsPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn oscillator(mut self, osc: OscillatorType) -> Self {
        self.oscillator = Some(osc);
        self
    }

    pub fn filter_cutoff(mut self, hz: f32) -> Self {
        self.filter_cutoff = Some(hz);
        self
    }

    pub fn filter_resonance(mut self, q: f32) -> Self {
        self.filter_resonance = Some(q);
        self
    }

    pub fn amp_envelope(mut self, env: impl Into<EnvelopePatch>) -> Self {
        self.amp_envelope = Some(env.into());
        self
    }

    pub fn filter_envelope(mut self, env: impl Into<EnvelopePatch>) -> Self {
        self.filter_envelope = Some(env.into());
        self
    }

    pub fn modulation_index(mut self, index: f32) -> Self {
        self.modulation_index = Some(index);
        self
    }

    pub fn harmonicity(mut self, ratio: f32) -> Self {
        self.harmonicity = Some(ratio);
        self
    }

    pub fn modulation_envelope(mut self, env: impl Into<EnvelopePatch>) -> Self {
        self.modulation_envelope = Some(env.into());
        self
    }

    pub fn gain(mut self, gain: f32) -> Self {
        self.gain = Some(gain);
        self
    }

    /// Full patch that sets every field of `params`.
    pub fn from_params(params: &SynthParams) -> Self {
        Self {
            oscillator: Some(params.oscillator),
            filter_cutoff: Some(params.filter_cutoff),
            filter_resonance: Some(params.filter_resonance),
            amp_envelope: Some(params.amp_envelope.into()),
            filter_envelope: Some(params.filter_envelope.into()),
            modulation_index: Some(params.modulation_index),
            harmonicity: Some(params.harmonicity),
            modulation_envelope: Some(params.modulation_envelope.into()),
            gain: Some(params.gain),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.oscillator.is_none()
            && self.filter_cutoff.is_none()
            && self.filter_resonance.is_none()
            && self.amp_envelope.map_or(true, |e| e.is_empty())
            && self.filter_envelope.map_or(true, |e| e.is_empty())
            && self.modulation_index.is_none()
            && self.harmonicity.is_none()
            && self.modulation_envelope.map_or(true, |e| e.is_empty())
            && self.gain.is_none()
    }

    /// True if the patch touches a parameter that sounding voices follow live
    /// (filter and gain). Envelope, oscillator and FM changes only reach voices
    /// triggered afterwards.
    pub fn touches_live_params(&self) -> bool {
        self.filter_cutoff.is_some() || self.filter_resonance.is_some() || self.gain.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("filter_cutoff", self.filter_cutoff),
            ("filter_resonance", self.filter_resonance),
            ("modulation_index", self.modulation_index),
            ("harmonicity", self.harmonicity),
            ("gain", self.gain),
        ] {
            if let Some(value) = value {
                check_finite(name, value)?;
            }
        }
        if let Some(env) = &self.amp_envelope {
            env.check("amp_envelope")?;
        }
        if let Some(env) = &self.filter_envelope {
            env.check("filter_envelope")?;
        }
        if let Some(env) = &self.modulation_envelope {
            env.check("modulation_envelope")?;
        }
        Ok(())
    }
}

fn check_finite(name: &'static str, value: f32) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidParameter {
            name,
            reason: format!("{value} is not a finite number"),
        })
    }
}
