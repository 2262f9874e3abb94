//! Static, ordered instrument lists per category.
//!
//! Order matters: the fallback resolver walks a category in catalog order and
//! the first melodic entry is the default selection.

use crate::config::RuntimeProfile;
use crate::error::{Error, Result};
use crate::identity::{InstrumentCategory, InstrumentSelection};
use ensemble_voice::{SynthParams, VoiceMode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentEntry {
    pub name: String,
    /// Synthesizer entries only; sample-based instruments are always poly
    #[serde(default)]
    pub voice_mode: VoiceMode,
    /// Initial parameters for synthesizer entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<SynthParams>,
    /// Runtimes known to be unable to decode this instrument's assets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsupported_on: Vec<RuntimeProfile>,
}

impl InstrumentEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            voice_mode: VoiceMode::Poly,
            preset: None,
            unsupported_on: Vec::new(),
        }
    }

    pub fn synth(name: impl Into<String>, voice_mode: VoiceMode, preset: SynthParams) -> Self {
        Self {
            voice_mode,
            preset: Some(preset),
            ..Self::new(name)
        }
    }

    pub fn unsupported_on(mut self, runtime: RuntimeProfile) -> Self {
        self.unsupported_on.push(runtime);
        self
    }

    pub fn supports(&self, runtime: RuntimeProfile) -> bool {
        !self.unsupported_on.contains(&runtime)
    }
}

/// Read-only instrument catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentCatalog {
    #[serde(default)]
    pub melodic: Vec<InstrumentEntry>,
    #[serde(default)]
    pub drum_beat: Vec<InstrumentEntry>,
    pub synthesizer: Vec<InstrumentEntry>,
}

impl Default for InstrumentCatalog {
    fn default() -> Self {
        let melodic = [
            "acoustic_grand_piano",
            "bright_acoustic_piano",
            "electric_piano_1",
            "acoustic_guitar_nylon",
            "electric_bass_finger",
            "violin",
            "string_ensemble_1",
            "flute",
            "marimba",
        ]
        .into_iter()
        .map(InstrumentEntry::new)
        .collect();

        let drum_beat = ["standard_kit", "room_kit", "electronic_kit", "tr808_kit"]
            .into_iter()
            .map(InstrumentEntry::new)
            .collect();

        let synthesizer = vec![
            InstrumentEntry::synth("poly_synth", VoiceMode::Poly, SynthParams::default()),
            InstrumentEntry::synth("fm_synth", VoiceMode::Poly, SynthParams::fm()),
            InstrumentEntry::synth("am_synth", VoiceMode::Poly, SynthParams::am()),
            InstrumentEntry::synth("pad_synth", VoiceMode::Poly, SynthParams::pad()),
            InstrumentEntry::synth("mono_synth", VoiceMode::Mono, SynthParams::lead()),
            InstrumentEntry::synth("legato_lead", VoiceMode::Legato, SynthParams::lead()),
        ];

        Self {
            melodic,
            drum_beat,
            synthesizer,
        }
    }
}

impl InstrumentCatalog {
    /// Parse and validate a catalog from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let catalog: Self = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// The synthesizer category is the last-resort fallback and must not be
    /// empty; names must be unique within a category.
    pub fn validate(&self) -> Result<()> {
        if self.synthesizer.is_empty() {
            return Err(Error::Config(
                "catalog needs at least one synthesizer instrument".into(),
            ));
        }
        for category in InstrumentCategory::ALL {
            let entries = self.instruments(category);
            for (i, entry) in entries.iter().enumerate() {
                if entries[..i].iter().any(|e| e.name == entry.name) {
                    return Err(Error::Config(format!(
                        "duplicate instrument {} in {}",
                        entry.name, category
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn instruments(&self, category: InstrumentCategory) -> &[InstrumentEntry] {
        match category {
            InstrumentCategory::Melodic => &self.melodic,
            InstrumentCategory::DrumBeat => &self.drum_beat,
            InstrumentCategory::Synthesizer => &self.synthesizer,
        }
    }

    pub fn names(&self, category: InstrumentCategory) -> Vec<&str> {
        self.instruments(category)
            .iter()
            .map(|e| e.name.as_str())
            .collect()
    }

    pub fn entry(&self, category: InstrumentCategory, name: &str) -> Option<&InstrumentEntry> {
        self.instruments(category).iter().find(|e| e.name == name)
    }

    /// Like [`entry`](Self::entry) but with a typed error.
    pub fn require(&self, category: InstrumentCategory, name: &str) -> Result<&InstrumentEntry> {
        self.entry(category, name)
            .ok_or_else(|| Error::UnknownInstrument {
                category,
                name: name.to_string(),
            })
    }

    pub fn position(&self, category: InstrumentCategory, name: &str) -> Option<usize> {
        self.instruments(category).iter().position(|e| e.name == name)
    }

    pub fn first(&self, category: InstrumentCategory) -> Option<InstrumentSelection> {
        self.instruments(category)
            .first()
            .map(|e| InstrumentSelection::new(e.name.clone(), category))
    }

    /// First melodic instrument, or the first synthesizer when there is none.
    pub fn default_selection(&self) -> Option<InstrumentSelection> {
        self.first(InstrumentCategory::Melodic)
            .or_else(|| self.first(InstrumentCategory::Synthesizer))
    }

    pub fn contains(&self, selection: &InstrumentSelection) -> bool {
        self.entry(selection.category, &selection.instrument).is_some()
    }

    pub fn total_len(&self) -> usize {
        self.melodic.len() + self.drum_beat.len() + self.synthesizer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog() {
        let catalog = InstrumentCatalog::default();
        catalog.validate().unwrap();
        assert_eq!(
            catalog.default_selection(),
            Some(InstrumentSelection::melodic("acoustic_grand_piano"))
        );
        assert_eq!(
            catalog
                .entry(InstrumentCategory::Synthesizer, "mono_synth")
                .unwrap()
                .voice_mode,
            VoiceMode::Mono
        );
        assert_eq!(catalog.position(InstrumentCategory::DrumBeat, "room_kit"), Some(1));
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "melodic": [{"name": "a"}, {"name": "b", "unsupported_on": ["webkit"]}],
            "synthesizer": [{"name": "s", "voice_mode": "legato"}]
        }"#;
        let catalog = InstrumentCatalog::from_json_str(json).unwrap();
        assert_eq!(catalog.names(InstrumentCategory::Melodic), vec!["a", "b"]);
        assert!(catalog.drum_beat.is_empty());
        let b = catalog.entry(InstrumentCategory::Melodic, "b").unwrap();
        assert!(!b.supports(RuntimeProfile::Webkit));
        assert!(b.supports(RuntimeProfile::Standard));
    }

    #[test]
    fn test_rejects_invalid_catalogs() {
        assert!(InstrumentCatalog::from_json_str(r#"{"synthesizer": []}"#).is_err());
        assert!(InstrumentCatalog::from_json_str(
            r#"{"synthesizer": [{"name": "s"}, {"name": "s"}]}"#
        )
        .is_err());
    }

    #[test]
    fn test_require_unknown() {
        let catalog = InstrumentCatalog::default();
        assert!(matches!(
            catalog.require(InstrumentCategory::Melodic, "kazoo"),
            Err(Error::UnknownInstrument { .. })
        ));
    }
}
