//! Instrument identities.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Instrument family. Determines which backend an engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentCategory {
    /// Sampled pitched instruments
    Melodic,
    /// Sampled drum kits
    DrumBeat,
    /// Synthesized voices (no external assets)
    Synthesizer,
}

impl InstrumentCategory {
    pub const ALL: [InstrumentCategory; 3] = [
        InstrumentCategory::Melodic,
        InstrumentCategory::DrumBeat,
        InstrumentCategory::Synthesizer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InstrumentCategory::Melodic => "melodic",
            InstrumentCategory::DrumBeat => "drum_beat",
            InstrumentCategory::Synthesizer => "synthesizer",
        }
    }

    /// Sample-based categories fetch and decode assets on load.
    pub fn is_sample_based(self) -> bool {
        !matches!(self, InstrumentCategory::Synthesizer)
    }
}

impl fmt::Display for InstrumentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An instrument choice without an owner: what a user picks and what gets
/// persisted as their preference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentSelection {
    pub instrument: String,
    pub category: InstrumentCategory,
}

impl InstrumentSelection {
    pub fn new(instrument: impl Into<String>, category: InstrumentCategory) -> Self {
        Self {
            instrument: instrument.into(),
            category,
        }
    }

    pub fn melodic(instrument: impl Into<String>) -> Self {
        Self::new(instrument, InstrumentCategory::Melodic)
    }

    pub fn drum_beat(instrument: impl Into<String>) -> Self {
        Self::new(instrument, InstrumentCategory::DrumBeat)
    }

    pub fn synthesizer(instrument: impl Into<String>) -> Self {
        Self::new(instrument, InstrumentCategory::Synthesizer)
    }

    /// Bind the selection to a user.
    pub fn for_user(&self, user_id: impl Into<String>) -> InstrumentIdentity {
        InstrumentIdentity {
            user_id: user_id.into(),
            instrument: self.instrument.clone(),
            category: self.category,
        }
    }
}

impl fmt::Display for InstrumentSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.instrument)
    }
}

/// Key of one engine: `(user, instrument, category)`.
///
/// Category is part of the key because the same name may exist under more
/// than one backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentIdentity {
    pub user_id: String,
    pub instrument: String,
    pub category: InstrumentCategory,
}

impl InstrumentIdentity {
    pub fn new(
        user_id: impl Into<String>,
        instrument: impl Into<String>,
        category: InstrumentCategory,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            instrument: instrument.into(),
            category,
        }
    }

    pub fn selection(&self) -> InstrumentSelection {
        InstrumentSelection::new(self.instrument.clone(), self.category)
    }
}

impl fmt::Display for InstrumentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.user_id, self.category, self.instrument)
    }
}
