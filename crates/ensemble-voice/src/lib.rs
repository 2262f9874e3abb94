//! Voice bookkeeping for Ensemble instruments.
//!
//! The pieces an instrument engine consults before touching audio:
//!
//! - **[`Note`]** - Note names (`"C4"`, `"F#3"`) normalized to MIDI numbers
//! - **[`VoiceEnvelopeState`]** - Key-held / sustained / active tracking per note
//! - **[`MonoNotePriorityStack`]** - Last-note priority for monophonic voices
//! - **[`VoiceAllocator`]** - Voice slots with polyphony limit and stealing
//! - **[`SynthParams`]** - Synthesis parameter state with idempotent partial updates
//!
//! # Quick Start
//!
//! ```
//! use ensemble_voice::{MonoNotePriorityStack, Note};
//!
//! let mut stack = MonoNotePriorityStack::new();
//! for name in ["C4", "E4", "G4"] {
//!     stack.push(name.parse::<Note>().unwrap());
//! }
//! stack.remove("E4".parse().unwrap());
//! assert_eq!(stack.top().map(|n| n.to_string()), Some("G4".to_string()));
//! ```

pub mod error;
pub use error::{Error, Result};

mod note;

pub use note::{Note, A4_FREQ, A4_NOTE};

mod state;

pub use state::{NoteRecord, VoiceEnvelopeState};

mod mono;

pub use mono::MonoNotePriorityStack;

mod allocator;

pub use allocator::{
    AllocationResult, AllocationStrategy, VoiceAllocator, VoiceAllocatorConfig, VoiceId,
    VoiceMode, VoiceSlot, VoiceState,
};

mod params;

pub use params::{EnvelopeConfig, EnvelopePatch, OscillatorType, SynthParams, SynthParamsPatch};
