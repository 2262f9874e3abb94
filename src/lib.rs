//! # Ensemble - Instrument Core for Collaborative DAW Sessions
//!
//! Every participant of a session plays through their own instrument engine;
//! remote participants' notes are rendered locally by engines created on
//! demand.
//!
//! ## Architecture
//!
//! Ensemble is an umbrella crate that coordinates:
//! - **ensemble-voice** - Note names, key-held/sustain tracking, mono note
//!   priority, voice allocation, synthesis parameters
//! - **ensemble-instrument** - Instrument engines, local/remote registry,
//!   fallback resolution, collaboration bridge
//!
//! ## Quick Start
//!
//! ```no_run
//! use ensemble::prelude::*;
//!
//! # async fn demo() -> ensemble::Result<()> {
//! let session = Session::builder()
//!     .user_id("alice")
//!     .asset_dir("assets/instruments")
//!     .build()?;
//!
//! // Preferred instrument, or the next one that loads
//! let engine = session.restore_preferred_instrument().await?;
//! engine.play_notes(&["C4", "E4", "G4"], 0.8, true).await?;
//!
//! // Mirror local playing to collaborators
//! let mut outbound = session.take_outbound().expect("outbound receiver");
//! session.bridge().local_note_on("A4", 0.7, false).await?;
//! let _message = outbound.recv().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `fs-assets` (default) - Directory-backed sample instruments

/// Re-export of ensemble-voice for direct access
pub use ensemble_voice as voice;

/// Re-export of ensemble-instrument for direct access
pub use ensemble_instrument as instrument;

pub use ensemble_voice::{
    AllocationStrategy, EnvelopeConfig, EnvelopePatch, MonoNotePriorityStack, Note,
    OscillatorType, SynthParams, SynthParamsPatch, VoiceEnvelopeState, VoiceMode,
};

pub use ensemble_instrument::{
    AudioContext, CollabEvent, CollaborationBridge, ContextState, EngineConfig, EngineEvent,
    EngineState, FallbackResolver, HeadlessContext, InstrumentCatalog, InstrumentCategory,
    InstrumentEngine, InstrumentEngineRegistry, InstrumentEntry, InstrumentIdentity,
    InstrumentSelection, MemoryAssetSource, NoteKind, RegistryEvent, RuntimeProfile,
};

#[cfg(feature = "fs-assets")]
pub use ensemble_instrument::DirectoryAssetSource;

mod builder;
mod error;
mod preferences;
mod session;

pub use builder::{SessionBuilder, DEFAULT_SAMPLE_RATE};
pub use error::{Error, Result};
pub use preferences::{JsonFilePreferences, MemoryPreferences, PreferenceStore};
pub use session::Session;

/// Convenience prelude for common imports
pub mod prelude {
    // Session
    pub use crate::{Session, SessionBuilder};

    // Preferences
    pub use crate::{JsonFilePreferences, MemoryPreferences, PreferenceStore};

    // Instruments
    pub use crate::{
        EngineConfig, InstrumentCatalog, InstrumentCategory, InstrumentEngine,
        InstrumentSelection, RuntimeProfile,
    };

    // Collaboration
    pub use crate::{CollabEvent, NoteKind};

    // Parameters
    pub use crate::{Note, SynthParams, SynthParamsPatch, VoiceMode};
}
