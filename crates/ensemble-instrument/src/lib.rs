//! Instrument engines for Ensemble sessions.
//!
//! Every performer in a session (the local user and each remote collaborator)
//! plays through an [`InstrumentEngine`]. This crate owns their lifecycle:
//!
//! - **[`InstrumentEngine`]** - One playable instrument: load, notes, sustain,
//!   synthesis parameters, disposal
//! - **[`InstrumentEngineRegistry`]** - Local engine plus lazily created,
//!   de-duplicated remote engines
//! - **[`FallbackResolver`]** - Next instrument to try when one fails to load
//! - **[`CollaborationBridge`]** - Routes collaboration events to engines and
//!   mirrors local playing as outbound events
//!
//! # Quick Start
//!
//! ```no_run
//! use ensemble_instrument::{
//!     EngineConfig, HeadlessContext, InstrumentCatalog, InstrumentEngineRegistry,
//!     InstrumentSelection, MemoryAssetSource,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() -> ensemble_instrument::Result<()> {
//! let registry = InstrumentEngineRegistry::new(
//!     "alice",
//!     Arc::new(HeadlessContext::running(48_000.0)),
//!     Arc::new(MemoryAssetSource::new()),
//!     InstrumentCatalog::default(),
//!     EngineConfig::default(),
//! );
//!
//! let engine = registry
//!     .ensure_local_engine(&InstrumentSelection::synthesizer("fm_synth"))
//!     .await?;
//! engine.play_notes(&["C4", "E4", "G4"], 0.8, true).await?;
//! engine.stop_notes(&["C4", "E4", "G4"]).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub use error::{Error, Result};

mod identity;

pub use identity::{InstrumentCategory, InstrumentIdentity, InstrumentSelection};

mod config;

pub use config::{EngineConfig, RuntimeProfile, MAX_SLOW_DECODE_FACTOR};

mod catalog;

pub use catalog::{InstrumentCatalog, InstrumentEntry};

mod context;

pub use context::{AudioContext, ContextState, HeadlessContext, OutputNode, SharedAudioContext};

mod assets;

#[cfg(feature = "fs-assets")]
pub use assets::DirectoryAssetSource;
pub use assets::{decode_wav, AssetSource, MemoryAssetSource, SampleAsset, SampleBuffer};

pub mod backend;

mod events;

pub use events::{EngineEvent, RegistryEvent};

mod engine;

pub use engine::{EngineState, InstrumentEngine};

mod fallback;

pub use fallback::FallbackResolver;

mod registry;

pub use registry::InstrumentEngineRegistry;

mod bridge;

pub use bridge::{CollabEvent, CollaborationBridge, NoteKind};

// Voice-level types that appear in this crate's API
pub use ensemble_voice::{Note, SynthParams, SynthParamsPatch, VoiceMode};
