//! Observable engine and registry events.
//!
//! Subscribers (collaboration bridge, UI) receive these over
//! `tokio::sync::broadcast` channels. A lagging subscriber loses old events,
//! never blocks the engine.

use crate::engine::EngineState;
use crate::error::Error;
use crate::identity::{InstrumentIdentity, InstrumentSelection};
use ensemble_voice::{SynthParams, SynthParamsPatch};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged {
        identity: InstrumentIdentity,
        state: EngineState,
    },
    /// A parameter update changed the stored state
    ParamsChanged {
        identity: InstrumentIdentity,
        patch: SynthParamsPatch,
        state: SynthParams,
    },
    SustainChanged {
        identity: InstrumentIdentity,
        active: bool,
    },
}

impl EngineEvent {
    pub fn identity(&self) -> &InstrumentIdentity {
        match self {
            EngineEvent::StateChanged { identity, .. }
            | EngineEvent::ParamsChanged { identity, .. }
            | EngineEvent::SustainChanged { identity, .. } => identity,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// The local engine is ready. `resolved` differs from `requested` when
    /// the fallback chain was used.
    LocalInstrumentResolved {
        requested: InstrumentSelection,
        resolved: InstrumentSelection,
    },
    RemoteEngineFailed {
        identity: InstrumentIdentity,
        error: Error,
    },
}
