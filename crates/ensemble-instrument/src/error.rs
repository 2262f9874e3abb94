//! Error types for ensemble-instrument.

use crate::identity::InstrumentCategory;
use thiserror::Error;

/// Result type alias for ensemble-instrument operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by instrument engines and the registry.
///
/// `Clone` so one in-flight load outcome can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Asset retrieval or decode did not finish in time.
    #[error("Loading {instrument} timed out after {timeout_ms}ms")]
    LoadTimeout { instrument: String, timeout_ms: u64 },

    /// Malformed or unsupported audio asset.
    #[error("Cannot decode {instrument}: {reason}")]
    DecodingUnsupported { instrument: String, reason: String },

    #[error("No assets found for {instrument}")]
    AssetNotFound { instrument: String },

    /// The shared audio context must be running before producing sound.
    #[error("Audio context is not running")]
    AudioContextNotRunning,

    /// Operation attempted after disposal (engine or registry teardown).
    #[error("Engine has been disposed")]
    EngineDisposed,

    #[error("Unknown instrument {name} in category {category}")]
    UnknownInstrument {
        category: InstrumentCategory,
        name: String,
    },

    /// Every candidate, including the synthesizer safety net, failed to load.
    #[error("No loadable instrument left (started from {category})")]
    FallbackExhausted { category: InstrumentCategory },

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Binding to an output node failed.
    #[error("Audio context error: {0}")]
    Context(String),

    #[error(transparent)]
    Voice(#[from] ensemble_voice::Error),
}

impl Error {
    /// Errors that mean "this instrument cannot be loaded here" and should
    /// advance the fallback chain.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            Error::LoadTimeout { .. }
                | Error::DecodingUnsupported { .. }
                | Error::AssetNotFound { .. }
                | Error::UnknownInstrument { .. }
        )
    }
}
