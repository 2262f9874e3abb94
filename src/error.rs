//! Centralized error type for the ensemble umbrella crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Instrument(#[from] ensemble_instrument::Error),

    #[error("Voice: {0}")]
    Voice(#[from] ensemble_voice::Error),

    #[error("Preferences: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Session: {0}")]
    Session(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The instrument-level error, if this is one.
    pub fn as_instrument(&self) -> Option<&ensemble_instrument::Error> {
        match self {
            Error::Instrument(err) => Some(err),
            _ => None,
        }
    }
}
