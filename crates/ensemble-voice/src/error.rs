//! Error types for ensemble-voice.

use thiserror::Error;

/// Result type alias for ensemble-voice operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ensemble-voice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Note name could not be parsed (expected e.g. `C4`, `F#3`, `Bb2`).
    #[error("Invalid note name: {0:?}")]
    InvalidNote(String),

    /// Note is outside the MIDI range 0-127.
    #[error("Note out of range: {0}")]
    NoteOutOfRange(i32),

    /// Invalid synth parameter value.
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}
