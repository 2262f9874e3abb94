//! Note names in scientific pitch notation.
//!
//! Collaborators exchange notes as strings (`"C4"`, `"F#3"`, `"Bb2"`). Inside the
//! engine they are normalized to a MIDI note number so that `"Db4"` and `"C#4"`
//! address the same voice.

use crate::error::{Error, Result};
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Reference pitch for A4.
pub const A4_FREQ: f32 = 440.0;

/// MIDI note number for A4.
pub const A4_NOTE: u8 = 69;

const SHARP_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// A single pitch, stored as a MIDI note number (C4 = 60).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Note(u8);

impl Note {
    pub const C4: Note = Note(60);
    pub const A4: Note = Note(A4_NOTE);

    /// Create a note from a MIDI note number.
    pub fn from_midi(midi: u8) -> Result<Self> {
        if midi > 127 {
            return Err(Error::NoteOutOfRange(midi as i32));
        }
        Ok(Self(midi))
    }

    /// Parse a note name such as `C4`, `f#3`, `Bb-1`.
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = || Error::InvalidNote(name.to_string());
        let trimmed = name.trim();
        let mut chars = trimmed.chars();

        let letter = chars.next().ok_or_else(invalid)?;
        let pitch_class: i32 = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(invalid()),
        };

        let rest = chars.as_str();
        let (accidental, octave_str) = match rest.as_bytes().first() {
            Some(b'#') => (1, &rest[1..]),
            Some(b'b') => (-1, &rest[1..]),
            _ => (0, rest),
        };

        if octave_str.is_empty() {
            return Err(invalid());
        }
        let octave: i32 = octave_str.parse().map_err(|_| invalid())?;

        let midi = octave
            .checked_add(1)
            .and_then(|o| o.checked_mul(12))
            .and_then(|m| m.checked_add(pitch_class + accidental))
            .ok_or_else(invalid)?;
        if !(0..=127).contains(&midi) {
            return Err(Error::NoteOutOfRange(midi));
        }
        Ok(Self(midi as u8))
    }

    /// MIDI note number.
    #[inline]
    pub fn midi(self) -> u8 {
        self.0
    }

    /// Octave in scientific notation (C4 is octave 4).
    pub fn octave(self) -> i32 {
        self.0 as i32 / 12 - 1
    }

    /// 12-TET frequency in Hz.
    pub fn frequency(self) -> f32 {
        A4_FREQ * 2.0_f32.powf((self.0 as f32 - A4_NOTE as f32) / 12.0)
    }

    /// Signed distance in semitones from `other` to `self`.
    pub fn semitones_from(self, other: Note) -> i32 {
        self.0 as i32 - other.0 as i32
    }
}

impl Default for Note {
    fn default() -> Self {
        Note::C4
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SHARP_NAMES[(self.0 % 12) as usize], self.octave())
    }
}

impl FromStr for Note {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Note {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Note> for String {
    fn from(note: Note) -> Self {
        note.to_string()
    }
}
