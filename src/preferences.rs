//! Persisted instrument preference of the local user.

use crate::Result;
use ensemble_instrument::InstrumentSelection;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Storage for the preferred local instrument.
pub trait PreferenceStore: Send + Sync {
    /// `None` when nothing has been stored yet.
    fn load(&self) -> Result<Option<InstrumentSelection>>;

    fn save(&self, selection: &InstrumentSelection) -> Result<()>;
}

/// Process-local store. Default for sessions that do not persist anything.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    selection: Mutex<Option<InstrumentSelection>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_selection(selection: InstrumentSelection) -> Self {
        Self {
            selection: Mutex::new(Some(selection)),
        }
    }
}

impl PreferenceStore for MemoryPreferences {
    fn load(&self) -> Result<Option<InstrumentSelection>> {
        Ok(self.selection.lock().clone())
    }

    fn save(&self, selection: &InstrumentSelection) -> Result<()> {
        *self.selection.lock() = Some(selection.clone());
        Ok(())
    }
}

/// JSON file holding a single [`InstrumentSelection`].
#[derive(Debug, Clone)]
pub struct JsonFilePreferences {
    path: PathBuf,
}

impl JsonFilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for JsonFilePreferences {
    fn load(&self) -> Result<Option<InstrumentSelection>> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn save(&self, selection: &InstrumentSelection) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(selection)?;
        std::fs::write(&self.path, json)?;
        tracing::debug!("Saved instrument preference to {}", self.path.display());
        Ok(())
    }
}
