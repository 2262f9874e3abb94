//! Session that owns the audio context, engines and collaboration bridge.

use crate::preferences::PreferenceStore;
use crate::{Error, Result};
use ensemble_instrument::{
    CollabEvent, CollaborationBridge, InstrumentEngine, InstrumentEngineRegistry,
    InstrumentSelection, SharedAudioContext,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, OnceCell};

/// One user's collaborative session.
///
/// Owns the shared audio context (through the registry), every instrument
/// engine, the collaboration bridge and the preference store. Dropping the
/// session tears everything down.
///
/// # Example
///
/// ```no_run
/// use ensemble::prelude::*;
///
/// # async fn demo() -> ensemble::Result<()> {
/// let session = Session::builder().user_id("alice").build()?;
///
/// let piano = session.restore_preferred_instrument().await?;
/// piano.play_notes(&["C4"], 0.9, true).await?;
///
/// session.teardown();
/// # Ok(())
/// # }
/// ```
pub struct Session {
    registry: Arc<InstrumentEngineRegistry>,
    bridge: CollaborationBridge,
    outbound: Mutex<Option<mpsc::UnboundedReceiver<CollabEvent>>>,
    preferences: Arc<dyn PreferenceStore>,
    preferred: OnceCell<InstrumentSelection>,
}

impl Session {
    pub fn builder() -> crate::SessionBuilder {
        crate::SessionBuilder::default()
    }

    pub(crate) fn from_parts(
        registry: InstrumentEngineRegistry,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        let registry = Arc::new(registry);
        let (bridge, outbound) = CollaborationBridge::new(registry.clone());
        Self {
            registry,
            bridge,
            outbound: Mutex::new(Some(outbound)),
            preferences,
            preferred: OnceCell::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        self.registry.local_user()
    }

    pub fn registry(&self) -> &Arc<InstrumentEngineRegistry> {
        &self.registry
    }

    pub fn bridge(&self) -> &CollaborationBridge {
        &self.bridge
    }

    pub fn context(&self) -> &SharedAudioContext {
        self.registry.context()
    }

    pub fn preferences(&self) -> &Arc<dyn PreferenceStore> {
        &self.preferences
    }

    /// Receiver of outbound collaboration events. Can be taken once.
    pub fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<CollabEvent>> {
        self.outbound.lock().take()
    }

    pub fn local_engine(&self) -> Option<Arc<InstrumentEngine>> {
        self.registry.local_engine()
    }

    pub fn local_selection(&self) -> Option<InstrumentSelection> {
        self.registry.local_selection()
    }

    /// Load the stored preferred instrument, or the catalog default when
    /// nothing usable is stored.
    ///
    /// The preference is read once per session; later calls reuse it.
    pub async fn restore_preferred_instrument(&self) -> Result<Arc<InstrumentEngine>> {
        let preferred = self
            .preferred
            .get_or_try_init(|| async { self.read_preference() })
            .await?
            .clone();
        self.select_instrument(preferred).await
    }

    fn read_preference(&self) -> Result<InstrumentSelection> {
        let catalog = self.registry.catalog();
        let stored = match self.preferences.load() {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!("Ignoring unreadable instrument preference: {}", err);
                None
            }
        };

        match stored {
            Some(selection) if catalog.contains(&selection) => Ok(selection),
            Some(selection) => {
                tracing::warn!("Stored instrument {} is not in the catalog", selection);
                catalog
                    .default_selection()
                    .ok_or_else(|| Error::Session("catalog has no instruments".into()))
            }
            None => catalog
                .default_selection()
                .ok_or_else(|| Error::Session("catalog has no instruments".into())),
        }
    }

    /// Switch the local instrument, falling back when it cannot load, and
    /// persist the instrument that actually loaded.
    pub async fn select_instrument(
        &self,
        selection: InstrumentSelection,
    ) -> Result<Arc<InstrumentEngine>> {
        let engine = self.registry.ensure_local_engine(&selection).await?;

        if let Some(resolved) = self.registry.local_selection() {
            if let Err(err) = self.preferences.save(&resolved) {
                tracing::warn!("Could not save instrument preference {}: {}", resolved, err);
            }
        }
        self.bridge.announce_local_instrument();
        Ok(engine)
    }

    /// Apply a JSON event received from a collaborator.
    pub async fn handle_remote_json(&self, json: &str) -> Result<()> {
        self.bridge.handle_json(json).await?;
        Ok(())
    }

    /// Dispose every engine and close the audio context. Idempotent.
    pub fn teardown(&self) {
        self.registry.teardown();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("registry", &self.registry)
            .finish()
    }
}
