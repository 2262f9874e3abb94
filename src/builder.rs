//! Builder for configuring and constructing a `Session`.

use crate::preferences::{MemoryPreferences, PreferenceStore};
use crate::{Error, Result, Session};
use ensemble_instrument::{
    AssetSource, EngineConfig, HeadlessContext, InstrumentCatalog, InstrumentEngineRegistry,
    MemoryAssetSource, SharedAudioContext,
};
use std::sync::Arc;

/// Sample rate of the default headless context.
pub const DEFAULT_SAMPLE_RATE: f64 = 48_000.0;

/// Only the user id is required. Everything else has a default:
///
/// - context: a running [`HeadlessContext`] at 48 kHz
/// - assets: an empty [`MemoryAssetSource`] (synthesizers only)
/// - catalog: [`InstrumentCatalog::default`]
/// - preferences: [`MemoryPreferences`]
///
/// # Example
///
/// ```no_run
/// use ensemble::prelude::*;
///
/// # fn demo() -> ensemble::Result<()> {
/// let session = Session::builder()
///     .user_id("alice")
///     .config(EngineConfig::default().with_runtime(RuntimeProfile::Webkit))
///     .preferences(JsonFilePreferences::new("prefs/instrument.json"))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct SessionBuilder {
    user_id: Option<String>,
    context: Option<SharedAudioContext>,
    assets: Option<Arc<dyn AssetSource>>,
    catalog: Option<InstrumentCatalog>,
    config: EngineConfig,
    preferences: Option<Arc<dyn PreferenceStore>>,
}

impl SessionBuilder {
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Shared audio context. The session closes it on teardown.
    pub fn context(mut self, context: SharedAudioContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn assets(mut self, assets: Arc<dyn AssetSource>) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Read sample instruments from `<root>/<category>/<instrument>/*.wav`.
    #[cfg(feature = "fs-assets")]
    pub fn asset_dir(self, root: impl Into<std::path::PathBuf>) -> Self {
        self.assets(Arc::new(ensemble_instrument::DirectoryAssetSource::new(root)))
    }

    pub fn catalog(mut self, catalog: InstrumentCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn preferences(mut self, preferences: impl PreferenceStore + 'static) -> Self {
        self.preferences = Some(Arc::new(preferences));
        self
    }

    pub fn build(self) -> Result<Session> {
        let user_id = self
            .user_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Session("user id is required".into()))?;

        let catalog = self.catalog.unwrap_or_default();
        catalog.validate()?;
        self.config.validate()?;

        let context = self
            .context
            .unwrap_or_else(|| Arc::new(HeadlessContext::running(DEFAULT_SAMPLE_RATE)));
        let assets = self
            .assets
            .unwrap_or_else(|| Arc::new(MemoryAssetSource::new()));
        let preferences = self
            .preferences
            .unwrap_or_else(|| Arc::new(MemoryPreferences::new()));

        tracing::info!(
            user = %user_id,
            runtime = ?self.config.runtime,
            "Starting session"
        );
        let registry = InstrumentEngineRegistry::new(user_id, context, assets, catalog, self.config);
        Ok(Session::from_parts(registry, preferences))
    }
}
