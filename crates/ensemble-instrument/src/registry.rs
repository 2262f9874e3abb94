//! Engine registry: which engine answers for which identity.
//!
//! Owns the local user's single engine plus a table of remote users' engines.
//! Remote engines are created on demand and shared between concurrent
//! requests: while an identity is loading, every caller awaits the same
//! in-flight load, so a burst of replayed note-ons constructs one engine.
//!
//! # Failure handling
//!
//! - Local load failures walk the [`FallbackResolver`] chain automatically.
//! - Remote load failures are logged, reported as
//!   [`RegistryEvent::RemoteEngineFailed`] and not registered; the next
//!   request retries. A remote user's own client picks its fallback.
//!
//! # Lifecycle
//!
//! One registry per session. [`teardown`](InstrumentEngineRegistry::teardown)
//! disposes every engine and closes the shared audio context exactly once.

use crate::assets::AssetSource;
use crate::catalog::InstrumentCatalog;
use crate::config::EngineConfig;
use crate::context::SharedAudioContext;
use crate::engine::InstrumentEngine;
use crate::error::{Error, Result};
use crate::events::RegistryEvent;
use crate::fallback::FallbackResolver;
use crate::identity::{InstrumentIdentity, InstrumentSelection};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

type PendingLoad = Shared<BoxFuture<'static, Result<Arc<InstrumentEngine>>>>;

enum RemoteSlot {
    /// `generation` tells a finishing load whether its slot is still current
    Pending { generation: u64, load: PendingLoad },
    Ready(Arc<InstrumentEngine>),
}

struct LocalSlot {
    selection: InstrumentSelection,
    engine: Arc<InstrumentEngine>,
}

/// Everything needed to build and load an engine, cloneable into `'static`
/// load futures.
#[derive(Clone)]
struct EngineFactory {
    context: SharedAudioContext,
    assets: Arc<dyn AssetSource>,
    catalog: Arc<InstrumentCatalog>,
    config: EngineConfig,
    constructed: Arc<AtomicUsize>,
}

impl EngineFactory {
    async fn build(&self, identity: InstrumentIdentity) -> Result<Arc<InstrumentEngine>> {
        let entry = self.catalog.require(identity.category, &identity.instrument)?;
        let engine = InstrumentEngine::new(identity, entry, self.assets.clone(), self.config.clone());
        self.constructed.fetch_add(1, Ordering::SeqCst);

        match engine.initialize(self.context.clone()).await {
            Ok(()) => Ok(engine),
            Err(err) => {
                engine.dispose();
                Err(err)
            }
        }
    }
}

pub struct InstrumentEngineRegistry {
    local_user: String,
    factory: EngineFactory,
    local: Mutex<Option<LocalSlot>>,
    /// Serializes local swaps
    local_swap: tokio::sync::Mutex<()>,
    resolver: Mutex<FallbackResolver>,
    remote: Arc<DashMap<InstrumentIdentity, RemoteSlot>>,
    generation: AtomicU64,
    torn_down: AtomicBool,
    events: broadcast::Sender<RegistryEvent>,
}

impl InstrumentEngineRegistry {
    pub fn new(
        local_user: impl Into<String>,
        context: SharedAudioContext,
        assets: Arc<dyn AssetSource>,
        catalog: InstrumentCatalog,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            local_user: local_user.into(),
            factory: EngineFactory {
                context,
                assets,
                catalog: Arc::new(catalog),
                config,
                constructed: Arc::new(AtomicUsize::new(0)),
            },
            local: Mutex::new(None),
            local_swap: tokio::sync::Mutex::new(()),
            resolver: Mutex::new(FallbackResolver::new()),
            remote: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            torn_down: AtomicBool::new(false),
            events,
        }
    }

    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    pub fn catalog(&self) -> &InstrumentCatalog {
        &self.factory.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.factory.config
    }

    pub fn context(&self) -> &SharedAudioContext {
        &self.factory.context
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Engines constructed so far (local and remote, including failed ones).
    pub fn engines_constructed(&self) -> usize {
        self.factory.constructed.load(Ordering::SeqCst)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Make `requested` the local instrument, falling back on load failure.
    ///
    /// The previous local engine is disposed only once a replacement is
    /// ready; if every candidate fails it stays in place and
    /// [`Error::FallbackExhausted`] is returned.
    pub async fn ensure_local_engine(
        &self,
        requested: &InstrumentSelection,
    ) -> Result<Arc<InstrumentEngine>> {
        self.check_alive()?;
        let _swap = self.local_swap.lock().await;

        if let Some(engine) = self.current_local(requested) {
            return Ok(engine);
        }

        let runtime = self.factory.config.runtime;
        let mut candidate = requested.clone();
        for _ in 0..=self.factory.catalog.total_len() {
            match self.factory.build(candidate.for_user(&self.local_user)).await {
                Ok(engine) => {
                    if self.is_torn_down() {
                        engine.dispose();
                        return Err(Error::EngineDisposed);
                    }
                    self.install_local(requested, candidate, engine.clone());
                    return Ok(engine);
                }
                Err(err) if err.is_load_failure() => {
                    let next = self
                        .resolver
                        .lock()
                        .advance(&self.factory.catalog, &candidate, runtime);
                    match next {
                        Some(next) => {
                            tracing::warn!(
                                "Local instrument {} failed ({}), trying {}",
                                candidate,
                                err,
                                next
                            );
                            candidate = next;
                        }
                        None => break,
                    }
                }
                Err(err) => return Err(err),
            }
        }

        tracing::error!("No loadable instrument left after requesting {}", requested);
        Err(Error::FallbackExhausted {
            category: requested.category,
        })
    }

    fn current_local(&self, requested: &InstrumentSelection) -> Option<Arc<InstrumentEngine>> {
        let local = self.local.lock();
        local
            .as_ref()
            .filter(|slot| slot.selection == *requested && slot.engine.is_ready())
            .map(|slot| slot.engine.clone())
    }

    fn install_local(
        &self,
        requested: &InstrumentSelection,
        resolved: InstrumentSelection,
        engine: Arc<InstrumentEngine>,
    ) {
        let previous = self.local.lock().replace(LocalSlot {
            selection: resolved.clone(),
            engine,
        });
        if let Some(previous) = previous {
            previous.engine.dispose();
        }

        if resolved != *requested {
            tracing::info!("Local instrument resolved to {} instead of {}", resolved, requested);
        } else {
            tracing::info!("Local instrument is {}", resolved);
        }
        let _ = self.events.send(RegistryEvent::LocalInstrumentResolved {
            requested: requested.clone(),
            resolved,
        });
    }

    pub fn local_engine(&self) -> Option<Arc<InstrumentEngine>> {
        self.local.lock().as_ref().map(|slot| slot.engine.clone())
    }

    /// Selection the local engine actually runs, for the caller to persist.
    pub fn local_selection(&self) -> Option<InstrumentSelection> {
        self.local.lock().as_ref().map(|slot| slot.selection.clone())
    }

    /// Engine for a remote identity, loading it if needed.
    ///
    /// Concurrent calls for one identity share a single load. A failed load
    /// is not kept; the next call tries again.
    pub async fn ensure_remote_engine(
        &self,
        identity: &InstrumentIdentity,
    ) -> Result<Arc<InstrumentEngine>> {
        self.check_alive()?;

        let load = match self.remote.entry(identity.clone()) {
            Entry::Occupied(entry) => match entry.get() {
                RemoteSlot::Ready(engine) => return Ok(engine.clone()),
                RemoteSlot::Pending { load, .. } => load.clone(),
            },
            Entry::Vacant(entry) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst);
                let load = self.remote_load(identity.clone(), generation);
                entry.insert(RemoteSlot::Pending {
                    generation,
                    load: load.clone(),
                });
                load
            }
        };

        load.await
    }

    fn remote_load(&self, identity: InstrumentIdentity, generation: u64) -> PendingLoad {
        let factory = self.factory.clone();
        let table = Arc::clone(&self.remote);
        let events = self.events.clone();

        async move {
            tracing::debug!("Loading remote instrument {}", identity);
            let is_current = |slot: &RemoteSlot| {
                matches!(slot, RemoteSlot::Pending { generation: g, .. } if *g == generation)
            };

            match factory.build(identity.clone()).await {
                Ok(engine) => {
                    let finalized = match table.get_mut(&identity) {
                        Some(mut slot) if is_current(&*slot) => {
                            *slot = RemoteSlot::Ready(engine.clone());
                            true
                        }
                        _ => false,
                    };
                    if finalized {
                        Ok(engine)
                    } else {
                        // Removed while loading (user left or registry torn down)
                        engine.dispose();
                        Err(Error::EngineDisposed)
                    }
                }
                Err(err) => {
                    table.remove_if(&identity, |_, slot| is_current(slot));
                    if err != Error::EngineDisposed {
                        tracing::warn!(
                            user = %identity.user_id,
                            instrument = %identity.instrument,
                            category = %identity.category,
                            error = %err,
                            "remote instrument failed to load"
                        );
                        let _ = events.send(RegistryEvent::RemoteEngineFailed {
                            identity: identity.clone(),
                            error: err.clone(),
                        });
                    }
                    Err(err)
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Existing engine for `identity`, waiting for it if it is still loading.
    /// Never creates one.
    pub async fn remote_engine(&self, identity: &InstrumentIdentity) -> Option<Arc<InstrumentEngine>> {
        let load = match self.remote.get(identity) {
            Some(slot) => match &*slot {
                RemoteSlot::Ready(engine) => return Some(engine.clone()),
                RemoteSlot::Pending { load, .. } => load.clone(),
            },
            None => return None,
        };
        load.await.ok()
    }

    /// Identities with a ready or loading remote engine.
    pub fn remote_identities(&self) -> Vec<InstrumentIdentity> {
        let mut identities: Vec<InstrumentIdentity> =
            self.remote.iter().map(|entry| entry.key().clone()).collect();
        identities.sort_by(|a, b| {
            (&a.user_id, a.category, &a.instrument).cmp(&(&b.user_id, b.category, &b.instrument))
        });
        identities
    }

    /// Dispose and forget every engine of a user (the user left).
    ///
    /// Returns how many entries were removed.
    pub fn remove_remote_engine(&self, user_id: &str) -> usize {
        self.remove_remote_where(|identity| identity.user_id == user_id)
    }

    /// Dispose the user's engines for every instrument other than `keep`
    /// (the user announced a different instrument).
    pub fn retain_remote_instrument(&self, keep: &InstrumentIdentity) -> usize {
        self.remove_remote_where(|identity| identity.user_id == keep.user_id && identity != keep)
    }

    /// Explicit instrument change: drop the user's stale engines, then load
    /// the new one.
    pub async fn switch_remote_instrument(
        &self,
        identity: &InstrumentIdentity,
    ) -> Result<Arc<InstrumentEngine>> {
        let removed = self.retain_remote_instrument(identity);
        if removed > 0 {
            tracing::debug!("Disposed {} stale engines of {}", removed, identity.user_id);
        }
        self.ensure_remote_engine(identity).await
    }

    fn remove_remote_where(&self, predicate: impl Fn(&InstrumentIdentity) -> bool) -> usize {
        let mut removed = 0;
        self.remote.retain(|identity, slot| {
            if !predicate(identity) {
                return true;
            }
            if let RemoteSlot::Ready(engine) = slot {
                engine.dispose();
            }
            removed += 1;
            false
        });
        removed
    }

    /// Best-effort load of several remote engines. Failures are logged and
    /// skipped. Returns how many engines are ready.
    pub async fn preload(&self, identities: &[InstrumentIdentity]) -> usize {
        let loads = identities.iter().map(|identity| async move {
            (identity, self.ensure_remote_engine(identity).await)
        });

        let mut ready = 0;
        for (identity, result) in futures::future::join_all(loads).await {
            match result {
                Ok(_) => ready += 1,
                Err(err) => tracing::warn!("Skipping preload of {}: {}", identity, err),
            }
        }
        ready
    }

    /// Dispose every engine and close the audio context. Idempotent; later
    /// `ensure_*` calls fail with [`Error::EngineDisposed`].
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(local) = self.local.lock().take() {
            local.engine.dispose();
        }
        let removed = self.remove_remote_where(|_| true);
        self.factory.context.close();
        tracing::info!("Instrument registry torn down ({} remote engines disposed)", removed);
    }

    fn check_alive(&self) -> Result<()> {
        if self.is_torn_down() {
            Err(Error::EngineDisposed)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for InstrumentEngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentEngineRegistry")
            .field("local_user", &self.local_user)
            .field("local", &self.local_selection())
            .field("remote", &self.remote.len())
            .finish()
    }
}
