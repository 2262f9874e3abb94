//! Instrument engine: one loaded instrument for one identity.
//!
//! The engine owns a single [`VoiceBackend`] plus the note bookkeeping that
//! decides when voices start and stop:
//!
//! - **Poly**: one voice per pitch, re-pressing a sounding pitch retriggers it.
//!   Notes that will never see a note-off (`key_held = false`) release after
//!   a short auto-release window unless the sustain pedal is down.
//! - **Mono / Legato**: last-note priority through a
//!   [`MonoNotePriorityStack`]. Releasing the sounding note reveals the next
//!   held note without a new attack.
//!
//! Playback on an engine that failed to load or was disposed is a logged
//! no-op. The only playback error callers see is
//! [`Error::AudioContextNotRunning`], which they may retry.

use crate::assets::AssetSource;
use crate::backend::{
    BackendSnapshot, SampleSet, SampleVoiceBank, SynthVoiceGraph, VoiceBackend, VoiceHandle,
};
use crate::catalog::InstrumentEntry;
use crate::config::EngineConfig;
use crate::context::{OutputNode, SharedAudioContext};
use crate::error::{Error, Result};
use crate::events::EngineEvent;
use crate::identity::InstrumentIdentity;
use arc_swap::ArcSwapOption;
use ensemble_voice::{
    MonoNotePriorityStack, Note, SynthParams, SynthParamsPatch, VoiceAllocatorConfig,
    VoiceEnvelopeState, VoiceMode,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::{broadcast, OnceCell};

/// Engine lifecycle. No transition leaves `Disposed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Loading,
    Ready,
    Failed,
    Disposed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Loading => "loading",
            EngineState::Ready => "ready",
            EngineState::Failed => "failed",
            EngineState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Pending auto-release of a note that has no note-off coming.
#[derive(Debug, Clone, Copy)]
enum AutoRelease {
    Poly { note: Note, handle: VoiceHandle },
    /// `press` identifies the one-shot press; a later press of the same note
    /// cancels it
    Mono { note: Note, press: u64 },
}

struct EngineInner {
    state: EngineState,
    /// Built on load for samples, on first play for synthesizers
    backend: Option<Box<dyn VoiceBackend>>,
    output: Option<OutputNode>,
    notes: VoiceEnvelopeState,
    mono: MonoNotePriorityStack,
    current_mono: Option<Note>,
    mono_velocity: f32,
    /// Mono one-shot presses waiting for their auto-release
    one_shots: HashMap<Note, u64>,
    sustain: bool,
    /// `None` for sample-based engines
    params: Option<SynthParams>,
}

impl EngineInner {
    fn play_poly(&mut self, note: Note, velocity: f32, key_held: bool) -> Option<AutoRelease> {
        let backend = self.backend.as_mut()?;

        // Retrigger: a pitch never stacks two voices
        if self.notes.remove(note).is_some() {
            backend.release(note);
        }

        let Some(start) = backend.attack(note, velocity) else {
            tracing::debug!("No voice available for {}, note dropped", note);
            return None;
        };
        if let Some(stolen) = start.stolen {
            // Only forget the record if it still points at the stolen voice
            if self.notes.get(stolen.note).map(|r| r.voice) == Some(stolen.handle) {
                self.notes.remove(stolen.note);
            }
        }
        self.notes.start(note, start.handle, key_held);

        if key_held {
            return None;
        }
        if self.sustain {
            // One-shot under the pedal rings until the pedal lifts
            self.notes.mark_sustained(note);
            return None;
        }
        Some(AutoRelease::Poly {
            note,
            handle: start.handle,
        })
    }

    fn stop_poly(&mut self, note: Note) {
        if !self.notes.clear_key_held(note) {
            tracing::trace!("Note-off for silent note {}", note);
            return;
        }
        if self.sustain {
            self.notes.mark_sustained(note);
            return;
        }
        if self.notes.note_should_release(note) {
            self.release_note(note);
        }
    }

    fn auto_release_poly(&mut self, note: Note, handle: VoiceHandle) {
        // The note was retriggered or stopped since the timer was armed
        if self.notes.get(note).map(|r| r.voice) != Some(handle) {
            return;
        }
        if !self.notes.note_should_release(note) {
            return;
        }
        if self.sustain {
            self.notes.mark_sustained(note);
        } else {
            self.release_note(note);
        }
    }

    fn play_mono(
        &mut self,
        mode: VoiceMode,
        note: Note,
        velocity: f32,
        key_held: bool,
        press: u64,
    ) -> Option<AutoRelease> {
        let backend = self.backend.as_mut()?;

        self.mono.push(note);
        self.mono_velocity = velocity;
        let auto_release = if key_held {
            self.one_shots.remove(&note);
            None
        } else {
            self.one_shots.insert(note, press);
            Some(AutoRelease::Mono { note, press })
        };

        let glided = match self.current_mono {
            Some(current) if mode == VoiceMode::Legato => {
                backend.glide(note, velocity).map(|handle| (current, handle))
            }
            _ => None,
        };

        match glided {
            Some((current, handle)) => {
                self.notes.remove(current);
                self.notes.start(note, handle, true);
            }
            None => {
                if let Some(current) = self.current_mono.take() {
                    self.notes.remove(current);
                }
                let Some(start) = backend.attack(note, velocity) else {
                    tracing::debug!("No voice available for {}, note dropped", note);
                    return auto_release;
                };
                self.notes.start(note, start.handle, true);
            }
        }

        self.current_mono = Some(note);
        auto_release
    }

    fn stop_mono(&mut self, note: Note) {
        self.one_shots.remove(&note);
        if !self.mono.remove(note) {
            tracing::trace!("Note-off for {} which is not held", note);
            return;
        }
        // Releasing a held note that is not sounding only edits the stack
        if self.current_mono != Some(note) {
            return;
        }
        let Some(backend) = self.backend.as_mut() else {
            return;
        };

        match self.mono.top() {
            Some(next) => {
                if backend.glide(next, self.mono_velocity).is_some() {
                    self.notes.move_note(note, next);
                } else {
                    self.notes.remove(note);
                    if let Some(start) = backend.attack(next, self.mono_velocity) {
                        self.notes.start(next, start.handle, true);
                    }
                }
                self.current_mono = Some(next);
            }
            None if self.sustain => {
                self.notes.clear_key_held(note);
                self.notes.mark_sustained(note);
            }
            None => {
                backend.release(note);
                self.notes.remove(note);
                self.current_mono = None;
            }
        }
    }

    fn release_note(&mut self, note: Note) {
        self.notes.remove(note);
        if let Some(backend) = self.backend.as_mut() {
            backend.release(note);
        }
    }

    fn release_sustained(&mut self) -> usize {
        let released = self.notes.release_sustained();
        for record in &released {
            if let Some(backend) = self.backend.as_mut() {
                backend.release(record.note);
            }
            if self.current_mono == Some(record.note) {
                self.current_mono = None;
            }
        }
        released.len()
    }

    fn clear_notes(&mut self) {
        self.notes.drain();
        self.mono.clear();
        self.current_mono = None;
        self.one_shots.clear();
    }
}

/// One instrument for one `(user, instrument, category)` identity.
///
/// Always handled through `Arc`: auto-release timers hold a weak reference
/// back to the engine.
pub struct InstrumentEngine {
    identity: InstrumentIdentity,
    voice_mode: VoiceMode,
    config: EngineConfig,
    decodable: bool,
    assets: Arc<dyn AssetSource>,
    context: OnceLock<SharedAudioContext>,
    load_result: OnceCell<Result<()>>,
    inner: Mutex<EngineInner>,
    disposed: AtomicBool,
    params: ArcSwapOption<SynthParams>,
    events: broadcast::Sender<EngineEvent>,
    presses: AtomicU64,
    this: Weak<InstrumentEngine>,
}

impl InstrumentEngine {
    /// Create an uninitialized engine for a catalog entry.
    ///
    /// Nothing is allocated on the audio context until the engine loads
    /// (samples) or first plays (synthesizers).
    pub fn new(
        identity: InstrumentIdentity,
        entry: &InstrumentEntry,
        assets: Arc<dyn AssetSource>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let sample_based = identity.category.is_sample_based();
        let voice_mode = if sample_based {
            VoiceMode::Poly
        } else {
            entry.voice_mode
        };
        let params = (!sample_based).then(|| entry.preset.unwrap_or_default());
        let decodable = entry.supports(config.runtime);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Arc::new_cyclic(|this| Self {
            identity,
            voice_mode,
            decodable,
            assets,
            context: OnceLock::new(),
            load_result: OnceCell::new(),
            inner: Mutex::new(EngineInner {
                state: EngineState::Uninitialized,
                backend: None,
                output: None,
                notes: VoiceEnvelopeState::new(),
                mono: MonoNotePriorityStack::new(),
                current_mono: None,
                mono_velocity: 1.0,
                one_shots: HashMap::new(),
                sustain: false,
                params,
            }),
            disposed: AtomicBool::new(false),
            params: ArcSwapOption::new(params.map(Arc::new)),
            events,
            presses: AtomicU64::new(0),
            this: this.clone(),
            config,
        })
    }

    pub fn identity(&self) -> &InstrumentIdentity {
        &self.identity
    }

    pub fn voice_mode(&self) -> VoiceMode {
        self.voice_mode
    }

    pub fn state(&self) -> EngineState {
        self.inner.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Bind the engine to the shared audio context and load it.
    ///
    /// Only the first context is kept. Concurrent calls share one load.
    pub async fn initialize(&self, context: SharedAudioContext) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::EngineDisposed);
        }
        if self.context.set(context).is_err() {
            tracing::debug!("{} already bound to an audio context", self.identity);
        }
        self.load().await
    }

    /// Load the instrument. Single-flight: every caller awaits the same load
    /// and sees the same outcome.
    ///
    /// Failures are reported, never resolved here; picking a fallback is the
    /// registry's job.
    pub async fn load(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::EngineDisposed);
        }
        self.load_result
            .get_or_init(|| self.run_load())
            .await
            .clone()
    }

    async fn run_load(&self) -> Result<()> {
        if !self.transition(EngineState::Loading) {
            return Err(Error::EngineDisposed);
        }

        let result = if self.identity.category.is_sample_based() {
            self.load_samples().await
        } else {
            // Voice graph is built on first play
            self.bound_context().map(|_| ())
        };

        match result {
            Ok(()) => {
                if !self.transition(EngineState::Ready) {
                    return Err(Error::EngineDisposed);
                }
                tracing::info!("Instrument {} ready", self.identity);
                Ok(())
            }
            Err(Error::EngineDisposed) => Err(Error::EngineDisposed),
            Err(err) => {
                self.transition(EngineState::Failed);
                tracing::warn!(
                    user = %self.identity.user_id,
                    instrument = %self.identity.instrument,
                    category = %self.identity.category,
                    error = %err,
                    "instrument failed to load"
                );
                Err(err)
            }
        }
    }

    async fn load_samples(&self) -> Result<()> {
        let context = self.bound_context()?.clone();
        let instrument = self.identity.instrument.as_str();
        if !self.decodable {
            return Err(Error::DecodingUnsupported {
                instrument: instrument.to_string(),
                reason: format!("assets do not decode on the {:?} runtime", self.config.runtime),
            });
        }

        let output = context.create_output(&self.identity.to_string())?;
        let timeout = self.config.load_timeout();
        let fetch = async {
            let assets = self.assets.fetch(self.identity.category, instrument).await?;
            SampleSet::decode(instrument, &assets)
        };
        let samples = match tokio::time::timeout(timeout, fetch).await {
            Ok(Ok(samples)) => samples,
            Ok(Err(err)) => {
                context.release_output(output);
                return Err(err);
            }
            Err(_) => {
                context.release_output(output);
                return Err(Error::LoadTimeout {
                    instrument: instrument.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        let committed = {
            let mut inner = self.inner.lock();
            // dispose() raises the flag before taking this lock
            if self.is_disposed() {
                Ok(false)
            } else {
                context.connect_output(output).map(|()| {
                    tracing::debug!("{} loaded {} sample zones", self.identity, samples.len());
                    inner.output = Some(output);
                    inner.backend = Some(Box::new(SampleVoiceBank::new(
                        samples,
                        self.allocator_config(),
                    )));
                    true
                })
            }
        };

        match committed {
            Ok(true) => Ok(()),
            Ok(false) => {
                context.release_output(output);
                Err(Error::EngineDisposed)
            }
            Err(err) => {
                context.release_output(output);
                Err(err)
            }
        }
    }

    /// Play notes. Invalid note names are skipped with a warning.
    ///
    /// `key_held = false` marks one-shot notes that will not receive a
    /// note-off; they release after the auto-release window.
    pub async fn play_notes<S: AsRef<str>>(
        &self,
        notes: &[S],
        velocity: f32,
        key_held: bool,
    ) -> Result<()> {
        if !self.ready_for("play", true).await {
            return Ok(());
        }
        let context = self.bound_context()?.clone();
        if !context.is_running() {
            return Err(Error::AudioContextNotRunning);
        }
        let notes = self.parse_notes(notes);
        if notes.is_empty() {
            return Ok(());
        }
        let velocity = if velocity.is_finite() {
            velocity.clamp(0.0, 1.0)
        } else {
            1.0
        };

        let mut timers = Vec::new();
        {
            let mut inner = self.inner.lock();
            if self.is_disposed() {
                tracing::warn!("Ignoring play on disposed engine {}", self.identity);
                return Ok(());
            }
            if inner.backend.is_none() {
                if let Err(err) = self.build_voice_graph(&mut inner, &context) {
                    tracing::warn!(error = %err, "failed to build voice graph for {}", self.identity);
                    return Ok(());
                }
            }
            for note in notes {
                let timer = if self.voice_mode.is_monophonic() {
                    let press = self.presses.fetch_add(1, Ordering::Relaxed);
                    inner.play_mono(self.voice_mode, note, velocity, key_held, press)
                } else {
                    inner.play_poly(note, velocity, key_held)
                };
                timers.extend(timer);
            }
        }

        for timer in timers {
            self.schedule_auto_release(timer);
        }
        Ok(())
    }

    /// Note-off. Notes that are not sounding are ignored, so duplicate
    /// deliveries are harmless.
    pub async fn stop_notes<S: AsRef<str>>(&self, notes: &[S]) -> Result<()> {
        if !self.ready_for("stop", false).await {
            return Ok(());
        }
        let notes = self.parse_notes(notes);
        let mut inner = self.inner.lock();
        for note in notes {
            if self.voice_mode.is_monophonic() {
                inner.stop_mono(note);
            } else {
                inner.stop_poly(note);
            }
        }
        Ok(())
    }

    /// Sustain pedal. Lifting it releases every sustained note that is not
    /// key-held; pressing it only changes future releases.
    pub fn set_sustain(&self, active: bool) {
        let released = {
            let mut inner = self.inner.lock();
            if matches!(inner.state, EngineState::Failed | EngineState::Disposed) {
                tracing::warn!("Ignoring sustain on {} engine {}", inner.state, self.identity);
                return;
            }
            if inner.sustain == active {
                return;
            }
            inner.sustain = active;
            if active {
                0
            } else {
                inner.release_sustained()
            }
        };

        tracing::debug!(active, released, "sustain changed on {}", self.identity);
        self.emit(EngineEvent::SustainChanged {
            identity: self.identity.clone(),
            active,
        });
    }

    pub fn sustain(&self) -> bool {
        self.inner.lock().sustain
    }

    /// Release every voice and forget all key-held, sustained and mono
    /// bookkeeping.
    pub fn release_all(&self) {
        let mut inner = self.inner.lock();
        if let Some(backend) = inner.backend.as_mut() {
            backend.release_all();
        }
        inner.clear_notes();
    }

    /// Apply a partial parameter update.
    ///
    /// Sample-based engines ignore parameters. Applying the same patch again
    /// changes nothing and emits no event.
    pub async fn update_synth_params(&self, patch: SynthParamsPatch) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::EngineDisposed);
        }
        if self.identity.category.is_sample_based() {
            tracing::debug!("Ignoring synth parameters for sample instrument {}", self.identity);
            return Ok(());
        }
        if self.state() == EngineState::Loading {
            // Outcome is reported by the load itself; parameters are cached either way
            let _ = self.load().await;
        }

        let Some(state) = self.apply_patch(&patch)? else {
            return Ok(());
        };
        self.params.store(Some(Arc::new(state)));
        self.emit(EngineEvent::ParamsChanged {
            identity: self.identity.clone(),
            patch,
            state,
        });
        Ok(())
    }

    fn apply_patch(&self, patch: &SynthParamsPatch) -> Result<Option<SynthParams>> {
        let mut guard = self.inner.lock();
        if self.is_disposed() {
            return Err(Error::EngineDisposed);
        }
        let inner = &mut *guard;
        let Some(params) = inner.params.as_mut() else {
            return Ok(None);
        };
        if !params.apply(patch)? {
            return Ok(None);
        }
        if let Some(backend) = inner.backend.as_mut() {
            backend.apply_params(params, patch);
        }
        Ok(Some(*params))
    }

    /// Current parameter state; `None` for sample-based engines.
    pub fn get_synth_state(&self) -> Option<SynthParams> {
        self.params.load_full().map(|params| *params)
    }

    /// Release every audio resource and clear all bookkeeping. Idempotent.
    ///
    /// An in-flight load finishing afterwards discards its result.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let output = {
            let mut inner = self.inner.lock();
            if let Some(mut backend) = inner.backend.take() {
                backend.release_all();
                backend.dispose();
            }
            inner.clear_notes();
            inner.sustain = false;
            inner.state = EngineState::Disposed;
            inner.output.take()
        };
        if let (Some(output), Some(context)) = (output, self.context.get()) {
            context.release_output(output);
        }

        tracing::debug!("Disposed engine {}", self.identity);
        self.emit(EngineEvent::StateChanged {
            identity: self.identity.clone(),
            state: EngineState::Disposed,
        });
    }

    /// Every sounding note, held or not, in pitch order.
    pub fn sounding_notes(&self) -> Vec<Note> {
        self.inner.lock().notes.notes()
    }

    pub fn held_notes(&self) -> Vec<Note> {
        self.inner.lock().notes.held_notes()
    }

    pub fn sustained_notes(&self) -> Vec<Note> {
        self.inner.lock().notes.sustained_notes()
    }

    /// Held mono notes, most recent last. Empty for poly engines.
    pub fn mono_stack(&self) -> Vec<Note> {
        self.inner.lock().mono.as_slice().to_vec()
    }

    pub fn current_mono_note(&self) -> Option<Note> {
        self.inner.lock().current_mono
    }

    /// Backend diagnostics; `None` until the backend is built.
    pub fn snapshot(&self) -> Option<BackendSnapshot> {
        self.inner.lock().backend.as_ref().map(|b| b.snapshot())
    }

    pub fn output(&self) -> Option<OutputNode> {
        self.inner.lock().output
    }

    fn bound_context(&self) -> Result<&SharedAudioContext> {
        self.context
            .get()
            .ok_or_else(|| Error::Context(format!("{} is not bound to an audio context", self.identity)))
    }

    fn allocator_config(&self) -> VoiceAllocatorConfig {
        VoiceAllocatorConfig {
            max_voices: self.config.max_polyphony,
            strategy: self.config.steal_strategy,
            mode: self.voice_mode,
        }
    }

    fn build_voice_graph(&self, inner: &mut EngineInner, context: &SharedAudioContext) -> Result<()> {
        let Some(params) = inner.params else {
            return Err(Error::Context(format!("{} has no voice backend", self.identity)));
        };
        let output = context.create_output(&self.identity.to_string())?;
        if let Err(err) = context.connect_output(output) {
            context.release_output(output);
            return Err(err);
        }
        inner.output = Some(output);
        inner.backend = Some(Box::new(SynthVoiceGraph::new(self.allocator_config(), params)));
        tracing::debug!("Built voice graph for {}", self.identity);
        Ok(())
    }

    /// Whether a playback call may proceed.
    ///
    /// A play on an unloaded engine loads it; any call arriving during a load
    /// waits for that same load so note order is kept.
    async fn ready_for(&self, op: &'static str, load_if_idle: bool) -> bool {
        match self.state() {
            EngineState::Ready => true,
            EngineState::Uninitialized if !load_if_idle => {
                tracing::warn!("Ignoring {} on unloaded engine {}", op, self.identity);
                false
            }
            EngineState::Uninitialized | EngineState::Loading => match self.load().await {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(error = %err, "Ignoring {} on engine {}", op, self.identity);
                    false
                }
            },
            state @ (EngineState::Failed | EngineState::Disposed) => {
                tracing::warn!("Ignoring {} on {} engine {}", op, state, self.identity);
                false
            }
        }
    }

    fn parse_notes<S: AsRef<str>>(&self, names: &[S]) -> Vec<Note> {
        names
            .iter()
            .filter_map(|name| {
                let name: &str = name.as_ref();
                match Note::parse(name) {
                    Ok(note) => Some(note),
                    Err(err) => {
                        tracing::warn!(
                            instrument = %self.identity,
                            note = name,
                            "skipping invalid note: {}",
                            err
                        );
                        None
                    }
                }
            })
            .collect()
    }

    fn schedule_auto_release(&self, release: AutoRelease) {
        let engine = self.this.clone();
        let window = self.config.auto_release();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(engine) = engine.upgrade() {
                engine.fire_auto_release(release);
            }
        });
    }

    fn fire_auto_release(&self, release: AutoRelease) {
        if self.is_disposed() {
            return;
        }
        let mut inner = self.inner.lock();
        match release {
            AutoRelease::Poly { note, handle } => inner.auto_release_poly(note, handle),
            AutoRelease::Mono { note, press } => {
                if inner.one_shots.get(&note) == Some(&press) {
                    inner.stop_mono(note);
                }
            }
        }
    }

    /// Returns false if the engine is already disposed.
    fn transition(&self, state: EngineState) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state == EngineState::Disposed {
                return false;
            }
            inner.state = state;
        }
        self.emit(EngineEvent::StateChanged {
            identity: self.identity.clone(),
            state,
        });
        true
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Drop for InstrumentEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for InstrumentEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentEngine")
            .field("identity", &self.identity)
            .field("voice_mode", &self.voice_mode)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::tests::{init_tracing, wav_bytes, SlowAssetSource};
    use crate::assets::{MemoryAssetSource, SampleAsset};
    use crate::context::HeadlessContext;
    use crate::identity::InstrumentCategory;
    use std::time::Duration;

    fn n(name: &str) -> Note {
        Note::parse(name).unwrap()
    }

    fn piano_assets() -> Arc<MemoryAssetSource> {
        let source = MemoryAssetSource::new();
        source.insert(
            InstrumentCategory::Melodic,
            "piano",
            vec![
                SampleAsset::new("C4.wav", wav_bytes(1, 64)),
                SampleAsset::new("C5.wav", wav_bytes(1, 64)),
            ],
        );
        Arc::new(source)
    }

    async fn synth(mode: VoiceMode) -> (Arc<InstrumentEngine>, Arc<HeadlessContext>) {
        synth_with(mode, EngineConfig::default()).await
    }

    async fn synth_with(
        mode: VoiceMode,
        config: EngineConfig,
    ) -> (Arc<InstrumentEngine>, Arc<HeadlessContext>) {
        let context = Arc::new(HeadlessContext::running(48_000.0));
        let entry = InstrumentEntry::synth("lead", mode, SynthParams::lead());
        let engine = InstrumentEngine::new(
            InstrumentIdentity::new("alice", "lead", InstrumentCategory::Synthesizer),
            &entry,
            Arc::new(MemoryAssetSource::new()),
            config,
        );
        engine.initialize(context.clone()).await.unwrap();
        (engine, context)
    }

    async fn piano() -> (Arc<InstrumentEngine>, Arc<HeadlessContext>) {
        let context = Arc::new(HeadlessContext::running(48_000.0));
        let engine = InstrumentEngine::new(
            InstrumentIdentity::new("alice", "piano", InstrumentCategory::Melodic),
            &InstrumentEntry::new("piano"),
            piano_assets(),
            EngineConfig::default(),
        );
        engine.initialize(context.clone()).await.unwrap();
        (engine, context)
    }

    #[tokio::test]
    async fn test_synth_graph_is_deferred_until_first_play() {
        let (engine, context) = synth(VoiceMode::Poly).await;
        assert_eq!(engine.state(), EngineState::Ready);
        assert!(engine.snapshot().is_none());
        assert_eq!(context.live_outputs(), 0);

        engine.play_notes(&["C4"], 0.8, true).await.unwrap();
        assert_eq!(context.live_outputs(), 1);
        assert_eq!(engine.snapshot().unwrap().sounding, vec![n("C4")]);
    }

    #[tokio::test]
    async fn test_sample_engine_loads_and_plays() {
        let (engine, context) = piano().await;
        assert_eq!(context.live_outputs(), 1);
        assert!(engine.get_synth_state().is_none());

        engine.play_notes(&["E4", "G4"], 0.5, true).await.unwrap();
        assert_eq!(engine.sounding_notes(), vec![n("E4"), n("G4")]);
        engine.stop_notes(&["E4"]).await.unwrap();
        assert_eq!(engine.sounding_notes(), vec![n("G4")]);
    }

    #[tokio::test]
    async fn test_poly_retrigger_replaces_voice() {
        let (engine, _context) = synth(VoiceMode::Poly).await;
        engine.play_notes(&["C4"], 0.5, true).await.unwrap();
        engine.play_notes(&["C4"], 0.9, true).await.unwrap();

        let snap = engine.snapshot().unwrap();
        assert_eq!(snap.attacks, 2);
        assert_eq!(snap.sounding, vec![n("C4")]);
        assert_eq!(engine.sounding_notes(), vec![n("C4")]);
    }

    #[tokio::test]
    async fn test_recycled_voice_does_not_orphan_retriggered_note() {
        let (engine, _context) =
            synth_with(VoiceMode::Poly, EngineConfig::default().with_max_polyphony(2)).await;
        engine.play_notes(&["C4"], 0.8, true).await.unwrap();
        engine.stop_notes(&["C4"]).await.unwrap();
        engine.play_notes(&["C4"], 0.8, true).await.unwrap();
        // Takes over the slot still fading out the first C4
        engine.play_notes(&["E4"], 0.8, true).await.unwrap();

        assert_eq!(engine.sounding_notes(), vec![n("C4"), n("E4")]);
        assert_eq!(engine.snapshot().unwrap().sounding, vec![n("C4"), n("E4")]);

        engine.stop_notes(&["C4", "E4"]).await.unwrap();
        assert!(engine.sounding_notes().is_empty());
        assert!(engine.snapshot().unwrap().sounding.is_empty());
    }

    #[tokio::test]
    async fn test_stolen_voice_forgets_its_note() {
        let (engine, _context) =
            synth_with(VoiceMode::Poly, EngineConfig::default().with_max_polyphony(2)).await;
        engine.play_notes(&["C4", "D4", "E4"], 0.8, true).await.unwrap();

        assert_eq!(engine.sounding_notes(), vec![n("D4"), n("E4")]);
        assert_eq!(engine.snapshot().unwrap().sounding, vec![n("D4"), n("E4")]);
        engine.stop_notes(&["C4"]).await.unwrap();
        assert_eq!(engine.held_notes(), vec![n("D4"), n("E4")]);
    }

    #[tokio::test]
    async fn test_no_steal_reuses_released_voices() {
        let config = EngineConfig::default()
            .with_max_polyphony(2)
            .with_steal_strategy(ensemble_voice::AllocationStrategy::NoSteal);
        let (engine, _context) = synth_with(VoiceMode::Poly, config).await;
        for name in ["C4", "D4"] {
            engine.play_notes(&[name], 0.8, true).await.unwrap();
            engine.stop_notes(&[name]).await.unwrap();
        }

        engine.play_notes(&["G4"], 0.8, true).await.unwrap();
        assert_eq!(engine.sounding_notes(), vec![n("G4")]);
        assert_eq!(engine.snapshot().unwrap().sounding, vec![n("G4")]);

        // Two held voices: a third note is dropped, nothing is cut off
        engine.play_notes(&["A4", "B4"], 0.8, true).await.unwrap();
        assert_eq!(engine.sounding_notes(), vec![n("G4"), n("A4")]);
    }

    #[tokio::test]
    async fn test_sustain_holds_released_notes() {
        let (engine, _context) = synth(VoiceMode::Poly).await;
        engine.play_notes(&["C4", "E4"], 0.8, true).await.unwrap();
        engine.set_sustain(true);
        engine.stop_notes(&["C4", "E4"]).await.unwrap();

        assert_eq!(engine.sustained_notes(), vec![n("C4"), n("E4")]);
        assert!(engine.held_notes().is_empty());
        assert_eq!(engine.snapshot().unwrap().sounding.len(), 2);

        engine.set_sustain(false);
        assert!(engine.sounding_notes().is_empty());
        assert!(engine.snapshot().unwrap().sounding.is_empty());

        engine.set_sustain(false);
        assert!(engine.sounding_notes().is_empty());
    }

    #[tokio::test]
    async fn test_sustain_off_keeps_held_notes() {
        let (engine, _context) = synth(VoiceMode::Poly).await;
        engine.set_sustain(true);
        engine.play_notes(&["C4", "G4"], 0.8, true).await.unwrap();
        engine.stop_notes(&["C4"]).await.unwrap();
        engine.set_sustain(false);
        assert_eq!(engine.sounding_notes(), vec![n("G4")]);
        assert_eq!(engine.held_notes(), vec![n("G4")]);
    }

    #[tokio::test]
    async fn test_duplicate_note_off_is_noop() {
        let (engine, _context) = synth(VoiceMode::Poly).await;
        engine.stop_notes(&["C4"]).await.unwrap();
        engine.stop_notes(&["C4"]).await.unwrap();
        assert!(engine.sounding_notes().is_empty());

        engine.play_notes(&["C4"], 0.8, true).await.unwrap();
        engine.stop_notes(&["C4"]).await.unwrap();
        engine.stop_notes(&["C4"]).await.unwrap();
        assert!(engine.sounding_notes().is_empty());
        assert_eq!(engine.snapshot().unwrap().releasing_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_auto_release() {
        let (engine, _context) = synth(VoiceMode::Poly).await;
        engine.play_notes(&["D4"], 0.8, false).await.unwrap();
        assert_eq!(engine.sounding_notes(), vec![n("D4")]);

        tokio::time::sleep(Duration::from_millis(299)).await;
        assert_eq!(engine.sounding_notes(), vec![n("D4")]);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(engine.sounding_notes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrigger_cancels_stale_auto_release() {
        let (engine, _context) = synth(VoiceMode::Poly).await;
        engine.play_notes(&["D4"], 0.8, false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        engine.play_notes(&["D4"], 0.8, true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(engine.held_notes(), vec![n("D4")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_under_sustain_waits_for_pedal() {
        let (engine, _context) = synth(VoiceMode::Poly).await;
        engine.set_sustain(true);
        engine.play_notes(&["A4"], 0.8, false).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(engine.sustained_notes(), vec![n("A4")]);
        engine.set_sustain(false);
        assert!(engine.sounding_notes().is_empty());
    }

    #[tokio::test]
    async fn test_mono_last_note_priority() {
        let (engine, _context) = synth(VoiceMode::Mono).await;
        engine.play_notes(&["C4"], 0.8, true).await.unwrap();
        engine.play_notes(&["E4"], 0.8, true).await.unwrap();
        engine.play_notes(&["G4"], 0.8, true).await.unwrap();
        assert_eq!(engine.snapshot().unwrap().attacks, 3);

        engine.stop_notes(&["E4"]).await.unwrap();
        assert_eq!(engine.current_mono_note(), Some(n("G4")));
        assert_eq!(engine.mono_stack(), vec![n("C4"), n("G4")]);
        assert_eq!(engine.snapshot().unwrap().attacks, 3);

        // Releasing the sounding note reveals C4 without a new attack
        engine.stop_notes(&["G4"]).await.unwrap();
        assert_eq!(engine.current_mono_note(), Some(n("C4")));
        let snap = engine.snapshot().unwrap();
        assert_eq!(snap.attacks, 3);
        assert_eq!(snap.sounding, vec![n("C4")]);

        engine.stop_notes(&["C4"]).await.unwrap();
        assert_eq!(engine.current_mono_note(), None);
        assert!(engine.snapshot().unwrap().sounding.is_empty());
    }

    #[tokio::test]
    async fn test_legato_glides_between_held_notes() {
        let (engine, _context) = synth(VoiceMode::Legato).await;
        engine.play_notes(&["C4"], 0.8, true).await.unwrap();
        engine.play_notes(&["D4"], 0.8, true).await.unwrap();
        let snap = engine.snapshot().unwrap();
        assert_eq!(snap.attacks, 1);
        assert_eq!(snap.sounding, vec![n("D4")]);
        assert_eq!(engine.sounding_notes(), vec![n("D4")]);
    }

    #[tokio::test]
    async fn test_mono_release_under_sustain_defers() {
        let (engine, _context) = synth(VoiceMode::Mono).await;
        engine.set_sustain(true);
        engine.play_notes(&["C4"], 0.8, true).await.unwrap();
        engine.stop_notes(&["C4"]).await.unwrap();

        assert_eq!(engine.current_mono_note(), Some(n("C4")));
        assert_eq!(engine.sustained_notes(), vec![n("C4")]);
        assert!(engine.mono_stack().is_empty());

        engine.set_sustain(false);
        assert_eq!(engine.current_mono_note(), None);
        assert!(engine.snapshot().unwrap().sounding.is_empty());
    }

    #[tokio::test]
    async fn test_params_update_is_idempotent() {
        let (engine, _context) = synth(VoiceMode::Poly).await;
        let mut events = engine.subscribe();
        let patch = SynthParamsPatch::new().filter_cutoff(640.0).gain(0.5);

        engine.update_synth_params(patch).await.unwrap();
        let once = engine.get_synth_state().unwrap();
        engine.update_synth_params(patch).await.unwrap();
        assert_eq!(engine.get_synth_state().unwrap(), once);
        assert_eq!(once.filter_cutoff, 640.0);

        assert!(matches!(events.try_recv(), Ok(EngineEvent::ParamsChanged { .. })));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_params_leave_state_untouched() {
        let (engine, _context) = synth(VoiceMode::Poly).await;
        let before = engine.get_synth_state().unwrap();
        let patch = SynthParamsPatch::new().gain(0.1).filter_cutoff(f32::NAN);
        assert!(matches!(
            engine.update_synth_params(patch).await,
            Err(Error::Voice(_))
        ));
        assert_eq!(engine.get_synth_state().unwrap(), before);
    }

    #[tokio::test]
    async fn test_suspended_context_is_precondition_failure() {
        let context = Arc::new(HeadlessContext::new(48_000.0));
        let engine = InstrumentEngine::new(
            InstrumentIdentity::new("bob", "lead", InstrumentCategory::Synthesizer),
            &InstrumentEntry::synth("lead", VoiceMode::Poly, SynthParams::default()),
            Arc::new(MemoryAssetSource::new()),
            EngineConfig::default(),
        );
        engine.initialize(context.clone()).await.unwrap();
        assert_eq!(
            engine.play_notes(&["C4"], 1.0, true).await,
            Err(Error::AudioContextNotRunning)
        );
        context.resume();
        engine.play_notes(&["C4"], 1.0, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_notes_are_skipped() {
        let (engine, _context) = synth(VoiceMode::Poly).await;
        engine.play_notes(&["C4", "H9", "E4"], 0.8, true).await.unwrap();
        assert_eq!(engine.sounding_notes(), vec![n("C4"), n("E4")]);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_silences() {
        let (engine, context) = piano().await;
        engine.play_notes(&["C4"], 0.8, true).await.unwrap();
        engine.dispose();
        engine.dispose();

        assert_eq!(engine.state(), EngineState::Disposed);
        assert_eq!(context.live_outputs(), 0);
        assert!(engine.sounding_notes().is_empty());
        engine.play_notes(&["C4"], 0.8, true).await.unwrap();
        engine.stop_notes(&["C4"]).await.unwrap();
        assert!(engine.sounding_notes().is_empty());
        assert_eq!(engine.load().await, Err(Error::EngineDisposed));
    }

    #[tokio::test]
    async fn test_missing_assets_fail_load() {
        let context = Arc::new(HeadlessContext::running(48_000.0));
        let engine = InstrumentEngine::new(
            InstrumentIdentity::new("alice", "harp", InstrumentCategory::Melodic),
            &InstrumentEntry::new("harp"),
            piano_assets(),
            EngineConfig::default(),
        );
        let err = engine.initialize(context.clone()).await.unwrap_err();
        assert!(matches!(err, Error::AssetNotFound { .. }));
        assert_eq!(engine.state(), EngineState::Failed);
        assert_eq!(context.live_outputs(), 0);

        // Same outcome without a second fetch
        assert_eq!(engine.load().await, Err(err));
        engine.play_notes(&["C4"], 1.0, true).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_initialize_fetches_once() {
        init_tracing();
        let context = Arc::new(HeadlessContext::running(48_000.0));
        let assets = Arc::new(SlowAssetSource {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        assets.inner.insert(
            InstrumentCategory::Melodic,
            "piano",
            vec![SampleAsset::new("C4.wav", wav_bytes(1, 64))],
        );
        let engine = InstrumentEngine::new(
            InstrumentIdentity::new("alice", "piano", InstrumentCategory::Melodic),
            &InstrumentEntry::new("piano"),
            assets.clone(),
            EngineConfig::default(),
        );

        let (a, b) = tokio::join!(
            engine.initialize(context.clone()),
            engine.initialize(context.clone())
        );
        assert_eq!(a, Ok(()));
        assert_eq!(b, Ok(()));
        assert_eq!(assets.fetches(), 1);
        assert_eq!(context.live_outputs(), 1);
        assert!(engine.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_fetch_times_out() {
        init_tracing();
        let context = Arc::new(HeadlessContext::running(48_000.0));
        let assets = Arc::new(SlowAssetSource {
            stalled: vec!["piano".to_string()],
            ..Default::default()
        });
        let engine = InstrumentEngine::new(
            InstrumentIdentity::new("alice", "piano", InstrumentCategory::Melodic),
            &InstrumentEntry::new("piano"),
            assets.clone(),
            EngineConfig::default().with_load_timeout(Duration::from_secs(2)),
        );

        let err = engine.initialize(context.clone()).await.unwrap_err();
        assert!(matches!(err, Error::LoadTimeout { timeout_ms: 2000, .. }));
        assert!(err.is_load_failure());
        assert_eq!(engine.state(), EngineState::Failed);
        assert_eq!(context.live_outputs(), 0);
        assert!(engine.snapshot().is_none());

        engine.play_notes(&["C4"], 0.8, true).await.unwrap();
        assert!(engine.sounding_notes().is_empty());
        assert_eq!(assets.fetches(), 1);
    }

    #[tokio::test]
    async fn test_release_all() {
        let (engine, _context) = synth(VoiceMode::Poly).await;
        engine.set_sustain(true);
        engine.play_notes(&["C4", "E4", "G4"], 0.8, true).await.unwrap();
        engine.stop_notes(&["E4"]).await.unwrap();
        engine.release_all();
        assert!(engine.sounding_notes().is_empty());
        assert!(engine.snapshot().unwrap().sounding.is_empty());
        assert!(engine.sustain());
    }
}
