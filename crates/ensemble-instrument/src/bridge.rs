//! Collaboration bridge between the network layer and instrument engines.
//!
//! Inbound events from other users are routed to their engines through the
//! registry; local performance is applied to the local engine and mirrored as
//! outbound events. Transport is out of scope: events arrive as values (or
//! JSON) and leave through an `mpsc` channel.

use crate::engine::InstrumentEngine;
use crate::error::{Error, Result};
use crate::events::{EngineEvent, RegistryEvent};
use crate::identity::InstrumentIdentity;
use crate::registry::InstrumentEngineRegistry;
use ensemble_voice::SynthParamsPatch;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    On,
    Off,
}

/// A collaboration message, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollabEvent {
    Note {
        identity: InstrumentIdentity,
        note: String,
        velocity: f32,
        kind: NoteKind,
        /// No note-off will follow; the engine releases it on its own
        #[serde(default)]
        one_shot: bool,
    },
    Sustain {
        identity: InstrumentIdentity,
        active: bool,
    },
    Params {
        identity: InstrumentIdentity,
        params: SynthParamsPatch,
    },
    InstrumentChanged {
        identity: InstrumentIdentity,
    },
    UserLeft {
        user_id: String,
    },
}

impl CollabEvent {
    pub fn user_id(&self) -> &str {
        match self {
            CollabEvent::Note { identity, .. }
            | CollabEvent::Sustain { identity, .. }
            | CollabEvent::Params { identity, .. }
            | CollabEvent::InstrumentChanged { identity } => &identity.user_id,
            CollabEvent::UserLeft { user_id } => user_id,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("malformed collaboration event: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }
}

pub struct CollaborationBridge {
    registry: Arc<InstrumentEngineRegistry>,
    outbound: mpsc::UnboundedSender<CollabEvent>,
}

impl CollaborationBridge {
    /// Create a bridge and the receiving end of its outbound channel.
    pub fn new(
        registry: Arc<InstrumentEngineRegistry>,
    ) -> (Self, mpsc::UnboundedReceiver<CollabEvent>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (Self { registry, outbound }, rx)
    }

    pub fn registry(&self) -> &Arc<InstrumentEngineRegistry> {
        &self.registry
    }

    /// Apply an event received from another user.
    ///
    /// Note-on and parameter events create the sender's engine on demand.
    /// Note-off and sustain only reach engines that already exist (or are
    /// loading), so a late release never constructs anything. Failures are
    /// logged.
    pub async fn handle_inbound(&self, event: CollabEvent) {
        if event.user_id() == self.registry.local_user() {
            tracing::debug!("Ignoring echo of local event");
            return;
        }

        match event {
            CollabEvent::Note {
                identity,
                note,
                velocity,
                kind: NoteKind::On,
                one_shot,
            } => {
                let Some(engine) = self.ensure(&identity).await else {
                    return;
                };
                if let Err(err) = engine.play_notes(&[note.as_str()], velocity, !one_shot).await {
                    tracing::warn!(user = %identity.user_id, note = %note, error = %err, "remote note-on dropped");
                }
            }
            CollabEvent::Note {
                identity,
                note,
                kind: NoteKind::Off,
                ..
            } => {
                if let Some(engine) = self.registry.remote_engine(&identity).await {
                    if let Err(err) = engine.stop_notes(&[note.as_str()]).await {
                        tracing::warn!(user = %identity.user_id, note = %note, error = %err, "remote note-off dropped");
                    }
                } else {
                    tracing::debug!("Note-off for {} without an engine", identity);
                }
            }
            CollabEvent::Sustain { identity, active } => {
                if let Some(engine) = self.registry.remote_engine(&identity).await {
                    engine.set_sustain(active);
                }
            }
            CollabEvent::Params { identity, params } => {
                let Some(engine) = self.ensure(&identity).await else {
                    return;
                };
                if let Err(err) = engine.update_synth_params(params).await {
                    tracing::warn!(user = %identity.user_id, error = %err, "remote parameter change dropped");
                }
            }
            CollabEvent::InstrumentChanged { identity } => {
                if let Err(err) = self.registry.switch_remote_instrument(&identity).await {
                    tracing::debug!("Instrument change of {} not loaded: {}", identity, err);
                }
            }
            CollabEvent::UserLeft { user_id } => {
                let removed = self.registry.remove_remote_engine(&user_id);
                tracing::info!("User {} left, disposed {} engines", user_id, removed);
            }
        }
    }

    /// Parse and apply a JSON event. Only a malformed message is an error.
    pub async fn handle_json(&self, json: &str) -> Result<()> {
        let event = CollabEvent::from_json_str(json)?;
        self.handle_inbound(event).await;
        Ok(())
    }

    async fn ensure(&self, identity: &InstrumentIdentity) -> Option<Arc<InstrumentEngine>> {
        match self.registry.ensure_remote_engine(identity).await {
            Ok(engine) => Some(engine),
            Err(err) => {
                // The registry already reported load failures
                tracing::debug!("No engine for {}: {}", identity, err);
                None
            }
        }
    }

    fn local(&self, op: &str) -> Option<Arc<InstrumentEngine>> {
        let engine = self.registry.local_engine();
        if engine.is_none() {
            tracing::warn!("{} without a local instrument", op);
        }
        engine
    }

    fn send(&self, event: CollabEvent) {
        if self.outbound.send(event).is_err() {
            tracing::debug!("Outbound channel closed, event dropped");
        }
    }

    /// Play a note locally and announce it.
    ///
    /// A suspended audio context is returned as an error so the caller can
    /// prompt for a resume; nothing is sent in that case.
    pub async fn local_note_on(&self, note: &str, velocity: f32, one_shot: bool) -> Result<()> {
        let Some(engine) = self.local("note-on") else {
            return Ok(());
        };
        engine.play_notes(&[note], velocity, !one_shot).await?;
        self.send(CollabEvent::Note {
            identity: engine.identity().clone(),
            note: note.to_string(),
            velocity,
            kind: NoteKind::On,
            one_shot,
        });
        Ok(())
    }

    pub async fn local_note_off(&self, note: &str) -> Result<()> {
        let Some(engine) = self.local("note-off") else {
            return Ok(());
        };
        engine.stop_notes(&[note]).await?;
        self.send(CollabEvent::Note {
            identity: engine.identity().clone(),
            note: note.to_string(),
            velocity: 0.0,
            kind: NoteKind::Off,
            one_shot: false,
        });
        Ok(())
    }

    pub fn local_sustain(&self, active: bool) {
        let Some(engine) = self.local("sustain") else {
            return;
        };
        engine.set_sustain(active);
        self.send(CollabEvent::Sustain {
            identity: engine.identity().clone(),
            active,
        });
    }

    /// Apply a parameter change to the local engine. The change reaches
    /// collaborators through [`forward_local_params`](Self::forward_local_params).
    pub async fn local_params(&self, patch: SynthParamsPatch) -> Result<()> {
        let Some(engine) = self.local("parameter change") else {
            return Ok(());
        };
        engine.update_synth_params(patch).await
    }

    /// Announce the local instrument to collaborators.
    pub fn announce_local_instrument(&self) {
        if let Some(engine) = self.registry.local_engine() {
            self.send(CollabEvent::InstrumentChanged {
                identity: engine.identity().clone(),
            });
        }
    }

    /// Spawn a task that forwards the local engine's parameter changes as
    /// outbound [`CollabEvent::Params`].
    ///
    /// Follows local instrument swaps. Ends when the outbound receiver or
    /// the registry goes away.
    pub fn forward_local_params(&self) -> JoinHandle<()> {
        let registry = Arc::downgrade(&self.registry);
        let mut registry_events = self.registry.subscribe();
        let mut engine_events = self.registry.local_engine().map(|e| e.subscribe());
        let outbound = self.outbound.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = outbound.closed() => break,
                    event = registry_events.recv() => match event {
                        Ok(RegistryEvent::LocalInstrumentResolved { resolved, .. }) => {
                            let Some(registry) = registry.upgrade() else { break };
                            tracing::debug!("Forwarding parameters of {}", resolved);
                            engine_events = registry.local_engine().map(|e| e.subscribe());
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!("Registry events lagged by {}", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                    Some(event) = next_engine_event(&mut engine_events) => {
                        if let EngineEvent::ParamsChanged { identity, patch, .. } = event {
                            if outbound.send(CollabEvent::Params { identity, params: patch }).is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            tracing::debug!("Parameter forwarding stopped");
        })
    }
}

/// Next event of the followed engine; pends forever without one.
async fn next_engine_event(
    receiver: &mut Option<broadcast::Receiver<EngineEvent>>,
) -> Option<EngineEvent> {
    let Some(rx) = receiver.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Dropped {} local engine events", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    *receiver = None;
    None
}

impl std::fmt::Debug for CollaborationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaborationBridge")
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::tests::wav_bytes;
    use crate::assets::{MemoryAssetSource, SampleAsset};
    use crate::catalog::InstrumentCatalog;
    use crate::config::EngineConfig;
    use crate::context::HeadlessContext;
    use crate::identity::{InstrumentCategory, InstrumentSelection};
    use ensemble_voice::Note;
    use std::time::Duration;

    fn bridge() -> (CollaborationBridge, mpsc::UnboundedReceiver<CollabEvent>) {
        let assets = Arc::new(MemoryAssetSource::new());
        assets.insert(
            InstrumentCategory::Melodic,
            "violin",
            vec![SampleAsset::new("G3.wav", wav_bytes(1, 32))],
        );
        let registry = InstrumentEngineRegistry::new(
            "me",
            Arc::new(HeadlessContext::running(48_000.0)),
            assets,
            InstrumentCatalog::default(),
            EngineConfig::default(),
        );
        CollaborationBridge::new(Arc::new(registry))
    }

    fn bob_violin() -> InstrumentIdentity {
        InstrumentIdentity::new("bob", "violin", InstrumentCategory::Melodic)
    }

    fn note(kind: NoteKind, name: &str) -> CollabEvent {
        CollabEvent::Note {
            identity: bob_violin(),
            note: name.into(),
            velocity: 0.8,
            kind,
            one_shot: false,
        }
    }

    #[test]
    fn test_event_json_shape() {
        let json = r#"{
            "type": "note",
            "identity": {"user_id": "bob", "instrument": "violin", "category": "melodic"},
            "note": "C4",
            "velocity": 0.8,
            "kind": "on"
        }"#;
        assert_eq!(CollabEvent::from_json_str(json).unwrap(), note(NoteKind::On, "C4"));

        let left = CollabEvent::UserLeft { user_id: "bob".into() };
        assert_eq!(left.to_json().unwrap(), r#"{"type":"user_left","user_id":"bob"}"#);
        assert!(CollabEvent::from_json_str(r#"{"type":"dance"}"#).is_err());
    }

    #[tokio::test]
    async fn test_remote_note_cycle() {
        let (bridge, _rx) = bridge();
        bridge.handle_inbound(note(NoteKind::On, "C4")).await;
        bridge
            .handle_inbound(CollabEvent::Sustain {
                identity: bob_violin(),
                active: true,
            })
            .await;
        bridge.handle_inbound(note(NoteKind::Off, "C4")).await;

        let engine = bridge.registry().remote_engine(&bob_violin()).await.unwrap();
        assert_eq!(engine.sustained_notes(), vec![Note::parse("C4").unwrap()]);

        bridge
            .handle_inbound(CollabEvent::Sustain {
                identity: bob_violin(),
                active: false,
            })
            .await;
        assert!(engine.sounding_notes().is_empty());
    }

    #[tokio::test]
    async fn test_release_events_never_create_engines() {
        let (bridge, _rx) = bridge();
        bridge.handle_inbound(note(NoteKind::Off, "C4")).await;
        bridge
            .handle_inbound(CollabEvent::Sustain {
                identity: bob_violin(),
                active: true,
            })
            .await;
        assert_eq!(bridge.registry().engines_constructed(), 0);
    }

    #[tokio::test]
    async fn test_local_echo_is_ignored() {
        let (bridge, _rx) = bridge();
        let echo = CollabEvent::Note {
            identity: InstrumentIdentity::new("me", "violin", InstrumentCategory::Melodic),
            note: "C4".into(),
            velocity: 1.0,
            kind: NoteKind::On,
            one_shot: false,
        };
        bridge.handle_inbound(echo).await;
        assert_eq!(bridge.registry().engines_constructed(), 0);
    }

    #[tokio::test]
    async fn test_user_left_disposes_engines() {
        let (bridge, _rx) = bridge();
        bridge.handle_inbound(note(NoteKind::On, "C4")).await;
        let engine = bridge.registry().remote_engine(&bob_violin()).await.unwrap();

        bridge
            .handle_json(r#"{"type": "user_left", "user_id": "bob"}"#)
            .await
            .unwrap();
        assert!(engine.is_disposed());
        assert!(bridge.registry().remote_identities().is_empty());
    }

    #[tokio::test]
    async fn test_local_note_is_announced() {
        let (bridge, mut rx) = bridge();
        bridge
            .registry()
            .ensure_local_engine(&InstrumentSelection::synthesizer("fm_synth"))
            .await
            .unwrap();

        bridge.local_note_on("A4", 0.5, false).await.unwrap();
        bridge.local_sustain(true);

        match rx.recv().await.unwrap() {
            CollabEvent::Note { identity, note, kind, .. } => {
                assert_eq!(identity.user_id, "me");
                assert_eq!(note, "A4");
                assert_eq!(kind, NoteKind::On);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            CollabEvent::Sustain { active: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_local_params_are_forwarded() {
        let (bridge, mut rx) = bridge();
        bridge
            .registry()
            .ensure_local_engine(&InstrumentSelection::synthesizer("poly_synth"))
            .await
            .unwrap();
        let forwarder = bridge.forward_local_params();

        let patch = SynthParamsPatch::new().filter_cutoff(1234.0);
        bridge.local_params(patch).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            CollabEvent::Params {
                identity: InstrumentIdentity::new("me", "poly_synth", InstrumentCategory::Synthesizer),
                params: patch,
            }
        );

        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), forwarder)
            .await
            .unwrap()
            .unwrap();
    }
}
