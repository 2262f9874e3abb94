//! Collaboration integration tests
//!
//! Two sessions exchange JSON events the way a transport would relay them:
//! alice's outbound messages become bob's inbound messages.

use crate::helpers::*;
use ensemble::prelude::*;
use ensemble::{InstrumentIdentity, RegistryEvent};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Deliver every queued outbound event of one session to another as JSON.
async fn relay(outbound: &mut UnboundedReceiver<CollabEvent>, to: &Session) -> usize {
    let mut delivered = 0;
    while let Ok(event) = outbound.try_recv() {
        let json = serde_json::to_string(&event).unwrap();
        to.handle_remote_json(&json).await.unwrap();
        delivered += 1;
    }
    delivered
}

fn alice(instrument: &str, category: InstrumentCategory) -> InstrumentIdentity {
    InstrumentIdentity::new("alice", instrument, category)
}

#[tokio::test]
async fn test_remote_notes_follow_sender() {
    let (alice_session, _) = test_session("alice");
    let (bob_session, _) = test_session("bob");
    let mut outbound = alice_session.take_outbound().unwrap();
    assert!(alice_session.take_outbound().is_none());

    alice_session
        .select_instrument(InstrumentSelection::synthesizer("fm_synth"))
        .await
        .unwrap();
    alice_session.bridge().local_note_on("C4", 0.8, false).await.unwrap();
    alice_session.bridge().local_note_on("G4", 0.8, false).await.unwrap();
    // Instrument announcement plus two notes
    assert_eq!(relay(&mut outbound, &bob_session).await, 3);

    let identity = alice("fm_synth", InstrumentCategory::Synthesizer);
    let remote = bob_session.registry().remote_engine(&identity).await.unwrap();
    assert_eq!(remote.sounding_notes(), vec![note("C4"), note("G4")]);

    alice_session.bridge().local_sustain(true);
    alice_session.bridge().local_note_off("C4").await.unwrap();
    relay(&mut outbound, &bob_session).await;
    assert!(remote.sustain());
    assert_eq!(remote.sustained_notes(), vec![note("C4")]);
    assert_eq!(remote.held_notes(), vec![note("G4")]);

    alice_session.bridge().local_sustain(false);
    relay(&mut outbound, &bob_session).await;
    assert_eq!(remote.sounding_notes(), vec![note("G4")]);
    assert_eq!(bob_session.registry().engines_constructed(), 1);
}

#[tokio::test]
async fn test_replayed_burst_builds_one_engine() {
    let (bob_session, _) = test_session("bob");
    let bridge = bob_session.bridge();
    let identity = alice("acoustic_grand_piano", InstrumentCategory::Melodic);
    let note_on = |name: &str| CollabEvent::Note {
        identity: identity.clone(),
        note: name.into(),
        velocity: 0.7,
        kind: NoteKind::On,
        one_shot: false,
    };

    tokio::join!(
        bridge.handle_inbound(note_on("C4")),
        bridge.handle_inbound(note_on("E4")),
        bridge.handle_inbound(note_on("G4")),
        bridge.handle_inbound(note_on("C5")),
    );

    assert_eq!(bob_session.registry().engines_constructed(), 1);
    let remote = bob_session.registry().remote_engine(&identity).await.unwrap();
    assert_eq!(
        remote.sounding_notes(),
        vec![note("C4"), note("E4"), note("G4"), note("C5")]
    );
}

#[tokio::test]
async fn test_parameter_changes_reach_collaborators() {
    let (alice_session, _) = test_session("alice");
    let (bob_session, _) = test_session("bob");
    let mut outbound = alice_session.take_outbound().unwrap();

    alice_session
        .select_instrument(InstrumentSelection::synthesizer("pad_synth"))
        .await
        .unwrap();
    let forwarder = alice_session.bridge().forward_local_params();

    let patch = SynthParamsPatch::new().filter_cutoff(1500.0).gain(0.4);
    alice_session.bridge().local_params(patch).await.unwrap();
    // Same values again: no second message
    alice_session.bridge().local_params(patch).await.unwrap();

    let params = loop {
        let event = tokio::time::timeout(Duration::from_secs(1), outbound.recv())
            .await
            .unwrap()
            .unwrap();
        let is_params = matches!(event, CollabEvent::Params { .. });
        bob_session
            .handle_remote_json(&serde_json::to_string(&event).unwrap())
            .await
            .unwrap();
        if is_params {
            break event;
        }
    };
    assert!(matches!(params, CollabEvent::Params { params, .. } if params == patch));
    assert!(outbound.try_recv().is_err());

    let remote = bob_session
        .registry()
        .remote_engine(&alice("pad_synth", InstrumentCategory::Synthesizer))
        .await
        .unwrap();
    let state = remote.get_synth_state().unwrap();
    approx::assert_relative_eq!(state.filter_cutoff, 1500.0);
    approx::assert_relative_eq!(state.gain, 0.4);

    drop(outbound);
    tokio::time::timeout(Duration::from_secs(1), forwarder)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_remote_load_failure_is_reported_and_retried() {
    let (bob_session, _) = test_session("bob");
    let mut events = bob_session.registry().subscribe();
    let json = r#"{
        "type": "note",
        "identity": {"user_id": "alice", "instrument": "violin", "category": "melodic"},
        "note": "A4",
        "velocity": 0.5,
        "kind": "on"
    }"#;

    bob_session.handle_remote_json(json).await.unwrap();
    assert!(bob_session.registry().remote_identities().is_empty());
    match events.recv().await.unwrap() {
        RegistryEvent::RemoteEngineFailed { identity, error } => {
            assert_eq!(identity, alice("violin", InstrumentCategory::Melodic));
            assert!(error.is_load_failure());
        }
        other => panic!("unexpected event {other:?}"),
    }

    bob_session.handle_remote_json(json).await.unwrap();
    assert_eq!(bob_session.registry().engines_constructed(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_remote_one_shot_releases_itself() {
    let (bob_session, _) = test_session("bob");
    let identity = alice("poly_synth", InstrumentCategory::Synthesizer);
    bob_session
        .bridge()
        .handle_inbound(CollabEvent::Note {
            identity: identity.clone(),
            note: "D4".into(),
            velocity: 0.9,
            kind: NoteKind::On,
            one_shot: true,
        })
        .await;

    let remote = bob_session.registry().remote_engine(&identity).await.unwrap();
    assert_eq!(remote.sounding_notes(), vec![note("D4")]);
    assert!(remote.held_notes().is_empty());

    tokio::time::sleep(Duration::from_millis(301)).await;
    assert!(remote.sounding_notes().is_empty());
}

#[tokio::test]
async fn test_user_left_and_instrument_change() {
    let (bob_session, context) = test_session("bob");
    let piano = alice("acoustic_grand_piano", InstrumentCategory::Melodic);
    bob_session
        .bridge()
        .handle_inbound(CollabEvent::InstrumentChanged {
            identity: piano.clone(),
        })
        .await;
    let piano_engine = bob_session.registry().remote_engine(&piano).await.unwrap();
    assert_eq!(context.live_outputs(), 1);

    let kit = alice("standard_kit", InstrumentCategory::DrumBeat);
    bob_session
        .bridge()
        .handle_inbound(CollabEvent::InstrumentChanged { identity: kit.clone() })
        .await;
    assert!(piano_engine.is_disposed());
    assert_eq!(bob_session.registry().remote_identities(), vec![kit.clone()]);

    bob_session
        .handle_remote_json(r#"{"type": "user_left", "user_id": "alice"}"#)
        .await
        .unwrap();
    assert!(bob_session.registry().remote_identities().is_empty());
    assert_eq!(context.live_outputs(), 0);
}

#[tokio::test]
async fn test_own_events_are_not_played_twice() {
    let (alice_session, _) = test_session("alice");
    let mut outbound = alice_session.take_outbound().unwrap();
    alice_session.restore_preferred_instrument().await.unwrap();
    alice_session.bridge().local_note_on("C4", 0.8, true).await.unwrap();

    assert_eq!(relay(&mut outbound, &alice_session).await, 2);
    assert!(alice_session.registry().remote_identities().is_empty());
    assert_eq!(alice_session.registry().engines_constructed(), 1);
}

#[tokio::test]
async fn test_malformed_message_is_an_error() {
    let (bob_session, _) = test_session("bob");
    assert!(bob_session.handle_remote_json("{\"type\": \"note\"}").await.is_err());
    assert!(bob_session.handle_remote_json("not json").await.is_err());
}
