//! Session lifecycle integration tests
//!
//! Builder validation, preference restore and persistence, local fallback
//! chain, and teardown of the shared audio context.

use crate::helpers::*;
use ensemble::instrument::Error as InstrumentError;
use ensemble::prelude::*;
use ensemble::{AudioContext, ContextState, HeadlessContext, InstrumentEntry, MemoryAssetSource};
use std::sync::Arc;

#[test]
fn test_builder_requires_user_id() {
    assert!(matches!(
        Session::builder().build(),
        Err(ensemble::Error::Session(_))
    ));
    assert!(Session::builder().user_id("").build().is_err());
}

#[test]
fn test_builder_rejects_catalog_without_synthesizers() {
    let catalog = InstrumentCatalog {
        synthesizer: Vec::new(),
        ..InstrumentCatalog::default()
    };
    let result = Session::builder().user_id("alice").catalog(catalog).build();
    assert!(matches!(
        result.unwrap_err().as_instrument(),
        Some(InstrumentError::Config(_))
    ));
}

#[test]
fn test_builder_rejects_invalid_engine_config() {
    let mut config = EngineConfig::default().with_runtime(RuntimeProfile::Webkit);
    config.slow_decode_factor = 1e30;
    let result = Session::builder().user_id("alice").config(config).build();
    assert!(matches!(
        result.unwrap_err().as_instrument(),
        Some(InstrumentError::Config(_))
    ));
}

#[tokio::test]
async fn test_restore_without_preference_uses_catalog_default() {
    let (session, _context) = test_session("alice");

    let engine = session.restore_preferred_instrument().await.unwrap();
    assert_eq!(engine.identity().instrument, "acoustic_grand_piano");
    assert_eq!(engine.identity().user_id, "alice");
    assert_eq!(
        session.preferences().load().unwrap(),
        Some(InstrumentSelection::melodic("acoustic_grand_piano"))
    );
}

#[tokio::test]
async fn test_restore_uses_stored_preference() {
    init_tracing();
    let session = Session::builder()
        .user_id("alice")
        .assets(standard_assets())
        .preferences(MemoryPreferences::with_selection(
            InstrumentSelection::drum_beat("standard_kit"),
        ))
        .build()
        .unwrap();

    let engine = session.restore_preferred_instrument().await.unwrap();
    assert_eq!(engine.identity().category, InstrumentCategory::DrumBeat);
    assert_eq!(engine.voice_mode(), VoiceMode::Poly);

    // Read once: a later preference change does not affect restore
    session
        .preferences()
        .save(&InstrumentSelection::synthesizer("fm_synth"))
        .unwrap();
    let again = session.restore_preferred_instrument().await.unwrap();
    assert!(Arc::ptr_eq(&engine, &again));
}

#[tokio::test]
async fn test_unknown_stored_preference_falls_back_to_default() {
    init_tracing();
    let session = Session::builder()
        .user_id("alice")
        .assets(standard_assets())
        .preferences(MemoryPreferences::with_selection(InstrumentSelection::melodic(
            "theremin",
        )))
        .build()
        .unwrap();

    let engine = session.restore_preferred_instrument().await.unwrap();
    assert_eq!(engine.identity().instrument, "acoustic_grand_piano");
}

/// The first melodic instrument cannot decode on a WebKit-class runtime: the
/// session lands on the next melodic instrument and remembers that one.
#[tokio::test]
async fn test_unsupported_preference_resolves_to_next_melodic() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let prefs_path = dir.path().join("instrument.json");

    let mut catalog = InstrumentCatalog::default();
    catalog.melodic[0] =
        InstrumentEntry::new("acoustic_grand_piano").unsupported_on(RuntimeProfile::Webkit);

    let session = Session::builder()
        .user_id("alice")
        .assets(standard_assets())
        .catalog(catalog)
        .config(EngineConfig::default().with_runtime(RuntimeProfile::Webkit))
        .preferences(JsonFilePreferences::new(&prefs_path))
        .build()
        .unwrap();
    let mut registry_events = session.registry().subscribe();

    let engine = session
        .select_instrument(InstrumentSelection::melodic("acoustic_grand_piano"))
        .await
        .unwrap();
    assert_eq!(engine.identity().instrument, "bright_acoustic_piano");
    assert!(engine.is_ready());

    match registry_events.recv().await.unwrap() {
        ensemble::RegistryEvent::LocalInstrumentResolved { requested, resolved } => {
            assert_eq!(requested, InstrumentSelection::melodic("acoustic_grand_piano"));
            assert_eq!(resolved, InstrumentSelection::melodic("bright_acoustic_piano"));
        }
        other => panic!("unexpected event {other:?}"),
    }

    let stored = JsonFilePreferences::new(&prefs_path).load().unwrap();
    assert_eq!(stored, Some(InstrumentSelection::melodic("bright_acoustic_piano")));
}

#[tokio::test]
async fn test_missing_melodic_assets_fall_back_to_synthesizer() {
    let (session, _context) = session_with(
        "alice",
        Arc::new(MemoryAssetSource::new()),
        EngineConfig::default(),
    );

    let engine = session
        .select_instrument(InstrumentSelection::melodic("violin"))
        .await
        .unwrap();
    assert_eq!(
        engine.identity().selection(),
        InstrumentSelection::synthesizer("poly_synth")
    );
    assert_eq!(
        session.local_selection(),
        Some(InstrumentSelection::synthesizer("poly_synth"))
    );
}

#[tokio::test]
async fn test_switching_instruments_disposes_previous_engine() {
    let (session, context) = test_session("alice");
    let piano = session.restore_preferred_instrument().await.unwrap();
    piano.play_notes(&["C4"], 0.8, true).await.unwrap();
    assert_eq!(context.live_outputs(), 1);

    let synth = session
        .select_instrument(InstrumentSelection::synthesizer("fm_synth"))
        .await
        .unwrap();
    assert!(piano.is_disposed());
    assert!(piano.sounding_notes().is_empty());
    assert_eq!(context.live_outputs(), 0);

    synth.play_notes(&["C4"], 0.8, true).await.unwrap();
    assert_eq!(context.live_outputs(), 1);
}

#[tokio::test]
async fn test_suspended_context_rejects_playback() {
    init_tracing();
    let context = Arc::new(HeadlessContext::new(TEST_SAMPLE_RATE));
    let session = Session::builder()
        .user_id("alice")
        .context(context.clone())
        .build()
        .unwrap();
    let engine = session
        .select_instrument(InstrumentSelection::synthesizer("poly_synth"))
        .await
        .unwrap();

    assert_eq!(
        engine.play_notes(&["C4"], 0.8, true).await,
        Err(InstrumentError::AudioContextNotRunning)
    );

    context.resume();
    engine.play_notes(&["C4"], 0.8, true).await.unwrap();
    assert_eq!(engine.sounding_notes(), vec![note("C4")]);
}

#[tokio::test]
async fn test_directory_assets() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    write_instrument_dir(dir.path(), InstrumentCategory::Melodic, "violin", &["G3", "D4", "A4"]);

    let session = Session::builder()
        .user_id("alice")
        .asset_dir(dir.path())
        .build()
        .unwrap();
    let engine = session
        .select_instrument(InstrumentSelection::melodic("violin"))
        .await
        .unwrap();
    assert_eq!(engine.identity().instrument, "violin");

    engine.play_notes(&["E4"], 0.6, true).await.unwrap();
    let snapshot = engine.snapshot().unwrap();
    assert_eq!(snapshot.sounding, vec![note("E4")]);
}

#[tokio::test]
async fn test_teardown_closes_context_once() {
    let (session, context) = test_session("alice");
    let engine = session.restore_preferred_instrument().await.unwrap();

    session.teardown();
    assert!(engine.is_disposed());
    assert_eq!(context.state(), ContextState::Closed);
    assert!(matches!(
        session
            .select_instrument(InstrumentSelection::synthesizer("fm_synth"))
            .await,
        Err(ensemble::Error::Instrument(InstrumentError::EngineDisposed))
    ));

    drop(session);
    assert_eq!(context.close_calls(), 1);
}
