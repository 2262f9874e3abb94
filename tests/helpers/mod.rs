//! Test helpers and fixtures for Ensemble integration tests
//!
//! Sessions run on a [`HeadlessContext`] with in-memory (or temp-dir) sample
//! instruments, so nothing touches audio hardware.

#![allow(dead_code)]

use ensemble::instrument::SampleAsset;
use ensemble::prelude::*;
use ensemble::{HeadlessContext, MemoryAssetSource};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

/// Default test sample rate (matches common hardware)
pub const TEST_SAMPLE_RATE: f64 = 48000.0;

/// Sample rate of generated WAV fixtures
pub const FIXTURE_SAMPLE_RATE: u32 = 22050;

/// Send tracing output to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// 16-bit mono WAV with a short decaying ramp.
pub fn wav_fixture(frames: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: FIXTURE_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
        for i in 0..frames {
            let amplitude = 1.0 - i as f32 / frames.max(1) as f32;
            writer
                .write_sample((amplitude * i16::MAX as f32 * 0.5) as i16)
                .expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }
    cursor.into_inner()
}

/// One WAV zone per root note name.
pub fn sample_assets(roots: &[&str]) -> Vec<SampleAsset> {
    roots
        .iter()
        .map(|root| SampleAsset::new(format!("{root}.wav"), wav_fixture(64)))
        .collect()
}

/// Asset source with two pianos and a drum kit.
pub fn standard_assets() -> Arc<MemoryAssetSource> {
    let assets = Arc::new(MemoryAssetSource::new());
    assets
        .insert(
            InstrumentCategory::Melodic,
            "acoustic_grand_piano",
            sample_assets(&["C3", "C4", "C5"]),
        )
        .insert(
            InstrumentCategory::Melodic,
            "bright_acoustic_piano",
            sample_assets(&["C4"]),
        )
        .insert(
            InstrumentCategory::DrumBeat,
            "standard_kit",
            sample_assets(&["C2", "D2", "F#2"]),
        );
    assets
}

/// Session on a running headless context with [`standard_assets`].
pub fn test_session(user_id: &str) -> (Session, Arc<HeadlessContext>) {
    session_with(user_id, standard_assets(), EngineConfig::default())
}

pub fn session_with(
    user_id: &str,
    assets: Arc<MemoryAssetSource>,
    config: EngineConfig,
) -> (Session, Arc<HeadlessContext>) {
    init_tracing();
    let context = Arc::new(HeadlessContext::running(TEST_SAMPLE_RATE));
    let session = Session::builder()
        .user_id(user_id)
        .context(context.clone())
        .assets(assets)
        .config(config)
        .build()
        .expect("Failed to create test session");
    (session, context)
}

/// Lay out `<root>/<category>/<instrument>/<Note>.wav`.
pub fn write_instrument_dir(root: &Path, category: InstrumentCategory, instrument: &str, notes: &[&str]) {
    let dir = root.join(category.to_string()).join(instrument);
    std::fs::create_dir_all(&dir).expect("create instrument dir");
    for note in notes {
        std::fs::write(dir.join(format!("{note}.wav")), wav_fixture(64)).expect("write wav");
    }
}

pub fn note(name: &str) -> Note {
    Note::parse(name).expect("valid note name")
}
