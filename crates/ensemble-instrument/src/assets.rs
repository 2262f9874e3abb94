//! Sample asset retrieval and decoding.
//!
//! Sample-based instruments are a set of WAV files named after their root
//! note (`C4.wav`, `F#2.wav`). An [`AssetSource`] fetches the raw files; the
//! engine decodes them into [`SampleBuffer`]s under its load timeout.

use crate::error::{Error, Result};
use crate::identity::InstrumentCategory;
use async_trait::async_trait;
use dashmap::DashMap;
use ensemble_voice::Note;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One raw sample file.
#[derive(Debug, Clone)]
pub struct SampleAsset {
    pub file_name: String,
    pub bytes: Arc<[u8]>,
}

impl SampleAsset {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Root note taken from the file stem.
    pub fn root_note(&self) -> Option<Note> {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| Note::parse(stem).ok())
    }
}

/// Where sample-based instruments come from.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Fetch every sample file of an instrument.
    ///
    /// Returns [`Error::AssetNotFound`] when the instrument does not exist.
    async fn fetch(&self, category: InstrumentCategory, instrument: &str) -> Result<Vec<SampleAsset>>;
}

/// Decoded mono sample data for one zone.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    pub root: Note,
    pub sample_rate: u32,
    pub frames: Vec<f32>,
}

impl SampleBuffer {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames.len() as f64 / self.sample_rate as f64
    }
}

/// Decode a WAV asset to a mono buffer (channels are averaged).
pub fn decode_wav(instrument: &str, root: Note, asset: &SampleAsset) -> Result<SampleBuffer> {
    let unsupported = |reason: String| Error::DecodingUnsupported {
        instrument: instrument.to_string(),
        reason: format!("{}: {}", asset.file_name, reason),
    };

    let reader = hound::WavReader::new(Cursor::new(&asset.bytes[..]))
        .map_err(|e| unsupported(e.to_string()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| unsupported(e.to_string()))?,
        hound::SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(unsupported(format!(
                    "{} bits per sample",
                    spec.bits_per_sample
                )));
            }
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| unsupported(e.to_string()))?
        }
    };

    let frames = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(SampleBuffer {
        root,
        sample_rate: spec.sample_rate,
        frames,
    })
}

/// In-memory assets, e.g. bundled instruments or test fixtures.
#[derive(Debug, Default)]
pub struct MemoryAssetSource {
    instruments: DashMap<(InstrumentCategory, String), Vec<SampleAsset>>,
    fetches: AtomicUsize,
}

impl MemoryAssetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        category: InstrumentCategory,
        instrument: impl Into<String>,
        assets: Vec<SampleAsset>,
    ) -> &Self {
        self.instruments.insert((category, instrument.into()), assets);
        self
    }

    /// Number of `fetch` calls served so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetSource for MemoryAssetSource {
    async fn fetch(&self, category: InstrumentCategory, instrument: &str) -> Result<Vec<SampleAsset>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.instruments
            .get(&(category, instrument.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::AssetNotFound {
                instrument: instrument.to_string(),
            })
    }
}

/// Reads `<root>/<category>/<instrument>/*.wav`.
#[cfg(feature = "fs-assets")]
#[derive(Debug, Clone)]
pub struct DirectoryAssetSource {
    root: std::path::PathBuf,
}

#[cfg(feature = "fs-assets")]
impl DirectoryAssetSource {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(feature = "fs-assets")]
#[async_trait]
impl AssetSource for DirectoryAssetSource {
    async fn fetch(&self, category: InstrumentCategory, instrument: &str) -> Result<Vec<SampleAsset>> {
        let not_found = || Error::AssetNotFound {
            instrument: instrument.to_string(),
        };
        let dir = self.root.join(category.as_str()).join(instrument);

        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
            tracing::debug!(dir = %dir.display(), error = %e, "instrument directory unavailable");
            not_found()
        })?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|_| not_found())? {
            let path = entry.path();
            let is_wav = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
            if is_wav {
                paths.push(path);
            }
        }
        paths.sort();

        let mut assets = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = tokio::fs::read(&path).await.map_err(|e| {
                tracing::warn!(file = %path.display(), error = %e, "failed to read sample");
                not_found()
            })?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            assets.push(SampleAsset::new(file_name, bytes));
        }
        Ok(assets)
    }
}
