//! Next-instrument selection after a load failure.

use crate::catalog::InstrumentCatalog;
use crate::config::RuntimeProfile;
use crate::identity::{InstrumentCategory, InstrumentSelection};
use std::collections::BTreeSet;

/// Tracks instruments that failed in this session and picks the next one to
/// try.
///
/// Deterministic: the same failed set and starting point always produce the
/// same candidate.
#[derive(Debug, Clone, Default)]
pub struct FallbackResolver {
    failed: BTreeSet<(InstrumentCategory, String)>,
}

impl FallbackResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_failed(&mut self, selection: &InstrumentSelection) {
        self.failed
            .insert((selection.category, selection.instrument.clone()));
    }

    pub fn is_failed(&self, selection: &InstrumentSelection) -> bool {
        self.failed
            .contains(&(selection.category, selection.instrument.clone()))
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn clear(&mut self) {
        self.failed.clear();
    }

    /// Record `failed` and return the next candidate.
    pub fn advance(
        &mut self,
        catalog: &InstrumentCatalog,
        failed: &InstrumentSelection,
        runtime: RuntimeProfile,
    ) -> Option<InstrumentSelection> {
        self.mark_failed(failed);
        self.next_candidate(catalog, failed, runtime)
    }

    /// Next untried instrument after `current` in its category.
    ///
    /// Walks the category in catalog order starting after `current`, wrapping
    /// around, skipping failed entries and entries that do not decode on
    /// `runtime`. When the category is exhausted the failed set is cleared
    /// and the first synthesizer is returned. `None` means the synthesizer
    /// category itself is exhausted.
    pub fn next_candidate(
        &mut self,
        catalog: &InstrumentCatalog,
        current: &InstrumentSelection,
        runtime: RuntimeProfile,
    ) -> Option<InstrumentSelection> {
        let category = current.category;
        let entries = catalog.instruments(category);
        let start = catalog
            .position(category, &current.instrument)
            .map_or(0, |i| i + 1);

        for offset in 0..entries.len() {
            let entry = &entries[(start + offset) % entries.len()];
            if entry.name == current.instrument || !entry.supports(runtime) {
                continue;
            }
            let candidate = InstrumentSelection::new(entry.name.clone(), category);
            if !self.is_failed(&candidate) {
                return Some(candidate);
            }
        }

        self.clear();
        if category == InstrumentCategory::Synthesizer {
            return None;
        }
        let safety_net = catalog.first(InstrumentCategory::Synthesizer);
        if let Some(synth) = &safety_net {
            tracing::warn!(
                "All {} instruments failed, falling back to synthesizer {}",
                category,
                synth.instrument
            );
        }
        safety_net
    }
}
