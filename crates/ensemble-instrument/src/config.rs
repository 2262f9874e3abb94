//! Engine tuning parameters.

use crate::error::{Error, Result};
use ensemble_voice::AllocationStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Class of audio runtime the session runs in.
///
/// Only affects decode-related tuning: some runtimes decode compressed
/// samples much more slowly, and some catalog entries are known not to decode
/// there at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeProfile {
    #[default]
    Standard,
    /// WebKit-class engines: slower decode path
    Webkit,
}

/// Upper bound for [`EngineConfig::slow_decode_factor`].
pub const MAX_SLOW_DECODE_FACTOR: f32 = 16.0;

/// Tuning parameters shared by every engine of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Auto-release window for notes that will never get a note-off
    pub auto_release_ms: u64,
    /// Base timeout for sample asset retrieval + decode
    pub load_timeout_ms: u64,
    /// Timeout multiplier for slow-decode runtimes
    pub slow_decode_factor: f32,
    pub runtime: RuntimeProfile,
    /// Voice slots for polyphonic engines
    pub max_polyphony: usize,
    pub steal_strategy: AllocationStrategy,
    /// Capacity of each engine's event channel
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_release_ms: 300,
            load_timeout_ms: 10_000,
            slow_decode_factor: 2.0,
            runtime: RuntimeProfile::Standard,
            max_polyphony: 32,
            steal_strategy: AllocationStrategy::Oldest,
            event_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Parse a partial JSON config; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.slow_decode_factor.is_finite()
            || !(1.0..=MAX_SLOW_DECODE_FACTOR).contains(&self.slow_decode_factor)
        {
            return Err(Error::Config(format!(
                "slow_decode_factor must be within 1.0..={MAX_SLOW_DECODE_FACTOR}, got {}",
                self.slow_decode_factor
            )));
        }
        if self.load_timeout_ms == 0 {
            return Err(Error::Config("load_timeout_ms must be positive".into()));
        }
        if self.max_polyphony == 0 {
            return Err(Error::Config("max_polyphony must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_runtime(mut self, runtime: RuntimeProfile) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_auto_release(mut self, window: Duration) -> Self {
        self.auto_release_ms = window.as_millis() as u64;
        self
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_polyphony(mut self, voices: usize) -> Self {
        self.max_polyphony = voices.max(1);
        self
    }

    pub fn with_steal_strategy(mut self, strategy: AllocationStrategy) -> Self {
        self.steal_strategy = strategy;
        self
    }

    pub fn auto_release(&self) -> Duration {
        Duration::from_millis(self.auto_release_ms)
    }

    /// Load timeout scaled for the configured runtime.
    ///
    /// An out-of-range factor is clamped here as well, so an unvalidated
    /// config still yields a usable timeout.
    pub fn load_timeout(&self) -> Duration {
        let base = Duration::from_millis(self.load_timeout_ms);
        match self.runtime {
            RuntimeProfile::Standard => base,
            RuntimeProfile::Webkit => {
                let factor = if self.slow_decode_factor.is_finite() {
                    self.slow_decode_factor.clamp(1.0, MAX_SLOW_DECODE_FACTOR)
                } else {
                    1.0
                };
                Duration::try_from_secs_f64(base.as_secs_f64() * f64::from(factor))
                    .unwrap_or(Duration::MAX)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.auto_release(), Duration::from_millis(300));
        assert_eq!(config.load_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_webkit_timeout_is_longer() {
        let config = EngineConfig::default().with_runtime(RuntimeProfile::Webkit);
        assert_eq!(config.load_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_partial_json() {
        let config = EngineConfig::from_json_str(r#"{"auto_release_ms": 250, "runtime": "webkit"}"#)
            .unwrap();
        assert_eq!(config.auto_release_ms, 250);
        assert_eq!(config.runtime, RuntimeProfile::Webkit);
        assert_eq!(config.max_polyphony, 32);
        assert!(EngineConfig::from_json_str("{").is_err());
    }

    #[test]
    fn test_rejects_out_of_range_slow_decode_factor() {
        for json in [
            r#"{"runtime": "webkit", "slow_decode_factor": 1e30}"#,
            r#"{"slow_decode_factor": 0.5}"#,
            r#"{"slow_decode_factor": -2.0}"#,
            r#"{"load_timeout_ms": 0}"#,
            r#"{"max_polyphony": 0}"#,
        ] {
            assert!(
                matches!(EngineConfig::from_json_str(json), Err(Error::Config(_))),
                "{json} should be rejected"
            );
        }
    }

    #[test]
    fn test_load_timeout_never_panics() {
        let mut config = EngineConfig::default().with_runtime(RuntimeProfile::Webkit);
        config.slow_decode_factor = 1e30;
        assert_eq!(config.load_timeout(), Duration::from_secs(160));
        config.slow_decode_factor = f32::NAN;
        assert_eq!(config.load_timeout(), Duration::from_secs(10));
        config.load_timeout_ms = u64::MAX;
        config.slow_decode_factor = MAX_SLOW_DECODE_FACTOR;
        assert!(config.load_timeout() >= Duration::from_millis(u64::MAX));
        assert!(config.validate().is_ok());
    }
}
