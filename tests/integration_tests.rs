//! Integration tests for Ensemble sessions
//!
//! Test categories:
//! - Session: lifecycle, preferences, local instrument fallback
//! - Collaboration: two sessions exchanging events, remote engine lifecycle
//!
//! Run with:
//! ```bash
//! cargo test -p ensemble --test integration_tests
//! ```

mod helpers;
mod integration;

// Re-run individual test modules
pub use integration::*;
