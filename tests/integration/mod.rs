//! Integration test modules for Ensemble
//!
//! - session: Session lifecycle, preference restore, fallback chain, teardown
//! - collaboration: Event exchange between sessions, remote engine lifecycle

pub mod collaboration;
pub mod session;
