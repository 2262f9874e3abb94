//! Shared audio output context.
//!
//! The context is created and resumed outside the instrument core (resume
//! usually needs a user gesture). Engines only create output nodes on it, bind
//! each node once, and release them on disposal. Only the top-level manager
//! closes the context.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Handle to one engine output node on the context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutputNode(u64);

impl OutputNode {
    /// Get the internal ID (for debugging/logging only)
    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

/// Audio output context consumed by engines.
pub trait AudioContext: Send + Sync {
    fn state(&self) -> ContextState;

    fn sample_rate(&self) -> f64;

    /// Allocate an output node. Fails on a closed context.
    fn create_output(&self, label: &str) -> Result<OutputNode>;

    /// Bind a node to the destination. A node can be bound only once.
    fn connect_output(&self, node: OutputNode) -> Result<()>;

    /// Unbind and free a node. Unknown nodes are ignored.
    fn release_output(&self, node: OutputNode);

    fn close(&self);

    fn is_running(&self) -> bool {
        self.state() == ContextState::Running
    }
}

pub type SharedAudioContext = Arc<dyn AudioContext>;

#[derive(Debug, Clone)]
struct OutputInfo {
    label: String,
    connected: bool,
}

/// In-process context for offline/server sessions and tests.
///
/// Tracks output nodes so callers can verify that nothing leaks.
#[derive(Debug)]
pub struct HeadlessContext {
    sample_rate: f64,
    state: Mutex<ContextState>,
    outputs: Mutex<HashMap<OutputNode, OutputInfo>>,
    next_node: AtomicU64,
    close_calls: AtomicUsize,
}

impl HeadlessContext {
    /// New suspended context.
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            state: Mutex::new(ContextState::Suspended),
            outputs: Mutex::new(HashMap::new()),
            next_node: AtomicU64::new(1),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// New context that is already running.
    pub fn running(sample_rate: f64) -> Self {
        let ctx = Self::new(sample_rate);
        ctx.resume();
        ctx
    }

    /// No effect on a closed context.
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if *state != ContextState::Closed {
            *state = ContextState::Running;
        }
    }

    pub fn suspend(&self) {
        let mut state = self.state.lock();
        if *state != ContextState::Closed {
            *state = ContextState::Suspended;
        }
    }

    /// Nodes created and not yet released.
    pub fn live_outputs(&self) -> usize {
        self.outputs.lock().len()
    }

    pub fn connected_outputs(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .outputs
            .lock()
            .values()
            .filter(|info| info.connected)
            .map(|info| info.label.clone())
            .collect();
        labels.sort();
        labels
    }

    /// How many times `close` was called.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl AudioContext for HeadlessContext {
    fn state(&self) -> ContextState {
        *self.state.lock()
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn create_output(&self, label: &str) -> Result<OutputNode> {
        if self.state() == ContextState::Closed {
            return Err(Error::Context("context is closed".into()));
        }
        let node = OutputNode(self.next_node.fetch_add(1, Ordering::Relaxed));
        self.outputs.lock().insert(
            node,
            OutputInfo {
                label: label.to_string(),
                connected: false,
            },
        );
        Ok(node)
    }

    fn connect_output(&self, node: OutputNode) -> Result<()> {
        let mut outputs = self.outputs.lock();
        let info = outputs
            .get_mut(&node)
            .ok_or_else(|| Error::Context(format!("unknown output node {}", node.id())))?;
        if info.connected {
            return Err(Error::Context(format!(
                "output node {} ({}) is already bound",
                node.id(),
                info.label
            )));
        }
        info.connected = true;
        Ok(())
    }

    fn release_output(&self, node: OutputNode) {
        self.outputs.lock().remove(&node);
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ContextState::Closed;
        self.outputs.lock().clear();
    }
}
