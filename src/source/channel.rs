//! In-memory transport.
//!
//! Holds the latest value of each path and pushes it to watchers as it
//! changes. This is useful for tests and for feeding the registry from a
//! producer in the same process.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Transport, TransportEvent, Watch, WatchId, WatchMode};
use crate::error::TransportError;

#[derive(Debug)]
struct Watcher {
    id: WatchId,
    mode: WatchMode,
    sender: mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Debug, Default)]
struct State {
    values: HashMap<String, Value>,
    watchers: HashMap<String, Vec<Watcher>>,
}

/// A transport backed by an in-memory map of paths.
///
/// # Example
///
/// ```
/// use sensorwatch::source::ChannelTransport;
///
/// let transport = ChannelTransport::new("memory");
/// transport.publish("sensorData", serde_json::json!({ "TDS": 120 }));
/// assert_eq!(transport.watcher_count("sensorData"), 0);
/// ```
#[derive(Debug)]
pub struct ChannelTransport {
    state: Mutex<State>,
    description: String,
}

impl ChannelTransport {
    /// Create an empty transport.
    pub fn new(source_description: &str) -> Self {
        Self {
            state: Mutex::new(State::default()),
            description: format!("channel: {}", source_description),
        }
    }

    /// Set the value of `path` and deliver it to its watchers.
    ///
    /// Publishing `Value::Null` clears the path.
    pub fn publish(&self, path: &str, value: Value) {
        let mut state = self.state.lock();
        let snapshot = if value.is_null() {
            state.values.remove(path);
            None
        } else {
            state.values.insert(path.to_string(), value.clone());
            Some(value)
        };
        Self::deliver(&mut state, path, TransportEvent::Snapshot(snapshot));
    }

    /// Report a failure to every watcher of `path`.
    ///
    /// Failed watches are closed, as the database does after an error.
    pub fn fail(&self, path: &str, error: TransportError) {
        let mut state = self.state.lock();
        if let Some(watchers) = state.watchers.remove(path) {
            for watcher in watchers {
                let _ = watcher.sender.send(TransportEvent::Error(error.clone()));
            }
        }
    }

    /// Number of open watches on `path`.
    pub fn watcher_count(&self, path: &str) -> usize {
        self.state.lock().watchers.get(path).map_or(0, Vec::len)
    }

    fn deliver(state: &mut State, path: &str, event: TransportEvent) {
        if let Some(watchers) = state.watchers.get_mut(path) {
            watchers.retain(|w| {
                let sent = w.sender.send(event.clone()).is_ok();
                sent && w.mode == WatchMode::Continuous
            });
            if watchers.is_empty() {
                state.watchers.remove(path);
            }
        }
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl Transport for ChannelTransport {
    fn watch(&self, path: &str, mode: WatchMode) -> Watch {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = WatchId::next(path);
        let mut state = self.state.lock();

        // Current value first, as the database does on attach
        let current = state.values.get(path).cloned();
        let _ = tx.send(TransportEvent::Snapshot(current));

        if mode == WatchMode::Continuous {
            state
                .watchers
                .entry(path.to_string())
                .or_default()
                .push(Watcher {
                    id: id.clone(),
                    mode,
                    sender: tx,
                });
        }

        debug!("watch {} opened ({:?})", id, mode);
        Watch { id, events: rx }
    }

    fn detach(&self, id: &WatchId) {
        let mut state = self.state.lock();
        if let Some(watchers) = state.watchers.get_mut(id.path()) {
            watchers.retain(|w| &w.id != id);
            if watchers.is_empty() {
                state.watchers.remove(id.path());
            }
            debug!("watch {} detached", id);
        }
    }

    fn description(&self) -> &str {
        &self.description
    }
}
