//! Transport abstraction for the remote real-time database.
//!
//! A [`Transport`] opens watches on database paths and delivers
//! [`TransportEvent`]s through a channel. Delivery order, reconnection and
//! consistency are the transport's business; the registry only consumes
//! events.
//!
//! Two implementations are provided:
//!
//! - [`ChannelTransport`]: in-memory paths, fed with `publish`. Used for
//!   tests and for embedding a local producer.
//! - [`RestTransport`]: the managed database's REST API, with server-sent
//!   events for continuous watches.

mod channel;
mod rest;
mod sse;

pub use channel::ChannelTransport;
pub use rest::{RestTransport, RestTransportBuilder};

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Whether a watch keeps delivering or stops after its first event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Continuous,
    Once,
}

/// Identifies one watch opened on a transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchId {
    path: String,
    seq: u64,
}

impl WatchId {
    /// Allocate a process-unique id for a watch on `path`.
    pub fn next(path: &str) -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self {
            path: path.to_string(),
            seq: NEXT.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path, self.seq)
    }
}

/// An event delivered on a watch.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A complete snapshot of the path. `None` when the path holds no data.
    Snapshot(Option<Value>),
    /// The watch failed.
    Error(TransportError),
}

/// An open watch: its id and the receiving end of its events.
#[derive(Debug)]
pub struct Watch {
    pub id: WatchId,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Trait for the real-time database consumed by the registry.
///
/// # Example
///
/// ```
/// use sensorwatch::source::{ChannelTransport, Transport, TransportEvent, WatchMode};
///
/// # tokio_test::block_on(async {
/// let transport = ChannelTransport::new("memory");
/// transport.publish("sensorData", serde_json::json!({ "pH": 7.2 }));
///
/// let mut watch = transport.watch("sensorData", WatchMode::Once);
/// let event = watch.events.recv().await;
/// assert!(matches!(event, Some(TransportEvent::Snapshot(Some(_)))));
/// # });
/// ```
pub trait Transport: Send + Sync + Debug {
    /// Open a watch on `path`.
    ///
    /// Implementations deliver the current snapshot first, then every
    /// change (continuous mode) or nothing more (once mode).
    fn watch(&self, path: &str, mode: WatchMode) -> Watch;

    /// Stop delivery for a watch. Unknown ids are ignored.
    fn detach(&self, id: &WatchId);

    /// Returns a human-readable description of the transport.
    fn description(&self) -> &str;
}
