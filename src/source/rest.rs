//! Transport over the managed database's REST API.
//!
//! One-shot reads are a plain `GET {base}/{path}.json`. Continuous watches
//! request the same URL with `Accept: text/event-stream` and fold the
//! streamed `put`/`patch` events into a local snapshot, emitting the whole
//! value after every change.
//!
//! No reconnection is attempted: when the stream ends or fails, the watch
//! reports an error and closes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sensorwatch::source::{RestTransport, Transport, WatchMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = RestTransport::builder()
//!         .base_url("https://example-rtdb.firebasedatabase.app")
//!         .build()?;
//!
//!     let mut watch = transport.watch("sensorData", WatchMode::Continuous);
//!     while let Some(event) = watch.events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::sse::{apply, SseDecoder, StreamEvent};
use super::{Transport, TransportEvent, Watch, WatchId, WatchMode};
use crate::error::TransportError;

type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Transport for a database reachable over HTTPS.
#[derive(Debug)]
pub struct RestTransport {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    streams: Mutex<HashMap<WatchId, JoinHandle<()>>>,
    description: String,
}

impl RestTransport {
    /// Create a new builder for configuring the transport.
    pub fn builder() -> RestTransportBuilder {
        RestTransportBuilder::default()
    }

    /// The base address of the database.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// REST URL of a database path.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }

    fn request(&self, path: &str) -> RequestBuilder {
        let request = self.client.get(self.url(path));
        match &self.auth_token {
            Some(token) => request.query(&[("auth", token.as_str())]),
            None => request,
        }
    }

    /// Number of continuous watches still streaming.
    pub fn active_streams(&self) -> usize {
        let mut streams = self.streams.lock();
        streams.retain(|_, handle| !handle.is_finished());
        streams.len()
    }
}

impl Transport for RestTransport {
    fn watch(&self, path: &str, mode: WatchMode) -> Watch {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = WatchId::next(path);
        let request = self.request(path);

        match mode {
            WatchMode::Once => {
                tokio::spawn(fetch_once(request, tx));
            }
            WatchMode::Continuous => {
                let handle = tokio::spawn(stream(request, id.clone(), tx));
                let mut streams = self.streams.lock();
                streams.retain(|_, handle| !handle.is_finished());
                streams.insert(id.clone(), handle);
            }
        }

        debug!("watch {} opened on {} ({:?})", id, self.base_url, mode);
        Watch { id, events: rx }
    }

    fn detach(&self, id: &WatchId) {
        if let Some(handle) = self.streams.lock().remove(id) {
            handle.abort();
            debug!("watch {} detached", id);
        }
    }

    fn description(&self) -> &str {
        &self.description
    }
}

impl Drop for RestTransport {
    fn drop(&mut self) {
        for (_, handle) in self.streams.lock().drain() {
            handle.abort();
        }
    }
}

async fn send(request: RequestBuilder) -> Result<Response, TransportError> {
    let response = request.send().await?;
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(TransportError::PermissionDenied(format!(
            "API returned status {}",
            status
        )));
    }

    if !status.is_success() {
        return Err(TransportError::Http(format!(
            "API returned status {}",
            status
        )));
    }

    Ok(response)
}

async fn fetch_once(request: RequestBuilder, tx: EventSender) {
    let result = async {
        let response = send(request).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Parse(e.to_string()))
    }
    .await;

    let event = match result {
        Ok(Value::Null) => TransportEvent::Snapshot(None),
        Ok(value) => TransportEvent::Snapshot(Some(value)),
        Err(e) => TransportEvent::Error(e),
    };
    let _ = tx.send(event);
}

async fn stream(request: RequestBuilder, id: WatchId, tx: EventSender) {
    let response = match send(request.header(ACCEPT, "text/event-stream")).await {
        Ok(response) => response,
        Err(e) => {
            let _ = tx.send(TransportEvent::Error(e));
            return;
        }
    };

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::default();
    let mut snapshot = Value::Null;

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.send(TransportEvent::Error(e.into()));
                return;
            }
        };

        for frame in decoder.push(&chunk) {
            let event = match StreamEvent::parse(&frame) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    warn!("watch {}: skipping frame: {}", id, e);
                    continue;
                }
            };

            let outgoing = match event {
                StreamEvent::Put { path, data } => {
                    apply(&mut snapshot, &path, data, false);
                    snapshot_event(&snapshot)
                }
                StreamEvent::Patch { path, data } => {
                    apply(&mut snapshot, &path, data, true);
                    snapshot_event(&snapshot)
                }
                StreamEvent::KeepAlive => continue,
                StreamEvent::Cancel(reason) => {
                    let _ = tx.send(TransportEvent::Error(TransportError::Cancelled(reason)));
                    return;
                }
                StreamEvent::AuthRevoked(reason) => {
                    let _ = tx.send(TransportEvent::Error(TransportError::PermissionDenied(
                        reason,
                    )));
                    return;
                }
            };

            if tx.send(outgoing).is_err() {
                // Receiver dropped
                debug!("watch {}: receiver dropped, closing stream", id);
                return;
            }
        }
    }

    let _ = tx.send(TransportEvent::Error(TransportError::Closed));
}

fn snapshot_event(snapshot: &Value) -> TransportEvent {
    match snapshot {
        Value::Null => TransportEvent::Snapshot(None),
        value => TransportEvent::Snapshot(Some(value.clone())),
    }
}

/// Builder for RestTransport.
#[derive(Debug, Default)]
pub struct RestTransportBuilder {
    base_url: Option<String>,
    auth_token: Option<String>,
    connect_timeout: Option<Duration>,
    no_proxy: bool,
}

impl RestTransportBuilder {
    /// Set the database base address (required).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set a credential sent as the `auth` query parameter.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set the connection timeout (default: 10 seconds).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Connect directly, ignoring proxy settings from the environment.
    pub fn no_proxy(mut self) -> Self {
        self.no_proxy = true;
        self
    }

    /// Build the transport.
    pub fn build(self) -> Result<RestTransport, TransportError> {
        let base_url = self
            .base_url
            .ok_or_else(|| TransportError::Connection("no database URL configured".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let mut client = Client::builder()
            .connect_timeout(self.connect_timeout.unwrap_or(Duration::from_secs(10)));
        if self.no_proxy {
            client = client.no_proxy();
        }
        let client = client.build()?;

        Ok(RestTransport {
            client,
            description: format!("rest: {}", base_url),
            base_url,
            auth_token: self.auth_token,
            streams: Mutex::new(HashMap::new()),
        })
    }
}
