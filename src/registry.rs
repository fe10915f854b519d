//! Subscription registry.
//!
//! Tracks the live watch of each channel and forwards its snapshots to a
//! consumer callback. At most one subscription exists per channel:
//! subscribing again cancels the previous one first.
//!
//! Every subscription runs a task that drains the transport's events in
//! delivery order. Cancelling clears the subscription's active flag before
//! anything else, and the task checks that flag before each callback, so
//! events that arrive after a cancel are dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::data::Reading;
use crate::error::{Result, TransportError};
use crate::source::{Transport, TransportEvent, Watch, WatchId, WatchMode};

/// What a subscriber receives: a reading, or a transport failure.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Data(Reading),
    Error(TransportError),
}

impl SubscriptionEvent {
    pub fn into_result(self) -> Result<Reading, TransportError> {
        match self {
            SubscriptionEvent::Data(reading) => Ok(reading),
            SubscriptionEvent::Error(e) => Err(e),
        }
    }
}

/// Handle to a subscription returned by [`Registry::subscribe`].
///
/// The handle does not own the subscription; cancel it through the
/// registry.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    channel: String,
    watch: WatchId,
    active: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn watch_id(&self) -> &WatchId {
        &self.watch
    }

    /// Whether the subscription is still registered.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

struct Subscription {
    watch: WatchId,
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Registry of live subscriptions keyed by channel.
///
/// Construct one per transport and drop it at shutdown; dropping cancels
/// every subscription.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use sensorwatch::registry::{Registry, SubscriptionEvent};
/// use sensorwatch::source::ChannelTransport;
///
/// # tokio_test::block_on(async {
/// let transport = Arc::new(ChannelTransport::new("memory"));
/// let registry = Registry::new(transport.clone());
///
/// registry.subscribe("sensorData", |event| {
///     if let SubscriptionEvent::Data(reading) = event {
///         println!("pH = {:?}", reading.value("pH"));
///     }
/// });
/// assert!(registry.is_subscribed("sensorData"));
///
/// registry.cancel_all();
/// assert!(registry.is_empty());
/// # });
/// ```
pub struct Registry {
    transport: Arc<dyn Transport>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

impl Registry {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Open a continuous watch on `channel`.
    ///
    /// `on_event` receives [`SubscriptionEvent::Data`] for every non-null
    /// snapshot and [`SubscriptionEvent::Error`] for transport failures.
    /// An existing subscription on the same channel is cancelled first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe<F>(&self, channel: &str, on_event: F) -> SubscriptionHandle
    where
        F: FnMut(SubscriptionEvent) + Send + 'static,
    {
        let mut subscriptions = self.subscriptions.lock();

        if let Some(previous) = subscriptions.remove(channel) {
            debug!("replacing subscription on '{}'", channel);
            self.shutdown(previous);
        }

        let Watch { id, events } = self.transport.watch(channel, WatchMode::Continuous);
        let active = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(deliver(id.clone(), events, active.clone(), on_event));

        debug!("subscribed to '{}' via {}", channel, self.transport.description());
        subscriptions.insert(
            channel.to_string(),
            Subscription {
                watch: id.clone(),
                active: active.clone(),
                task,
            },
        );

        SubscriptionHandle {
            channel: channel.to_string(),
            watch: id,
            active,
        }
    }

    /// Subscribe and receive events through a channel instead of a callback.
    pub fn subscribe_stream(
        &self,
        channel: &str,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<SubscriptionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe(channel, move |event| {
            let _ = tx.send(event);
        });
        (handle, rx)
    }

    /// Cancel the subscription on `channel`.
    ///
    /// Returns `false` if there was none.
    pub fn cancel(&self, channel: &str) -> bool {
        let removed = self.subscriptions.lock().remove(channel);
        match removed {
            Some(subscription) => {
                self.shutdown(subscription);
                debug!("cancelled subscription on '{}'", channel);
                true
            }
            None => false,
        }
    }

    /// Cancel every subscription. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Subscription> = self
            .subscriptions
            .lock()
            .drain()
            .map(|(_, subscription)| subscription)
            .collect();

        let count = drained.len();
        for subscription in drained {
            self.shutdown(subscription);
        }
        if count > 0 {
            debug!("cancelled {} subscriptions", count);
        }
        count
    }

    /// Read the current value of `channel` once.
    ///
    /// Resolves to `None` when the channel holds no data. The registry is
    /// not touched.
    pub async fn read_once(&self, channel: &str) -> Result<Option<Reading>> {
        let Watch { id, mut events } = self.transport.watch(channel, WatchMode::Once);
        let event = events.recv().await;
        self.transport.detach(&id);

        match event {
            Some(TransportEvent::Snapshot(None)) => Ok(None),
            Some(TransportEvent::Snapshot(Some(payload))) => Ok(Reading::from_payload(payload)?),
            Some(TransportEvent::Error(e)) => Err(e.into()),
            None => Err(TransportError::Closed.into()),
        }
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.lock().contains_key(channel)
    }

    /// Channels with a live subscription, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.subscriptions.lock().keys().cloned().collect();
        channels.sort();
        channels
    }

    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.lock().is_empty()
    }

    fn shutdown(&self, subscription: Subscription) {
        subscription.active.store(false, Ordering::Release);
        subscription.task.abort();
        self.transport.detach(&subscription.watch);
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("transport", &self.transport.description())
            .field("channels", &self.channels())
            .finish()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

async fn deliver<F>(
    watch: WatchId,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    active: Arc<AtomicBool>,
    mut on_event: F,
) where
    F: FnMut(SubscriptionEvent) + Send + 'static,
{
    while let Some(event) = events.recv().await {
        if !active.load(Ordering::Acquire) {
            debug!("watch {}: dropping event after cancel", watch);
            break;
        }

        let outgoing = match event {
            TransportEvent::Snapshot(None) => continue,
            TransportEvent::Snapshot(Some(payload)) => match Reading::from_payload(payload) {
                Ok(Some(reading)) => SubscriptionEvent::Data(reading),
                Ok(None) => continue,
                Err(e) => {
                    warn!("watch {}: {}", watch, e);
                    SubscriptionEvent::Error(e)
                }
            },
            TransportEvent::Error(e) => {
                warn!("watch {}: transport error: {}", watch, e);
                SubscriptionEvent::Error(e)
            }
        };

        on_event(outgoing);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ChannelTransport;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn setup() -> (Arc<ChannelTransport>, Registry) {
        let transport = Arc::new(ChannelTransport::new("test"));
        let registry = Registry::new(transport.clone());
        (transport, registry)
    }

    async fn next(
        rx: &mut mpsc::UnboundedReceiver<SubscriptionEvent>,
    ) -> Option<SubscriptionEvent> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Let spawned tasks drain. Tests using this run on paused time, so the
    /// sleep returns as soon as the runtime is idle.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    /// Transport whose watches fail immediately.
    #[derive(Debug)]
    struct FailingTransport;

    impl Transport for FailingTransport {
        fn watch(&self, path: &str, _mode: WatchMode) -> Watch {
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(TransportEvent::Error(TransportError::PermissionDenied(
                path.to_string(),
            )));
            Watch {
                id: WatchId::next(path),
                events: rx,
            }
        }

        fn detach(&self, _id: &WatchId) {}

        fn description(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_subscribe_forwards_data() {
        let (transport, registry) = setup();
        transport.publish("sensorData", json!({ "TDS": 120, "pH": 7.2 }));

        assert_eq!(registry.transport().description(), "channel: test");

        let (handle, mut rx) = registry.subscribe_stream("sensorData");
        assert_eq!(handle.channel(), "sensorData");
        assert!(handle.is_active());

        let reading = next(&mut rx).await.unwrap().into_result().unwrap();
        assert_eq!(reading.value("TDS"), Some(120.0));

        transport.publish("sensorData", json!({ "TDS": 650 }));
        let reading = next(&mut rx).await.unwrap().into_result().unwrap();
        assert_eq!(reading.value("TDS"), Some(650.0));
    }

    #[tokio::test]
    async fn test_null_snapshot_is_skipped() {
        let (transport, registry) = setup();
        let (_handle, mut rx) = registry.subscribe_stream("sensorData");

        transport.publish("sensorData", json!({ "pH": 6.9 }));
        transport.publish("sensorData", serde_json::Value::Null);
        transport.publish("sensorData", json!({ "pH": 7.0 }));

        let first = next(&mut rx).await.unwrap().into_result().unwrap();
        let second = next(&mut rx).await.unwrap().into_result().unwrap();
        assert_eq!(first.value("pH"), Some(6.9));
        assert_eq!(second.value("pH"), Some(7.0));
    }

    #[tokio::test]
    async fn test_transport_error_is_distinct_event() {
        let (transport, registry) = setup();
        let (_handle, mut rx) = registry.subscribe_stream("sensorData");

        transport.fail("sensorData", TransportError::PermissionDenied("rules".into()));
        assert_eq!(
            next(&mut rx).await,
            Some(SubscriptionEvent::Error(TransportError::PermissionDenied(
                "rules".into()
            )))
        );
    }

    #[tokio::test]
    async fn test_scalar_payload_is_error() {
        let (transport, registry) = setup();
        let (_handle, mut rx) = registry.subscribe_stream("sensorData");

        transport.publish("sensorData", json!("offline"));
        assert_eq!(
            next(&mut rx).await,
            Some(SubscriptionEvent::Error(TransportError::Payload(
                "string".into()
            )))
        );
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_previous() {
        let (transport, registry) = setup();

        let (first, mut first_rx) = registry.subscribe_stream("sensorData");
        let (second, mut second_rx) = registry.subscribe_stream("sensorData");

        assert_eq!(registry.len(), 1);
        assert_eq!(first.watch_id().path(), second.watch_id().path());
        assert!(second.watch_id().seq() > first.watch_id().seq());
        assert!(!first.is_active());
        assert!(second.is_active());
        assert_eq!(transport.watcher_count("sensorData"), 1);

        transport.publish("sensorData", json!({ "pH": 7.0 }));

        assert!(next(&mut second_rx).await.is_some());
        // The first task was aborted, so its sender is gone
        assert_eq!(next(&mut first_rx).await, None);
    }

    #[tokio::test]
    async fn test_cancel() {
        let (transport, registry) = setup();
        let (handle, _rx) = registry.subscribe_stream("a");

        assert!(!registry.cancel("b"));
        assert!(registry.cancel("a"));
        assert!(!registry.cancel("a"));

        assert!(!handle.is_active());
        assert!(registry.is_empty());
        assert_eq!(transport.watcher_count("a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_stops_callbacks() {
        let (transport, registry) = setup();
        let calls = Arc::new(AtomicUsize::new(0));

        let channels = ["tank-1", "tank-2", "tank-3"];
        for channel in channels {
            let calls = calls.clone();
            registry.subscribe(channel, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(registry.channels(), vec!["tank-1", "tank-2", "tank-3"]);

        // Buffered but not yet delivered
        for channel in channels {
            transport.publish(channel, json!({ "TDS": 100 }));
        }

        assert_eq!(registry.cancel_all(), 3);
        assert_eq!(registry.len(), 0);

        for channel in channels {
            transport.publish(channel, json!({ "TDS": 200 }));
            assert_eq!(transport.watcher_count(channel), 0);
        }

        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_read_once_null() {
        let (transport, registry) = setup();

        assert_eq!(registry.read_once("sensorData").await.unwrap(), None);
        assert!(registry.is_empty());
        assert_eq!(transport.watcher_count("sensorData"), 0);
    }

    #[tokio::test]
    async fn test_read_once_value() {
        let (transport, registry) = setup();
        transport.publish("sensorData", json!({ "Turbidity": 0.4 }));

        let reading = registry.read_once("sensorData").await.unwrap().unwrap();
        assert_eq!(reading.value("Turbidity"), Some(0.4));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_read_once_error() {
        let registry = Registry::new(Arc::new(FailingTransport));

        let err = registry.read_once("sensorData").await.unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Transport(TransportError::PermissionDenied(_))
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_drop_detaches_watches() {
        let transport = Arc::new(ChannelTransport::new("test"));
        {
            let registry = Registry::new(transport.clone());
            registry.subscribe("a", |_| {});
            registry.subscribe("b", |_| {});
            assert_eq!(transport.watcher_count("a"), 1);
        }
        assert_eq!(transport.watcher_count("a"), 0);
        assert_eq!(transport.watcher_count("b"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_may_cancel_itself() {
        let (transport, registry) = setup();
        let registry = Arc::new(registry);
        let calls = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&registry);
        let counter = calls.clone();
        registry.subscribe("sensorData", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(registry) = weak.upgrade() {
                registry.cancel("sensorData");
            }
        });

        transport.publish("sensorData", json!({ "pH": 7 }));
        transport.publish("sensorData", json!({ "pH": 8 }));
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }
}
