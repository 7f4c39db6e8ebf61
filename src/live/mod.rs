//! Per-tenant live update fan-out.
//!
//! Order-change notifications reach every listener subscribed to a tenant,
//! regardless of which process produced the event. Local listeners are
//! always served through an in-process broadcast channel; tenants with
//! cross-process delivery enabled additionally publish through a shared
//! transport (Redis in production), and inbound foreign payloads are
//! mirrored back into the local channel so listeners cannot tell the two
//! origins apart.

pub mod transport;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use transport::{CrossProcessTransport, InboundMessage};

/// Closed set of domain event kinds carried by live updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveEventKind {
    OrderCreated,
    OrderUpdated,
    OrderDeleted,
    Heartbeat,
}

impl LiveEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LiveEventKind::OrderCreated => "order_created",
            LiveEventKind::OrderUpdated => "order_updated",
            LiveEventKind::OrderDeleted => "order_deleted",
            LiveEventKind::Heartbeat => "heartbeat",
        }
    }
}

/// One realtime notification. Ephemeral: lives on the wire and in channel
/// buffers between publish and delivery, never in a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveUpdate {
    pub tenant_id: String,
    pub event: LiveEventKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Cross-process envelope. The origin id lets a process skip payloads it
/// published itself when the transport mirrors them back.
#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    origin: Uuid,
    #[serde(flatten)]
    update: LiveUpdate,
}

/// Explicit listener registry: tenant id to broadcast channel, plus an
/// injected transport strategy for the cross-process path.
pub struct LiveUpdateBroker {
    channels: RwLock<HashMap<String, broadcast::Sender<LiveUpdate>>>,
    cross_counts: Mutex<HashMap<String, usize>>,
    transport: Option<Arc<dyn CrossProcessTransport>>,
    origin: Uuid,
    capacity: usize,
}

impl LiveUpdateBroker {
    pub fn new(capacity: usize, transport: Option<Arc<dyn CrossProcessTransport>>) -> Arc<Self> {
        Arc::new(Self {
            channels: RwLock::new(HashMap::new()),
            cross_counts: Mutex::new(HashMap::new()),
            transport,
            origin: Uuid::new_v4(),
            capacity,
        })
    }

    /// Transport channel name for a tenant.
    pub fn channel_name(tenant_id: &str) -> String {
        format!("live:{}", tenant_id)
    }

    /// Fan an event out to this tenant's listeners.
    ///
    /// Local delivery happens before this returns. The outbound transport
    /// publish (when `cross_process` is set and a transport is configured)
    /// is issued before returning as well; transport failures are logged
    /// and swallowed, since a realtime notification must never fail the
    /// business operation that produced it.
    pub async fn publish(
        &self,
        tenant_id: &str,
        event: LiveEventKind,
        data: Value,
        cross_process: bool,
    ) {
        let update = LiveUpdate {
            tenant_id: tenant_id.to_string(),
            event,
            data,
            timestamp: Utc::now(),
        };

        self.emit_local(&update);

        if cross_process {
            if let Some(transport) = &self.transport {
                let envelope = WireEnvelope {
                    origin: self.origin,
                    update,
                };
                match serde_json::to_string(&envelope) {
                    Ok(payload) => {
                        if let Err(e) = transport
                            .publish(&Self::channel_name(tenant_id), &payload)
                            .await
                        {
                            tracing::warn!(
                                "Cross-process publish failed for tenant {}: {}",
                                tenant_id,
                                e
                            );
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to serialize live update: {}", e);
                    }
                }
            }
        }
    }

    fn emit_local(&self, update: &LiveUpdate) {
        let tx = {
            let channels = self.channels.read().expect("channel registry poisoned");
            channels.get(&update.tenant_id).cloned()
        };
        if let Some(tx) = tx {
            // No receivers is fine; the send result only reports that
            let _ = tx.send(update.clone());
        }
    }

    /// Register a listener for one tenant.
    ///
    /// For cross-process tenants the shared transport subscription for the
    /// tenant's channel is established on the first listener and torn down
    /// when the last one detaches.
    pub async fn subscribe(self: &Arc<Self>, tenant_id: &str, cross_process: bool) -> Subscription {
        let rx = {
            let mut channels = self.channels.write().expect("channel registry poisoned");
            channels
                .entry(tenant_id.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };

        if cross_process {
            if let Some(transport) = &self.transport {
                let first = {
                    let mut counts = self.cross_counts.lock().expect("cross counts poisoned");
                    let count = counts.entry(tenant_id.to_string()).or_insert(0);
                    *count += 1;
                    *count == 1
                };
                if first {
                    if let Err(e) = transport.subscribe(&Self::channel_name(tenant_id)).await {
                        tracing::warn!(
                            "Transport subscribe failed for tenant {}: {}",
                            tenant_id,
                            e
                        );
                    }
                }
            }
        }

        Subscription {
            rx,
            guard: SubscriptionGuard {
                inner: Some(GuardInner {
                    broker: Arc::clone(self),
                    tenant_id: tenant_id.to_string(),
                    cross_process,
                }),
            },
        }
    }

    /// Mirror an inbound transport payload into the local channel.
    ///
    /// Own-origin envelopes are dropped (the transport echoes our own
    /// publishes back to us), and nothing is ever re-published outward, so
    /// payloads cannot loop between processes.
    pub fn handle_transport_message(&self, channel: &str, payload: &str) {
        let envelope: WireEnvelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Undecodable live payload on {}: {}", channel, e);
                return;
            }
        };

        if envelope.origin == self.origin {
            return;
        }

        if channel != Self::channel_name(&envelope.update.tenant_id) {
            tracing::debug!(
                "Live payload channel {} does not match tenant {}",
                channel,
                envelope.update.tenant_id
            );
        }

        self.emit_local(&envelope.update);
    }

    /// Forward inbound transport messages into this broker until the
    /// transport's subscriber stream ends.
    pub fn spawn_inbound(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<InboundMessage>) {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            while let Some((channel, payload)) = rx.recv().await {
                broker.handle_transport_message(&channel, &payload);
            }
        });
    }

    /// Number of live local listeners for a tenant.
    pub fn local_listener_count(&self, tenant_id: &str) -> usize {
        let channels = self.channels.read().expect("channel registry poisoned");
        channels
            .get(tenant_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn release(&self, tenant_id: &str, cross_process: bool) {
        // Prune the channel once its last receiver is gone
        {
            let mut channels = self.channels.write().expect("channel registry poisoned");
            if let Some(tx) = channels.get(tenant_id) {
                if tx.receiver_count() == 0 {
                    channels.remove(tenant_id);
                }
            }
        }

        if !cross_process {
            return;
        }

        let last = {
            let mut counts = self.cross_counts.lock().expect("cross counts poisoned");
            match counts.get_mut(tenant_id) {
                Some(count) => {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        counts.remove(tenant_id);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if last {
            if let Some(transport) = self.transport.clone() {
                // Detach may run outside a runtime (sync drop in tests);
                // transport teardown is best-effort either way
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let channel = Self::channel_name(tenant_id);
                    handle.spawn(async move {
                        if let Err(e) = transport.unsubscribe(&channel).await {
                            tracing::debug!("Transport unsubscribe failed for {}: {}", channel, e);
                        }
                    });
                }
            }
        }
    }
}

/// A registered listener. Dropping it (or calling [`Subscription::unsubscribe`])
/// detaches the listener; detachment runs exactly once.
pub struct Subscription {
    rx: broadcast::Receiver<LiveUpdate>,
    guard: SubscriptionGuard,
}

impl Subscription {
    pub async fn recv(&mut self) -> Result<LiveUpdate, broadcast::error::RecvError> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<LiveUpdate, broadcast::error::TryRecvError> {
        self.rx.try_recv()
    }

    /// Explicitly detach this listener. Consuming self makes a double
    /// detach unrepresentable; the guard also detaches on drop, so letting
    /// a subscription fall out of scope is equivalent.
    pub fn unsubscribe(self) {}

    /// Convert into a stream of updates for the SSE layer. The guard rides
    /// inside the stream and detaches when the stream is dropped, i.e. when
    /// the client disconnects.
    pub fn into_stream(self) -> impl futures::Stream<Item = LiveUpdate> {
        use futures::StreamExt;
        use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
        use tokio_stream::wrappers::BroadcastStream;

        let Subscription { rx, guard } = self;
        BroadcastStream::new(rx).filter_map(move |result| {
            let _detach_on_drop = &guard;
            futures::future::ready(match result {
                Ok(update) => Some(update),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!("Live stream lagged, skipped {} updates", skipped);
                    None
                }
            })
        })
    }
}

struct GuardInner {
    broker: Arc<LiveUpdateBroker>,
    tenant_id: String,
    cross_process: bool,
}

struct SubscriptionGuard {
    inner: Option<GuardInner>,
}

impl SubscriptionGuard {
    fn detach(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.broker.release(&inner.tenant_id, inner.cross_process);
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::transport::TransportError;
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Default)]
    struct MockTransport {
        published: Mutex<Vec<(String, String)>>,
        subscribed: Mutex<Vec<String>>,
        unsubscribed: Mutex<Vec<String>>,
        fail_publish: bool,
    }

    #[async_trait]
    impl CrossProcessTransport for MockTransport {
        async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError> {
            if self.fail_publish {
                return Err(TransportError::Closed);
            }
            self.published
                .lock()
                .unwrap()
                .push((channel.to_string(), payload.to_string()));
            Ok(())
        }

        async fn subscribe(&self, channel: &str) -> Result<(), TransportError> {
            self.subscribed.lock().unwrap().push(channel.to_string());
            Ok(())
        }

        async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
            self.unsubscribed.lock().unwrap().push(channel.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn local_fan_out_delivers_before_publish_returns() {
        let broker = LiveUpdateBroker::new(32, None);
        let mut sub = broker.subscribe("482913", false).await;
        let mut other = broker.subscribe("777001", false).await;

        broker
            .publish("482913", LiveEventKind::OrderCreated, json!({"order": 7}), false)
            .await;

        let update = sub.try_recv().expect("listener should observe the publish");
        assert_eq!(update.event, LiveEventKind::OrderCreated);
        assert_eq!(update.data, json!({"order": 7}));
        assert_eq!(update.tenant_id, "482913");

        // A different tenant's listener never observes it
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_listeners_is_a_noop() {
        let broker = LiveUpdateBroker::new(32, None);
        broker
            .publish("482913", LiveEventKind::OrderDeleted, json!({}), false)
            .await;
    }

    #[tokio::test]
    async fn cross_process_publish_reaches_transport() {
        let mock = Arc::new(MockTransport::default());
        let broker = LiveUpdateBroker::new(32, Some(mock.clone() as Arc<dyn CrossProcessTransport>));

        broker
            .publish("482913", LiveEventKind::OrderUpdated, json!({"order": 1}), true)
            .await;

        let published = mock.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "live:482913");
        assert!(published[0].1.contains("order_updated"));
    }

    #[tokio::test]
    async fn local_only_publish_never_reaches_transport() {
        let mock = Arc::new(MockTransport::default());
        let broker = LiveUpdateBroker::new(32, Some(mock.clone() as Arc<dyn CrossProcessTransport>));

        broker
            .publish("482913", LiveEventKind::OrderUpdated, json!({}), false)
            .await;

        assert!(mock.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_is_swallowed_and_local_delivery_proceeds() {
        let mock = Arc::new(MockTransport {
            fail_publish: true,
            ..Default::default()
        });
        let broker = LiveUpdateBroker::new(32, Some(mock as Arc<dyn CrossProcessTransport>));
        let mut sub = broker.subscribe("482913", true).await;

        broker
            .publish("482913", LiveEventKind::OrderCreated, json!({"order": 3}), true)
            .await;

        assert!(sub.try_recv().is_ok());
    }

    #[tokio::test]
    async fn foreign_payload_is_mirrored_without_echo() {
        let mock = Arc::new(MockTransport::default());
        let broker = LiveUpdateBroker::new(32, Some(mock.clone() as Arc<dyn CrossProcessTransport>));
        let mut sub = broker.subscribe("482913", true).await;

        let foreign = WireEnvelope {
            origin: Uuid::new_v4(),
            update: LiveUpdate {
                tenant_id: "482913".to_string(),
                event: LiveEventKind::OrderUpdated,
                data: json!({"order": 12}),
                timestamp: Utc::now(),
            },
        };
        let payload = serde_json::to_string(&foreign).unwrap();

        broker.handle_transport_message("live:482913", &payload);

        let update = sub.try_recv().expect("mirrored payload should be observed");
        assert_eq!(update.event, LiveEventKind::OrderUpdated);
        assert_eq!(update.data, json!({"order": 12}));

        // Mirroring must never publish back out to the transport
        assert!(mock.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn own_origin_payload_is_dropped() {
        let broker = LiveUpdateBroker::new(32, None);
        let mut sub = broker.subscribe("482913", false).await;

        let own = WireEnvelope {
            origin: broker.origin,
            update: LiveUpdate {
                tenant_id: "482913".to_string(),
                event: LiveEventKind::OrderCreated,
                data: json!({}),
                timestamp: Utc::now(),
            },
        };
        let payload = serde_json::to_string(&own).unwrap();

        broker.handle_transport_message("live:482913", &payload);
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn transport_subscription_is_shared_per_tenant() {
        let mock = Arc::new(MockTransport::default());
        let broker = LiveUpdateBroker::new(32, Some(mock.clone() as Arc<dyn CrossProcessTransport>));

        let sub_a = broker.subscribe("482913", true).await;
        let sub_b = broker.subscribe("482913", true).await;
        assert_eq!(mock.subscribed.lock().unwrap().len(), 1);

        drop(sub_a);
        assert!(mock.unsubscribed.lock().unwrap().is_empty());

        drop(sub_b);
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(
            *mock.unsubscribed.lock().unwrap(),
            vec!["live:482913".to_string()]
        );
    }

    #[tokio::test]
    async fn detach_is_idempotent_and_prunes_channels() {
        let broker = LiveUpdateBroker::new(32, None);
        let sub = broker.subscribe("482913", false).await;
        assert_eq!(broker.local_listener_count("482913"), 1);

        sub.unsubscribe();
        assert_eq!(broker.local_listener_count("482913"), 0);

        // Detaching an already-closed listener must not panic
        let sub2 = broker.subscribe("482913", false).await;
        drop(sub2);
        assert_eq!(broker.local_listener_count("482913"), 0);
    }

    #[test]
    fn wire_envelope_round_trips() {
        let envelope = WireEnvelope {
            origin: Uuid::new_v4(),
            update: LiveUpdate {
                tenant_id: "482913".to_string(),
                event: LiveEventKind::OrderDeleted,
                data: json!({"order": 9}),
                timestamp: Utc::now(),
            },
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""event":"order_deleted""#));
        assert!(json.contains(r#""tenant_id":"482913""#));

        let parsed: WireEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.update, envelope.update);
        assert_eq!(parsed.origin, envelope.origin);
    }
}
