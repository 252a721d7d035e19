//! The hub: registry ownership, join/departure, broadcast, heartbeat.
//!
//! # Locking
//!
//! The registry and the two pending-coordinator tables are separate lock
//! domains, each taken briefly and never held across a delivery await. The
//! KV store guards itself. Snapshots decouple fan-out from mutation: a
//! broadcast delivers to the membership observed at entry even while joins
//! and evictions proceed underneath it.
//!
//! # Departure
//!
//! All removal funnels through [`Hub::handle_departure`]: explicit
//! disconnects from the transport and dead-classified deliveries land in
//! the same path, and the registry removal decides idempotency — whoever
//! removes the entry first runs the notification chain (benchmark pruning,
//! map-reduce reassignment, `client-left` broadcast), everyone else
//! returns.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use brainhub_core::{ClientDescriptor, Delivery, Envelope, HubError, HubResult, NearestMatch};
use brainhub_storage::{KvBacking, KvStore, MemoryBacking, MemoryObjectStore, ObjectStore};

use crate::benchmark::PendingBenchmark;
use crate::mapreduce::PendingMapReduce;
use crate::registry::{Registry, RegistryEntry};
use crate::router;
use crate::session::{DEFAULT_DELIVERY_TIMEOUT, DEFAULT_QUEUE_CAPACITY, Session, SessionId};

/// Hub tunables.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Interval between heartbeat broadcasts.
    pub heartbeat_interval: Duration,
    /// Outbound queue capacity per session.
    pub session_queue_capacity: usize,
    /// How long a delivery may wait on a full outbound queue.
    pub delivery_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            session_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }
}

/// The coordination hub.
pub struct Hub {
    pub(crate) registry: Registry,
    pub(crate) kv: Arc<KvStore>,
    pub(crate) objects: Arc<dyn ObjectStore>,
    pub(crate) benchmarks: Mutex<HashMap<String, PendingBenchmark>>,
    pub(crate) mapreduces: Mutex<HashMap<String, PendingMapReduce>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    config: HubConfig,
}

impl Hub {
    /// Start a hub over in-memory stores and spawn its heartbeat task.
    pub async fn start(config: HubConfig) -> Arc<Self> {
        let backing: Arc<dyn KvBacking> = Arc::new(MemoryBacking::new());
        let objects: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        Self::start_with_stores(config, backing, objects).await
    }

    /// Start a hub over explicit backing stores.
    pub async fn start_with_stores(
        config: HubConfig,
        backing: Arc<dyn KvBacking>,
        objects: Arc<dyn ObjectStore>,
    ) -> Arc<Self> {
        let kv = KvStore::start(backing).await;
        let hub = Arc::new(Self {
            registry: Registry::new(),
            kv,
            objects,
            benchmarks: Mutex::new(HashMap::new()),
            mapreduces: Mutex::new(HashMap::new()),
            heartbeat: Mutex::new(None),
            config,
        });
        let handle = tokio::spawn(run_heartbeat(
            Arc::downgrade(&hub),
            hub.config.heartbeat_interval,
        ));
        *hub.heartbeat.lock().await = Some(handle);
        hub
    }

    /// Stop the heartbeat and the KV sweeper.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.heartbeat.lock().await.take() {
            handle.abort();
        }
        self.kv.shutdown().await;
        info!("Hub shut down");
    }

    /// Create a session handle sized per this hub's configuration.
    ///
    /// The transport adapter drains the returned receiver onto the wire.
    #[must_use]
    pub fn open_session(&self) -> (Arc<Session>, tokio::sync::mpsc::Receiver<Value>) {
        Session::channel(self.config.session_queue_capacity, self.config.delivery_timeout)
    }

    /// Register a session under a raw JSON descriptor.
    ///
    /// On success the joiner has received its `client-list`, the nearest
    /// neighbour (if any) its `client-match`, and everyone a
    /// `client-joined`. A failed `client-list` delivery rolls the join
    /// back. This is the one operation that fails with an error instead of
    /// a structured response, so the transport can reject the session.
    pub async fn join(
        self: &Arc<Self>,
        session: Arc<Session>,
        descriptor: &Value,
    ) -> HubResult<usize> {
        let descriptor = ClientDescriptor::from_value(descriptor)?;
        let total = self
            .registry
            .insert(RegistryEntry {
                session: Arc::clone(&session),
                descriptor: descriptor.clone(),
            })
            .await;
        info!(client = %descriptor.id, total, "Client joined");

        let nearest = self.registry.find_nearest(&descriptor, session.id()).await;

        let clients: Vec<ClientDescriptor> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .map(|entry| entry.descriptor)
            .collect();
        let client_list = Envelope::ClientList {
            clients,
            nearest: nearest.as_ref().map(|(entry, d)| NearestMatch {
                peer: entry.descriptor.clone(),
                distance: *d,
            }),
            commands: router::command_names(),
        };
        match session.deliver(client_list.to_value()).await {
            Delivery::Ok => {},
            Delivery::Transient(reason) | Delivery::Dead(reason) => {
                self.registry.remove_by_session(session.id()).await;
                session.dispose();
                warn!(client = %descriptor.id, %reason, "client-list delivery failed, join rolled back");
                return Err(HubError::JoinDeliveryFailed(reason));
            },
        }

        if let Some((neighbour, d)) = nearest {
            let client_match = Envelope::ClientMatch {
                client: descriptor.clone(),
                distance: d,
                message: "hello".into(),
            };
            match neighbour.session.deliver(client_match.to_value()).await {
                Delivery::Ok => {},
                Delivery::Transient(reason) => {
                    warn!(client = %neighbour.descriptor.id, %reason, "client-match delivery failed");
                },
                Delivery::Dead(reason) => {
                    info!(client = %neighbour.descriptor.id, %reason, "Evicting dead nearest neighbour");
                    self.handle_departure(neighbour.session.id()).await;
                },
            }
        }

        let total_now = self.registry.len().await;
        let joined = Envelope::ClientJoined {
            client: descriptor,
            total: total_now,
        };
        self.broadcast(&joined.to_value()).await;

        Ok(self.registry.len().await)
    }

    /// Explicit disconnect from the transport layer.
    pub async fn disconnect(self: &Arc<Self>, session_id: SessionId) {
        self.handle_departure(session_id).await;
    }

    /// Remove a client and run the departure chain exactly once.
    pub(crate) async fn handle_departure(self: &Arc<Self>, session_id: SessionId) {
        let Some(entry) = self.registry.remove_by_session(session_id).await else {
            return;
        };
        entry.session.dispose();
        let client_id = entry.descriptor.id.clone();
        info!(client = %client_id, "Client left");

        self.on_benchmark_departure(&client_id).await;
        self.on_mapreduce_departure(&client_id).await;

        let total = self.registry.len().await;
        let left = Envelope::ClientLeft {
            client: entry.descriptor,
            total,
        };
        self.broadcast(&left.to_value()).await;
    }

    /// Fan one message out to every registered client in parallel.
    ///
    /// Returns the registry size at function entry. Dead-classified
    /// recipients are evicted after the fan-out completes; transient
    /// failures are only logged.
    pub async fn broadcast(self: &Arc<Self>, message: &Value) -> usize {
        let snapshot = self.registry.snapshot().await;
        let recipients = snapshot.len();
        let deliveries = snapshot.iter().map(|entry| {
            let message = message.clone();
            async move { entry.session.deliver(message).await }
        });
        let outcomes = futures::future::join_all(deliveries).await;

        for (entry, outcome) in snapshot.iter().zip(outcomes) {
            match outcome {
                Delivery::Ok => {},
                Delivery::Transient(reason) => {
                    warn!(client = %entry.descriptor.id, %reason, "Broadcast delivery failed");
                },
                Delivery::Dead(reason) => {
                    info!(client = %entry.descriptor.id, %reason, "Evicting dead session");
                    // Boxed: eviction broadcasts client-left, which may in
                    // turn evict further dead sessions.
                    Box::pin(self.handle_departure(entry.session.id())).await;
                },
            }
        }
        recipients
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub").finish_non_exhaustive()
    }
}

/// Heartbeat loop: low-rate broadcast of the server's wall-clock time.
///
/// Holds only a `Weak` reference so a dropped hub stops the task; an
/// explicit [`Hub::shutdown`] aborts it immediately.
async fn run_heartbeat(hub: Weak<Hub>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(hub) = hub.upgrade() else {
            return;
        };
        let clients = hub.registry.len().await;
        let beat = Envelope::Heartbeat {
            server_time: chrono::Utc::now().to_rfc3339(),
            clients,
        };
        let delivered = hub.broadcast(&beat.to_value()).await;
        debug!(delivered, "Heartbeat broadcast");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn descriptor(id: &str, vector: &[f64]) -> Value {
        json!({"id": id, "joinedAt": "2026-08-01T00:00:00Z", "vector": vector})
    }

    async fn join_client(
        hub: &Arc<Hub>,
        id: &str,
        vector: &[f64],
    ) -> (Arc<Session>, mpsc::Receiver<Value>) {
        let (session, rx) = hub.open_session();
        hub.join(Arc::clone(&session), &descriptor(id, vector))
            .await
            .unwrap();
        (session, rx)
    }

    #[tokio::test]
    async fn join_rejects_malformed_descriptor() {
        let hub = Hub::start(HubConfig::default()).await;
        let (session, _rx) = hub.open_session();
        let err = hub
            .join(session, &json!({"id": "x", "vector": [1]}))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::MalformedDescriptor(_)));
        assert_eq!(hub.registry.len().await, 0);
    }

    #[tokio::test]
    async fn join_rolls_back_when_client_list_undeliverable() {
        let hub = Hub::start(HubConfig::default()).await;
        let (session, rx) = hub.open_session();
        drop(rx);
        let err = hub
            .join(session, &descriptor("a", &[0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::JoinDeliveryFailed(_)));
        assert_eq!(hub.registry.len().await, 0);
    }

    #[tokio::test]
    async fn registry_size_tracks_joins_and_leaves() {
        let hub = Hub::start(HubConfig::default()).await;
        let (a, _rx_a) = join_client(&hub, "a", &[0.0]).await;
        let (_b, _rx_b) = join_client(&hub, "b", &[1.0]).await;
        assert_eq!(hub.registry.len().await, 2);

        hub.disconnect(a.id()).await;
        assert_eq!(hub.registry.len().await, 1);
        // A second disconnect for the same session is a no-op.
        hub.disconnect(a.id()).await;
        assert_eq!(hub.registry.len().await, 1);
    }

    #[tokio::test]
    async fn broadcast_returns_entry_size_and_delivers() {
        let hub = Hub::start(HubConfig::default()).await;
        let (_a, mut rx_a) = join_client(&hub, "a", &[0.0]).await;
        // Drain the join traffic.
        while rx_a.try_recv().is_ok() {}

        let count = hub.broadcast(&json!({"type": "play-audio", "name": "x.mp3"})).await;
        assert_eq!(count, 1);
        let got = rx_a.recv().await.unwrap();
        assert_eq!(got["type"], "play-audio");
    }

    #[tokio::test]
    async fn broadcast_evicts_dead_sessions() {
        let hub = Hub::start(HubConfig::default()).await;
        let (_a, _rx_a) = join_client(&hub, "a", &[0.0]).await;
        let (_b, rx_b) = join_client(&hub, "b", &[1.0]).await;
        drop(rx_b);

        let count = hub.broadcast(&json!({"type": "user-message"})).await;
        assert_eq!(count, 2, "size at entry counts the dead recipient");
        assert_eq!(hub.registry.len().await, 1);
    }

    #[tokio::test]
    async fn departed_client_gets_client_left_broadcast() {
        let hub = Hub::start(HubConfig::default()).await;
        let (_a, mut rx_a) = join_client(&hub, "a", &[0.0]).await;
        let (b, _rx_b) = join_client(&hub, "b", &[1.0]).await;
        while rx_a.try_recv().is_ok() {}

        hub.disconnect(b.id()).await;
        let got = rx_a.recv().await.unwrap();
        assert_eq!(got["type"], "client-left");
        assert_eq!(got["client"]["id"], "b");
        assert_eq!(got["total"], 1);
    }
}
