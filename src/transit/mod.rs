//! Transit: the layer between the broker and the transport.
//!
//! Transit speaks the cluster protocol: it serializes frames, correlates
//! REQUEST/RESPONSE pairs through a pending table, publishes heartbeats,
//! answers discovery, and turns heartbeat silence into disconnects.
//!
//! One pump task per subscribed topic moves frames from the transport into
//! [`Transit::handle_packet`]; incoming requests are served on their own
//! spawned task so a slow handler never blocks the request pump. All tasks
//! stop through a shared watch flag.

mod packet;

pub use packet::{
    discover_topic, disconnect_topic, event_topic, heartbeat_topic, info_broadcast_topic,
    info_topic, request_topic, response_topic, Packet, PacketPayload, PROTOCOL_VERSION,
    TOPIC_PREFIX,
};

use crate::broker::ServiceBroker;
use crate::context::Context;
use crate::error::BrokerError;
use crate::registry::NodeCatalog;
use crate::serializer::Serializer;
use crate::transport::Transporter;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

struct PendingRequest {
    tx: oneshot::Sender<Result<Value, BrokerError>>,
    node_id: String,
    action: String,
}

pub struct Transit {
    self_ref: Weak<Transit>,
    node_id: String,
    broker: Weak<ServiceBroker>,
    transporter: Arc<dyn Transporter>,
    serializer: Arc<dyn Serializer>,
    catalog: Arc<NodeCatalog>,
    pending: Mutex<HashMap<Uuid, PendingRequest>>,
    shutdown: watch::Sender<bool>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    started_at: Instant,
    system: Mutex<sysinfo::System>,
}

impl Transit {
    pub fn new(
        node_id: impl Into<String>,
        broker: Weak<ServiceBroker>,
        transporter: Arc<dyn Transporter>,
        serializer: Arc<dyn Serializer>,
        catalog: Arc<NodeCatalog>,
        heartbeat_interval: Duration,
        heartbeat_timeout: Duration,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new_cyclic(|self_ref: &Weak<Transit>| Self {
            self_ref: self_ref.clone(),
            node_id: node_id.into(),
            broker,
            transporter,
            serializer,
            catalog,
            pending: Mutex::new(HashMap::new()),
            shutdown,
            heartbeat_interval,
            heartbeat_timeout,
            started_at: Instant::now(),
            system: Mutex::new(sysinfo::System::new()),
        })
    }

    /// Owned handle for spawned tasks; valid while `self` is alive.
    fn arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("transit self-reference must be alive")
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Number of in-flight remote requests. Exposed for introspection.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Connect the transport, subscribe to the protocol topics, announce
    /// this node, and start the heartbeat and reaper tasks.
    pub async fn connect(&self) -> Result<(), BrokerError> {
        self.transporter
            .connect()
            .await
            .map_err(|e| BrokerError::custom(format!("Transporter connect failed: {}", e), 500))?;

        let topics = [
            request_topic(&self.node_id),
            response_topic(&self.node_id),
            info_topic(&self.node_id),
            info_broadcast_topic(),
            heartbeat_topic(),
            discover_topic(),
            event_topic(),
            disconnect_topic(),
        ];
        for topic in topics {
            let rx = self.transporter.subscribe(&topic).await.map_err(|e| {
                BrokerError::custom(format!("Subscribe to '{}' failed: {}", topic, e), 500)
            })?;
            self.spawn_pump(topic, rx);
        }

        // announce ourselves and ask who else is out there
        self.send_info(None).await;
        self.publish(&discover_topic(), PacketPayload::Discover).await;

        self.spawn_heartbeat();
        tracing::info!(node = %self.node_id, "transit connected");
        Ok(())
    }

    /// Broadcast DISCONNECT, fail the remaining pending requests, stop the
    /// background tasks, and drop the transport link.
    pub async fn disconnect(&self) {
        self.publish(&disconnect_topic(), PacketPayload::Disconnect).await;
        let _ = self.shutdown.send(true);

        let drained: Vec<PendingRequest> =
            self.lock_pending().drain().map(|(_, pending)| pending).collect();
        for pending in drained {
            let err = BrokerError::service_not_available(
                pending.action,
                Some(pending.node_id),
            );
            let _ = pending.tx.send(Err(err));
        }

        let _ = self.transporter.disconnect().await;
        tracing::info!(node = %self.node_id, "transit disconnected");
    }

    /// Dispatch a context to its target node and await the correlated
    /// response. Dropping the returned future (timeout race) leaves the
    /// pending entry behind; the pipeline removes it with [`Transit::cancel`].
    pub async fn request(&self, ctx: &Context) -> Result<Value, BrokerError> {
        let target = match ctx.node_id.clone() {
            Some(node) => node,
            None => {
                return Err(BrokerError::custom(
                    "Transit request needs a target node",
                    500,
                ))
            }
        };

        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(
            ctx.id,
            PendingRequest { tx, node_id: target.clone(), action: ctx.action.clone() },
        );

        let payload = PacketPayload::Request {
            id: ctx.id,
            action: ctx.action.clone(),
            params: ctx.params.clone(),
            meta: ctx.meta.clone(),
            timeout_ms: ctx.timeout.as_millis() as u64,
            level: ctx.level,
            parent_id: ctx.parent_id,
            request_id: ctx.request_id,
            metrics: ctx.metrics,
        };
        tracing::debug!(action = %ctx.action, node = %target, id = %ctx.id, "request →");
        if !self.publish(&request_topic(&target), payload).await {
            self.cancel(ctx.id);
            return Err(BrokerError::service_not_available(ctx.action.clone(), Some(target)));
        }

        match rx.await {
            Ok(result) => result,
            // responder dropped: transit shut down mid-flight
            Err(_) => Err(BrokerError::service_not_available(ctx.action.clone(), Some(target))),
        }
    }

    /// Remove a pending entry without resolving it. Returns whether the
    /// entry was still present.
    pub fn cancel(&self, id: Uuid) -> bool {
        self.lock_pending().remove(&id).is_some()
    }

    /// Fail every pending request aimed at a node that went away.
    pub fn reject_pending_for_node(&self, node_id: &str) {
        let rejected: Vec<PendingRequest> = {
            let mut pending = self.lock_pending();
            let ids: Vec<Uuid> = pending
                .iter()
                .filter(|(_, p)| p.node_id == node_id)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };
        for entry in rejected {
            tracing::warn!(action = %entry.action, node = %node_id, "pending request failed: node disconnected");
            let err = BrokerError::service_not_available(entry.action, Some(node_id.to_string()));
            let _ = entry.tx.send(Err(err));
        }
    }

    /// Broadcast an EVENT frame to the cluster.
    pub async fn send_event(&self, name: &str, data: &Value) {
        self.publish(
            &event_topic(),
            PacketPayload::Event { name: name.to_string(), data: data.clone() },
        )
        .await;
    }

    async fn send_info(&self, target: Option<&str>) {
        let Some(broker) = self.broker.upgrade() else { return };
        let payload = PacketPayload::Info {
            services: broker.local_service_info(),
            ip_list: Vec::new(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        };
        let topic = match target {
            Some(node) => info_topic(node),
            None => info_broadcast_topic(),
        };
        self.publish(&topic, payload).await;
    }

    async fn publish(&self, topic: &str, payload: PacketPayload) -> bool {
        let packet = Packet::new(self.node_id.clone(), payload);
        let bytes = match self.serializer.serialize(&packet) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(topic, error = %e, "frame encode failed");
                return false;
            }
        };
        match self.transporter.publish(topic, bytes).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(topic, error = %e, "frame publish failed");
                false
            }
        }
    }

    fn spawn_pump(&self, topic: String, mut rx: mpsc::Receiver<Vec<u8>>) {
        let transit = self.arc();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    frame = rx.recv() => match frame {
                        Some(bytes) => transit.receive(&topic, &bytes).await,
                        None => break,
                    },
                }
            }
            tracing::trace!(%topic, "pump stopped");
        });
    }

    fn spawn_heartbeat(&self) {
        let transit = self.arc();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(transit.heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick fires immediately; skip it so startup INFO lands first
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let payload = PacketPayload::Heartbeat {
                            cpu: transit.cpu_sample(),
                            uptime_secs: transit.started_at.elapsed().as_secs(),
                        };
                        transit.publish(&heartbeat_topic(), payload).await;
                        transit.reap_silent_nodes();
                    }
                }
            }
        });
    }

    fn reap_silent_nodes(&self) {
        let Some(broker) = self.broker.upgrade() else { return };
        for node_id in self.catalog.expired(self.heartbeat_timeout) {
            tracing::warn!(node = %node_id, "heartbeat timeout, dropping node");
            broker.node_disconnected(&node_id, true);
        }
    }

    fn cpu_sample(&self) -> Option<f64> {
        let mut system = self.system.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_cpu_usage();
        let usage = system.global_cpu_info().cpu_usage() as f64;
        // the very first refresh has no delta to measure against
        (usage > 0.0).then_some(usage / 100.0)
    }

    async fn receive(&self, topic: &str, bytes: &[u8]) {
        let packet = match self.serializer.deserialize(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::error!(topic, error = %e, "frame decode failed");
                return;
            }
        };
        if packet.sender == self.node_id {
            return;
        }
        self.handle_packet(packet).await;
    }

    async fn handle_packet(&self, packet: Packet) {
        let Some(broker) = self.broker.upgrade() else { return };
        let sender = packet.sender;
        match packet.payload {
            PacketPayload::Discover => {
                tracing::debug!(node = %sender, "discover received");
                self.send_info(Some(&sender)).await;
            }
            PacketPayload::Info { services, ip_list, uptime_secs } => {
                broker.register_remote_node(&sender, ip_list, services, uptime_secs);
            }
            PacketPayload::Heartbeat { cpu, uptime_secs } => {
                if !self.catalog.heartbeat(&sender, cpu, uptime_secs) {
                    tracing::trace!(node = %sender, "heartbeat from unknown node");
                }
            }
            PacketPayload::Disconnect => {
                broker.node_disconnected(&sender, false);
            }
            PacketPayload::Request {
                id,
                action,
                params,
                meta,
                level,
                parent_id,
                request_id,
                metrics,
                ..
            } => {
                let transit = self.arc();
                tokio::spawn(async move {
                    let ctx = Context::for_incoming(
                        id, &action, params, meta, level, parent_id, request_id, metrics,
                    );
                    let response = broker.handle_remote_request(ctx).await;
                    transit.publish(&response_topic(&sender), response).await;
                });
            }
            PacketPayload::Response { id, success, data, error } => {
                let Some(pending) = self.lock_pending().remove(&id) else {
                    tracing::trace!(id = %id, "response without pending request");
                    return;
                };
                let result = if success {
                    Ok(data.unwrap_or(Value::Null))
                } else {
                    Err(error
                        .map(|e| e.into_broker_error())
                        .unwrap_or_else(|| BrokerError::custom("Unknown remote error", 500)))
                };
                let _ = pending.tx.send(result);
            }
            PacketPayload::Event { name, data } => {
                broker.emit_local(&name, &data);
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, PendingRequest>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Transit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transit")
            .field("node_id", &self.node_id)
            .field("pending", &self.pending_count())
            .finish()
    }
}
