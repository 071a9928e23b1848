//! Cluster membership: the catalog of known peer nodes.
//!
//! Nodes enter the catalog on their first INFO frame, stay alive while
//! heartbeats arrive, and become unavailable on explicit DISCONNECT or when
//! the reaper finds their last heartbeat older than the configured timeout.

use crate::clock::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Action descriptor inside an INFO frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInfo {
    pub name: String,
    #[serde(default)]
    pub cache: bool,
}

/// Service descriptor inside an INFO frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub actions: Vec<ActionInfo>,
    #[serde(default)]
    pub events: Vec<String>,
}

/// One known peer.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub node_id: String,
    pub ip_list: Vec<String>,
    pub services: Vec<ServiceInfo>,
    pub available: bool,
    pub last_heartbeat_ms: u64,
    pub cpu: Option<f64>,
    pub uptime_secs: u64,
}

#[derive(Debug)]
pub struct NodeCatalog {
    nodes: Mutex<HashMap<String, NodeInfo>>,
    clock: Arc<dyn Clock>,
}

impl NodeCatalog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { nodes: Mutex::new(HashMap::new()), clock }
    }

    /// Record an INFO frame. Returns true when the node is new or was
    /// previously unavailable (i.e. this INFO reconnects it).
    pub fn upsert(
        &self,
        node_id: &str,
        ip_list: Vec<String>,
        services: Vec<ServiceInfo>,
        uptime_secs: u64,
    ) -> bool {
        let now = self.clock.now_millis();
        let mut nodes = self.lock();
        match nodes.get_mut(node_id) {
            Some(node) => {
                let reconnected = !node.available;
                node.ip_list = ip_list;
                node.services = services;
                node.available = true;
                node.last_heartbeat_ms = now;
                node.uptime_secs = uptime_secs;
                reconnected
            }
            None => {
                nodes.insert(
                    node_id.to_string(),
                    NodeInfo {
                        node_id: node_id.to_string(),
                        ip_list,
                        services,
                        available: true,
                        last_heartbeat_ms: now,
                        cpu: None,
                        uptime_secs,
                    },
                );
                true
            }
        }
    }

    /// Record a heartbeat. Returns false for unknown nodes, in which case
    /// the caller should re-discover the sender.
    pub fn heartbeat(&self, node_id: &str, cpu: Option<f64>, uptime_secs: u64) -> bool {
        let now = self.clock.now_millis();
        let mut nodes = self.lock();
        match nodes.get_mut(node_id) {
            Some(node) if node.available => {
                node.last_heartbeat_ms = now;
                node.cpu = cpu;
                node.uptime_secs = uptime_secs;
                true
            }
            _ => false,
        }
    }

    /// Mark a node unavailable. Returns false when it was already gone.
    pub fn mark_disconnected(&self, node_id: &str) -> bool {
        let mut nodes = self.lock();
        match nodes.get_mut(node_id) {
            Some(node) if node.available => {
                node.available = false;
                true
            }
            _ => false,
        }
    }

    /// Nodes whose last heartbeat is older than `timeout`.
    pub fn expired(&self, timeout: Duration) -> Vec<String> {
        let now = self.clock.now_millis();
        let timeout_ms = timeout.as_millis() as u64;
        self.lock()
            .values()
            .filter(|node| {
                node.available && now.saturating_sub(node.last_heartbeat_ms) >= timeout_ms
            })
            .map(|node| node.node_id.clone())
            .collect()
    }

    pub fn get(&self, node_id: &str) -> Option<NodeInfo> {
        self.lock().get(node_id).cloned()
    }

    pub fn list(&self) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = self.lock().values().cloned().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, NodeInfo>> {
        self.nodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
