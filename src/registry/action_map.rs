//! Per-action endpoint collections and the selection policy.

use super::endpoint::{CircuitState, Endpoint};
use crate::config::Strategy;
use rand::Rng;
use std::sync::Arc;

/// Ordered set of endpoints exposing one action, plus the round-robin
/// cursor. Lives behind the registry lock; selection never awaits.
pub struct ActionMap {
    endpoints: Vec<Arc<Endpoint>>,
    cursor: usize,
}

impl ActionMap {
    pub fn new() -> Self {
        Self { endpoints: Vec::new(), cursor: 0 }
    }

    /// Add an endpoint. Returns false when this node already exposes the
    /// action (the existing endpoint, with its breaker history, is kept).
    pub fn add(&mut self, endpoint: Arc<Endpoint>) -> bool {
        if self.endpoints.iter().any(|e| e.node_id == endpoint.node_id) {
            return false;
        }
        self.endpoints.push(endpoint);
        true
    }

    /// Remove the endpoint hosted on `node_id`.
    pub fn remove(&mut self, node_id: &str) -> bool {
        let before = self.endpoints.len();
        self.endpoints.retain(|e| e.node_id != node_id);
        self.endpoints.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    /// Endpoint on a specific node, breaker state ignored; the pipeline's
    /// breaker gate decides whether the call is admitted.
    pub fn get_by_node(&self, node_id: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.iter().find(|e| e.node_id == node_id).cloned()
    }

    /// Apply the selection policy:
    /// local preference, then the configured strategy over selectable
    /// endpoints, then a half-open recovery probe when everything is open.
    pub fn select(&mut self, strategy: Strategy, prefer_local: bool) -> Option<Arc<Endpoint>> {
        if prefer_local {
            if let Some(local) = self
                .endpoints
                .iter()
                .find(|e| e.is_local() && e.is_selectable())
            {
                return Some(local.clone());
            }
        }

        let selectable: Vec<&Arc<Endpoint>> =
            self.endpoints.iter().filter(|e| e.is_selectable()).collect();
        if !selectable.is_empty() {
            let picked = match strategy {
                Strategy::RoundRobin => {
                    let index = self.cursor % selectable.len();
                    self.cursor = self.cursor.wrapping_add(1);
                    selectable[index].clone()
                }
                Strategy::Random => {
                    selectable[rand::rng().random_range(0..selectable.len())].clone()
                }
            };
            if picked.breaker.state() == CircuitState::HalfOpen {
                picked.breaker.try_probe();
            }
            return Some(picked);
        }

        // every breaker is open; admit one probe if any is past its delay
        for endpoint in &self.endpoints {
            if endpoint.breaker.try_probe() {
                return Some(endpoint.clone());
            }
        }
        None
    }
}

impl Default for ActionMap {
    fn default() -> Self {
        Self::new()
    }
}
