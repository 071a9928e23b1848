//! Local publish/subscribe with hierarchical wildcards.
//!
//! Event names are dot-separated segments. A subscription pattern may use
//! `*` to match exactly one segment and `**` (as the final segment) to match
//! any remainder, including an empty one. Delivery is synchronous and in
//! subscription order; `once` subscriptions are removed before their first
//! delivery fires so reentrant emits cannot double-deliver them.
//!
//! Patterns are stored in a trie keyed on segments, so matching an event
//! costs O(depth) node visits rather than a scan of every subscription.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Event callback. Receives the concrete event name and its payload.
pub type EventHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Handle returned by [`EventBus::on`]/[`EventBus::once`] for unsubscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: u64,
    seq: u64,
    once: bool,
    handler: EventHandler,
}

#[derive(Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
    /// Subscriptions whose pattern ends exactly at this node.
    here: Vec<Subscription>,
    /// `**` subscriptions anchored at this node; they match any remainder.
    any_suffix: Vec<Subscription>,
}

impl TrieNode {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.here.is_empty() && self.any_suffix.is_empty()
    }

    fn prune(&mut self) {
        self.children.retain(|_, child| {
            child.prune();
            !child.is_empty()
        });
    }
}

#[derive(Default)]
struct BusInner {
    root: TrieNode,
    next_id: u64,
    next_seq: u64,
}

/// Process-local event bus.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `pattern`. Returns a handle usable with [`EventBus::off`].
    pub fn on(&self, pattern: &str, handler: EventHandler) -> SubscriptionId {
        self.subscribe(pattern, handler, false)
    }

    /// Subscribe for a single delivery.
    pub fn once(&self, pattern: &str, handler: EventHandler) -> SubscriptionId {
        self.subscribe(pattern, handler, true)
    }

    fn subscribe(&self, pattern: &str, handler: EventHandler, once: bool) -> SubscriptionId {
        let mut inner = self.lock();
        inner.next_id += 1;
        inner.next_seq += 1;
        let sub = Subscription { id: inner.next_id, seq: inner.next_seq, once, handler };
        let id = SubscriptionId(sub.id);

        let segments: Vec<&str> = pattern.split('.').collect();
        let mut node = &mut inner.root;
        for (i, segment) in segments.iter().enumerate() {
            if *segment == "**" && i == segments.len() - 1 {
                node.any_suffix.push(sub);
                return id;
            }
            node = node.children.entry((*segment).to_string()).or_default();
        }
        node.here.push(sub);
        id
    }

    /// Remove the subscription registered under `pattern` with this handle.
    pub fn off(&self, pattern: &str, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let segments: Vec<&str> = pattern.split('.').collect();
        let removed = {
            let mut node = &mut inner.root;
            let mut found = false;
            for (i, segment) in segments.iter().enumerate() {
                if *segment == "**" && i == segments.len() - 1 {
                    let before = node.any_suffix.len();
                    node.any_suffix.retain(|s| s.id != id.0);
                    found = node.any_suffix.len() != before;
                    break;
                }
                match node.children.get_mut(*segment) {
                    Some(child) => node = child,
                    None => return false,
                }
                if i == segments.len() - 1 {
                    let before = node.here.len();
                    node.here.retain(|s| s.id != id.0);
                    found = node.here.len() != before;
                }
            }
            found
        };
        if removed {
            inner.root.prune();
        }
        removed
    }

    /// Deliver `payload` to every matching subscriber, in subscription order.
    /// Returns how many handlers were invoked.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        let handlers = {
            let mut inner = self.lock();
            let segments: Vec<&str> = event.split('.').collect();
            let mut matches: Vec<Match> = Vec::new();
            collect(&inner.root, &segments, &mut matches);
            matches.sort_by_key(|m| m.seq);

            let mut pruned = false;
            for m in matches.iter().filter(|m| m.once) {
                remove_by_id(&mut inner.root, m.id);
                pruned = true;
            }
            if pruned {
                inner.root.prune();
            }
            matches
        };

        for m in &handlers {
            (m.handler)(event, payload);
        }
        handlers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct Match {
    seq: u64,
    id: u64,
    once: bool,
    handler: EventHandler,
}

fn collect(node: &TrieNode, segments: &[&str], out: &mut Vec<Match>) {
    for sub in &node.any_suffix {
        out.push(Match { seq: sub.seq, id: sub.id, once: sub.once, handler: sub.handler.clone() });
    }
    match segments.split_first() {
        None => {
            for sub in &node.here {
                out.push(Match {
                    seq: sub.seq,
                    id: sub.id,
                    once: sub.once,
                    handler: sub.handler.clone(),
                });
            }
        }
        Some((head, rest)) => {
            if let Some(child) = node.children.get(*head) {
                collect(child, rest, out);
            }
            if let Some(child) = node.children.get("*") {
                collect(child, rest, out);
            }
        }
    }
}

fn remove_by_id(node: &mut TrieNode, id: u64) -> bool {
    let before = node.here.len() + node.any_suffix.len();
    node.here.retain(|s| s.id != id);
    node.any_suffix.retain(|s| s.id != id);
    if node.here.len() + node.any_suffix.len() != before {
        return true;
    }
    node.children.values_mut().any(|child| remove_by_id(child, id))
}
