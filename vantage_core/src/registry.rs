//! Edge-node registry with atomic liveness expiry.
//!
//! Identity, last-seen time, and self-reported status for every node the
//! controller has heard from. All three maps live behind a single
//! reader-writer lock so their key sets stay identical at every observable
//! moment, and expiry is a single check-and-remove pass. A separate
//! list-then-remove sequence would race nodes that reconnect between the two
//! calls.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use vantage_bus::messages::{NodeIdentity, NodeStatus, NodeType, OperationalState};

#[derive(Default)]
struct RegistryInner {
    nodes: HashMap<String, NodeIdentity>,
    last_seen: HashMap<String, Instant>,
    status: HashMap<String, NodeStatus>,
}

impl RegistryInner {
    /// Inserts the identity if unseen and refreshes liveness. Identities are
    /// immutable after first observation, except that a placeholder minted
    /// from a bare heartbeat upgrades once the real advertisement arrives.
    fn observe(&mut self, identity: NodeIdentity, now: Instant) {
        let node_id = identity.node_id.clone();
        self.status.entry(node_id.clone()).or_insert(NodeStatus {
            node_id: node_id.clone(),
            operational: OperationalState::Online,
            cpu_usage: 0.0,
            memory_usage: 0.0,
        });
        let replace = match self.nodes.get(&node_id) {
            None => true,
            Some(existing) => existing.node_type == NodeType::Unknown && identity.node_type != NodeType::Unknown,
        };
        if replace {
            self.nodes.insert(node_id.clone(), identity);
        }
        self.last_seen.insert(node_id, now);
    }
}

/// Thread-safe registry of edge nodes.
#[derive(Default)]
pub struct NodeRegistry {
    inner: RwLock<RegistryInner>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or re-observes) a node. Idempotent; refreshes `last_seen`.
    pub fn register(&self, identity: NodeIdentity) {
        self.inner.write().observe(identity, Instant::now());
    }

    /// Refreshes a node's liveness. A heartbeat can race the node's
    /// capability advertisement, so an unknown id mints a minimal identity
    /// rather than dropping the keepalive.
    pub fn touch(&self, node_id: &str) {
        let mut inner = self.inner.write();
        if !inner.nodes.contains_key(node_id) {
            debug!(node_id, "heartbeat from unadvertised node, minting placeholder identity");
        }
        inner.observe(NodeIdentity::unknown(node_id), Instant::now());
    }

    /// Records a node's self-reported status and refreshes `last_seen`.
    pub fn update_status(&self, status: NodeStatus) {
        let mut inner = self.inner.write();
        let now = Instant::now();
        inner.observe(NodeIdentity::unknown(&status.node_id), now);
        inner.status.insert(status.node_id.clone(), status);
    }

    /// Ids of nodes seen within `timeout`.
    pub fn get_active(&self, timeout: Duration) -> Vec<String> {
        let inner = self.inner.read();
        let now = Instant::now();
        inner
            .last_seen
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) < timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Identity snapshot for one node.
    pub fn get_node(&self, node_id: &str) -> Option<NodeIdentity> {
        self.inner.read().nodes.get(node_id).cloned()
    }

    /// Status snapshot for one node.
    pub fn get_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.inner.read().status.get(node_id).cloned()
    }

    /// Identity snapshots for every known node.
    pub fn list_all(&self) -> Vec<NodeIdentity> {
        self.inner.read().nodes.values().cloned().collect()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    /// Atomically removes every node silent for at least `timeout` and
    /// returns the ids actually removed. Runs under one exclusive
    /// acquisition: no observer can see an expired-but-present node, and a
    /// node that reconnects concurrently is either refreshed before the
    /// sweep (and survives) or removed and re-registered whole.
    pub fn check_and_remove_expired(&self, timeout: Duration) -> Vec<String> {
        let mut inner = self.inner.write();
        let now = Instant::now();
        let expired: Vec<String> = inner
            .last_seen
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) >= timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            inner.nodes.remove(id);
            inner.last_seen.remove(id);
            inner.status.remove(id);
        }
        expired
    }

    #[cfg(test)]
    fn key_sets_match(&self) -> bool {
        let inner = self.inner.read();
        inner.nodes.len() == inner.last_seen.len()
            && inner.nodes.len() == inner.status.len()
            && inner.nodes.keys().all(|k| inner.last_seen.contains_key(k) && inner.status.contains_key(k))
    }
}
