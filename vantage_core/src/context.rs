//! Algorithm execution context.
//!
//! Holds everything a fusion algorithm reads and writes during a call:
//! the typed key-value store, recent per-node message history, pending
//! outbound messages, and the current state name. The context is not
//! internally synchronized; the fusion manager always accesses it under its
//! exclusive host lock.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use vantage_bus::messages::{L1ToL2, L2ToL1};

/// Per-node history depth.
const HISTORY_LIMIT: usize = 100;

/// Mutable state threaded through every algorithm call.
pub struct AlgorithmContext {
    /// Name of the algorithm state machine's current state
    pub current_state: String,
    /// Monotonic time of the last periodic update
    pub last_tick: Instant,
    /// Interval the tick thread drives `update` at
    pub tick_interval: Duration,

    latest: HashMap<String, L1ToL2>,
    history: HashMap<String, VecDeque<L1ToL2>>,
    store: HashMap<String, Box<dyn Any + Send>>,
    pending_outputs: Vec<L2ToL1>,
    requested_triggers: Vec<String>,
}

impl AlgorithmContext {
    pub fn new() -> Self {
        Self {
            current_state: String::new(),
            last_tick: Instant::now(),
            tick_interval: Duration::from_millis(100),
            latest: HashMap::new(),
            history: HashMap::new(),
            store: HashMap::new(),
            pending_outputs: Vec::new(),
            requested_triggers: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Typed store
    // ------------------------------------------------------------------

    /// Stores a value under `key`, replacing any previous value.
    pub fn set<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.store.insert(key.into(), Box::new(value));
    }

    /// Returns a clone of the value under `key`, or `None` on a missing key
    /// or a type mismatch.
    pub fn get<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.get_ref(key).cloned()
    }

    /// Borrows the value under `key` without cloning.
    pub fn get_ref<T: Any>(&self, key: &str) -> Option<&T> {
        self.store.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Mutably borrows the value under `key`.
    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.store.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Removes the value under `key`.
    pub fn remove(&mut self, key: &str) {
        self.store.remove(key);
    }

    // ------------------------------------------------------------------
    // Message history
    // ------------------------------------------------------------------

    /// Records an inbound message: updates the node's latest slot and appends
    /// to its bounded history ring.
    pub fn remember(&mut self, node_id: &str, msg: L1ToL2) {
        let ring = self.history.entry(node_id.to_string()).or_default();
        if ring.len() >= HISTORY_LIMIT {
            ring.pop_front();
        }
        ring.push_back(msg.clone());
        self.latest.insert(node_id.to_string(), msg);
    }

    /// Latest message from a node, if any.
    pub fn latest_from(&self, node_id: &str) -> Option<&L1ToL2> {
        self.latest.get(node_id)
    }

    /// Recent messages from a node, oldest first.
    pub fn history_from(&self, node_id: &str) -> impl Iterator<Item = &L1ToL2> {
        self.history.get(node_id).into_iter().flatten()
    }

    /// Node ids with recorded traffic.
    pub fn known_senders(&self) -> impl Iterator<Item = &str> {
        self.latest.keys().map(String::as_str)
    }

    // ------------------------------------------------------------------
    // Outputs & triggers
    // ------------------------------------------------------------------

    /// Queues an outbound message for the manager to ship.
    pub fn emit(&mut self, msg: L2ToL1) {
        self.pending_outputs.push(msg);
    }

    /// Takes all pending outputs, leaving the buffer empty. Called by the
    /// manager while it still holds the host lock; the actual publish happens
    /// after the lock is released.
    pub fn drain_outputs(&mut self) -> Vec<L2ToL1> {
        std::mem::take(&mut self.pending_outputs)
    }

    pub fn pending_output_count(&self) -> usize {
        self.pending_outputs.len()
    }

    /// Asks the owning algorithm to fire a state trigger once the current
    /// callback returns. State hooks cannot re-enter the machine directly, so
    /// deferred requests keep transition evaluation single-threaded.
    pub fn request_trigger(&mut self, trigger: impl Into<String>) {
        self.requested_triggers.push(trigger.into());
    }

    /// Takes all deferred trigger requests.
    pub fn drain_triggers(&mut self) -> Vec<String> {
        std::mem::take(&mut self.requested_triggers)
    }
}

impl Default for AlgorithmContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vantage_bus::messages::{L1Payload, NodeIdentity, NodeType};

    fn heartbeat(node_id: &str, seq: u64) -> L1ToL2 {
        L1ToL2::new(
            format!("{node_id}_{seq}"),
            seq,
            NodeIdentity::new(node_id, NodeType::Radar, ""),
            L1Payload::Heartbeat,
        )
    }

    #[test]
    fn test_store_set_get() {
        let mut ctx = AlgorithmContext::new();
        ctx.set("count", 3usize);
        assert_eq!(ctx.get::<usize>("count"), Some(3));

        ctx.set("count", 7usize);
        assert_eq!(ctx.get::<usize>("count"), Some(7), "set overwrites");
    }

    #[test]
    fn test_store_miss_and_mismatch() {
        let mut ctx = AlgorithmContext::new();
        assert_eq!(ctx.get::<usize>("absent"), None);

        ctx.set("label", String::from("alpha"));
        assert_eq!(ctx.get::<usize>("label"), None, "type mismatch yields None");
        assert_eq!(ctx.get::<String>("label").as_deref(), Some("alpha"));
    }

    #[test]
    fn test_get_mut_edits_in_place() {
        let mut ctx = AlgorithmContext::new();
        ctx.set("counts", std::collections::HashMap::<String, u32>::new());
        ctx.get_mut::<std::collections::HashMap<String, u32>>("counts")
            .unwrap()
            .insert("radar_001".into(), 2);
        let counts = ctx.get_ref::<std::collections::HashMap<String, u32>>("counts").unwrap();
        assert_eq!(counts.get("radar_001"), Some(&2));
    }

    #[test]
    fn test_history_ring_is_bounded() {
        let mut ctx = AlgorithmContext::new();
        for seq in 0..150 {
            ctx.remember("radar_001", heartbeat("radar_001", seq));
        }
        let history: Vec<_> = ctx.history_from("radar_001").collect();
        assert_eq!(history.len(), 100);
        assert_eq!(history[0].sequence_number, 50, "oldest entries evicted first");
        assert_eq!(ctx.latest_from("radar_001").unwrap().sequence_number, 149);
    }

    #[test]
    fn test_drain_outputs_clears() {
        let mut ctx = AlgorithmContext::new();
        ctx.emit(L2ToL1::broadcast(vantage_bus::messages::L2Payload::System(
            vantage_bus::messages::SystemCommand {
                command_type: vantage_bus::messages::SystemCommandType::SyncTime,
            },
        )));
        assert_eq!(ctx.pending_output_count(), 1);
        assert_eq!(ctx.drain_outputs().len(), 1);
        assert_eq!(ctx.pending_output_count(), 0);
        assert!(ctx.drain_outputs().is_empty());
    }

    #[test]
    fn test_trigger_requests_drain_in_order() {
        let mut ctx = AlgorithmContext::new();
        ctx.request_trigger("detection");
        ctx.request_trigger("confirmed");
        assert_eq!(ctx.drain_triggers(), vec!["detection", "confirmed"]);
        assert!(ctx.drain_triggers().is_empty());
    }
}
