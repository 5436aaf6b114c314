//! In-process reference transport.
//!
//! Backs the same [`BusClient`] surface as a production broker with
//! per-subscriber channels, so a controller, its tests, and simulated edge
//! nodes can share one bus inside a single process. Subscribers poll with a
//! short timeout and re-check their shutdown flag between deliveries;
//! disconnected subscribers are pruned on the next publish.

use crate::client::{BusClient, FrameHandler};
use crate::error::BusError;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long a subscriber sleeps in the channel before re-checking its flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct StreamLog {
    next_seq: u64,
    entries: Vec<(String, Vec<u8>)>,
}

/// In-process message bus.
#[derive(Default)]
pub struct InProcBus {
    topics: Mutex<HashMap<String, Vec<Sender<Vec<u8>>>>>,
    streams: Mutex<HashMap<String, StreamLog>>,
    queues: Mutex<HashMap<String, (Sender<Vec<u8>>, Receiver<Vec<u8>>)>>,
}

impl InProcBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for the usual shared-handle usage.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of live subscribers on a topic (test/diagnostic aid).
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, |subs| subs.len())
    }
}

impl BusClient for InProcBus {
    fn publish(&self, topic: &str, frame: Vec<u8>) -> Result<(), BusError> {
        let mut topics = self.topics.lock();
        if let Some(subs) = topics.get_mut(topic) {
            // A failed send means the subscriber hung up; drop it here.
            let before = subs.len();
            subs.retain(|tx| tx.send(frame.clone()).is_ok());
            if subs.len() < before {
                debug!(topic, pruned = before - subs.len(), "dropped disconnected subscribers");
            }
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str, mut handler: FrameHandler, running: Arc<AtomicBool>) -> Result<(), BusError> {
        let (tx, rx) = channel::unbounded();
        self.topics.lock().entry(topic.to_string()).or_default().push(tx);

        while running.load(Ordering::SeqCst) {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(frame) => handler(frame),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    }

    fn stream_append(&self, stream: &str, frame: Vec<u8>) -> Result<String, BusError> {
        let mut streams = self.streams.lock();
        let log = streams.entry(stream.to_string()).or_default();
        let id = log.next_seq.to_string();
        log.next_seq += 1;
        log.entries.push((id.clone(), frame));
        Ok(id)
    }

    fn stream_read(&self, stream: &str, start_id: &str, count: usize) -> Result<Vec<(String, Vec<u8>)>, BusError> {
        let start: u64 = start_id.parse().unwrap_or(0);
        let streams = self.streams.lock();
        let Some(log) = streams.get(stream) else {
            return Ok(Vec::new());
        };
        Ok(log
            .entries
            .iter()
            .filter(|(id, _)| id.parse::<u64>().map_or(false, |seq| seq >= start))
            .take(count)
            .cloned()
            .collect())
    }

    fn queue_push(&self, queue: &str, frame: Vec<u8>) -> Result<(), BusError> {
        let mut queues = self.queues.lock();
        let (tx, _) = queues.entry(queue.to_string()).or_insert_with(channel::unbounded);
        tx.send(frame).map_err(|_| BusError::Closed)
    }

    fn queue_pop_timed(&self, queue: &str, timeout: Duration) -> Result<Option<Vec<u8>>, BusError> {
        let rx = {
            let mut queues = self.queues.lock();
            let (_, rx) = queues.entry(queue.to_string()).or_insert_with(channel::unbounded);
            rx.clone()
        };
        match rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BusError::Closed),
        }
    }
}
