//! The message-bus client contract.
//!
//! The fusion controller treats the bus as an external collaborator with a
//! narrow surface: topic pub/sub for live traffic, append-only streams and
//! FIFO queues for offline inspection. Payloads are opaque frames; typed
//! records are encoded with [`crate::messages::encode_frame`] before they
//! reach the bus.

use crate::error::BusError;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked once per delivered frame.
pub type FrameHandler = Box<dyn FnMut(Vec<u8>) + Send>;

/// Thread-safe client for a topic/stream/queue message bus.
///
/// All operations may be called concurrently from multiple threads.
/// `subscribe` blocks the calling thread and is expected to run on a
/// dedicated, owned (never detached) thread.
pub trait BusClient: Send + Sync {
    /// Publishes one frame to every current subscriber of `topic`.
    fn publish(&self, topic: &str, frame: Vec<u8>) -> Result<(), BusError>;

    /// Delivers frames from `topic` to `handler` until `running` is cleared.
    ///
    /// Implementations must re-check `running` between deliveries so that a
    /// shutdown takes effect within one poll interval.
    fn subscribe(&self, topic: &str, handler: FrameHandler, running: Arc<AtomicBool>) -> Result<(), BusError>;

    /// Appends a frame to a stream, returning the assigned entry id.
    fn stream_append(&self, stream: &str, frame: Vec<u8>) -> Result<String, BusError>;

    /// Reads up to `count` entries with ids at or after `start_id` (`"0"`
    /// reads from the beginning).
    fn stream_read(&self, stream: &str, start_id: &str, count: usize) -> Result<Vec<(String, Vec<u8>)>, BusError>;

    /// Pushes a frame onto a FIFO queue.
    fn queue_push(&self, queue: &str, frame: Vec<u8>) -> Result<(), BusError>;

    /// Pops the next frame from a FIFO queue, waiting up to `timeout`.
    fn queue_pop_timed(&self, queue: &str, timeout: Duration) -> Result<Option<Vec<u8>>, BusError>;
}
