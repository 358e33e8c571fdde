//! The cross-thread outbound queue.
//!
//! Producer threads push [`WriteRequest`]s from any thread; the loop
//! thread is the only consumer and drains the queue when its wakeup handle
//! is signalled. The mutex is held only across the push/pop itself, never
//! across I/O.

use crate::ClientId;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A single queued outbound buffer and the connection it is destined for.
///
/// The data is copied from the caller's slice at enqueue time; the drain
/// step consumes it, or drops it on the floor if the destination
/// connection is already gone.
#[derive(Debug)]
pub struct WriteRequest {
    /// Destination connection.
    pub client_id: ClientId,
    /// Owned response bytes.
    pub data: Vec<u8>,
}

/// Thread-safe FIFO of pending write requests.
#[derive(Debug, Default)]
pub struct SendQueue {
    inner: Mutex<VecDeque<WriteRequest>>,
}

impl SendQueue {
    /// An empty queue.
    pub fn new() -> SendQueue {
        SendQueue {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a request. Callable from any thread.
    pub fn push(&self, req: WriteRequest) {
        let mut lock = self.inner.lock().unwrap();

        lock.push_back(req);
    }

    /// Pop the oldest request. Only the loop thread calls this.
    pub fn pop(&self) -> Option<WriteRequest> {
        let mut lock = self.inner.lock().unwrap();

        lock.pop_front()
    }

    /// Drop everything still queued, returning how many requests were
    /// discarded. Used at teardown.
    pub fn clear(&self) -> usize {
        let mut lock = self.inner.lock().unwrap();

        let dropped = lock.len();
        lock.clear();
        dropped
    }
}
