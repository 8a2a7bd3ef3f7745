use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crossbeam_deque::{Injector, Steal};

use super::ChunkRef;

/// Entry queue of the pipeline, with an unbounded side lane for retries.
///
/// Failed chunks come back through [`reinject`](Self::reinject), which never
/// blocks, so dispatcher stages can re-queue work even while every bounded
/// queue ahead of them is full. The enqueue stage merges the retry lane into
/// the bounded input channel after the ordered chunk list has been sent.
///
/// Closing is one-way and idempotent; the mover closes the queue once every
/// file has been verified, and any retry arriving after that is dropped
/// because the work it represents is already obsolete.
pub struct InputQueue {
    retries: Injector<Arc<ChunkRef>>,
    closed: AtomicBool,
    lock: Mutex<()>,
    signal: Condvar
}

impl InputQueue {
    pub fn new() -> Self {
        Self {
            retries: Injector::new(),
            closed: AtomicBool::new(false),
            lock: Mutex::new(()),
            signal: Condvar::new()
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the queue, waking every waiter. Returns whether this call
    /// performed the close
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);

        if first {
            let _guard = self.lock.lock().unwrap();

            self.signal.notify_all();
        }

        first
    }

    /// Queue a chunk for another trip through the pipeline
    pub fn reinject(&self, chunk: Arc<ChunkRef>) {
        if self.is_closed() {
            tracing::debug!(chunk_id = %chunk.chunk_id, "Input queue closed, dropping retry");

            return;
        }

        self.retries.push(chunk);

        let _guard = self.lock.lock().unwrap();

        self.signal.notify_all();
    }

    pub fn retry_backlog(&self) -> usize {
        self.retries.len()
    }

    /// Next retry to merge, or `None` once the queue has been closed.
    ///
    /// A push can race the wait below, so the park is bounded instead of open.
    pub fn next_retry(&self) -> Option<Arc<ChunkRef>> {
        loop {
            if self.is_closed() {
                return None;
            }

            match self.retries.steal() {
                Steal::Success(chunk) => return Some(chunk),
                Steal::Retry => continue,

                Steal::Empty => {
                    let guard = self.lock.lock().unwrap();

                    if self.is_closed() {
                        return None;
                    }

                    drop(self.signal.wait_timeout(guard, Duration::from_millis(100)).unwrap());
                }
            }
        }
    }

    /// Park until the queue closes or the timeout elapses; true when closed
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let guard = self.lock.lock().unwrap();

        if self.is_closed() {
            return true;
        }

        drop(self.signal.wait_timeout(guard, timeout).unwrap());

        self.is_closed()
    }
}

impl Default for InputQueue {
    fn default() -> Self {
        Self::new()
    }
}
