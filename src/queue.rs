//! The bounded object-pool queue that connects pipeline stages.
//!
//! Grounded on the teacher crate's `NCReadStream`/`NCWriteStream` pair in
//! `stream.rs`: a `Mutex`-guarded `VecDeque` plus a `Condvar`, with a
//! sticky end-of-stream flag. Unlike `stream.rs`'s copying `ReadStream`, a
//! receive pipeline moves owned, variably-sized objects (sample blocks,
//! soft-bit blocks, VCDUs, TP_PDUs) between stages, so every queue here is
//! the noncopy flavor: one `T` in flight per slot, not a shared ring
//! buffer of scalars.
//!
//! Four operations, matching the object-pool contract:
//! [`Queue::pop_for_write`] / [`Queue::push_write`] on the producer side and
//! [`Queue::pop_for_read`] / [`Queue::push_read`] on the consumer side, plus
//! a sticky [`Queue::close`].

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

struct Inner<T> {
    items: Mutex<VecDeque<T>>,
    cv: Condvar,
    capacity: usize,
    closed: std::sync::atomic::AtomicBool,
}

/// A bounded, multi-producer multi-consumer queue of owned values.
///
/// Cloning a `Queue` is cheap: it is a handle around a shared `Arc`, exactly
/// like `ReadStream`/`WriteStream` in the teacher crate.
pub struct Queue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// How long a blocking pop waits before re-checking for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

impl<T> Queue<T> {
    /// Create a new queue with the given object-pool capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::with_capacity(capacity)),
                cv: Condvar::new(),
                capacity,
                closed: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    /// Block until there is room to write, or the queue is closed.
    ///
    /// Returns `true` if there's room (the caller should build its item and
    /// call [`Queue::push_write`]), `false` if the queue was closed while
    /// waiting and no more items will ever be accepted.
    pub fn pop_for_write(&self) -> bool {
        let mut items = self.inner.items.lock().unwrap();
        loop {
            if self.inner.closed.load(std::sync::atomic::Ordering::Acquire) {
                return false;
            }
            if items.len() < self.inner.capacity {
                return true;
            }
            let (guard, _) = self.inner.cv.wait_timeout(items, POLL_INTERVAL).unwrap();
            items = guard;
        }
    }

    /// Publish an item produced after a successful [`Queue::pop_for_write`].
    pub fn push_write(&self, item: T) {
        let mut items = self.inner.items.lock().unwrap();
        items.push_back(item);
        drop(items);
        self.inner.cv.notify_all();
    }

    /// Block until an item is available to read, or the queue is closed and
    /// drained.
    ///
    /// Returns `None` once the queue is closed and empty: this is the
    /// end-of-stream signal a downstream stage uses to shut down.
    pub fn pop_for_read(&self) -> Option<T> {
        let mut items = self.inner.items.lock().unwrap();
        loop {
            if let Some(item) = items.pop_front() {
                drop(items);
                self.inner.cv.notify_all();
                return Some(item);
            }
            if self.inner.closed.load(std::sync::atomic::Ordering::Acquire) {
                return None;
            }
            let (guard, _) = self.inner.cv.wait_timeout(items, POLL_INTERVAL).unwrap();
            items = guard;
        }
    }

    /// Return an item to the front of the queue without consuming it,
    /// reversing a [`Queue::pop_for_read`]. Used when a stage peeks an item
    /// and decides it isn't ready to consume it yet.
    pub fn push_read(&self, item: T) {
        let mut items = self.inner.items.lock().unwrap();
        items.push_front(item);
        drop(items);
        self.inner.cv.notify_all();
    }

    /// Mark the queue closed: no further writes are accepted, and reads
    /// drain whatever remains before returning `None`. Closing is sticky
    /// and idempotent, and propagating it downstream is how pipeline
    /// shutdown cascades (mirrors the "closing a queue is sticky" note in
    /// the object-pool contract).
    pub fn close(&self) {
        self.inner.closed.store(true, std::sync::atomic::Ordering::Release);
        self.inner.cv.notify_all();
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Number of items currently queued, for diagnostics.
    pub fn len(&self) -> usize {
        self.inner.items.lock().unwrap().len()
    }

    /// Whether the queue currently holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let q: Queue<u32> = Queue::new(4);
        assert!(q.pop_for_write());
        q.push_write(42);
        assert_eq!(q.pop_for_read(), Some(42));
    }

    #[test]
    fn close_drains_then_returns_none() {
        let q: Queue<u32> = Queue::new(4);
        q.pop_for_write();
        q.push_write(1);
        q.close();
        assert_eq!(q.pop_for_read(), Some(1));
        assert_eq!(q.pop_for_read(), None);
    }

    #[test]
    fn pop_for_write_fails_once_closed() {
        let q: Queue<u32> = Queue::new(4);
        q.close();
        assert!(!q.pop_for_write());
    }

    #[test]
    fn push_read_undoes_a_pop() {
        let q: Queue<u32> = Queue::new(4);
        q.pop_for_write();
        q.push_write(7);
        let item = q.pop_for_read().unwrap();
        q.push_read(item);
        assert_eq!(q.pop_for_read(), Some(7));
    }

    #[test]
    fn capacity_blocks_second_writer() {
        let q: Queue<u32> = Queue::new(1);
        assert!(q.pop_for_write());
        q.push_write(1);
        let q2 = q.clone();
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let done2 = done.clone();
        let th = std::thread::spawn(move || {
            assert!(q2.pop_for_write());
            done2.store(true, std::sync::atomic::Ordering::SeqCst);
            q2.push_write(2);
        });
        std::thread::sleep(Duration::from_millis(50));
        assert!(!done.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(q.pop_for_read(), Some(1));
        th.join().unwrap();
        assert!(done.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(q.pop_for_read(), Some(2));
    }
}
