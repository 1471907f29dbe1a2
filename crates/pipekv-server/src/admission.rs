//! Bounded admission ring between the host thread and the session workers.
//!
//! A fixed ring of slots with monotone head/tail counters; the host
//! produces connection records, session workers consume them. Both sides
//! block at the boundary, which is what bounds admission: with the ring
//! sized to the session cap, the host stops reading the registration pipe
//! once that many connections are pending.
//!
//! The producer side never blocks past a pending reset: [`SessionQueue::push`]
//! hands the record back as soon as the interrupt flag is raised, so a full
//! ring cannot keep the host thread from observing SIGUSR1.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Upper bound on how long a full-ring wait can outlive a raised
/// interrupt flag.
const FULL_RING_POLL: Duration = Duration::from_millis(50);

struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    len: usize,
}

/// Blocking bounded FIFO for pending sessions.
pub struct SessionQueue<T> {
    inner: Mutex<Ring<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> SessionQueue<T> {
    /// Creates a queue holding at most `capacity` records.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "admission ring needs at least one slot");
        Self {
            inner: Mutex::new(Ring {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
                len: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueues one record, blocking while the ring is full.
    ///
    /// Returns the record back as `Err` if `interrupt` is raised while
    /// waiting for a slot; the caller decides whether to retry after
    /// servicing the interrupt. The wait is timed so a flag raised
    /// mid-wait is observed within [`FULL_RING_POLL`].
    pub fn push(&self, item: T, interrupt: &AtomicBool) -> Result<(), T> {
        let mut ring = self.inner.lock();
        while ring.len == ring.slots.len() {
            if interrupt.load(Ordering::SeqCst) {
                return Err(item);
            }
            let _ = self.not_full.wait_for(&mut ring, FULL_RING_POLL);
        }
        let tail = ring.tail;
        ring.slots[tail] = Some(item);
        ring.tail = (tail + 1) % ring.slots.len();
        ring.len += 1;
        drop(ring);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeues the oldest record, blocking while the ring is empty.
    pub fn pop(&self) -> T {
        let mut ring = self.inner.lock();
        while ring.len == 0 {
            self.not_empty.wait(&mut ring);
        }
        let head = ring.head;
        let item = ring.slots[head].take().expect("occupied slot at head");
        ring.head = (head + 1) % ring.slots.len();
        ring.len -= 1;
        drop(ring);
        self.not_full.notify_one();
        item
    }
}
