//! Closable FIFO connecting the worker fleets.
//!
//! A [`Queue`] is the only way work moves between threads here. It is a
//! mutex-and-condvar rendition of a two-semaphore bounded buffer:
//! `consumable` wakes poppers, `produceable` wakes pushers. Closing the
//! queue wakes everyone; from then on pushes are dropped and pops return
//! `None`, which is how the worker loops learn to exit.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

pub(crate) struct Queue<T> {
    state: Mutex<State<T>>,
    consumable: Condvar,
    produceable: Condvar,
    capacity: usize,
    /// A growing queue never blocks producers: the buffer is extended
    /// instead. Required on the completion path, where a blocked producer
    /// would deadlock the pipeline's level-2 feedback loop.
    grows: bool,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> Queue<T> {
    /// Fixed-capacity queue; `push` applies backpressure when full.
    pub(crate) fn bounded(capacity: usize) -> Self {
        Queue {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            consumable: Condvar::new(),
            produceable: Condvar::new(),
            capacity,
            grows: false,
        }
    }

    /// Queue that starts at `capacity` and grows instead of ever blocking
    /// a producer.
    pub(crate) fn growing(capacity: usize) -> Self {
        Queue {
            grows: true,
            ..Self::bounded(capacity)
        }
    }

    /// Append an item, blocking while the queue is full (bounded mode
    /// only). Returns `false` if the queue was closed; the item is dropped.
    pub(crate) fn push(&self, item: T) -> bool {
        let mut state = self.lock();
        if !self.grows {
            while state.items.len() >= self.capacity && !state.closed {
                state = self
                    .produceable
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner());
            }
        }
        if state.closed {
            return false;
        }
        state.items.push_back(item);
        drop(state);
        self.consumable.notify_one();
        true
    }

    /// Take the oldest item, blocking while the queue is empty. Returns
    /// `None` once the queue is closed — immediately, without draining
    /// leftovers. Shutdown only happens after the termination predicate
    /// has proven the pipeline empty, so nothing is lost.
    pub(crate) fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                drop(state);
                if !self.grows {
                    self.produceable.notify_one();
                }
                return Some(item);
            }
            state = self
                .consumable
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Close the queue and wake every waiter on both sides. Idempotent;
    /// this is the workers' only shutdown signal.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        drop(state);
        self.consumable.notify_all();
        self.produceable.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
