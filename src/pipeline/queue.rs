use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::errors::{Error, Result};

/// Blocking queue with a fixed capacity between two pipeline stages.
///
/// `put` blocks while the queue is full and `get` blocks while it is empty. The queue
/// knows how many producers feed it; once all of them have closed and the remaining items
/// are drained, `get` returns `None`. When the owning topology aborts, blocked callers
/// wake up: `put` fails with `ErrorKind::Aborted` and `get` returns `None`.
pub struct WorkQueue<T> {
    name: String,
    capacity: usize,
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    aborted: Arc<AtomicBool>,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
}

struct QueueState<T> {
    items: VecDeque<T>,
    producers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub name: String,
    pub len: usize,
    pub capacity: usize,
    pub enqueued: u64,
    pub dequeued: u64,
}

impl<T> WorkQueue<T> {
    pub fn new(name: &str, capacity: usize, producers: usize) -> Self {
        WorkQueue::with_abort_flag(name, capacity, producers, Arc::new(AtomicBool::new(false)))
    }

    pub(crate) fn with_abort_flag(
        name: &str,
        capacity: usize,
        producers: usize,
        aborted: Arc<AtomicBool>,
    ) -> Self {
        let capacity = capacity.max(1);
        WorkQueue {
            name: name.to_string(),
            capacity,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(1 << 16)),
                producers,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            aborted,
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn put(&self, item: T) -> Result<()> {
        let mut state = self.lock();
        loop {
            if self.is_aborted() {
                return Err(Error::aborted());
            }
            if state.items.len() < self.capacity {
                break;
            }
            state = self.not_full.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state.items.push_back(item);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    pub fn get(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if self.is_aborted() {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                self.dequeued.fetch_add(1, Ordering::Relaxed);
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.producers == 0 {
                return None;
            }
            state = self.not_empty.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Marks one producer as finished.
    pub fn close_producer(&self) {
        let mut state = self.lock();
        state.producers = state.producers.saturating_sub(1);
        drop(state);
        self.not_empty.notify_all();
    }

    pub(crate) fn wake_all(&self) {
        let _state = self.lock();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            name: self.name.clone(),
            len: self.len(),
            capacity: self.capacity,
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
        }
    }
}

/// Type-erased view of a queue for stats and abort handling.
pub(crate) trait QueueHandle: Send + Sync {
    fn snapshot(&self) -> QueueSnapshot;
    fn wake_all(&self);
}

impl<T: Send> QueueHandle for WorkQueue<T> {
    fn snapshot(&self) -> QueueSnapshot {
        WorkQueue::snapshot(self)
    }

    fn wake_all(&self) {
        WorkQueue::wake_all(self)
    }
}

/// Closes one producer slot of a queue when dropped, also while unwinding.
pub(crate) struct ProducerGuard<T>(pub(crate) Arc<WorkQueue<T>>);

impl<T> Drop for ProducerGuard<T> {
    fn drop(&mut self) {
        self.0.close_producer();
    }
}
