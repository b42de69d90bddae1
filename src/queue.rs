//! Bounded FIFO shared between the receive loop and waiting callers.
//!
//! Pushes never block: when the queue is full the oldest entry is dropped.
//! Pops wait on a [`Notify`] with a deadline, and closing the queue wakes
//! every waiter so nothing sits out its full timeout after shutdown.
//!
//! Filtered pops go through a [`Watch`], which only sees entries pushed
//! after it was created. Entries older than every live watch are discarded
//! when a watch ends, so a stray entry cannot outlive the waits it predates.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Result of a filtered pop.
#[derive(Debug, PartialEq, Eq)]
pub enum PopOutcome<T> {
    /// An entry matching the filter was removed from the queue.
    Item(T),
    /// The deadline passed. `unmatched` holds the entries pushed since the
    /// watch started that the filter rejected.
    TimedOut { unmatched: Vec<T> },
    /// The queue was closed.
    Closed,
}

struct QueueState<T> {
    /// Entries tagged with their push sequence number.
    items: VecDeque<(u64, T)>,
    next_seq: u64,
    /// Marks of live [`Watch`]es; one entry per watch.
    watches: Vec<u64>,
    closed: bool,
}

pub struct WaitQueue<T> {
    name: &'static str,
    capacity: usize,
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

impl<T> WaitQueue<T> {
    /// Create an empty queue holding at most `capacity` entries.
    #[must_use]
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            state: Mutex::new(QueueState { items: VecDeque::new(), next_seq: 0, watches: Vec::new(), closed: false }),
            notify: Notify::new(),
        }
    }

    /// Append an entry. Returns `false` if the queue is closed.
    pub fn push(&self, item: T) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            if state.items.len() >= self.capacity {
                state.items.pop_front();
                tracing::warn!(queue = self.name, capacity = self.capacity, "channels: queue full, dropped oldest entry");
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.items.push_back((seq, item));
        }
        self.notify.notify_waiters();
        true
    }

    /// Remove the oldest entry without waiting.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.items.pop_front().map(|(_, item)| item)
    }

    /// Wait up to `timeout` for the oldest entry.
    pub async fn pop(&self, timeout: Duration) -> Option<T> {
        let deadline = deadline_after(timeout);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some((_, item)) = state.items.pop_front() {
                    return Some(item);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Start watching for entries pushed from now on.
    ///
    /// Entries already queued are invisible to the watch. When the last watch
    /// that could still see an entry is dropped, the entry is discarded.
    pub fn watch(&self) -> Watch<'_, T> {
        let mut state = self.lock();
        let mark = state.next_seq;
        state.watches.push(mark);
        Watch { queue: self, mark }
    }

    /// Close the queue, drop its contents and wake every waiter.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.items.clear();
        }
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // Entries stay consistent even if a holder panicked mid-push.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A registered interest in entries pushed after a point in time.
pub struct Watch<'a, T> {
    queue: &'a WaitQueue<T>,
    mark: u64,
}

impl<T: Clone> Watch<'_, T> {
    /// Wait up to `timeout` for the oldest entry pushed since the watch
    /// started and accepted by `accept`.
    ///
    /// Rejected entries are left in place, in order, for other watches.
    pub async fn pop_where<F>(&self, timeout: Duration, accept: F) -> PopOutcome<T>
    where
        F: Fn(&T) -> bool,
    {
        let deadline = deadline_after(timeout);
        let queue = self.queue;
        loop {
            let notified = queue.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = queue.lock();
                if state.closed {
                    return PopOutcome::Closed;
                }
                let found = state.items.iter().position(|(seq, item)| *seq >= self.mark && accept(item));
                if let Some((_, item)) = found.and_then(|idx| state.items.remove(idx)) {
                    return PopOutcome::Item(item);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let state = queue.lock();
                if state.closed {
                    return PopOutcome::Closed;
                }
                let unmatched = state
                    .items
                    .iter()
                    .filter(|(seq, _)| *seq >= self.mark)
                    .map(|(_, item)| item.clone())
                    .collect();
                return PopOutcome::TimedOut { unmatched };
            }
        }
    }
}

impl<T> Drop for Watch<'_, T> {
    fn drop(&mut self) {
        let mut state = self.queue.lock();
        if let Some(idx) = state.watches.iter().position(|mark| *mark == self.mark) {
            state.watches.swap_remove(idx);
        }
        let floor = state.watches.iter().copied().min().unwrap_or(state.next_seq);
        let before = state.items.len();
        state.items.retain(|(seq, _)| *seq >= floor);
        let discarded = before - state.items.len();
        if discarded > 0 {
            tracing::debug!(queue = self.queue.name, discarded, "channels: discarded entries no watch can see");
        }
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod tests;
