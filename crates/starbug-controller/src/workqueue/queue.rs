use crate::workqueue::rate_limiter::{ItemExponentialBackoff, RateLimiter};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

struct QueueState<T> {
    /// Items waiting to be handed out, in insertion order
    queue: VecDeque<T>,
    /// Items that need processing; superset of `queue`
    dirty: HashSet<T>,
    /// Items handed out by `get` and not yet `done`
    processing: HashSet<T>,
    shutting_down: bool,
}

/// Deduplicating FIFO of reconciliation keys shared by a pool of workers.
///
/// An item is queued at most once and handed to at most one worker at a
/// time. Adding an item while it is being processed marks it dirty, and it
/// is queued again when the worker calls [`WorkQueue::done`].
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    rate_limiter: Box<dyn RateLimiter<T>>,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    /// Create a queue with the default per-item exponential backoff
    pub fn new() -> Self {
        Self::with_rate_limiter(Box::new(ItemExponentialBackoff::<T>::default()))
    }

    pub fn with_rate_limiter(rate_limiter: Box<dyn RateLimiter<T>>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            rate_limiter,
        }
    }

    /// Mark `item` as needing processing
    pub fn add(&self, item: T) {
        let mut state = self.state.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for the next item; `None` once the queue is shut down
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    /// Finish processing `item`, re-queueing it if it was added meanwhile.
    ///
    /// # Panics
    ///
    /// When `item` was not handed out by [`WorkQueue::get`].
    pub fn done(&self, item: &T) {
        let mut state = self.state.lock();
        if !state.processing.remove(item) {
            panic!("done called for {:?}, which is not being processed", item);
        }
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Add `item` once `delay` has elapsed
    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(item);
            return;
        }

        let queue = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(queue) = queue.upgrade() {
                queue.add(item);
            }
        });
    }

    /// Add `item` after the rate limiter's backoff for it
    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        let delay = self.rate_limiter.when(&item);
        debug!("Requeueing {:?} in {:?}", item, delay);
        self.add_after(item, delay);
    }

    /// Stop tracking retries of `item`
    pub fn forget(&self, item: &T) {
        self.rate_limiter.forget(item);
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.rate_limiter.num_requeues(item)
    }

    /// Number of items waiting to be handed out
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse new items and release every blocked `get`
    pub fn shut_down(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }
}

impl<T> Default for WorkQueue<T>
where
    T: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
