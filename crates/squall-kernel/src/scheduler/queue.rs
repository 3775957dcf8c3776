//! The shared job queue — the only structure that crosses threads.
//!
//! FIFO, unbounded, condvar-blocking. Many submitters push; each worker
//! thread pops. `close()` stops intake and wakes every blocked worker;
//! items already queued still drain afterwards, which is the pool's
//! documented shutdown policy.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Thread-safe FIFO hand-off between submitters and workers.
pub struct JobQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> JobQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue an item. Returns the item back if the queue is closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(item);
            }
            state.items.push_back(item);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Dequeue the next item, blocking while the queue is open and
    /// empty. Returns `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Stop accepting new items and wake every blocked consumer.
    /// Idempotent. Already-queued items still drain.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
        }
        self.available.notify_all();
    }

    /// True once `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of items currently waiting.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// True if no items are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for JobQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn push_pop_is_fifo() {
        let queue = JobQueue::new();
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.push(3).unwrap();
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
    }

    #[test]
    fn pop_blocks_until_push() {
        let queue = Arc::new(JobQueue::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(20));
        queue.push(42).unwrap();
        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn close_rejects_new_pushes() {
        let queue = JobQueue::new();
        queue.close();
        assert_eq!(queue.push(1), Err(1));
        assert!(queue.is_closed());
    }

    #[test]
    fn close_drains_queued_items() {
        let queue = JobQueue::new();
        queue.push("a").unwrap();
        queue.push("b").unwrap();
        queue.close();
        assert_eq!(queue.pop(), Some("a"));
        assert_eq!(queue.pop(), Some("b"));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue: Arc<JobQueue<i32>> = Arc::new(JobQueue::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn close_is_idempotent() {
        let queue: JobQueue<i32> = JobQueue::new();
        queue.close();
        queue.close();
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn concurrent_pushers_all_land() {
        let queue = Arc::new(JobQueue::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let queue = queue.clone();
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    queue.push(i * 100 + j).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.len(), 800);
        let mut seen = Vec::with_capacity(800);
        for _ in 0..800 {
            seen.push(queue.pop().unwrap());
        }
        assert!(queue.is_empty());
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 800, "every pushed item arrives exactly once");
    }
}
