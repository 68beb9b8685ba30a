/// Aggregation services
///
/// Each service owns one on-disk JSON document and applies events to it
/// exactly once per idempotency key, through a FIFO update queue. The
/// document is the database: every update is load-mutate-write-whole-file
/// with a synchronous flush, and a corrupt file on disk is backed up and
/// replaced with an empty default rather than crashing anything.
pub mod comments;
pub mod document;
pub mod followers;
pub mod gifters;
pub mod likes;
pub mod viewers;

pub use comments::CommentsLog;
pub use followers::FollowerCounter;
pub use gifters::GifterLedger;
pub use likes::LikeLedger;
pub use viewers::ViewerCounter;

use std::collections::VecDeque;
use std::sync::Mutex;

/// Single-consumer FIFO update queue.
///
/// `push_and_drain` appends the item and, unless another caller is
/// already draining, applies queued items one at a time in arrival order
/// until the queue is empty. Items pushed while a drain is running are
/// picked up by that same drain, so application is never interleaved or
/// reordered even when calls arrive from two platform feeds at once.
pub struct UpdateQueue<T> {
    state: Mutex<QueueState<T>>,
}

struct QueueState<T> {
    items: VecDeque<T>,
    draining: bool,
}

impl<T> Default for UpdateQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> UpdateQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                draining: false,
            }),
        }
    }

    pub fn push_and_drain<F: FnMut(T)>(&self, item: T, mut apply: F) {
        {
            let mut state = self.state.lock().expect("update queue poisoned");
            state.items.push_back(item);
            if state.draining {
                return;
            }
            state.draining = true;
        }

        // Iterative drain: the lock is released while applying so pushes
        // from the apply path (or other tasks) cannot deadlock.
        loop {
            let next = {
                let mut state = self.state.lock().expect("update queue poisoned");
                match state.items.pop_front() {
                    Some(item) => Some(item),
                    None => {
                        state.draining = false;
                        None
                    }
                }
            };

            match next {
                Some(item) => apply(item),
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_applies_in_fifo_order() {
        let queue = UpdateQueue::new();
        let mut seen = Vec::new();
        for i in 0..5 {
            queue.push_and_drain(i, |item| seen.push(item));
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_queue_drains_items_pushed_mid_drain() {
        let queue = std::sync::Arc::new(UpdateQueue::new());
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));

        let q = queue.clone();
        let s = seen.clone();
        queue.push_and_drain(1, move |item| {
            s.lock().unwrap().push(item);
            if item == 1 {
                // Re-entrant push: must be queued, not applied inline
                let s2 = s.clone();
                q.push_and_drain(2, move |inner| s2.lock().unwrap().push(inner));
            }
        });

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}
